//! Change detection between two snapshots of a source.

use crate::models::category::PullRequestCategory;
use crate::models::pull_request::PullRequestsData;
use crate::models::query_source::QuerySource;
use serde::Serialize;
use std::collections::BTreeSet;

/// Ids added and removed between two versions of a source.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Delta {
    pub added: BTreeSet<u64>,
    pub removed: BTreeSet<u64>,
}

impl Delta {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Notification raised for new pull requests in a source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct NotificationEvent {
    pub source_key: String,
    pub source_name: String,
    pub added_ids: Vec<u64>,
    /// Titles of the added pull requests, in snapshot order.
    pub added_titles: Vec<String>,
}

/// Categories announced when a pull request moves into them, in the order
/// their notifications go out.
const ANNOUNCED_CATEGORIES: [PullRequestCategory; 4] = [
    PullRequestCategory::Rereview,
    PullRequestCategory::MineApproved,
    PullRequestCategory::MineChangesRequested,
    PullRequestCategory::ReviewMissing,
];

/// Notification raised for pull requests that moved into a category.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CategoryNotification {
    pub source_key: String,
    pub category: PullRequestCategory,
    pub ids: Vec<u64>,
    /// Titles of the pull requests, in snapshot order.
    pub titles: Vec<String>,
}

impl CategoryNotification {
    /// Human label, e.g. "PRs approved".
    pub fn label(&self) -> &'static str {
        category_label(self.category).unwrap_or("PRs updated")
    }
}

/// Label for the categories worth announcing.
pub fn category_label(category: PullRequestCategory) -> Option<&'static str> {
    match category {
        PullRequestCategory::Rereview => Some("PRs to re-review"),
        PullRequestCategory::MineApproved => Some("PRs approved"),
        PullRequestCategory::MineChangesRequested => Some("PRs rejected"),
        PullRequestCategory::ReviewMissing => Some("PRs missing review"),
        PullRequestCategory::ReviewRequested | PullRequestCategory::MinePending => None,
    }
}

/// Compare two versions of the same source.
pub fn delta(old: &PullRequestsData, new: &PullRequestsData) -> Delta {
    let old_ids = old.ids();
    let new_ids = new.ids();

    Delta {
        added: new_ids.difference(&old_ids).copied().collect(),
        removed: old_ids.difference(&new_ids).copied().collect(),
    }
}

/// Notification for a source after a cycle, if one is due.
///
/// Fires only for notify-eligible sources with added items, and never for
/// the first successful sync of a source: without a synced baseline every
/// item would look new.
pub fn notification_for(
    source: &QuerySource,
    old: Option<&PullRequestsData>,
    new: &PullRequestsData,
) -> Option<NotificationEvent> {
    if !source.notify() {
        return None;
    }

    let old = old.filter(|data| data.has_synced())?;
    let changes = delta(old, new);
    if changes.added.is_empty() {
        return None;
    }

    let (added_ids, added_titles): (Vec<u64>, Vec<String>) = new
        .pull_requests
        .iter()
        .filter(|pr| changes.added.contains(&pr.id))
        .map(|pr| (pr.id, pr.title.clone()))
        .unzip();

    Some(NotificationEvent {
        source_key: source.key().to_string(),
        source_name: source.display_name().to_string(),
        added_ids,
        added_titles,
    })
}

/// Notifications for pull requests that entered an announced category.
///
/// A pull request counts when it is new to the source or its category
/// differs from the previous snapshot. Same eligibility as
/// [`notification_for`]: notify sources only, never on a baseline sync.
pub fn category_notifications(
    source: &QuerySource,
    old: Option<&PullRequestsData>,
    new: &PullRequestsData,
) -> Vec<CategoryNotification> {
    if !source.notify() {
        return Vec::new();
    }
    let Some(old) = old.filter(|data| data.has_synced()) else {
        return Vec::new();
    };

    ANNOUNCED_CATEGORIES
        .iter()
        .filter_map(|&category| {
            let (ids, titles): (Vec<u64>, Vec<String>) = new
                .pull_requests
                .iter()
                .filter(|pr| pr.category == category)
                .filter(|pr| old.get(pr.id).map_or(true, |prev| prev.category != pr.category))
                .map(|pr| (pr.id, pr.title.clone()))
                .unzip();

            (!ids.is_empty()).then(|| CategoryNotification {
                source_key: source.key().to_string(),
                category,
                ids,
                titles,
            })
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::category::PullRequestCategory;
    use crate::models::pull_request::{Author, PullRequestItem};
    use crate::models::query_source::{FilterSource, RepoSource};
    use chrono::Utc;

    fn data(last_updated: i64, ids: &[u64]) -> PullRequestsData {
        PullRequestsData {
            last_updated,
            pull_requests: ids
                .iter()
                .map(|&id| PullRequestItem {
                    id,
                    title: format!("PR {}", id),
                    repository_url: String::new(),
                    author: Author {
                        login: "alice".to_string(),
                        avatar_url: String::new(),
                    },
                    url: String::new(),
                    html_url: String::new(),
                    created_at: Utc::now(),
                    updated_at: Utc::now(),
                    category: PullRequestCategory::ReviewRequested,
                    is_new: false,
                })
                .collect(),
            last_error: None,
        }
    }

    fn filter(notify: bool) -> QuerySource {
        QuerySource::Filter(FilterSource {
            id: "team-reviews".to_string(),
            name: "Team reviews".to_string(),
            query: "is:pr".to_string(),
            notify,
        })
    }

    #[test]
    fn test_delta_against_self_is_empty() {
        let snapshot = data(100, &[1, 2, 3]);
        assert!(delta(&snapshot, &snapshot).is_empty());
    }

    #[test]
    fn test_delta_added_and_removed() {
        let changes = delta(&data(100, &[101, 102]), &data(200, &[102, 103]));
        assert_eq!(changes.added, BTreeSet::from([103]));
        assert_eq!(changes.removed, BTreeSet::from([101]));
    }

    #[test]
    fn test_notification_carries_added_items() {
        let event =
            notification_for(&filter(true), Some(&data(100, &[101, 102])), &data(200, &[102, 103]))
                .unwrap();
        assert_eq!(event.source_key, "team-reviews");
        assert_eq!(event.source_name, "Team reviews");
        assert_eq!(event.added_ids, vec![103]);
        assert_eq!(event.added_titles, vec!["PR 103".to_string()]);
    }

    #[test]
    fn test_no_notification_when_flag_off() {
        let event =
            notification_for(&filter(false), Some(&data(100, &[101])), &data(200, &[101, 102]));
        assert!(event.is_none());
    }

    #[test]
    fn test_no_notification_on_first_sync() {
        assert!(notification_for(&filter(true), None, &data(200, &[1, 2])).is_none());
    }

    #[test]
    fn test_no_notification_after_failed_first_sync() {
        let never_synced = data(0, &[]);
        assert!(notification_for(&filter(true), Some(&never_synced), &data(200, &[1])).is_none());
    }

    #[test]
    fn test_no_notification_when_only_removed() {
        let event = notification_for(&filter(true), Some(&data(100, &[1, 2])), &data(200, &[1]));
        assert!(event.is_none());
    }

    fn with_category(
        mut data: PullRequestsData,
        id: u64,
        category: PullRequestCategory,
    ) -> PullRequestsData {
        for pr in data.pull_requests.iter_mut().filter(|pr| pr.id == id) {
            pr.category = category;
        }
        data
    }

    #[test]
    fn test_category_change_is_announced() {
        let old = with_category(data(100, &[7, 8]), 7, PullRequestCategory::MinePending);
        let new = with_category(data(200, &[7, 8]), 7, PullRequestCategory::MineApproved);

        let events = category_notifications(&filter(true), Some(&old), &new);

        assert_eq!(
            events,
            vec![CategoryNotification {
                source_key: "team-reviews".to_string(),
                category: PullRequestCategory::MineApproved,
                ids: vec![7],
                titles: vec!["PR 7".to_string()],
            }]
        );
        assert_eq!(events[0].label(), "PRs approved");
        // Ids are unchanged, so nothing was added
        assert!(notification_for(&filter(true), Some(&old), &new).is_none());
    }

    #[test]
    fn test_unchanged_category_is_quiet() {
        let old = with_category(data(100, &[7]), 7, PullRequestCategory::MineApproved);
        let new = with_category(data(200, &[7]), 7, PullRequestCategory::MineApproved);
        assert!(category_notifications(&filter(true), Some(&old), &new).is_empty());
    }

    #[test]
    fn test_new_pull_request_in_announced_category() {
        let old = data(100, &[1]);
        let new = with_category(data(200, &[1, 2]), 2, PullRequestCategory::ReviewMissing);

        let events = category_notifications(&filter(true), Some(&old), &new);
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].category, PullRequestCategory::ReviewMissing);
        assert_eq!(events[0].ids, vec![2]);
    }

    #[test]
    fn test_quiet_categories_are_not_announced() {
        let old = with_category(data(100, &[1]), 1, PullRequestCategory::Rereview);
        let new = with_category(data(200, &[1]), 1, PullRequestCategory::ReviewRequested);
        assert!(category_notifications(&filter(true), Some(&old), &new).is_empty());
    }

    #[test]
    fn test_category_notifications_grouped_in_fixed_order() {
        let old = data(100, &[1, 2, 3]);
        let mut new = data(200, &[1, 2, 3]);
        new = with_category(new, 1, PullRequestCategory::ReviewMissing);
        new = with_category(new, 2, PullRequestCategory::Rereview);
        new = with_category(new, 3, PullRequestCategory::Rereview);

        let events = category_notifications(&filter(true), Some(&old), &new);
        let summary: Vec<(PullRequestCategory, Vec<u64>)> =
            events.into_iter().map(|e| (e.category, e.ids)).collect();
        assert_eq!(
            summary,
            vec![
                (PullRequestCategory::Rereview, vec![2, 3]),
                (PullRequestCategory::ReviewMissing, vec![1]),
            ]
        );
    }

    #[test]
    fn test_category_notifications_respect_baseline_and_flag() {
        let new = with_category(data(200, &[1]), 1, PullRequestCategory::MineApproved);
        assert!(category_notifications(&filter(true), None, &new).is_empty());
        assert!(category_notifications(&filter(true), Some(&data(0, &[])), &new).is_empty());

        let old = data(100, &[1]);
        assert!(category_notifications(&filter(false), Some(&old), &new).is_empty());
    }

    #[test]
    fn test_repo_sources_always_notify() {
        let repo = QuerySource::Repo(RepoSource {
            repo_name: "octo/widgets".to_string(),
            needed_approvals: 1,
        });
        let event = notification_for(&repo, Some(&data(100, &[])), &data(200, &[7])).unwrap();
        assert_eq!(event.source_name, "octo/widgets");
        assert_eq!(event.added_ids, vec![7]);
    }
}

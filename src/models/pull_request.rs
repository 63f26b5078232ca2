//! Snapshot models: pull requests grouped by source.

use super::category::PullRequestCategory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

/// Author of a pull request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Author {
    pub login: String,
    pub avatar_url: String,
}

/// A pull request as held in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestItem {
    /// Host-wide pull request id.
    pub id: u64,

    pub title: String,

    /// API URL of the repository (e.g. `https://api.github.com/repos/octo/widgets`).
    pub repository_url: String,

    pub author: Author,

    /// API URL of the pull request.
    pub url: String,

    /// URL of the pull request in the web UI.
    pub html_url: String,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    pub category: PullRequestCategory,

    /// Whether the item appeared since the source was last acknowledged.
    #[serde(default)]
    pub is_new: bool,
}

/// Per-source snapshot.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequestsData {
    /// Unix timestamp of the last successful fetch (0 if never synced).
    pub last_updated: i64,

    /// Items in fetch order.
    pub pull_requests: Vec<PullRequestItem>,

    /// Last terminal fetch error for this source, if the latest cycle failed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl PullRequestsData {
    /// Whether this source has completed at least one successful fetch.
    pub fn has_synced(&self) -> bool {
        self.last_updated > 0
    }

    /// Ids of every item in this source.
    pub fn ids(&self) -> BTreeSet<u64> {
        self.pull_requests.iter().map(|pr| pr.id).collect()
    }

    /// Look up an item by id.
    pub fn get(&self, id: u64) -> Option<&PullRequestItem> {
        self.pull_requests.iter().find(|pr| pr.id == id)
    }

    /// Number of items still flagged as new.
    pub fn new_count(&self) -> usize {
        self.pull_requests.iter().filter(|pr| pr.is_new).count()
    }
}

/// The full snapshot: source key to that source's data.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppData {
    pub pull_requests: BTreeMap<String, PullRequestsData>,
}

impl AppData {
    pub fn get(&self, source_key: &str) -> Option<&PullRequestsData> {
        self.pull_requests.get(source_key)
    }

    pub fn is_empty(&self) -> bool {
        self.pull_requests.is_empty()
    }

    /// Items of every source that fall into a category.
    pub fn items_in(&self, category: PullRequestCategory) -> Vec<&PullRequestItem> {
        self.pull_requests
            .values()
            .flat_map(|data| data.pull_requests.iter())
            .filter(|pr| pr.category == category)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u64, category: PullRequestCategory) -> PullRequestItem {
        PullRequestItem {
            id,
            title: format!("PR {}", id),
            repository_url: "https://api.github.com/repos/octo/widgets".to_string(),
            author: Author {
                login: "octocat".to_string(),
                avatar_url: String::new(),
            },
            url: String::new(),
            html_url: String::new(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
            category,
            is_new: false,
        }
    }

    #[test]
    fn test_has_synced() {
        let mut data = PullRequestsData::default();
        assert!(!data.has_synced());
        data.last_updated = 1_700_000_000;
        assert!(data.has_synced());
    }

    #[test]
    fn test_items_in_spans_sources() {
        let mut app = AppData::default();
        app.pull_requests.insert(
            "a".to_string(),
            PullRequestsData {
                last_updated: 1,
                pull_requests: vec![item(1, PullRequestCategory::Rereview)],
                last_error: None,
            },
        );
        app.pull_requests.insert(
            "b".to_string(),
            PullRequestsData {
                last_updated: 1,
                pull_requests: vec![
                    item(2, PullRequestCategory::Rereview),
                    item(3, PullRequestCategory::MinePending),
                ],
                last_error: None,
            },
        );
        let ids: Vec<u64> = app
            .items_in(PullRequestCategory::Rereview)
            .iter()
            .map(|pr| pr.id)
            .collect();
        assert_eq!(ids, vec![1, 2]);
    }

    #[test]
    fn test_last_error_omitted_when_absent() {
        let data = PullRequestsData::default();
        let json = serde_json::to_string(&data).unwrap();
        assert!(!json.contains("last_error"));
        let back: PullRequestsData = serde_json::from_str(&json).unwrap();
        assert_eq!(back, data);
    }
}

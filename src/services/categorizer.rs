//! Assigns each pull request exactly one category relative to the viewer.

use crate::models::category::PullRequestCategory;
use crate::models::pull_request::{Author, PullRequestItem};
use crate::models::query_source::QuerySource;
use crate::services::github_client::{repo_full_name, GitHubReview, RawItem, ReviewState};
use crate::services::source_registry::ApprovalRules;
use chrono::{DateTime, Utc};
use std::collections::{HashMap, HashSet};

/// Activity newer than the viewer's review by more than this counts as an
/// update. Submitting a review bumps `updated_at` itself.
pub const REVIEW_SETTLE_WINDOW_SECS: i64 = 5 * 60;

/// What the categorizer needs to know about the source an item came from.
#[derive(Debug, Clone, Copy)]
pub struct SourceContext<'a> {
    pub source: &'a QuerySource,
    pub approval_rules: &'a ApprovalRules,
}

impl<'a> SourceContext<'a> {
    pub fn new(source: &'a QuerySource, approval_rules: &'a ApprovalRules) -> Self {
        Self {
            source,
            approval_rules,
        }
    }

    /// Approvals needed before the item counts as approved.
    ///
    /// Repository sources carry their own threshold. Filter sources borrow
    /// the threshold of a repository source for the same repository.
    pub fn needed_approvals(&self, item: &RawItem) -> usize {
        match self.source {
            QuerySource::Repo(repo) => repo.needed_approvals,
            QuerySource::Filter(_) => {
                let repo_name = repo_full_name(&item.repository_url).unwrap_or_default();
                self.approval_rules.needed_approvals(&repo_name)
            }
        }
    }
}

/// A reviewer's effective review, and whether it has been superseded by a
/// new review request.
struct Verdict<'r> {
    review: &'r GitHubReview,
    re_requested: bool,
}

impl Verdict<'_> {
    fn counts_as(&self, state: ReviewState) -> bool {
        !self.re_requested && self.review.state == state
    }
}

/// Categorize one pull request.
pub fn categorize(item: &RawItem, ctx: &SourceContext<'_>, viewer: &str) -> PullRequestCategory {
    let requested: HashSet<String> = item
        .requested_reviewers
        .iter()
        .map(|login| login.to_ascii_lowercase())
        .collect();
    let by_user = group_by_user(&item.reviews);

    if item.user.login.eq_ignore_ascii_case(viewer) {
        let verdicts: Vec<Verdict<'_>> = by_user
            .iter()
            .filter_map(|(login, reviews)| {
                effective_review(reviews).map(|review| Verdict {
                    review,
                    re_requested: requested.contains(login),
                })
            })
            .collect();

        let approvals = verdicts
            .iter()
            .filter(|v| v.counts_as(ReviewState::Approved))
            .count();

        if approvals >= ctx.needed_approvals(item) {
            return PullRequestCategory::MineApproved;
        }
        if verdicts
            .iter()
            .any(|v| v.counts_as(ReviewState::ChangesRequested))
        {
            return PullRequestCategory::MineChangesRequested;
        }
        return PullRequestCategory::MinePending;
    }

    let viewer_key = viewer.to_ascii_lowercase();
    let viewer_requested = requested.contains(&viewer_key);

    match by_user.get(&viewer_key).and_then(|reviews| reviews.last()) {
        Some(latest) => {
            if viewer_requested
                || latest.state == ReviewState::Dismissed
                || updated_since(item.updated_at, latest.submitted_at)
            {
                PullRequestCategory::Rereview
            } else {
                PullRequestCategory::ReviewMissing
            }
        }
        None if viewer_requested => PullRequestCategory::ReviewRequested,
        None => PullRequestCategory::ReviewMissing,
    }
}

/// Categorize and normalize a fetched item for the snapshot.
pub fn categorize_item(item: RawItem, ctx: &SourceContext<'_>, viewer: &str) -> PullRequestItem {
    let category = categorize(&item, ctx, viewer);

    PullRequestItem {
        id: item.id,
        title: item.title,
        repository_url: item.repository_url,
        author: Author {
            login: item.user.login,
            avatar_url: item.user.avatar_url,
        },
        url: item.url,
        html_url: item.html_url,
        created_at: item.created_at,
        updated_at: item.updated_at,
        category,
        is_new: false,
    }
}

/// Submitted reviews grouped by lowercased login, oldest first.
///
/// Reviews without a user and unsubmitted drafts are skipped.
fn group_by_user(reviews: &[GitHubReview]) -> HashMap<String, Vec<&GitHubReview>> {
    let mut by_user: HashMap<String, Vec<&GitHubReview>> = HashMap::new();

    for review in reviews {
        if review.state == ReviewState::Pending {
            continue;
        }
        if let Some(user) = &review.user {
            by_user
                .entry(user.login.to_ascii_lowercase())
                .or_default()
                .push(review);
        }
    }

    // Stable, so reviews without a timestamp keep their API order
    for reviews in by_user.values_mut() {
        reviews.sort_by_key(|r| r.submitted_at);
    }

    by_user
}

/// Latest approving or blocking review, else the latest review of any kind.
fn effective_review<'r>(reviews: &[&'r GitHubReview]) -> Option<&'r GitHubReview> {
    reviews
        .iter()
        .rev()
        .find(|r| matches!(r.state, ReviewState::Approved | ReviewState::ChangesRequested))
        .or_else(|| reviews.last())
        .copied()
}

fn updated_since(updated_at: DateTime<Utc>, reviewed_at: Option<DateTime<Utc>>) -> bool {
    match reviewed_at {
        Some(reviewed_at) => {
            updated_at - reviewed_at > chrono::Duration::seconds(REVIEW_SETTLE_WINDOW_SECS)
        }
        None => false,
    }
}

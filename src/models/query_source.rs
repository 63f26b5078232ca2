//! Validated fetch sources.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Search qualifiers applied to every repository source.
const REPO_QUERY_PREFIX: &str = "is:pr is:open draft:false involves:@me";

/// A repository watched with an approval threshold.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoSource {
    /// Repository in `owner/repo` form.
    pub repo_name: String,

    /// Approvals required before an authored PR counts as approved.
    pub needed_approvals: usize,
}

/// A saved search filter.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSource {
    /// Stable unique identifier, used as the snapshot key.
    pub id: String,

    /// Display name.
    pub name: String,

    /// Search string passed verbatim to the host.
    pub query: String,

    /// Whether new pull requests in this filter raise a notification.
    pub notify: bool,
}

impl FilterSource {
    /// Create a filter with a freshly generated id.
    pub fn new(name: impl Into<String>, query: impl Into<String>, notify: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            name: name.into(),
            query: query.into(),
            notify,
        }
    }
}

/// One fetch unit, mapping to one entry in the snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum QuerySource {
    Repo(RepoSource),
    Filter(FilterSource),
}

impl QuerySource {
    /// Key of this source in the snapshot mapping.
    pub fn key(&self) -> &str {
        match self {
            Self::Repo(repo) => &repo.repo_name,
            Self::Filter(filter) => &filter.id,
        }
    }

    /// Human readable name, used in notifications.
    pub fn display_name(&self) -> &str {
        match self {
            Self::Repo(repo) => &repo.repo_name,
            Self::Filter(filter) => &filter.name,
        }
    }

    /// Whether this source may raise notifications.
    ///
    /// Repository sources carry no flag and always notify.
    pub fn notify(&self) -> bool {
        match self {
            Self::Repo(_) => true,
            Self::Filter(filter) => filter.notify,
        }
    }

    /// Search string sent to the host for this source.
    pub fn search_query(&self) -> String {
        match self {
            Self::Repo(repo) => format!("{} repo:{}", REPO_QUERY_PREFIX, repo.repo_name),
            Self::Filter(filter) => filter.query.clone(),
        }
    }
}

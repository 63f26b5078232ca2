//! Query source registry.
//!
//! Turns the user's source list into validated [`QuerySource`]s. This is the
//! single point where both config generations are normalized; everything
//! downstream only sees the tagged union.

use crate::error::ConfigError;
use crate::models::app_config::{AppConfig, SourceConfig};
use crate::models::query_source::{FilterSource, QuerySource, RepoSource};
use std::collections::{HashMap, HashSet};

/// Approvals needed when no repository source configures a threshold.
pub const DEFAULT_NEEDED_APPROVALS: usize = 1;

/// Validated sources plus the approval thresholds they define.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SourceRegistry {
    sources: Vec<QuerySource>,
    approval_rules: ApprovalRules,
}

/// Repository name to approval threshold, from the repository sources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ApprovalRules {
    by_repo: HashMap<String, usize>,
}

impl ApprovalRules {
    /// Threshold for a repository (`owner/repo`), falling back to the default.
    pub fn needed_approvals(&self, repo_name: &str) -> usize {
        self.by_repo
            .get(&repo_name.to_lowercase())
            .copied()
            .unwrap_or(DEFAULT_NEEDED_APPROVALS)
    }
}

impl SourceRegistry {
    /// Validate and normalize the configured sources.
    ///
    /// Order is preserved. Fails on the first invalid source rather than
    /// dropping it.
    pub fn load(config: &AppConfig) -> Result<Self, ConfigError> {
        let mut seen = HashSet::new();
        let mut sources = Vec::with_capacity(config.sources.len());
        let mut by_repo = HashMap::new();

        for entry in &config.sources {
            let source = normalize(entry)?;

            if !seen.insert(source.key().to_string()) {
                return Err(ConfigError::Duplicate(source.key().to_string()));
            }

            if let QuerySource::Repo(repo) = &source {
                by_repo.insert(repo.repo_name.to_lowercase(), repo.needed_approvals);
            }

            sources.push(source);
        }

        Ok(Self {
            sources,
            approval_rules: ApprovalRules { by_repo },
        })
    }

    pub fn sources(&self) -> &[QuerySource] {
        &self.sources
    }

    pub fn approval_rules(&self) -> &ApprovalRules {
        &self.approval_rules
    }

    pub fn len(&self) -> usize {
        self.sources.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.is_empty()
    }
}

/// Validate the configured sources, returning them in order.
pub fn load(config: &AppConfig) -> Result<Vec<QuerySource>, ConfigError> {
    SourceRegistry::load(config).map(|registry| registry.sources)
}

/// Convert one raw source into its validated form.
fn normalize(entry: &SourceConfig) -> Result<QuerySource, ConfigError> {
    match entry {
        SourceConfig::Repo {
            repo_name,
            needed_approvals,
        } => {
            let repo_name = repo_name.trim();
            if repo_name.is_empty() {
                return Err(ConfigError::MissingField("repo_name"));
            }
            let needed = usize::try_from(*needed_approvals).map_err(|_| {
                ConfigError::InvalidApprovalThreshold {
                    repo_name: repo_name.to_string(),
                    value: *needed_approvals,
                }
            })?;
            Ok(QuerySource::Repo(RepoSource {
                repo_name: repo_name.to_string(),
                needed_approvals: needed,
            }))
        }
        SourceConfig::Filter {
            id,
            name,
            query,
            notify,
        } => {
            if id.trim().is_empty() {
                return Err(ConfigError::MissingField("id"));
            }
            if name.trim().is_empty() {
                return Err(ConfigError::MissingField("name"));
            }
            if query.trim().is_empty() {
                return Err(ConfigError::EmptyQuery(id.clone()));
            }
            Ok(QuerySource::Filter(FilterSource {
                id: id.clone(),
                name: name.clone(),
                query: query.trim().to_string(),
                notify: *notify,
            }))
        }
    }
}

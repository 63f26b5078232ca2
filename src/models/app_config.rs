//! User configuration and its on-disk schema generations.
//!
//! Three generations of the config file exist in the wild:
//! - v1 stores saved search filters only, with no username;
//! - v2 stores a username and per-repository approval thresholds;
//! - v3 stores both kinds of source in one tagged list.
//!
//! All of them parse into the same [`AppConfig`]. Writing always produces v3.

use crate::error::ConfigError;
use serde::{Deserialize, Serialize};

/// Version written by [`AppConfig::to_json`].
pub const CURRENT_CONFIG_VERSION: u8 = 3;

/// A source as written by the user, before validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SourceConfig {
    Repo {
        repo_name: String,
        needed_approvals: i64,
    },
    Filter {
        id: String,
        name: String,
        query: String,
        #[serde(default)]
        notify: bool,
    },
}

/// Engine input supplied by the configuration collaborator.
#[derive(Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
    /// Personal access token for the code-hosting API.
    #[serde(rename = "github_token", default)]
    pub auth_token: Option<String>,

    /// Login of the configured user. Resolved from the token when absent.
    #[serde(rename = "username", default)]
    pub viewer_identity: Option<String>,

    #[serde(default)]
    pub sources: Vec<SourceConfig>,
}

// Keep the token out of logs.
impl std::fmt::Debug for AppConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppConfig")
            .field("auth_token", &self.auth_token.as_ref().map(|_| "<redacted>"))
            .field("viewer_identity", &self.viewer_identity)
            .field("sources", &self.sources)
            .finish()
    }
}

fn default_version() -> u8 {
    1
}

#[derive(Deserialize)]
struct VersionOnly {
    #[serde(default = "default_version")]
    version: u8,
}

#[derive(Deserialize)]
struct ConfigV1 {
    github_token: Option<String>,
    #[serde(default)]
    filters: Vec<FilterV1>,
}

#[derive(Deserialize)]
struct FilterV1 {
    id: String,
    name: String,
    query: String,
    #[serde(default)]
    notify: bool,
}

#[derive(Deserialize)]
struct ConfigV2 {
    github_token: Option<String>,
    username: Option<String>,
    #[serde(default)]
    repo_config: Vec<RepoConfigV2>,
}

#[derive(Deserialize)]
struct RepoConfigV2 {
    repo_name: String,
    needed_approvals: i64,
}

#[derive(Serialize)]
struct VersionedConfig<'a> {
    version: u8,
    #[serde(flatten)]
    config: &'a AppConfig,
}

impl AppConfig {
    /// Parse any supported generation of the config file.
    pub fn from_json(content: &str) -> Result<Self, ConfigError> {
        let version_only: VersionOnly =
            serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;

        log::debug!("Config version: {}", version_only.version);

        let config = match version_only.version {
            1 => {
                let v1: ConfigV1 =
                    serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
                Self {
                    auth_token: v1.github_token,
                    viewer_identity: None,
                    sources: v1
                        .filters
                        .into_iter()
                        .map(|f| SourceConfig::Filter {
                            id: f.id,
                            name: f.name,
                            query: f.query,
                            notify: f.notify,
                        })
                        .collect(),
                }
            }
            2 => {
                let v2: ConfigV2 =
                    serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?;
                Self {
                    auth_token: v2.github_token,
                    viewer_identity: v2.username,
                    sources: v2
                        .repo_config
                        .into_iter()
                        .map(|r| SourceConfig::Repo {
                            repo_name: r.repo_name,
                            needed_approvals: r.needed_approvals,
                        })
                        .collect(),
                }
            }
            CURRENT_CONFIG_VERSION => {
                serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string()))?
            }
            other => return Err(ConfigError::UnsupportedVersion(other)),
        };

        Ok(config)
    }

    /// Serialize as the current config generation.
    pub fn to_json(&self) -> Result<String, ConfigError> {
        serde_json::to_string_pretty(&VersionedConfig {
            version: CURRENT_CONFIG_VERSION,
            config: self,
        })
        .map_err(|e| ConfigError::Parse(e.to_string()))
    }

    /// The token, if one is configured and non-empty.
    pub fn token(&self) -> Option<&str> {
        self.auth_token
            .as_deref()
            .map(str::trim)
            .filter(|t| !t.is_empty())
    }
}

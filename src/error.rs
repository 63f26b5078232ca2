//! Error types for the sync engine.
//!
//! The domain errors (`ConfigError`, `FetchError`, `PersistError`, `SyncError`)
//! describe what went wrong inside a sync cycle. `AppError` is the
//! serializable error handed across the consumer boundary so the UI layer can
//! render structured messages.

use serde::Serialize;
use std::time::Duration;
use thiserror::Error;

/// Configuration problems detected before any fetch starts.
///
/// Always fatal to the cycle: a misconfiguration must not silently produce an
/// empty sync.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("duplicate source key: {0}")]
    Duplicate(String),

    #[error("invalid approval threshold {value} for repository {repo_name}")]
    InvalidApprovalThreshold { repo_name: String, value: i64 },

    #[error("source {0} has an empty search query")]
    EmptyQuery(String),

    #[error("source has an empty {0}")]
    MissingField(&'static str),

    #[error("unsupported config version {0}")]
    UnsupportedVersion(u8),

    #[error("failed to read config: {0}")]
    Io(String),

    #[error("failed to parse config: {0}")]
    Parse(String),
}

/// Failure of a single fetch against the code-hosting API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
    /// Bad or expired token. Fatal for the whole cycle.
    #[error("unauthorized: token is invalid or expired")]
    Unauthorized,

    /// The host asked us to back off.
    #[error("rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    /// The source is misconfigured (unknown repository, invalid query).
    #[error("not found: {0}")]
    NotFound(String),

    /// Network failure or 5xx response.
    #[error("transient failure: {0}")]
    Transient(String),

    /// Anything else the host returned that we cannot use.
    #[error("unexpected response ({status:?}): {message}")]
    Unexpected { status: Option<u16>, message: String },

    /// The cycle was cancelled while this fetch was in flight.
    #[error("fetch cancelled")]
    Cancelled,
}

impl FetchError {
    /// Whether this error aborts the entire cycle rather than one source.
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::Unauthorized | Self::Cancelled)
    }
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Transient("request timed out".to_string())
        } else if err.is_connect() {
            Self::Transient("failed to connect to server".to_string())
        } else if err.is_decode() {
            Self::Unexpected {
                status: None,
                message: format!("failed to parse response: {}", err),
            }
        } else {
            Self::Transient(err.to_string())
        }
    }
}

/// Commit-time persistence failure.
#[derive(Debug, Clone, Error)]
pub enum PersistError {
    #[error("database error: {0}")]
    Database(String),

    #[error("corrupt snapshot row: {0}")]
    Corrupt(String),
}

impl From<sqlx::Error> for PersistError {
    fn from(err: sqlx::Error) -> Self {
        Self::Database(err.to_string())
    }
}

impl From<crate::db::DbError> for PersistError {
    fn from(err: crate::db::DbError) -> Self {
        Self::Database(err.to_string())
    }
}

/// Cycle-level failure. Per-source fetch errors never show up here.
#[derive(Debug, Clone, Error)]
pub enum SyncError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("authentication failed: {0}")]
    Unauthorized(FetchError),

    #[error("failed to resolve viewer identity: {0}")]
    Identity(FetchError),

    #[error("commit failed: {0}")]
    Persist(#[from] PersistError),

    #[error("sync cycle cancelled")]
    Cancelled,
}

/// Application-level errors returned to the consumer.
///
/// All variants serialize to a structured JSON object for frontend consumption.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize)]
#[serde(tag = "type", content = "details")]
pub enum AppError {
    /// Persisting or loading the snapshot failed.
    #[error("Database error: {message}")]
    Database {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        operation: Option<String>,
    },

    /// Code-hosting API request failed.
    #[error("GitHub API error: {message}")]
    GitHubApi {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        status_code: Option<u16>,
        #[serde(skip_serializing_if = "Option::is_none")]
        source_key: Option<String>,
    },

    /// Authentication token expired or revoked - requires re-authentication.
    #[error("Token expired: {message}")]
    AuthenticationExpired { message: String },

    /// Configuration is invalid.
    #[error("Invalid configuration: {message}")]
    InvalidConfig {
        message: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        field: Option<String>,
    },

    /// Requested resource not found.
    #[error("Not found: {resource}")]
    NotFound {
        resource: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        id: Option<String>,
    },

    /// Sync operation failed.
    #[error("Sync error: {message}")]
    Sync { message: String },

    /// Internal application error.
    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl AppError {
    /// Create a database error with optional operation context.
    pub fn database(message: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: None,
        }
    }

    /// Create a database error with operation context.
    pub fn database_with_op(message: impl Into<String>, operation: impl Into<String>) -> Self {
        Self::Database {
            message: message.into(),
            operation: Some(operation.into()),
        }
    }

    /// Create a GitHub API error.
    pub fn github_api(message: impl Into<String>) -> Self {
        Self::GitHubApi {
            message: message.into(),
            status_code: None,
            source_key: None,
        }
    }

    /// Create a GitHub API error attributed to a source.
    pub fn github_api_for_source(
        message: impl Into<String>,
        status_code: Option<u16>,
        source_key: impl Into<String>,
    ) -> Self {
        Self::GitHubApi {
            message: message.into(),
            status_code,
            source_key: Some(source_key.into()),
        }
    }

    /// Error for a source whose fetch failed this cycle.
    pub fn source_failed(err: &FetchError, source_key: impl Into<String>) -> Self {
        let status_code = match err {
            FetchError::Unexpected { status, .. } => *status,
            FetchError::RateLimited { .. } => Some(429),
            _ => None,
        };
        Self::github_api_for_source(err.to_string(), status_code, source_key)
    }

    /// Create an authentication expired error.
    pub fn authentication_expired(message: impl Into<String>) -> Self {
        Self::AuthenticationExpired {
            message: message.into(),
        }
    }

    /// Check if this is an authentication expired error.
    pub fn is_authentication_expired(&self) -> bool {
        matches!(self, Self::AuthenticationExpired { .. })
    }

    /// Create a not found error with ID.
    pub fn not_found_with_id(resource: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
            id: Some(id.into()),
        }
    }

    /// Create a sync error.
    pub fn sync(message: impl Into<String>) -> Self {
        Self::Sync {
            message: message.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }
}

// Conversions from domain error types

impl From<ConfigError> for AppError {
    fn from(err: ConfigError) -> Self {
        let field = match &err {
            ConfigError::Duplicate(key) | ConfigError::EmptyQuery(key) => Some(key.clone()),
            ConfigError::InvalidApprovalThreshold { repo_name, .. } => Some(repo_name.clone()),
            ConfigError::MissingField(name) => Some(name.to_string()),
            _ => None,
        };
        Self::InvalidConfig {
            message: err.to_string(),
            field,
        }
    }
}

impl From<FetchError> for AppError {
    fn from(err: FetchError) -> Self {
        match err {
            FetchError::Unauthorized => {
                Self::authentication_expired("GitHub token expired or revoked. Please re-authenticate.")
            }
            FetchError::Unexpected { status, message } => Self::GitHubApi {
                message,
                status_code: status,
                source_key: None,
            },
            other => Self::github_api(other.to_string()),
        }
    }
}

impl From<PersistError> for AppError {
    fn from(err: PersistError) -> Self {
        Self::database(err.to_string())
    }
}

impl From<SyncError> for AppError {
    fn from(err: SyncError) -> Self {
        match err {
            SyncError::Config(e) => e.into(),
            SyncError::Unauthorized(e) | SyncError::Identity(e) => e.into(),
            SyncError::Persist(e) => Self::database_with_op(e.to_string(), "commit"),
            SyncError::Cancelled => Self::sync("Sync cycle cancelled"),
        }
    }
}

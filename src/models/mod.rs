//! Data models for the engine.
//!
//! These models represent the configured sources, the pull requests held in
//! the snapshot, and the static category taxonomy used for display grouping.
//!
//! All snapshot models derive Serialize/Deserialize so they can be persisted
//! and handed to the UI layer as-is.

pub mod app_config;
pub mod category;
pub mod pull_request;
pub mod query_source;

// Re-exports for convenient access
pub use app_config::{AppConfig, SourceConfig};
pub use category::{CategoryNode, PullRequestCategory, CATEGORIES};
pub use pull_request::{AppData, Author, PullRequestItem, PullRequestsData};
pub use query_source::{FilterSource, QuerySource, RepoSource};

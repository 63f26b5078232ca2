//! PR Sentinel - pull request synchronization and categorization engine.
//!
//! Periodically runs the configured searches against GitHub, sorts every
//! pull request into a category relative to the viewer, and keeps a
//! persisted snapshot plus an event stream for a UI layer to consume.

pub mod db;
pub mod error;
pub mod models;
pub mod services;

pub use error::AppError;
pub use models::{AppConfig, AppData, PullRequestCategory};
pub use services::{SyncEngine, SyncHandle};

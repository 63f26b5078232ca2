//! Events published by the sync engine.
//!
//! Consumers subscribe through `SyncHandle::subscribe` and react to these
//! instead of polling the snapshot.

use crate::error::AppError;
use crate::services::delta::{CategoryNotification, Delta, NotificationEvent};
use serde::Serialize;

/// Event: sync-progress
/// Emitted at each phase of a sync cycle.
pub const SYNC_PROGRESS_EVENT: &str = "sync-progress";

/// Event: source-data-updated
/// Emitted once per source after a cycle commits.
pub const SOURCE_DATA_UPDATED_EVENT: &str = "source-data-updated";

/// Event: new-pull-requests
/// Emitted for notify-eligible sources that gained pull requests.
pub const NEW_PULL_REQUESTS_EVENT: &str = "new-pull-requests";

/// Event: pull-requests-changed
/// Emitted when pull requests of a notify-eligible source move into a
/// category worth announcing (approved, rejected, re-review, missing review).
pub const PULL_REQUESTS_CHANGED_EVENT: &str = "pull-requests-changed";

/// Event: polling-error
/// Emitted when a source fails, or a whole cycle fails.
pub const POLLING_ERROR_EVENT: &str = "polling-error";

/// Everything the engine publishes.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "payload", rename_all = "kebab-case")]
pub enum EngineEvent {
    SyncProgress(SyncProgressPayload),
    SourceDataUpdated(SourceDataUpdatedPayload),
    NewPullRequests(NotificationEvent),
    PullRequestsChanged(CategoryNotification),
    PollingError(PollingErrorPayload),
}

impl EngineEvent {
    /// Wire name of the event.
    pub fn name(&self) -> &'static str {
        match self {
            Self::SyncProgress(_) => SYNC_PROGRESS_EVENT,
            Self::SourceDataUpdated(_) => SOURCE_DATA_UPDATED_EVENT,
            Self::NewPullRequests(_) => NEW_PULL_REQUESTS_EVENT,
            Self::PullRequestsChanged(_) => PULL_REQUESTS_CHANGED_EVENT,
            Self::PollingError(_) => POLLING_ERROR_EVENT,
        }
    }
}

/// Payload for sync-progress events.
#[derive(Debug, Clone, Serialize)]
pub struct SyncProgressPayload {
    /// Current phase of the sync operation.
    pub phase: SyncPhase,

    /// Progress message.
    pub message: String,

    /// Number of sources processed so far (if applicable).
    pub processed: Option<usize>,

    /// Total number of sources (if applicable).
    pub total: Option<usize>,

    /// Whether an error occurred.
    pub is_error: bool,
}

/// Phase of a sync operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// Starting sync.
    Starting,

    /// Fetching sources.
    Fetching,

    /// Writing the new snapshot.
    Committing,

    /// Sync completed.
    Complete,

    /// Sync failed.
    Failed,

    /// Sync cancelled before commit.
    Cancelled,
}

/// Payload for source-data-updated events.
#[derive(Debug, Clone, Serialize)]
pub struct SourceDataUpdatedPayload {
    pub source_key: String,

    /// Items added and removed in this cycle.
    pub delta: Delta,

    /// Items in the source after the cycle.
    pub total: usize,

    /// Fetch error, if the source kept its previous data.
    pub error: Option<String>,

    /// Whether the snapshot containing this update reached storage.
    pub persisted: bool,
}

/// Payload for polling-error events.
#[derive(Debug, Clone, Serialize)]
pub struct PollingErrorPayload {
    /// Failed source, or `None` when the whole cycle failed.
    pub source_key: Option<String>,

    pub source_name: Option<String>,

    /// Structured error, attributed to the source when there is one.
    pub error: AppError,

    /// Unix timestamp of the failure.
    pub timestamp: i64,
}

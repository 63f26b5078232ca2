//! Business logic services.
//!
//! Everything the sync cycle is made of, from source validation through to
//! the snapshot store. Services depend on the `SearchClient` and
//! `SnapshotPersistence` traits rather than on a concrete HTTP client or
//! database, so they can be tested in isolation.

pub mod categorizer;
pub mod config_store;
pub mod delta;
pub mod fetcher;
pub mod github_client;
pub mod merger;
pub mod notifier;
pub mod snapshot_store;
pub mod source_registry;
pub mod sync_engine;
pub mod sync_events;

pub use github_client::{GitHubClient, GitHubClientConfig, SearchClient};
pub use snapshot_store::{SnapshotPersistence, SnapshotStore, SnapshotView};
pub use source_registry::SourceRegistry;
pub use sync_engine::{EngineSettings, SyncEngine, SyncHandle, SyncOutcome};

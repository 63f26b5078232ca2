//! Owner of the authoritative snapshot.
//!
//! Readers get `Arc<AppData>` views that never change under them. Writes go
//! through [`SnapshotStore::commit`], which persists first and only then
//! swaps the in-memory snapshot, so a failed save leaves the previous
//! snapshot in place.

use crate::error::PersistError;
use crate::models::pull_request::AppData;
use async_trait::async_trait;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};

/// Storage backend for the snapshot.
#[async_trait]
pub trait SnapshotPersistence: Send + Sync {
    /// Last saved snapshot, or the empty value if nothing was saved.
    async fn load_data(&self) -> Result<AppData, PersistError>;

    /// Replace the stored snapshot. Must be all-or-nothing.
    async fn save_data(&self, data: &AppData) -> Result<(), PersistError>;
}

/// What readers see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotView {
    pub data: Arc<AppData>,

    /// False when `data` is newer than what storage holds because the last
    /// commit failed to save.
    pub persisted: bool,
}

/// Committed and unsaved snapshots change together.
struct Snapshots {
    committed: Arc<AppData>,
    unsaved: Option<Arc<AppData>>,
}

pub struct SnapshotStore {
    persistence: Arc<dyn SnapshotPersistence>,
    snapshots: RwLock<Snapshots>,
    /// Serializes commits.
    writer: Mutex<()>,
}

impl SnapshotStore {
    /// Open the store, loading the last saved snapshot.
    pub async fn open(persistence: Arc<dyn SnapshotPersistence>) -> Result<Self, PersistError> {
        let data = persistence.load_data().await?;
        log::info!("Loaded snapshot with {} source(s)", data.pull_requests.len());

        Ok(Self {
            persistence,
            snapshots: RwLock::new(Snapshots {
                committed: Arc::new(data),
                unsaved: None,
            }),
            writer: Mutex::new(()),
        })
    }

    /// Last committed snapshot.
    pub async fn load(&self) -> Arc<AppData> {
        self.snapshots.read().await.committed.clone()
    }

    /// Newest snapshot, flagged if it could not be saved.
    pub async fn view(&self) -> SnapshotView {
        let snapshots = self.snapshots.read().await;
        match &snapshots.unsaved {
            Some(data) => SnapshotView {
                data: data.clone(),
                persisted: false,
            },
            None => SnapshotView {
                data: snapshots.committed.clone(),
                persisted: true,
            },
        }
    }

    /// Persist and publish a new snapshot.
    ///
    /// On failure the committed snapshot is unchanged and `data` is exposed
    /// through [`SnapshotStore::view`] as unsaved.
    pub async fn commit(&self, data: AppData) -> Result<(), PersistError> {
        let _guard = self.writer.lock().await;

        match self.persistence.save_data(&data).await {
            Ok(()) => {
                *self.snapshots.write().await = Snapshots {
                    committed: Arc::new(data),
                    unsaved: None,
                };
                Ok(())
            }
            Err(e) => {
                log::error!("Failed to persist snapshot: {}", e);
                self.snapshots.write().await.unsaved = Some(Arc::new(data));
                Err(e)
            }
        }
    }
}

/// Keeps the snapshot in memory. Used when no database is wanted, and in
/// tests, where saves can be made to fail on demand.
#[derive(Default)]
pub struct MemoryPersistence {
    data: std::sync::Mutex<AppData>,
    fail_saves: AtomicBool,
    saves: std::sync::atomic::AtomicUsize,
}

impl MemoryPersistence {
    pub fn new() -> Self {
        Self::default()
    }

    /// Start with an existing snapshot.
    pub fn with_data(data: AppData) -> Self {
        Self {
            data: std::sync::Mutex::new(data),
            ..Default::default()
        }
    }

    /// Make subsequent saves fail (or succeed again).
    pub fn set_fail_saves(&self, fail: bool) {
        self.fail_saves.store(fail, Ordering::SeqCst);
    }

    /// Number of successful saves.
    pub fn save_count(&self) -> usize {
        self.saves.load(Ordering::SeqCst)
    }

    /// Copy of the stored snapshot.
    pub fn stored(&self) -> AppData {
        self.data
            .lock()
            .map(|data| data.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl SnapshotPersistence for MemoryPersistence {
    async fn load_data(&self) -> Result<AppData, PersistError> {
        self.data
            .lock()
            .map(|data| data.clone())
            .map_err(|e| PersistError::Database(e.to_string()))
    }

    async fn save_data(&self, data: &AppData) -> Result<(), PersistError> {
        if self.fail_saves.load(Ordering::SeqCst) {
            return Err(PersistError::Database("disk I/O error".to_string()));
        }
        let mut stored = self
            .data
            .lock()
            .map_err(|e| PersistError::Database(e.to_string()))?;
        *stored = data.clone();
        self.saves.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::pull_request::PullRequestsData;

    fn snapshot(key: &str, last_updated: i64) -> AppData {
        let mut data = AppData::default();
        data.pull_requests.insert(
            key.to_string(),
            PullRequestsData {
                last_updated,
                ..Default::default()
            },
        );
        data
    }

    #[tokio::test]
    async fn test_open_empty() {
        let store = SnapshotStore::open(Arc::new(MemoryPersistence::new()))
            .await
            .unwrap();
        assert!(store.load().await.is_empty());
        assert!(store.view().await.persisted);
    }

    #[tokio::test]
    async fn test_open_loads_saved_snapshot() {
        let persistence = Arc::new(MemoryPersistence::with_data(snapshot("a", 100)));
        let store = SnapshotStore::open(persistence).await.unwrap();
        assert_eq!(store.load().await.get("a").unwrap().last_updated, 100);
    }

    #[tokio::test]
    async fn test_commit_replaces_snapshot() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = SnapshotStore::open(persistence.clone()).await.unwrap();

        store.commit(snapshot("a", 100)).await.unwrap();
        store.commit(snapshot("b", 200)).await.unwrap();

        let data = store.load().await;
        assert!(data.get("a").is_none());
        assert_eq!(data.get("b").unwrap().last_updated, 200);
        assert_eq!(persistence.stored(), *data);
        assert_eq!(persistence.save_count(), 2);
    }

    #[tokio::test]
    async fn test_readers_keep_their_view() {
        let store = SnapshotStore::open(Arc::new(MemoryPersistence::new()))
            .await
            .unwrap();
        store.commit(snapshot("a", 100)).await.unwrap();

        let held = store.load().await;
        store.commit(snapshot("a", 200)).await.unwrap();

        assert_eq!(held.get("a").unwrap().last_updated, 100);
        assert_eq!(store.load().await.get("a").unwrap().last_updated, 200);
    }

    #[tokio::test]
    async fn test_failed_commit_keeps_previous_and_exposes_unsaved() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = SnapshotStore::open(persistence.clone()).await.unwrap();
        store.commit(snapshot("a", 100)).await.unwrap();

        persistence.set_fail_saves(true);
        assert!(store.commit(snapshot("a", 200)).await.is_err());

        assert_eq!(store.load().await.get("a").unwrap().last_updated, 100);
        let view = store.view().await;
        assert!(!view.persisted);
        assert_eq!(view.data.get("a").unwrap().last_updated, 200);

        persistence.set_fail_saves(false);
        store.commit(snapshot("a", 300)).await.unwrap();
        let view = store.view().await;
        assert!(view.persisted);
        assert_eq!(view.data.get("a").unwrap().last_updated, 300);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_view_never_older_than_committed() {
        let persistence = Arc::new(MemoryPersistence::new());
        let store = Arc::new(SnapshotStore::open(persistence.clone()).await.unwrap());
        store.commit(snapshot("a", 1)).await.unwrap();

        let writer = {
            let store = store.clone();
            tokio::spawn(async move {
                for round in 1..=200 {
                    // Alternate failed and successful saves, versions increasing
                    persistence.set_fail_saves(true);
                    let _ = store.commit(snapshot("a", round * 2)).await;
                    persistence.set_fail_saves(false);
                    store.commit(snapshot("a", round * 2 + 1)).await.unwrap();
                }
            })
        };

        while !writer.is_finished() {
            let committed = store.load().await.get("a").unwrap().last_updated;
            let view = store.view().await;
            let seen = view.data.get("a").unwrap().last_updated;
            assert!(
                seen >= committed,
                "view {} (persisted: {}) older than committed {}",
                seen,
                view.persisted,
                committed
            );
            tokio::task::yield_now().await;
        }
        writer.await.unwrap();

        let view = store.view().await;
        assert!(view.persisted);
        assert_eq!(view.data.get("a").unwrap().last_updated, 401);
    }
}

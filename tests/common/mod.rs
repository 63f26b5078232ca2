//! Shared fixtures for the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use pr_sentinel_lib::error::FetchError;
use pr_sentinel_lib::models::{AppConfig, SourceConfig};
use pr_sentinel_lib::services::fetcher::RetryPolicy;
use pr_sentinel_lib::services::github_client::{
    GitHubReview, GitHubUser, RawItem, ReviewState, SearchClient,
};
use pr_sentinel_lib::services::snapshot_store::{MemoryPersistence, SnapshotPersistence, SnapshotStore};
use pr_sentinel_lib::services::sync_engine::{EngineSettings, SyncEngine};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub const VIEWER: &str = "octocat";

/// How the fake host answers one query.
#[derive(Clone)]
pub enum Reply {
    Items(Vec<RawItem>),
    Fail(FetchError),
    /// Never answers.
    Hang,
}

/// Search client answering from a table that tests can change between cycles.
#[derive(Default)]
pub struct FakeClient {
    replies: Mutex<HashMap<String, Reply>>,
}

impl FakeClient {
    pub fn set(&self, query: &str, reply: Reply) {
        self.replies.lock().unwrap().insert(query.to_string(), reply);
    }
}

#[async_trait]
impl SearchClient for FakeClient {
    async fn search(&self, query: &str, _token: &str) -> Result<Vec<RawItem>, FetchError> {
        let reply = self
            .replies
            .lock()
            .unwrap()
            .get(query)
            .cloned()
            .unwrap_or(Reply::Items(Vec::new()));

        match reply {
            Reply::Items(items) => Ok(items),
            Reply::Fail(e) => Err(e),
            Reply::Hang => std::future::pending().await,
        }
    }

    async fn current_user(&self, _token: &str) -> Result<String, FetchError> {
        Ok(VIEWER.to_string())
    }
}

/// A pull request by `author` that requests review from the viewer.
pub fn pr(id: u64, author: &str) -> RawItem {
    let ts = Utc.with_ymd_and_hms(2024, 1, 15, 10, 30, 0).unwrap();
    RawItem {
        id,
        number: id,
        title: format!("PR {}", id),
        repository_url: "https://api.github.com/repos/octo/widgets".to_string(),
        user: GitHubUser {
            login: author.to_string(),
            avatar_url: format!("https://avatars/{}", author),
        },
        url: format!("https://api.github.com/repos/octo/widgets/issues/{}", id),
        html_url: format!("https://github.com/octo/widgets/pull/{}", id),
        created_at: ts,
        updated_at: ts,
        reviews: Vec::new(),
        requested_reviewers: vec![VIEWER.to_string()],
    }
}

/// `item` with an approving review from `reviewer`, submitted after its last update.
pub fn approved_by(mut item: RawItem, reviewer: &str) -> RawItem {
    item.requested_reviewers.retain(|login| login != reviewer);
    item.reviews.push(GitHubReview {
        user: Some(GitHubUser {
            login: reviewer.to_string(),
            avatar_url: String::new(),
        }),
        state: ReviewState::Approved,
        submitted_at: Some(item.updated_at + chrono::Duration::minutes(1)),
    });
    item
}

pub fn prs(ids: &[u64]) -> Reply {
    Reply::Items(ids.iter().map(|&id| pr(id, "alice")).collect())
}

pub fn filter(id: &str, query: &str, notify: bool) -> SourceConfig {
    SourceConfig::Filter {
        id: id.to_string(),
        name: id.to_string(),
        query: query.to_string(),
        notify,
    }
}

pub fn config(sources: Vec<SourceConfig>) -> AppConfig {
    AppConfig {
        auth_token: Some("ghp_test".to_string()),
        viewer_identity: Some(VIEWER.to_string()),
        sources,
    }
}

/// Settings with near-instant retries.
pub fn fast_settings() -> EngineSettings {
    EngineSettings {
        retry: RetryPolicy {
            base_backoff_ms: 1,
            jitter: false,
            ..Default::default()
        },
        ..Default::default()
    }
}

pub async fn engine_over(
    client: Arc<FakeClient>,
    persistence: Arc<dyn SnapshotPersistence>,
    config: AppConfig,
) -> Arc<SyncEngine> {
    let store = Arc::new(SnapshotStore::open(persistence).await.unwrap());
    Arc::new(SyncEngine::new(client, store, config, fast_settings()))
}

pub async fn memory_engine(
    client: Arc<FakeClient>,
    config: AppConfig,
) -> (Arc<SyncEngine>, Arc<MemoryPersistence>) {
    let persistence = Arc::new(MemoryPersistence::new());
    let engine = engine_over(client, persistence.clone(), config).await;
    (engine, persistence)
}

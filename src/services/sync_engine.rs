//! Background sync engine.
//!
//! One cycle:
//! 1. Validate the configured sources
//! 2. Fetch every source concurrently (bounded), with retries
//! 3. Categorize and merge each source against the previous snapshot
//! 4. Commit the whole snapshot at once
//! 5. Publish per-source updates and notifications
//!
//! Cycles are serialized. A failed source keeps its previous data; only
//! configuration errors, an unauthorized token, cancellation and a failed
//! commit fail the cycle.

use crate::error::{AppError, FetchError, SyncError};
use crate::models::app_config::AppConfig;
use crate::models::pull_request::{AppData, PullRequestsData};
use crate::services::categorizer::{categorize_item, SourceContext};
use crate::services::delta::{self, CategoryNotification, Delta, NotificationEvent};
use crate::services::fetcher::{self, RetryPolicy};
use crate::services::github_client::{RawItem, SearchClient};
use crate::services::merger;
use crate::services::snapshot_store::{SnapshotStore, SnapshotView};
use crate::services::source_registry::SourceRegistry;
use crate::services::sync_events::{
    EngineEvent, PollingErrorPayload, SourceDataUpdatedPayload, SyncPhase, SyncProgressPayload,
};
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, mpsc, oneshot, Mutex, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

/// Default sync interval in seconds.
pub const DEFAULT_SYNC_INTERVAL_SECS: u64 = 600;

/// Default upper bound on concurrent source fetches.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// Capacity of the event channel. Slow subscribers lose the oldest events.
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Get the current Unix timestamp.
fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

/// Engine tuning.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineSettings {
    /// Sync interval in seconds.
    pub interval_secs: u64,

    /// Maximum number of sources fetched at once.
    pub max_concurrency: usize,

    pub retry: RetryPolicy,
}

impl Default for EngineSettings {
    fn default() -> Self {
        Self {
            interval_secs: DEFAULT_SYNC_INTERVAL_SECS,
            max_concurrency: DEFAULT_MAX_CONCURRENCY,
            retry: RetryPolicy::default(),
        }
    }
}

/// Result of one source within a cycle.
#[derive(Debug, Clone, Serialize)]
pub struct SourceReport {
    pub source_key: String,

    /// Changes against the previous snapshot. Empty for failed sources.
    pub delta: Delta,

    /// Items in the source after the cycle.
    pub total: usize,

    /// Terminal fetch error, if the source kept its previous data.
    pub error: Option<String>,
}

/// Result of a committed cycle.
#[derive(Debug, Clone, Serialize)]
pub struct CycleReport {
    /// One entry per configured source, in configuration order.
    pub sources: Vec<SourceReport>,

    /// New-pull-request notifications raised by this cycle.
    pub notifications: Vec<NotificationEvent>,

    /// Pull requests that moved into an announced category.
    pub category_notifications: Vec<CategoryNotification>,

    /// Duration of the cycle in milliseconds.
    pub duration_ms: u64,
}

impl CycleReport {
    /// Sources whose fetch failed this cycle.
    pub fn failed_sources(&self) -> impl Iterator<Item = &SourceReport> {
        self.sources.iter().filter(|s| s.error.is_some())
    }
}

/// What a call to [`SyncEngine::run_cycle`] did.
#[derive(Debug, Clone)]
pub enum SyncOutcome {
    /// The snapshot was fetched and committed.
    Completed(CycleReport),

    /// Nothing to do yet (e.g. no token configured).
    Skipped(String),
}

/// Commands that can be sent to the background loop.
#[derive(Debug)]
pub enum SyncCommand {
    /// Cancel any in-flight cycle and run a fresh one.
    TriggerSync,

    /// Replace the configuration used by the next cycle.
    UpdateConfig(AppConfig),

    /// Replace the engine settings and reset the timer.
    UpdateSettings(EngineSettings),

    /// Clear the new flags of a source.
    Acknowledge {
        source_key: String,
        reply: oneshot::Sender<Result<usize, AppError>>,
    },

    /// Stop the background loop.
    Stop,
}

/// Lightweight handle for controlling the background engine.
///
/// Commands travel over an mpsc channel; reads go straight to the snapshot
/// store without involving the loop.
#[derive(Clone)]
pub struct SyncHandle {
    command_tx: mpsc::Sender<SyncCommand>,
    engine: Arc<SyncEngine>,
    /// The loop task, taken by the first `stop`.
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl SyncHandle {
    async fn send(&self, command: SyncCommand) -> Result<(), AppError> {
        self.command_tx
            .send(command)
            .await
            .map_err(|_| AppError::internal("Sync engine not running"))
    }

    /// Trigger an immediate sync, superseding one in flight.
    pub async fn trigger_sync(&self) -> Result<(), AppError> {
        self.send(SyncCommand::TriggerSync).await
    }

    /// Use a new configuration from the next cycle on.
    pub async fn update_config(&self, config: AppConfig) -> Result<(), AppError> {
        self.send(SyncCommand::UpdateConfig(config)).await
    }

    /// Update the engine settings.
    pub async fn update_settings(&self, settings: EngineSettings) -> Result<(), AppError> {
        self.send(SyncCommand::UpdateSettings(settings)).await
    }

    /// Mark every item of a source as seen. Returns how many were new.
    pub async fn acknowledge(&self, source_key: &str) -> Result<usize, AppError> {
        let (reply, response) = oneshot::channel();
        self.send(SyncCommand::Acknowledge {
            source_key: source_key.to_string(),
            reply,
        })
        .await?;
        response
            .await
            .map_err(|_| AppError::internal("Sync engine dropped the request"))?
    }

    /// Stop the background loop, cancelling an in-flight cycle.
    ///
    /// Returns once the loop has exited.
    pub async fn stop(&self) -> Result<(), AppError> {
        self.send(SyncCommand::Stop).await?;

        let task = self.task.lock().await.take();
        if let Some(task) = task {
            task.await
                .map_err(|e| AppError::internal(format!("Sync loop panicked: {}", e)))?;
        }
        Ok(())
    }

    /// Last committed snapshot.
    pub async fn snapshot(&self) -> Arc<AppData> {
        self.engine.store.load().await
    }

    /// Newest snapshot, including one that failed to save.
    pub async fn view(&self) -> SnapshotView {
        self.engine.store.view().await
    }

    /// Subscribe to engine events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.engine.subscribe()
    }

    /// Get the current settings.
    pub async fn settings(&self) -> EngineSettings {
        self.engine.settings.read().await.clone()
    }
}

/// Pull request sync engine.
pub struct SyncEngine {
    client: Arc<dyn SearchClient>,
    store: Arc<SnapshotStore>,
    config: RwLock<AppConfig>,
    settings: RwLock<EngineSettings>,
    /// Viewer login resolved from the token, when the config has none.
    resolved_viewer: RwLock<Option<String>>,
    events: broadcast::Sender<EngineEvent>,
    /// Held for the whole of a cycle or acknowledge.
    cycle_lock: Mutex<()>,
}

impl SyncEngine {
    /// Create a new sync engine.
    pub fn new(
        client: Arc<dyn SearchClient>,
        store: Arc<SnapshotStore>,
        config: AppConfig,
        settings: EngineSettings,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            client,
            store,
            config: RwLock::new(config),
            settings: RwLock::new(settings),
            resolved_viewer: RwLock::new(None),
            events,
            cycle_lock: Mutex::new(()),
        }
    }

    pub fn store(&self) -> &Arc<SnapshotStore> {
        &self.store
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    /// Replace the configuration. Takes effect on the next cycle.
    pub async fn set_config(&self, config: AppConfig) {
        *self.config.write().await = config;
        // The token may belong to someone else now
        *self.resolved_viewer.write().await = None;
    }

    pub async fn set_settings(&self, settings: EngineSettings) {
        *self.settings.write().await = settings;
    }

    fn emit(&self, event: EngineEvent) {
        log::debug!("Emitting {}", event.name());
        // No subscribers is fine
        let _ = self.events.send(event);
    }

    fn progress(
        &self,
        phase: SyncPhase,
        message: impl Into<String>,
        processed: Option<usize>,
        total: Option<usize>,
    ) {
        self.emit(EngineEvent::SyncProgress(SyncProgressPayload {
            phase,
            message: message.into(),
            processed,
            total,
            is_error: phase == SyncPhase::Failed,
        }));
    }

    fn cycle_failed(&self, error: &SyncError) {
        match error {
            SyncError::Cancelled => {
                self.progress(SyncPhase::Cancelled, "Sync cancelled", None, None);
            }
            other => {
                self.progress(SyncPhase::Failed, other.to_string(), None, None);
                self.emit(EngineEvent::PollingError(PollingErrorPayload {
                    source_key: None,
                    source_name: None,
                    error: AppError::from(other.clone()),
                    timestamp: now(),
                }));
            }
        }
    }

    /// Run a single sync cycle.
    ///
    /// Waits for any cycle already running. Nothing is committed when the
    /// cycle fails before the commit step or `cancel` fires.
    pub async fn run_cycle(&self, cancel: &CancellationToken) -> Result<SyncOutcome, SyncError> {
        let _guard = self.cycle_lock.lock().await;

        let result = self.run_cycle_locked(cancel).await;
        if let Err(e) = &result {
            log::warn!("Sync cycle failed: {}", e);
            self.cycle_failed(e);
        }
        result
    }

    async fn run_cycle_locked(&self, cancel: &CancellationToken) -> Result<SyncOutcome, SyncError> {
        let start = Instant::now();
        let config = self.config.read().await.clone();
        let settings = self.settings.read().await.clone();

        let registry = SourceRegistry::load(&config)?;

        let Some(token) = config.token() else {
            log::warn!("No GitHub token configured, skipping sync");
            return Ok(SyncOutcome::Skipped("no token configured".to_string()));
        };

        let viewer = self.resolve_viewer(&config, token, cancel).await?;
        let total = registry.len();

        self.progress(
            SyncPhase::Starting,
            format!("Syncing {} source(s)", total),
            Some(0),
            Some(total),
        );

        let fetched = self.fetch_all(&registry, token, &settings, cancel).await?;

        // Build on the newest view so an unsaved snapshot is not lost
        let previous = self.store.view().await.data;
        let fetched_at = now();

        let mut next = AppData::default();
        let mut reports = Vec::with_capacity(total);
        let mut notifications = Vec::new();
        let mut category_notifications = Vec::new();
        let mut source_errors = Vec::new();

        for (source, result) in registry.sources().iter().zip(fetched) {
            let key = source.key();
            let prev = previous.get(key);

            let (data, report) = match result {
                Ok(raw_items) => {
                    let ctx = SourceContext::new(source, registry.approval_rules());
                    let items = raw_items
                        .into_iter()
                        .map(|raw| categorize_item(raw, &ctx, &viewer))
                        .collect();
                    let merged = merger::merge(prev, items, fetched_at);

                    let changes = delta::delta(prev.unwrap_or(&PullRequestsData::default()), &merged);
                    if let Some(event) = delta::notification_for(source, prev, &merged) {
                        notifications.push(event);
                    }
                    category_notifications
                        .extend(delta::category_notifications(source, prev, &merged));

                    let report = SourceReport {
                        source_key: key.to_string(),
                        delta: changes,
                        total: merged.pull_requests.len(),
                        error: None,
                    };
                    (merged, report)
                }
                Err(e) => {
                    log::warn!("Source '{}' failed: {}", key, e);
                    source_errors.push(PollingErrorPayload {
                        source_key: Some(key.to_string()),
                        source_name: Some(source.display_name().to_string()),
                        error: AppError::source_failed(&e, key),
                        timestamp: fetched_at,
                    });

                    let kept = merger::retain_on_failure(prev, &e.to_string());
                    let report = SourceReport {
                        source_key: key.to_string(),
                        delta: Delta::default(),
                        total: kept.pull_requests.len(),
                        error: Some(e.to_string()),
                    };
                    (kept, report)
                }
            };

            next.pull_requests.insert(key.to_string(), data);
            reports.push(report);
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        self.progress(SyncPhase::Committing, "Saving snapshot", Some(total), Some(total));
        let commit = self.store.commit(next).await;
        let persisted = commit.is_ok();

        for error in source_errors {
            self.emit(EngineEvent::PollingError(error));
        }
        for report in &reports {
            self.emit(EngineEvent::SourceDataUpdated(SourceDataUpdatedPayload {
                source_key: report.source_key.clone(),
                delta: report.delta.clone(),
                total: report.total,
                error: report.error.clone(),
                persisted,
            }));
        }
        for event in &notifications {
            log::info!(
                "{} new pull request(s) in '{}'",
                event.added_ids.len(),
                event.source_name
            );
            self.emit(EngineEvent::NewPullRequests(event.clone()));
        }
        for event in &category_notifications {
            log::info!(
                "{} pull request(s) in '{}' moved to {:?}",
                event.ids.len(),
                event.source_key,
                event.category
            );
            self.emit(EngineEvent::PullRequestsChanged(event.clone()));
        }

        commit?;

        let report = CycleReport {
            sources: reports,
            notifications,
            category_notifications,
            duration_ms: start.elapsed().as_millis() as u64,
        };

        log::info!(
            "Sync complete: {} source(s), {} failed, {} notification(s) in {}ms",
            report.sources.len(),
            report.failed_sources().count(),
            report.notifications.len(),
            report.duration_ms
        );
        self.progress(SyncPhase::Complete, "Sync complete", Some(total), Some(total));

        Ok(SyncOutcome::Completed(report))
    }

    /// Fetch every source, returning results in source order.
    ///
    /// Per-source errors stay in the results. A fatal error (unauthorized,
    /// cancelled) stops the remaining fetches and fails the cycle.
    async fn fetch_all(
        &self,
        registry: &SourceRegistry,
        token: &str,
        settings: &EngineSettings,
        cancel: &CancellationToken,
    ) -> Result<Vec<Result<Vec<RawItem>, FetchError>>, SyncError> {
        let sources = registry.sources();
        let total = sources.len();
        let limit = settings.max_concurrency.max(1).min(total.max(1));
        let fetch_cancel = cancel.child_token();
        let client = self.client.as_ref();

        let mut results: Vec<Option<Result<Vec<RawItem>, FetchError>>> = vec![None; total];
        // Stream indices, not `&QuerySource`, so the cycle future stays spawnable
        let mut pending = stream::iter(0..total)
            .map(|idx| {
                let source = &sources[idx];
                let fetch_cancel = &fetch_cancel;
                async move {
                    let result =
                        fetcher::fetch(client, source, token, &settings.retry, fetch_cancel).await;
                    (idx, result)
                }
            })
            .buffer_unordered(limit);

        let mut processed = 0;
        while let Some((idx, result)) = pending.next().await {
            if cancel.is_cancelled() {
                return Err(SyncError::Cancelled);
            }
            let result = match result {
                Err(e) if e.is_fatal() => {
                    fetch_cancel.cancel();
                    return Err(match e {
                        FetchError::Cancelled => SyncError::Cancelled,
                        other => SyncError::Unauthorized(other),
                    });
                }
                result => result,
            };

            processed += 1;
            self.progress(
                SyncPhase::Fetching,
                format!("Fetched {}", sources[idx].display_name()),
                Some(processed),
                Some(total),
            );
            results[idx] = Some(result);
        }

        if cancel.is_cancelled() {
            return Err(SyncError::Cancelled);
        }

        Ok(results
            .into_iter()
            .map(|r| r.unwrap_or(Err(FetchError::Cancelled)))
            .collect())
    }

    /// Login the categorizer compares against.
    async fn resolve_viewer(
        &self,
        config: &AppConfig,
        token: &str,
        cancel: &CancellationToken,
    ) -> Result<String, SyncError> {
        if let Some(viewer) = config
            .viewer_identity
            .as_deref()
            .map(str::trim)
            .filter(|v| !v.is_empty())
        {
            return Ok(viewer.to_string());
        }

        if let Some(viewer) = self.resolved_viewer.read().await.clone() {
            return Ok(viewer);
        }

        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SyncError::Cancelled),
            result = self.client.current_user(token) => result,
        };

        match result {
            Ok(login) => {
                log::info!("Resolved viewer identity: {}", login);
                *self.resolved_viewer.write().await = Some(login.clone());
                Ok(login)
            }
            Err(FetchError::Unauthorized) => Err(SyncError::Unauthorized(FetchError::Unauthorized)),
            Err(FetchError::Cancelled) => Err(SyncError::Cancelled),
            Err(e) => Err(SyncError::Identity(e)),
        }
    }

    /// Clear the new flags of a source and commit.
    pub async fn acknowledge(&self, source_key: &str) -> Result<usize, AppError> {
        let _guard = self.cycle_lock.lock().await;

        let mut data = (*self.store.view().await.data).clone();
        let Some(source) = data.pull_requests.get_mut(source_key) else {
            return Err(AppError::not_found_with_id("source", source_key));
        };

        let cleared = merger::acknowledge(source);
        if cleared == 0 {
            return Ok(0);
        }
        let total = source.pull_requests.len();
        let error = source.last_error.clone();

        self.store.commit(data).await?;

        self.emit(EngineEvent::SourceDataUpdated(SourceDataUpdatedPayload {
            source_key: source_key.to_string(),
            delta: Delta::default(),
            total,
            error,
            persisted: true,
        }));

        Ok(cleared)
    }

    /// Start the background sync loop.
    ///
    /// Runs a cycle immediately and then every `interval_secs`. Returns a
    /// `SyncHandle` for sending commands and reading the snapshot.
    pub fn start_background(engine: Arc<SyncEngine>) -> SyncHandle {
        let (tx, mut rx) = mpsc::channel::<SyncCommand>(16);
        let loop_engine = engine.clone();

        let task = tokio::spawn(async move {
            let engine = loop_engine;
            let interval_secs = engine.settings.read().await.interval_secs;
            let mut interval = new_interval(interval_secs);
            let mut running: Option<(CancellationToken, JoinHandle<()>)> = None;

            log::info!("Sync engine started, interval={}s", interval_secs);

            loop {
                tokio::select! {
                    _ = interval.tick() => {
                        if running.as_ref().is_some_and(|(_, task)| !task.is_finished()) {
                            log::debug!("Previous cycle still running, skipping tick");
                            continue;
                        }
                        running = Some(spawn_cycle(engine.clone()));
                    }
                    command = rx.recv() => {
                        let Some(command) = command else {
                            // Every handle dropped
                            break;
                        };
                        match command {
                            SyncCommand::TriggerSync => {
                                log::info!("Manual sync triggered");
                                finish(running.take(), true).await;
                                running = Some(spawn_cycle(engine.clone()));
                            }
                            SyncCommand::UpdateConfig(config) => {
                                log::info!("Config updated: {} source(s)", config.sources.len());
                                engine.set_config(config).await;
                            }
                            SyncCommand::UpdateSettings(settings) => {
                                log::info!("Settings updated, interval={}s", settings.interval_secs);
                                interval = new_interval(settings.interval_secs);
                                // The fresh interval fires at once; a cycle just ran or is running
                                interval.reset();
                                engine.set_settings(settings).await;
                            }
                            SyncCommand::Acknowledge { source_key, reply } => {
                                let engine = engine.clone();
                                tokio::spawn(async move {
                                    let _ = reply.send(engine.acknowledge(&source_key).await);
                                });
                            }
                            SyncCommand::Stop => {
                                log::info!("Sync engine stopping");
                                break;
                            }
                        }
                    }
                }
            }

            finish(running.take(), true).await;
            log::info!("Sync engine stopped");
        });

        SyncHandle {
            command_tx: tx,
            engine,
            task: Arc::new(Mutex::new(Some(task))),
        }
    }
}

fn new_interval(secs: u64) -> time::Interval {
    let mut interval = time::interval(Duration::from_secs(secs.max(1)));
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

fn spawn_cycle(engine: Arc<SyncEngine>) -> (CancellationToken, JoinHandle<()>) {
    let cancel = CancellationToken::new();
    let token = cancel.clone();

    let task = tokio::spawn(async move {
        match engine.run_cycle(&token).await {
            Ok(SyncOutcome::Completed(report)) => log::debug!(
                "Cycle finished: {} source(s) in {}ms",
                report.sources.len(),
                report.duration_ms
            ),
            Ok(SyncOutcome::Skipped(reason)) => log::info!("Sync skipped: {}", reason),
            Err(e) => log::error!("Sync error: {}", e),
        }
    });

    (cancel, task)
}

/// Wait for a running cycle to end, cancelling it first if asked.
async fn finish(running: Option<(CancellationToken, JoinHandle<()>)>, cancel: bool) {
    if let Some((token, task)) = running {
        if cancel {
            token.cancel();
        }
        if let Err(e) = task.await {
            log::error!("Sync task panicked: {}", e);
        }
    }
}

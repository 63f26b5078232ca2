use clap::Parser;
use pr_sentinel_lib::db::{self, snapshot::SqlitePersistence};
use pr_sentinel_lib::services::config_store::{self, config_path};
use pr_sentinel_lib::services::github_client::{GitHubClient, GitHubClientConfig, DEFAULT_API_URL};
use pr_sentinel_lib::services::notifier::DesktopNotifier;
use pr_sentinel_lib::services::snapshot_store::SnapshotStore;
use pr_sentinel_lib::services::sync_engine::{
    EngineSettings, SyncEngine, SyncOutcome, DEFAULT_SYNC_INTERVAL_SECS,
};
use pr_sentinel_lib::services::sync_events::EngineEvent;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::broadcast::{self, error::RecvError};
use tokio_util::sync::CancellationToken;

#[derive(Parser, Debug)]
#[command(
    name = "pr-sentinel",
    version,
    about = "Keeps track of the pull requests that need your attention"
)]
struct Cli {
    /// Directory holding config.json and the snapshot database.
    #[arg(long)]
    data_dir: Option<PathBuf>,

    /// Run a single sync cycle and exit.
    #[arg(long)]
    once: bool,

    /// Seconds between background syncs.
    #[arg(long, default_value_t = DEFAULT_SYNC_INTERVAL_SECS)]
    interval: u64,

    /// GitHub API base URL (for GitHub Enterprise).
    #[arg(long, default_value = DEFAULT_API_URL)]
    api_url: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    let data_dir = cli
        .data_dir
        .or_else(config_store::default_data_dir)
        .ok_or("could not determine the home directory, pass --data-dir")?;
    log::info!("Using data directory {}", data_dir.display());

    let config = config_store::load_config(&config_path(&data_dir))?;
    log::debug!("Loaded config: {:?}", config);

    let persistence = SqlitePersistence::open(&db::get_db_path(&data_dir)).await?;
    let store = Arc::new(SnapshotStore::open(Arc::new(persistence)).await?);

    let client = GitHubClient::new(GitHubClientConfig {
        base_url: cli.api_url,
        ..Default::default()
    })?;

    let settings = EngineSettings {
        interval_secs: cli.interval,
        ..Default::default()
    };
    let engine = Arc::new(SyncEngine::new(Arc::new(client), store, config, settings));
    let notifier = DesktopNotifier::new();

    if cli.once {
        return match engine.run_cycle(&CancellationToken::new()).await? {
            SyncOutcome::Completed(report) => {
                for failed in report.failed_sources() {
                    log::warn!(
                        "{}: {}",
                        failed.source_key,
                        failed.error.as_deref().unwrap_or_default()
                    );
                }
                for event in &report.notifications {
                    if let Err(e) = notifier.notify(event).await {
                        log::error!("Failed to send notification: {}", e);
                    }
                }
                for event in &report.category_notifications {
                    if let Err(e) = notifier.notify_category(event).await {
                        log::error!("Failed to send notification: {}", e);
                    }
                }
                Ok(())
            }
            SyncOutcome::Skipped(reason) => {
                log::warn!("Nothing synced: {}", reason);
                Ok(())
            }
        };
    }

    let events = engine.subscribe();
    let handle = SyncEngine::start_background(engine);
    tokio::spawn(forward_notifications(events, notifier));

    tokio::signal::ctrl_c().await?;
    log::info!("Shutting down");
    // Returns once the loop has finished its last cycle
    handle.stop().await?;

    Ok(())
}

/// Deliver new-pull-request and category-change events as desktop notifications.
async fn forward_notifications(mut events: broadcast::Receiver<EngineEvent>, notifier: DesktopNotifier) {
    loop {
        match events.recv().await {
            Ok(EngineEvent::NewPullRequests(event)) => {
                if let Err(e) = notifier.notify(&event).await {
                    log::error!("Failed to send notification: {}", e);
                }
            }
            Ok(EngineEvent::PullRequestsChanged(event)) => {
                if let Err(e) = notifier.notify_category(&event).await {
                    log::error!("Failed to send notification: {}", e);
                }
            }
            Ok(_) => {}
            Err(RecvError::Lagged(missed)) => {
                log::warn!("Notification listener lagged, {} event(s) dropped", missed);
            }
            Err(RecvError::Closed) => break,
        }
    }
}

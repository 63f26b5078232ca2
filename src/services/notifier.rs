//! Desktop notifications for new pull requests and category changes.

use crate::services::delta::{CategoryNotification, NotificationEvent};
use thiserror::Error;

/// Titles listed individually before the body switches to a count.
const MAX_LISTED_TITLES: usize = 3;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("failed to run notify-send: {0}")]
    Spawn(#[from] std::io::Error),

    #[error("notify-send exited with {0}")]
    Failed(String),
}

/// Title and body for a notification.
pub fn format_notification(event: &NotificationEvent) -> (String, String) {
    let title = format!("- {} -", event.source_name);

    let body = if event.added_titles.len() > MAX_LISTED_TITLES {
        format!("{} new pull requests", event.added_titles.len())
    } else {
        event.added_titles.join("\n\n")
    };

    (title, body)
}

/// Title and body for a category change, e.g. "- PRs approved -".
pub fn format_category_notification(event: &CategoryNotification) -> (String, String) {
    let label = event.label();
    let title = format!("- {} -", label);

    let body = if event.titles.len() > MAX_LISTED_TITLES {
        format!("{} {}", event.titles.len(), label)
    } else {
        event.titles.join("\n\n")
    };

    (title, body)
}

/// Sends notifications through the desktop notification daemon.
///
/// On Linux this shells out to `notify-send`. Other platforms only log.
#[derive(Debug, Clone, Default)]
pub struct DesktopNotifier;

impl DesktopNotifier {
    pub fn new() -> Self {
        Self
    }

    pub async fn notify(&self, event: &NotificationEvent) -> Result<(), NotifyError> {
        let (title, body) = format_notification(event);
        self.send(&title, &body).await?;
        log::debug!("Notification sent for source '{}'", event.source_key);
        Ok(())
    }

    pub async fn notify_category(&self, event: &CategoryNotification) -> Result<(), NotifyError> {
        let (title, body) = format_category_notification(event);
        self.send(&title, &body).await?;
        log::debug!(
            "Notification sent for {} pull request(s) in '{}'",
            event.ids.len(),
            event.source_key
        );
        Ok(())
    }

    async fn send(&self, title: &str, body: &str) -> Result<(), NotifyError> {
        if cfg!(target_os = "linux") {
            let output = tokio::process::Command::new("notify-send")
                .args([
                    "--app-name=pr-sentinel",
                    "--urgency=normal",
                    "--expire-time=5000",
                    title,
                    body,
                ])
                .output()
                .await?;

            if !output.status.success() {
                return Err(NotifyError::Failed(output.status.to_string()));
            }
        } else {
            log::info!("{}: {}", title, body.replace("\n\n", " | "));
        }

        Ok(())
    }
}

//! Per-source fetch with retry and cancellation.
//!
//! Wraps one [`SearchClient::search`] call per source in the retry policy:
//! transient failures back off and retry, rate limits are waited out once,
//! everything else surfaces immediately.

use crate::error::FetchError;
use crate::models::query_source::QuerySource;
use crate::services::github_client::{RawItem, SearchClient};
use rand::Rng;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// Retry policy for a single source fetch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Retries after a transient failure (so at most this + 1 attempts).
    pub max_transient_retries: u32,

    /// Delay before the first transient retry, doubled for each later one.
    pub base_backoff_ms: u64,

    /// Longest wait honoured for a rate limit before retrying.
    pub max_rate_limit_wait_secs: u64,

    /// Add up to +50% random jitter to transient backoff.
    pub jitter: bool,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_transient_retries: 2,
            base_backoff_ms: 500,
            max_rate_limit_wait_secs: 60,
            jitter: true,
        }
    }
}

impl RetryPolicy {
    /// Delay before transient retry number `attempt` (0-based).
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let base = self.base_backoff_ms.saturating_mul(1u64 << attempt.min(16));
        let jitter = if self.jitter && base > 0 {
            rand::thread_rng().gen_range(0..=base / 2)
        } else {
            0
        };
        Duration::from_millis(base + jitter)
    }

    /// How long to wait before retrying a rate-limited request.
    pub fn rate_limit_wait(&self, retry_after: Duration) -> Duration {
        retry_after.min(Duration::from_secs(self.max_rate_limit_wait_secs))
    }
}

/// Fetch one source, applying the retry policy.
///
/// Returns [`FetchError::Cancelled`] as soon as `cancel` fires, whether a
/// request or a backoff sleep is in progress.
pub async fn fetch(
    client: &dyn SearchClient,
    source: &QuerySource,
    auth_token: &str,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> Result<Vec<RawItem>, FetchError> {
    let query = source.search_query();
    let mut transient_retries = 0;
    let mut rate_limit_retried = false;

    loop {
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            result = client.search(&query, auth_token) => result,
        };

        let err = match result {
            Ok(items) => return Ok(items),
            Err(err) => err,
        };

        let delay = match &err {
            FetchError::Transient(_) if transient_retries < policy.max_transient_retries => {
                let delay = policy.backoff_delay(transient_retries);
                transient_retries += 1;
                delay
            }
            FetchError::RateLimited { retry_after } if !rate_limit_retried => {
                rate_limit_retried = true;
                policy.rate_limit_wait(*retry_after)
            }
            _ => return Err(err),
        };

        log::warn!(
            "Fetch for source '{}' failed ({}), retrying in {:?}",
            source.key(),
            err,
            delay
        );

        tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(FetchError::Cancelled),
            _ = tokio::time::sleep(delay) => {}
        }
    }
}

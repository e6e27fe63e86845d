//! Bounded retry with exponential backoff for backend calls.
//!
//! Transient failures (HTTP 429, 5xx, network errors, per-attempt
//! timeouts) are retried up to `max_retries` times with delays of
//! `base`, `2 × base`, `4 × base`, … capped at `32 × base`. Anything else
//! fails immediately.

use std::future::Future;
use std::time::Duration;

use tracing::warn;

use crate::error::{RagError, RagResult};

#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32) -> Self {
        Self {
            max_retries,
            base_delay: Duration::from_secs(1),
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        self.base_delay * (1u32 << (attempt.saturating_sub(1)).min(5))
    }
}

/// Run `op` until it succeeds, fails permanently, or retries run out.
pub async fn with_retries<T, F, Fut>(policy: RetryPolicy, label: &str, mut op: F) -> RagResult<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = RagResult<T>>,
{
    let mut attempt = 0;
    loop {
        match op().await {
            Ok(v) => return Ok(v),
            Err(e) if e.is_transient() && attempt < policy.max_retries => {
                attempt += 1;
                let delay = policy.delay(attempt);
                warn!(
                    service = label,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %e,
                    "transient failure, retrying"
                );
                tokio::time::sleep(delay).await;
            }
            Err(e) => return Err(e),
        }
    }
}

/// Bound a whole backend call (retries included) by `timeout`.
pub async fn with_timeout<T, Fut>(timeout: Duration, fut: Fut) -> RagResult<T>
where
    Fut: Future<Output = RagResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => Err(RagError::Timeout(timeout.as_millis() as u64)),
    }
}

/// Map a non-success HTTP status to the error taxonomy.
pub fn status_error(service: &str, status: reqwest::StatusCode, body: &str) -> RagError {
    let msg = format!("{} API error {}: {}", service, status, body);
    if status.as_u16() == 429 {
        RagError::RateLimited(msg)
    } else if status.is_server_error() {
        RagError::ServiceUnavailable(msg)
    } else {
        RagError::InvalidRequest(msg)
    }
}

/// Map a transport-level reqwest failure.
pub fn send_error(service: &str, e: reqwest::Error, timeout: Duration) -> RagError {
    if e.is_timeout() {
        RagError::Timeout(timeout.as_millis() as u64)
    } else {
        RagError::ServiceUnavailable(format!("{} connection error: {}", service, e))
    }
}

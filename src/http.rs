//! Shared HTTP retry policy for the hosted embedding and completion APIs.
//!
//! - HTTP 429 (rate limited) and 5xx (server error) → retry
//! - HTTP 4xx (client error, not 429) → fail immediately
//! - Network errors → retry
//! - Backoff: 1s, 2s, 4s, 8s, 16s, 32s (capped at 2^5)

use std::time::Duration;
use thiserror::Error;

/// Why a request ultimately failed.
#[derive(Debug, Error)]
pub enum HttpFailure {
    /// The server answered with a non-success status.
    #[error("HTTP {status}: {body}")]
    Status { status: u16, body: String },
    /// The request never produced a response.
    #[error("network error: {0}")]
    Network(#[source] reqwest::Error),
}

pub fn is_retryable(status: u16) -> bool {
    status == 429 || (500..600).contains(&status)
}

/// Delay before retry number `attempt` (1-based).
pub fn backoff(attempt: u32) -> Duration {
    Duration::from_secs(1 << (attempt.saturating_sub(1)).min(5))
}

/// Send the request built by `make` until it succeeds, fails with a
/// non-retryable status, or `max_retries` retries are used up.
pub async fn send_with_retry<F>(
    label: &str,
    max_retries: u32,
    make: F,
) -> Result<reqwest::Response, HttpFailure>
where
    F: Fn() -> reqwest::RequestBuilder,
{
    let mut last_err = None;

    for attempt in 0..=max_retries {
        if attempt > 0 {
            let delay = backoff(attempt);
            tracing::debug!(label, attempt, delay_secs = delay.as_secs(), "retrying request");
            tokio::time::sleep(delay).await;
        }

        match make().send().await {
            Ok(response) => {
                let status = response.status().as_u16();
                if response.status().is_success() {
                    return Ok(response);
                }
                let body = response.text().await.unwrap_or_default();
                let failure = HttpFailure::Status { status, body };
                if !is_retryable(status) {
                    return Err(failure);
                }
                tracing::warn!(label, status, "transient API error");
                last_err = Some(failure);
            }
            Err(e) => {
                tracing::warn!(label, error = %e, "request failed");
                last_err = Some(HttpFailure::Network(e));
            }
        }
    }

    Err(last_err.unwrap_or(HttpFailure::Status {
        status: 0,
        body: format!("{} failed after retries", label),
    }))
}

//! Timeout enforcement.
//!
//! # Responsibilities
//! - Wrap transport calls with a per-attempt deadline
//! - Pick the deadline: per-request override, else the configured default
//!
//! # Design Decisions
//! - Uses Tokio's timeout facilities; the inner future is dropped on expiry
//! - Timeout errors are distinct from other errors and count as transient

use std::future::Future;
use std::time::Duration;

use crate::config::TimeoutConfig;
use crate::http::error::ClientError;
use crate::http::request::HttpRequest;

/// Deadline for one attempt of `request`.
pub fn attempt_deadline(request: &HttpRequest, config: &TimeoutConfig) -> Duration {
    request.timeout.unwrap_or_else(|| config.request())
}

/// Run `fut`, failing with [`ClientError::Timeout`] if it takes longer than `after`.
pub async fn with_deadline<T, F>(after: Duration, url: &str, fut: F) -> Result<T, ClientError>
where
    F: Future<Output = Result<T, ClientError>>,
{
    match tokio::time::timeout(after, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::debug!(url = %url, after_ms = after.as_millis() as u64, "Attempt deadline exceeded");
            Err(ClientError::Timeout {
                url: url.to_string(),
                after,
            })
        }
    }
}

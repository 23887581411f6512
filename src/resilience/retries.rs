//! Retry logic.
//!
//! # Responsibilities
//! - Determine if a request is retryable (idempotent methods only)
//! - Classify each attempt outcome as final or retryable
//! - Execute retries with exponential backoff + jitter
//! - Honor `Retry-After` on 429/503 within a bounded wait
//!
//! # Design Decisions
//! - Non-idempotent methods (POST, PATCH) get exactly one attempt
//! - Transport failures are retryable; statuses only when configured
//! - Backoff sleeps and attempts both observe the cancellation token
//! - A malformed or absurd `Retry-After` falls back to computed backoff

use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use hyper::Method;
use tokio_util::sync::CancellationToken;

use crate::config::RetryConfig;
use crate::http::error::ClientError;
use crate::http::response::HttpResponse;
use crate::observability::metrics;
use crate::resilience::backoff::BackoffPolicy;

/// Longest `Retry-After` header value that will be parsed.
pub const RETRY_AFTER_MAX_LEN: usize = 100;

/// Largest `Retry-After` accepted before clamping; anything beyond is bogus.
pub const RETRY_AFTER_SANITY_LIMIT: Duration = Duration::from_secs(365 * 24 * 60 * 60);

/// Result of a retried call.
#[derive(Debug)]
pub struct RetryOutcome {
    pub result: Result<HttpResponse, ClientError>,
    /// Number of attempts actually made.
    pub attempts: u32,
}

/// What to do after one attempt.
#[derive(Debug, Clone, Copy, PartialEq)]
enum Verdict {
    Done,
    Retry {
        reason: &'static str,
        retry_after: Option<Duration>,
    },
}

/// Drives repeated attempts of one logical request.
#[derive(Debug, Clone)]
pub struct RetryController {
    config: RetryConfig,
    backoff: BackoffPolicy,
}

impl RetryController {
    pub fn new(config: RetryConfig) -> Self {
        let backoff = BackoffPolicy::from_config(&config);
        Self { config, backoff }
    }

    pub fn config(&self) -> &RetryConfig {
        &self.config
    }

    pub fn backoff(&self) -> &BackoffPolicy {
        &self.backoff
    }

    /// Whether requests with this method may be attempted more than once.
    pub fn can_retry(&self, method: &Method) -> bool {
        self.config.enabled && self.config.max_attempts > 1 && self.config.is_idempotent(method.as_str())
    }

    /// Run `attempt` (called with the 1-based attempt number) until it
    /// yields a final outcome or the attempt budget is spent.
    ///
    /// When retrying was possible and every attempt failed retryably, the
    /// result is [`ClientError::RetriesExhausted`] carrying the last cause.
    pub async fn execute<F, Fut>(
        &self,
        method: &Method,
        url: &str,
        cancel: &CancellationToken,
        mut attempt: F,
    ) -> RetryOutcome
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<HttpResponse, ClientError>>,
    {
        let can_retry = self.can_retry(method);
        let max_attempts = if can_retry { self.config.max_attempts } else { 1 };
        let mut attempts = 0;

        loop {
            if cancel.is_cancelled() {
                return RetryOutcome {
                    result: Err(ClientError::Cancelled),
                    attempts,
                };
            }

            attempts += 1;
            let result = tokio::select! {
                biased;
                _ = cancel.cancelled() => Err(ClientError::Cancelled),
                result = attempt(attempts) => result,
            };

            let (reason, retry_after) = match self.classify(&result) {
                Verdict::Done => return RetryOutcome { result, attempts },
                Verdict::Retry { reason, retry_after } => (reason, retry_after),
            };

            if attempts >= max_attempts {
                if !can_retry {
                    return RetryOutcome { result, attempts };
                }
                let last = match result {
                    Ok(response) => ClientError::Status {
                        status: response.status_code(),
                        url: url.to_string(),
                        attempts,
                    },
                    Err(e) => e,
                };
                tracing::warn!(
                    method = %method,
                    url = %url,
                    attempts,
                    last_error = %last,
                    "Retries exhausted"
                );
                return RetryOutcome {
                    result: Err(ClientError::RetriesExhausted {
                        attempts,
                        last: Box::new(last),
                    }),
                    attempts,
                };
            }

            let delay = retry_after.unwrap_or_else(|| self.backoff.delay(attempts));
            metrics::record_retry(method.as_str(), reason);
            tracing::info!(
                method = %method,
                url = %url,
                attempt = attempts,
                reason,
                delay_ms = delay.as_millis() as u64,
                "Retrying request"
            );

            tokio::select! {
                _ = cancel.cancelled() => {
                    tracing::debug!(url = %url, "Backoff interrupted by cancellation");
                    return RetryOutcome {
                        result: Err(ClientError::Cancelled),
                        attempts,
                    };
                }
                _ = tokio::time::sleep(delay) => {}
            }
        }
    }

    fn classify(&self, result: &Result<HttpResponse, ClientError>) -> Verdict {
        match result {
            Ok(response) => {
                let status = response.status_code();
                if !self.config.retryable_status_codes.contains(&status) {
                    return Verdict::Done;
                }
                let retry_after = if self.config.respect_retry_after && matches!(status, 429 | 503) {
                    response
                        .header("retry-after")
                        .and_then(|v| parse_retry_after(v, self.config.retry_after_max()))
                } else {
                    None
                };
                Verdict::Retry {
                    reason: "status",
                    retry_after,
                }
            }
            Err(e) => match e {
                ClientError::Timeout { .. } => Verdict::Retry {
                    reason: "timeout",
                    retry_after: None,
                },
                ClientError::Connect { .. } | ClientError::Dns { .. } | ClientError::Proxy { .. } => {
                    Verdict::Retry {
                        reason: "connection",
                        retry_after: None,
                    }
                }
                _ => Verdict::Done,
            },
        }
    }
}

/// Parse a `Retry-After` value (delta-seconds or HTTP-date) into a wait,
/// clamped to `max`.
///
/// Returns `None` for values that are oversized, malformed, negative, not
/// finite or more than a year out.
pub fn parse_retry_after(value: &str, max: Duration) -> Option<Duration> {
    parse_retry_after_at(value, max, Utc::now())
}

fn parse_retry_after_at(value: &str, max: Duration, now: DateTime<Utc>) -> Option<Duration> {
    if value.len() > RETRY_AFTER_MAX_LEN {
        tracing::warn!(len = value.len(), "Ignoring oversized Retry-After header");
        return None;
    }
    let value = value.trim();

    let wait = if let Ok(seconds) = value.parse::<f64>() {
        if !seconds.is_finite() || seconds < 0.0 {
            tracing::warn!(value, "Ignoring invalid Retry-After header");
            return None;
        }
        if seconds > RETRY_AFTER_SANITY_LIMIT.as_secs_f64() {
            tracing::warn!(value, "Ignoring out-of-range Retry-After header");
            return None;
        }
        Duration::from_secs_f64(seconds)
    } else {
        let date = DateTime::parse_from_rfc2822(value).ok()?.with_timezone(&Utc);
        // A date in the past means "now".
        let wait = (date - now).to_std().unwrap_or(Duration::ZERO);
        if wait > RETRY_AFTER_SANITY_LIMIT {
            tracing::warn!(value, "Ignoring out-of-range Retry-After header");
            return None;
        }
        wait
    };

    if wait > max {
        tracing::debug!(requested_ms = wait.as_millis() as u64, max_ms = max.as_millis() as u64, "Clamping Retry-After");
    }
    Some(wait.min(max))
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Arc;

    use tokio::time::Instant;

    use super::*;

    fn config(max_attempts: u32) -> RetryConfig {
        RetryConfig {
            max_attempts,
            backoff_base_ms: 100,
            backoff_factor: 2.0,
            jitter: false,
            ..RetryConfig::default()
        }
    }

    fn scripted(statuses: &[u16]) -> (Arc<AtomicU32>, Vec<u16>) {
        (Arc::new(AtomicU32::new(0)), statuses.to_vec())
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let controller = RetryController::new(config(3));
        let (calls, statuses) = scripted(&[503, 503, 200]);
        let start = Instant::now();

        let outcome = controller
            .execute(&Method::GET, "http://t/", &CancellationToken::new(), |n| {
                calls.fetch_add(1, Ordering::SeqCst);
                let status = statuses[(n - 1) as usize];
                async move { Ok(HttpResponse::with_status(status)) }
            })
            .await;

        assert_eq!(outcome.attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        assert_eq!(outcome.result.unwrap().status_code(), 200);
        // 100ms + 200ms of backoff
        assert_eq!(start.elapsed(), Duration::from_millis(300));
    }

    #[tokio::test(start_paused = true)]
    async fn test_post_is_not_retried() {
        let controller = RetryController::new(config(3));
        let outcome = controller
            .execute(&Method::POST, "http://t/", &CancellationToken::new(), |_| async {
                Ok(HttpResponse::with_status(503))
            })
            .await;

        assert_eq!(outcome.attempts, 1);
        assert_eq!(outcome.result.unwrap().status_code(), 503);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhaustion_carries_last_cause() {
        let controller = RetryController::new(config(2));
        let outcome = controller
            .execute(&Method::GET, "http://t/", &CancellationToken::new(), |_| async {
                Err(ClientError::Connect {
                    url: "http://t/".into(),
                    message: "refused".into(),
                })
            })
            .await;

        assert_eq!(outcome.attempts, 2);
        match outcome.result {
            Err(ClientError::RetriesExhausted { attempts, last }) => {
                assert_eq!(attempts, 2);
                assert!(matches!(*last, ClientError::Connect { .. }));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_fatal_error_not_retried() {
        let controller = RetryController::new(config(3));
        let outcome = controller
            .execute(&Method::GET, "http://t/", &CancellationToken::new(), |_| async {
                Err(ClientError::InvalidResponse {
                    url: "http://t/".into(),
                    message: "garbage".into(),
                })
            })
            .await;
        assert_eq!(outcome.attempts, 1);
        assert!(matches!(outcome.result, Err(ClientError::InvalidResponse { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_after_overrides_backoff() {
        let controller = RetryController::new(config(2));
        let start = Instant::now();
        let outcome = controller
            .execute(&Method::GET, "http://t/", &CancellationToken::new(), |n| async move {
                if n == 1 {
                    let mut response = HttpResponse::with_status(429);
                    response.headers.insert("retry-after", "7".parse().unwrap());
                    Ok(response)
                } else {
                    Ok(HttpResponse::with_status(200))
                }
            })
            .await;

        assert!(outcome.result.is_ok());
        assert_eq!(start.elapsed(), Duration::from_secs(7));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let controller = RetryController::new(RetryConfig {
            backoff_base_ms: 60_000,
            ..config(3)
        });
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(10)).await;
            trigger.cancel();
        });

        let start = Instant::now();
        let outcome = controller
            .execute(&Method::GET, "http://t/", &cancel, |_| async {
                Ok(HttpResponse::with_status(503))
            })
            .await;

        assert!(matches!(outcome.result, Err(ClientError::Cancelled)));
        assert_eq!(outcome.attempts, 1);
        assert!(start.elapsed() < Duration::from_secs(1));
    }

    #[test]
    fn test_parse_retry_after() {
        let max = Duration::from_secs(300);
        assert_eq!(parse_retry_after("120", max), Some(Duration::from_secs(120)));
        assert_eq!(parse_retry_after(" 1.5 ", max), Some(Duration::from_millis(1500)));
        assert_eq!(parse_retry_after("3600", max), Some(max));
        assert_eq!(parse_retry_after("-1", max), None);
        assert_eq!(parse_retry_after("NaN", max), None);
        assert_eq!(parse_retry_after("inf", max), None);
        assert_eq!(parse_retry_after("99999999999", max), None);
        assert_eq!(parse_retry_after("soon", max), None);
        assert_eq!(parse_retry_after(&"9".repeat(101), max), None);
    }

    #[test]
    fn test_parse_retry_after_http_date() {
        let now = DateTime::parse_from_rfc2822("Wed, 21 Oct 2015 07:28:00 GMT")
            .unwrap()
            .with_timezone(&Utc);
        let max = Duration::from_secs(300);

        assert_eq!(
            parse_retry_after_at("Wed, 21 Oct 2015 07:29:00 GMT", max, now),
            Some(Duration::from_secs(60))
        );
        assert_eq!(
            parse_retry_after_at("Wed, 21 Oct 2015 07:00:00 GMT", max, now),
            Some(Duration::ZERO)
        );
        assert_eq!(parse_retry_after_at("Wed, 21 Oct 2020 07:28:00 GMT", max, now), None);
    }
}

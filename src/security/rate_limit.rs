//! Client-side rate limiting.
//!
//! # Strategies
//! - Fixed window: counter reset at each window boundary
//! - Sliding window: log of admission instants, at most `max_requests` long
//! - Token bucket: `max_requests` burst refilled evenly over the window
//!
//! # Design Decisions
//! - State is rotated in place, never accumulated (bounded memory)
//! - The lock is released before sleeping; waiters re-check on wake
//! - Blocking waits are bounded by `max_wait` and observe cancellation

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::config::{OnLimit, RateLimitConfig, RateLimitStrategy};
use crate::http::error::ClientError;
use crate::observability::metrics;

/// A simple token bucket.
#[derive(Debug)]
struct TokenBucket {
    tokens: f64,
    last_update: Instant,
}

impl TokenBucket {
    fn new(capacity: f64, now: Instant) -> Self {
        Self {
            tokens: capacity,
            last_update: now,
        }
    }

    fn refilled(&self, now: Instant, capacity: f64, refill_rate: f64) -> f64 {
        let elapsed = now.saturating_duration_since(self.last_update).as_secs_f64();
        (self.tokens + elapsed * refill_rate).min(capacity)
    }

    fn try_acquire(&mut self, now: Instant, capacity: f64, refill_rate: f64) -> Result<(), Duration> {
        self.tokens = self.refilled(now, capacity, refill_rate);
        self.last_update = now;

        if self.tokens >= 1.0 {
            self.tokens -= 1.0;
            Ok(())
        } else {
            Err(Duration::from_secs_f64((1.0 - self.tokens) / refill_rate))
        }
    }
}

#[derive(Debug)]
enum Window {
    Fixed { started: Instant, count: u32 },
    Sliding { log: VecDeque<Instant> },
    Bucket(TokenBucket),
}

/// Occupancy of a limiter, for diagnostics.
#[derive(Debug, Clone, Serialize)]
pub struct RateLimitStatus {
    pub strategy: RateLimitStrategy,
    pub max_requests: u32,
    pub window_ms: u64,
    pub used: u32,
    pub remaining: u32,
    /// Time until at least one more request would be admitted.
    pub reset_in_ms: u64,
}

/// Admission gate for outgoing requests.
#[derive(Debug)]
pub struct RateLimiter {
    config: RateLimitConfig,
    window: Mutex<Window>,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig) -> Self {
        let window = Self::fresh_window(&config, Instant::now());
        Self {
            config,
            window: Mutex::new(window),
        }
    }

    fn fresh_window(config: &RateLimitConfig, now: Instant) -> Window {
        match config.strategy {
            RateLimitStrategy::FixedWindow => Window::Fixed { started: now, count: 0 },
            RateLimitStrategy::SlidingWindow => Window::Sliding {
                log: VecDeque::with_capacity(config.max_requests as usize),
            },
            RateLimitStrategy::TokenBucket => {
                Window::Bucket(TokenBucket::new(config.max_requests as f64, now))
            }
        }
    }

    pub fn config(&self) -> &RateLimitConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, Window>, ClientError> {
        self.window
            .lock()
            .map_err(|_| ClientError::StatePoisoned { subsystem: "rate limiter" })
    }

    fn refill_rate(&self) -> f64 {
        let window = self.config.window().as_secs_f64();
        if window <= 0.0 {
            return f64::INFINITY;
        }
        self.config.max_requests as f64 / window
    }

    /// Try to admit one request. On rejection returns the time until a slot frees up.
    fn check(&self, now: Instant) -> Result<Result<(), Duration>, ClientError> {
        let window_len = self.config.window();
        let max = self.config.max_requests;
        let mut window = self.lock()?;

        let verdict = match &mut *window {
            Window::Fixed { started, count } => {
                if now.saturating_duration_since(*started) >= window_len {
                    *started = now;
                    *count = 0;
                }
                if *count < max {
                    *count += 1;
                    Ok(())
                } else {
                    Err((*started + window_len).saturating_duration_since(now))
                }
            }
            Window::Sliding { log } => {
                while log
                    .front()
                    .is_some_and(|t| now.saturating_duration_since(*t) >= window_len)
                {
                    log.pop_front();
                }
                if (log.len() as u32) < max {
                    log.push_back(now);
                    Ok(())
                } else {
                    let oldest = log.front().copied().unwrap_or(now);
                    Err((oldest + window_len).saturating_duration_since(now))
                }
            }
            Window::Bucket(bucket) => bucket.try_acquire(now, max as f64, self.refill_rate()),
        };
        Ok(verdict)
    }

    /// Admit one request if a slot is free right now.
    pub fn try_acquire(&self) -> Result<bool, ClientError> {
        Ok(self.check(Instant::now())?.is_ok())
    }

    /// Admit one request, waiting up to `max_wait` when `on_limit` is `Block`.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<(), ClientError> {
        let deadline = Instant::now() + self.config.max_wait();
        let mut waited = false;

        loop {
            let now = Instant::now();
            let wait = match self.check(now)? {
                Ok(()) => {
                    if waited {
                        tracing::debug!("Rate limiter admitted request after waiting");
                    }
                    return Ok(());
                }
                Err(wait) => wait,
            };

            let must_reject = match self.config.on_limit {
                OnLimit::Reject => true,
                OnLimit::Block => now + wait > deadline,
            };
            if must_reject {
                metrics::record_rate_limited("reject");
                tracing::warn!(
                    max_requests = self.config.max_requests,
                    window_ms = self.config.window_ms,
                    retry_after_ms = wait.as_millis() as u64,
                    "Rate limit exceeded"
                );
                return Err(ClientError::RateLimitExceeded {
                    retry_after: Some(wait),
                });
            }

            if !waited {
                metrics::record_rate_limited("wait");
                tracing::debug!(wait_ms = wait.as_millis() as u64, "Rate limit reached, waiting");
            }
            waited = true;

            // Wake at least a millisecond later so a zero wait cannot spin.
            let sleep_for = wait.max(Duration::from_millis(1));
            tokio::select! {
                _ = cancel.cancelled() => return Err(ClientError::Cancelled),
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
    }

    /// Requests that would be admitted right now.
    pub fn remaining(&self) -> Result<u32, ClientError> {
        Ok(self.status()?.remaining)
    }

    /// Forget all admissions.
    pub fn reset(&self) -> Result<(), ClientError> {
        let mut window = self.lock()?;
        *window = Self::fresh_window(&self.config, Instant::now());
        Ok(())
    }

    /// Current occupancy. Does not modify the window.
    pub fn status(&self) -> Result<RateLimitStatus, ClientError> {
        let now = Instant::now();
        let window_len = self.config.window();
        let max = self.config.max_requests;
        let window = self.lock()?;

        let (used, reset_in) = match &*window {
            Window::Fixed { started, count } => {
                if now.saturating_duration_since(*started) >= window_len {
                    (0, Duration::ZERO)
                } else {
                    let reset_in = if *count < max {
                        Duration::ZERO
                    } else {
                        (*started + window_len).saturating_duration_since(now)
                    };
                    (*count, reset_in)
                }
            }
            Window::Sliding { log } => {
                let live: Vec<&Instant> = log
                    .iter()
                    .filter(|t| now.saturating_duration_since(**t) < window_len)
                    .collect();
                let used = live.len() as u32;
                let reset_in = match live.first() {
                    Some(oldest) if used >= max => (**oldest + window_len).saturating_duration_since(now),
                    _ => Duration::ZERO,
                };
                (used, reset_in)
            }
            Window::Bucket(bucket) => {
                let rate = self.refill_rate();
                let tokens = bucket.refilled(now, max as f64, rate);
                let used = max.saturating_sub(tokens.floor() as u32);
                let reset_in = if tokens >= 1.0 {
                    Duration::ZERO
                } else {
                    Duration::from_secs_f64((1.0 - tokens) / rate)
                };
                (used, reset_in)
            }
        };

        Ok(RateLimitStatus {
            strategy: self.config.strategy,
            max_requests: max,
            window_ms: self.config.window_ms,
            used: used.min(max),
            remaining: max.saturating_sub(used),
            reset_in_ms: reset_in.as_millis() as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limiter(strategy: RateLimitStrategy, on_limit: OnLimit) -> RateLimiter {
        RateLimiter::new(RateLimitConfig {
            enabled: true,
            max_requests: 3,
            window_ms: 1_000,
            strategy,
            on_limit,
            max_wait_ms: 5_000,
        })
    }

    #[tokio::test(start_paused = true)]
    async fn test_sliding_window_admits_max() {
        let l = limiter(RateLimitStrategy::SlidingWindow, OnLimit::Reject);
        for _ in 0..3 {
            assert!(l.try_acquire().unwrap());
        }
        assert!(!l.try_acquire().unwrap());
        assert_eq!(l.remaining().unwrap(), 0);

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert_eq!(l.remaining().unwrap(), 3);
        assert!(l.try_acquire().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_fixed_window_resets() {
        let l = limiter(RateLimitStrategy::FixedWindow, OnLimit::Reject);
        for _ in 0..3 {
            assert!(l.try_acquire().unwrap());
        }
        assert!(!l.try_acquire().unwrap());
        let status = l.status().unwrap();
        assert_eq!(status.used, 3);
        assert_eq!(status.reset_in_ms, 1_000);

        tokio::time::advance(Duration::from_millis(1_000)).await;
        assert!(l.try_acquire().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_token_bucket_refills() {
        let l = limiter(RateLimitStrategy::TokenBucket, OnLimit::Reject);
        for _ in 0..3 {
            assert!(l.try_acquire().unwrap());
        }
        assert!(!l.try_acquire().unwrap());

        // Three tokens per second: one token every ~333ms.
        tokio::time::advance(Duration::from_millis(340)).await;
        assert!(l.try_acquire().unwrap());
        assert!(!l.try_acquire().unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn test_reject_reports_retry_after() {
        let l = limiter(RateLimitStrategy::SlidingWindow, OnLimit::Reject);
        let cancel = CancellationToken::new();
        for _ in 0..3 {
            l.acquire(&cancel).await.unwrap();
        }
        match l.acquire(&cancel).await {
            Err(ClientError::RateLimitExceeded { retry_after }) => {
                assert_eq!(retry_after, Some(Duration::from_millis(1_000)));
            }
            other => panic!("expected rejection, got {other:?}"),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_waits_for_slot() {
        let l = limiter(RateLimitStrategy::SlidingWindow, OnLimit::Block);
        let cancel = CancellationToken::new();
        let start = Instant::now();
        for _ in 0..4 {
            l.acquire(&cancel).await.unwrap();
        }
        assert_eq!(start.elapsed(), Duration::from_millis(1_000));
    }

    #[tokio::test(start_paused = true)]
    async fn test_block_gives_up_after_max_wait() {
        let l = RateLimiter::new(RateLimitConfig {
            enabled: true,
            max_requests: 1,
            window_ms: 60_000,
            max_wait_ms: 100,
            ..RateLimitConfig::default()
        });
        let cancel = CancellationToken::new();
        l.acquire(&cancel).await.unwrap();
        assert!(matches!(
            l.acquire(&cancel).await,
            Err(ClientError::RateLimitExceeded { .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_blocked_wait() {
        let l = limiter(RateLimitStrategy::SlidingWindow, OnLimit::Block);
        let cancel = CancellationToken::new();
        for _ in 0..3 {
            l.acquire(&cancel).await.unwrap();
        }

        let start = Instant::now();
        let (result, ()) = tokio::join!(l.acquire(&cancel), async {
            tokio::time::sleep(Duration::from_millis(200)).await;
            cancel.cancel();
        });
        assert!(matches!(result, Err(ClientError::Cancelled)), "got {result:?}");
        assert_eq!(start.elapsed(), Duration::from_millis(200));

        // The abandoned waiter took no slot.
        tokio::time::advance(Duration::from_millis(800)).await;
        assert_eq!(l.remaining().unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_reset() {
        let l = limiter(RateLimitStrategy::FixedWindow, OnLimit::Reject);
        for _ in 0..3 {
            l.try_acquire().unwrap();
        }
        l.reset().unwrap();
        assert_eq!(l.remaining().unwrap(), 3);
    }
}

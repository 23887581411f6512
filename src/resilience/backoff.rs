//! Exponential backoff with jitter.

use std::time::Duration;

use rand::Rng;

use crate::config::RetryConfig;

/// Delay schedule between retry attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackoffPolicy {
    pub base: Duration,
    pub factor: f64,
    pub max: Duration,
    pub jitter: bool,
}

impl BackoffPolicy {
    pub fn new(base: Duration, factor: f64, max: Duration, jitter: bool) -> Self {
        Self {
            base,
            factor,
            max,
            jitter,
        }
    }

    pub fn from_config(config: &RetryConfig) -> Self {
        Self::new(
            config.backoff_base(),
            config.backoff_factor,
            config.backoff_max(),
            config.jitter,
        )
    }

    /// Un-jittered delay after failed attempt `attempt` (1-based):
    /// `min(max, base * factor^(attempt - 1))`.
    pub fn base_delay(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }

        let exponent = i32::try_from(attempt - 1).unwrap_or(i32::MAX);
        let base_ms = self.base.as_secs_f64() * 1_000.0;
        let max_ms = self.max.as_secs_f64() * 1_000.0;

        let delay_ms = base_ms * self.factor.powi(exponent);
        let capped_ms = if delay_ms.is_finite() {
            delay_ms.min(max_ms)
        } else {
            max_ms
        };

        Duration::from_nanos((capped_ms * 1_000_000.0).round() as u64)
    }

    /// Delay to sleep after failed attempt `attempt`, jittered if enabled.
    pub fn delay(&self, attempt: u32) -> Duration {
        let delay = self.base_delay(attempt);
        if !self.jitter || delay.is_zero() {
            return delay;
        }

        // Uniform factor in [0.5, 1.5)
        let factor = rand::thread_rng().gen_range(0.5..1.5);
        delay.mul_f64(factor)
    }
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

//! Proxy health records.
//!
//! # Responsibilities
//! - Represent a single proxy server in the pool
//! - Track health state (Unknown/Healthy/Unhealthy) with hysteresis
//! - Track usage statistics for weighted rotation
//! - Track response times of requests carried by the proxy
//! - Coalesce concurrent health checks through an in-flight flag

use std::time::{Duration, SystemTime};

use serde::Serialize;

use crate::proxy::ProxyAddr;

/// Health State enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    Unknown,
    Healthy,
    Unhealthy,
}

/// A single proxy and its observed health.
#[derive(Debug, Clone, Serialize)]
pub struct ProxyRecord {
    pub addr: ProxyAddr,
    pub health: HealthState,
    pub consecutive_failures: u32,
    pub consecutive_successes: u32,
    pub success_count: u64,
    pub failure_count: u64,
    pub last_checked: Option<SystemTime>,
    pub last_used: Option<SystemTime>,
    /// Sum of timed responses, in milliseconds.
    pub total_response_ms: u64,
    pub timed_responses: u64,
    /// A health probe for this proxy is currently running.
    pub check_in_flight: bool,
    #[serde(skip)]
    pub(crate) check_generation: u64,
}

impl ProxyRecord {
    pub fn new(addr: ProxyAddr) -> Self {
        Self {
            addr,
            health: HealthState::Unknown,
            consecutive_failures: 0,
            consecutive_successes: 0,
            success_count: 0,
            failure_count: 0,
            last_checked: None,
            last_used: None,
            total_response_ms: 0,
            timed_responses: 0,
            check_in_flight: false,
            check_generation: 0,
        }
    }

    /// Share of successful outcomes; a proxy with no history counts as fully working.
    pub fn success_rate(&self) -> f64 {
        let total = self.success_count + self.failure_count;
        if total == 0 {
            return 1.0;
        }
        self.success_count as f64 / total as f64
    }

    /// Mean time to a response through this proxy, if any was timed.
    pub fn average_response_time(&self) -> Option<Duration> {
        if self.timed_responses == 0 {
            return None;
        }
        Some(Duration::from_millis(self.total_response_ms / self.timed_responses))
    }

    pub fn record_response_time(&mut self, elapsed: Duration) {
        let millis = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);
        self.total_response_ms = self.total_response_ms.saturating_add(millis);
        self.timed_responses += 1;
    }

    /// Record a success. Returns the new state if it changed.
    pub fn mark_success(&mut self, healthy_threshold: u32) -> Option<HealthState> {
        self.success_count += 1;
        self.consecutive_failures = 0;

        if self.health == HealthState::Healthy {
            return None;
        }

        self.consecutive_successes += 1;
        if self.consecutive_successes >= healthy_threshold {
            self.health = HealthState::Healthy;
            self.consecutive_successes = 0;
            return Some(HealthState::Healthy);
        }
        None
    }

    /// Record a failure. Returns the new state if it changed.
    pub fn mark_failure(&mut self, unhealthy_threshold: u32) -> Option<HealthState> {
        self.failure_count += 1;
        self.consecutive_successes = 0;

        if self.health == HealthState::Unhealthy {
            return None;
        }

        self.consecutive_failures += 1;
        if self.consecutive_failures >= unhealthy_threshold {
            self.health = HealthState::Unhealthy;
            self.consecutive_failures = 0;
            return Some(HealthState::Unhealthy);
        }
        None
    }

    /// Claim the right to run a health check. Returns the check generation,
    /// or `None` when a check is already running.
    pub(crate) fn begin_check(&mut self) -> Option<u64> {
        if self.check_in_flight {
            return None;
        }
        self.check_in_flight = true;
        self.check_generation += 1;
        Some(self.check_generation)
    }

    /// Release a check that ended without a result.
    pub(crate) fn abandon_check(&mut self, generation: u64) {
        if self.check_in_flight && self.check_generation == generation {
            self.check_in_flight = false;
        }
    }

    /// Apply a check result. Ignored unless `generation` is the running check.
    pub(crate) fn finish_check(
        &mut self,
        generation: u64,
        healthy: bool,
        healthy_threshold: u32,
        unhealthy_threshold: u32,
    ) -> Option<Option<HealthState>> {
        if !self.check_in_flight || self.check_generation != generation {
            return None;
        }
        self.check_in_flight = false;
        self.last_checked = Some(SystemTime::now());
        let transition = if healthy {
            self.mark_success(healthy_threshold)
        } else {
            self.mark_failure(unhealthy_threshold)
        };
        Some(transition)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn record() -> ProxyRecord {
        ProxyRecord::new(ProxyAddr::new("127.0.0.1", 3128))
    }

    #[test]
    fn test_hysteresis() {
        let mut r = record();
        assert_eq!(r.mark_failure(3), None);
        assert_eq!(r.mark_failure(3), None);
        assert_eq!(r.mark_failure(3), Some(HealthState::Unhealthy));
        assert_eq!(r.mark_failure(3), None);

        assert_eq!(r.mark_success(2), None);
        assert_eq!(r.mark_success(2), Some(HealthState::Healthy));
        assert_eq!(r.health, HealthState::Healthy);
    }

    #[test]
    fn test_success_resets_failure_streak() {
        let mut r = record();
        r.mark_failure(3);
        r.mark_failure(3);
        r.mark_success(1);
        r.mark_failure(3);
        assert_eq!(r.health, HealthState::Healthy);
        assert_eq!(r.consecutive_failures, 1);
    }

    #[test]
    fn test_check_result_applied_once() {
        let mut r = record();
        let generation = r.begin_check().unwrap();
        assert!(r.begin_check().is_none(), "second check must be coalesced");

        assert_eq!(r.finish_check(generation, true, 1, 3), Some(Some(HealthState::Healthy)));
        assert_eq!(r.finish_check(generation, false, 1, 3), None);
        assert!(!r.check_in_flight);
        assert_eq!(r.health, HealthState::Healthy);
    }

    #[test]
    fn test_abandoned_check_releases_claim() {
        let mut r = record();
        let first = r.begin_check().unwrap();
        r.abandon_check(first);
        assert!(!r.check_in_flight);

        let second = r.begin_check().unwrap();
        // A stale abandon must not release the newer claim.
        r.abandon_check(first);
        assert!(r.check_in_flight);
        assert_eq!(r.finish_check(second, true, 1, 3), Some(Some(HealthState::Healthy)));
    }

    #[test]
    fn test_average_response_time() {
        let mut r = record();
        assert_eq!(r.average_response_time(), None);
        r.record_response_time(Duration::from_millis(100));
        r.record_response_time(Duration::from_millis(300));
        assert_eq!(r.average_response_time(), Some(Duration::from_millis(200)));
    }

    #[test]
    fn test_success_rate() {
        let mut r = record();
        assert_eq!(r.success_rate(), 1.0);
        r.mark_success(1);
        r.mark_failure(3);
        assert_eq!(r.success_rate(), 0.5);
    }
}

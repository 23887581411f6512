//! Circuit breaker for target protection.
//!
//! # States
//! - Closed: normal operation, requests pass through
//! - Open: target assumed down, requests fail fast
//! - Half-Open: a bounded number of trial requests test recovery
//!
//! # State Transitions
//! ```text
//! Closed → Open: consecutive failures >= failure_threshold
//! Open → Half-Open: recovery_timeout elapsed (checked on admission)
//! Half-Open → Closed: a trial request succeeds
//! Half-Open → Open: a trial request fails
//! ```
//!
//! # Design Decisions
//! - One breaker per target; the registry decides what a target is
//! - Fail fast in Open state (no waiting for timeout)
//! - Excess Half-Open trials are rejected but never counted as failures
//! - Trial permits carry the epoch they were issued in; a permit from an
//!   earlier epoch never touches the current state

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;
use url::Url;

use crate::config::{BreakerScope, CircuitBreakerConfig};
use crate::http::error::ClientError;
use crate::observability::metrics;

/// Breaker mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitMode {
    Closed,
    Open,
    HalfOpen,
}

impl CircuitMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            CircuitMode::Closed => "closed",
            CircuitMode::Open => "open",
            CircuitMode::HalfOpen => "half_open",
        }
    }
}

/// How one request outcome affects the breaker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failure,
    /// Neither: control-flow rejections, excluded statuses or errors.
    Neutral,
}

#[derive(Debug)]
struct CircuitState {
    mode: CircuitMode,
    consecutive_failures: u32,
    /// Failure that opened the circuit.
    opened_at: Option<Instant>,
    half_open_in_flight: u32,
    epoch: u64,
}

/// Read-only view of one breaker.
#[derive(Debug, Clone, Serialize)]
pub struct BreakerSnapshot {
    pub target: String,
    pub state: CircuitMode,
    pub consecutive_failures: u32,
    pub half_open_in_flight: u32,
    /// Time until an Open breaker admits a trial; zero once it would.
    pub retry_in_ms: Option<u64>,
}

/// Failure-tracking state machine for one target.
#[derive(Debug)]
pub struct CircuitBreaker {
    target: String,
    config: CircuitBreakerConfig,
    state: Mutex<CircuitState>,
}

/// Right to run one Half-Open trial.
///
/// Dropping an unsettled permit frees its slot, so cancelled trials do not
/// pin the breaker in Half-Open.
#[derive(Debug)]
pub struct TrialPermit {
    breaker: Arc<CircuitBreaker>,
    epoch: u64,
    settled: AtomicBool,
}

impl TrialPermit {
    /// Mark the permit used. Returns its epoch the first time only.
    fn settle(&self) -> Option<u64> {
        if self.settled.swap(true, Ordering::AcqRel) {
            None
        } else {
            Some(self.epoch)
        }
    }
}

impl Drop for TrialPermit {
    fn drop(&mut self) {
        if let Some(epoch) = self.settle() {
            if let Ok(mut state) = self.breaker.state.lock() {
                if state.epoch == epoch && state.mode == CircuitMode::HalfOpen {
                    state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
                }
            }
        }
    }
}

impl CircuitBreaker {
    pub fn new(target: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            target: target.into(),
            config,
            state: Mutex::new(CircuitState {
                mode: CircuitMode::Closed,
                consecutive_failures: 0,
                opened_at: None,
                half_open_in_flight: 0,
                epoch: 0,
            }),
        }
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    fn lock(&self) -> Result<MutexGuard<'_, CircuitState>, ClientError> {
        self.state.lock().map_err(|_| ClientError::StatePoisoned {
            subsystem: "circuit breaker",
        })
    }

    /// Current mode, without evaluating the recovery timeout.
    pub fn mode(&self) -> Result<CircuitMode, ClientError> {
        Ok(self.lock()?.mode)
    }

    /// Ask to send a request. Closed admits without a permit; Half-Open
    /// admits with a trial permit while slots remain.
    pub fn acquire(self: &Arc<Self>) -> Result<Option<Arc<TrialPermit>>, ClientError> {
        let mut state = self.lock()?;

        if state.mode == CircuitMode::Open {
            let elapsed = state.opened_at.map(|at| at.elapsed()).unwrap_or(Duration::MAX);
            let recovery = self.config.recovery_timeout();
            if elapsed < recovery {
                return Err(ClientError::CircuitOpen {
                    target: self.target.clone(),
                    retry_in: Some(recovery - elapsed),
                });
            }
            self.transition(&mut state, CircuitMode::HalfOpen);
        }

        if state.mode == CircuitMode::Closed {
            return Ok(None);
        }

        if state.half_open_in_flight >= self.config.half_open_max_calls {
            tracing::debug!(target_key = %self.target, "Half-open trial slots exhausted");
            return Err(ClientError::CircuitOpen {
                target: self.target.clone(),
                retry_in: None,
            });
        }
        state.half_open_in_flight += 1;
        Ok(Some(Arc::new(TrialPermit {
            breaker: Arc::clone(self),
            epoch: state.epoch,
            settled: AtomicBool::new(false),
        })))
    }

    /// Classify a final response status.
    pub fn classify_status(&self, status: u16) -> Outcome {
        if self.config.excluded_status_codes.contains(&status) {
            Outcome::Neutral
        } else if status >= 500 {
            Outcome::Failure
        } else {
            Outcome::Success
        }
    }

    /// Classify a final error.
    pub fn classify_error(&self, error: &ClientError) -> Outcome {
        if self.config.excluded_errors.contains(error.kind().as_str()) {
            return Outcome::Neutral;
        }
        match error {
            ClientError::RetriesExhausted { last, .. } => self.classify_error(last),
            ClientError::Status { status, .. } => self.classify_status(*status),
            ClientError::Timeout { .. }
            | ClientError::Connect { .. }
            | ClientError::Dns { .. }
            | ClientError::Proxy { .. }
            | ClientError::InvalidResponse { .. } => Outcome::Failure,
            _ => Outcome::Neutral,
        }
    }

    /// Fold one request outcome into the state machine.
    ///
    /// `permit` is the trial permit the request was admitted with, if any.
    /// Outcomes of requests admitted in an earlier epoch are ignored once
    /// the breaker left the mode they were admitted in.
    pub fn record(&self, outcome: Outcome, permit: Option<&TrialPermit>) -> Result<(), ClientError> {
        let trial_epoch = permit.and_then(TrialPermit::settle);
        let mut state = self.lock()?;
        let is_trial = trial_epoch.is_some_and(|epoch| epoch == state.epoch);

        match (state.mode, outcome) {
            (CircuitMode::Closed, Outcome::Success) => {
                state.consecutive_failures = 0;
            }
            (CircuitMode::Closed, Outcome::Failure) => {
                state.consecutive_failures += 1;
                tracing::debug!(
                    target_key = %self.target,
                    failures = state.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    "Circuit breaker failure recorded"
                );
                if state.consecutive_failures >= self.config.failure_threshold {
                    self.transition(&mut state, CircuitMode::Open);
                }
            }
            (CircuitMode::HalfOpen, Outcome::Success) if is_trial => {
                self.transition(&mut state, CircuitMode::Closed);
            }
            (CircuitMode::HalfOpen, Outcome::Failure) if is_trial => {
                self.transition(&mut state, CircuitMode::Open);
            }
            (CircuitMode::HalfOpen, Outcome::Neutral) if is_trial => {
                state.half_open_in_flight = state.half_open_in_flight.saturating_sub(1);
            }
            _ => {}
        }
        Ok(())
    }

    /// Force the breaker Closed.
    pub fn reset(&self) -> Result<(), ClientError> {
        let mut state = self.lock()?;
        if state.mode != CircuitMode::Closed {
            self.transition(&mut state, CircuitMode::Closed);
        } else {
            state.consecutive_failures = 0;
        }
        tracing::info!(target_key = %self.target, "Circuit breaker manually reset");
        Ok(())
    }

    pub fn snapshot(&self) -> Result<BreakerSnapshot, ClientError> {
        let state = self.lock()?;
        let retry_in_ms = match (state.mode, state.opened_at) {
            (CircuitMode::Open, Some(at)) => Some(
                self.config
                    .recovery_timeout()
                    .saturating_sub(at.elapsed())
                    .as_millis() as u64,
            ),
            _ => None,
        };
        Ok(BreakerSnapshot {
            target: self.target.clone(),
            state: state.mode,
            consecutive_failures: state.consecutive_failures,
            half_open_in_flight: state.half_open_in_flight,
            retry_in_ms,
        })
    }

    fn transition(&self, state: &mut CircuitState, to: CircuitMode) {
        let from = state.mode;
        state.mode = to;
        state.epoch += 1;
        state.consecutive_failures = 0;
        state.half_open_in_flight = 0;
        state.opened_at = match to {
            CircuitMode::Open => Some(Instant::now()),
            _ => None,
        };

        match to {
            CircuitMode::Open => tracing::warn!(
                target_key = %self.target,
                from = from.as_str(),
                recovery_ms = self.config.recovery_timeout_ms,
                "Circuit breaker opened"
            ),
            _ => tracing::info!(
                target_key = %self.target,
                from = from.as_str(),
                to = to.as_str(),
                "Circuit breaker state changed"
            ),
        }
        metrics::record_breaker_transition(&self.target, to.as_str());
    }
}

/// Breakers keyed by target scope, created lazily.
#[derive(Debug)]
pub struct BreakerRegistry {
    config: CircuitBreakerConfig,
    breakers: DashMap<String, Arc<CircuitBreaker>>,
}

impl BreakerRegistry {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            breakers: DashMap::new(),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Target key for `url` under the configured scope.
    pub fn target_key(&self, url: &Url) -> String {
        match self.config.scope {
            BreakerScope::Host => url.host_str().unwrap_or_default().to_ascii_lowercase(),
            BreakerScope::Origin => url.origin().ascii_serialization(),
            BreakerScope::Global => "*".to_string(),
        }
    }

    /// Breaker for the target of `url`, creating it on first use.
    pub fn breaker_for(&self, url: &Url) -> Arc<CircuitBreaker> {
        let key = self.target_key(url);
        if let Some(existing) = self.breakers.get(&key) {
            return Arc::clone(existing.value());
        }
        let entry = self
            .breakers
            .entry(key.clone())
            .or_insert_with(|| Arc::new(CircuitBreaker::new(key, self.config.clone())));
        Arc::clone(entry.value())
    }

    pub fn get(&self, target: &str) -> Option<Arc<CircuitBreaker>> {
        self.breakers.get(target).map(|b| Arc::clone(b.value()))
    }

    pub fn reset_all(&self) -> Result<(), ClientError> {
        for breaker in self.breakers.iter() {
            breaker.value().reset()?;
        }
        Ok(())
    }

    /// Snapshots of every known breaker, sorted by target.
    pub fn snapshots(&self) -> Result<Vec<BreakerSnapshot>, ClientError> {
        let breakers: Vec<Arc<CircuitBreaker>> =
            self.breakers.iter().map(|b| Arc::clone(b.value())).collect();
        let mut snapshots = breakers
            .iter()
            .map(|b| b.snapshot())
            .collect::<Result<Vec<_>, _>>()?;
        snapshots.sort_by(|a, b| a.target.cmp(&b.target));
        Ok(snapshots)
    }

    pub fn len(&self) -> usize {
        self.breakers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.breakers.is_empty()
    }
}

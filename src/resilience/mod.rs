//! Resilience subsystem.
//!
//! # Data Flow
//! ```text
//! Request to target:
//!     → circuit_breaker.rs (admit, reject fast, or issue a half-open trial)
//!     → retries.rs (attempt loop, classify outcome, sleep with backoff.rs)
//!         → timeouts.rs (per-attempt deadline around the transport call)
//!     → circuit_breaker.rs (fold the final outcome into the breaker)
//! ```
//!
//! # Design Decisions
//! - Timeouts are non-negotiable; every attempt has a deadline
//! - Retries only for idempotent requests (GET, HEAD, etc.)
//! - The breaker sees one outcome per logical request, not per attempt
//! - Breaker state is owned by a registry on the client, never global

pub mod backoff;
pub mod circuit_breaker;
pub mod retries;
pub mod timeouts;

pub use backoff::BackoffPolicy;
pub use circuit_breaker::{BreakerRegistry, BreakerSnapshot, CircuitBreaker, CircuitMode, Outcome, TrialPermit};
pub use retries::{parse_retry_after, RetryController, RetryOutcome};

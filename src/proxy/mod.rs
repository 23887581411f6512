//! Proxy rotation subsystem.
//!
//! # Data Flow
//! ```text
//! Request enters pipeline
//!     → pool.rs (filter Healthy proxies, fall back to Unknown)
//!     → Apply rotation strategy:
//!         - round_robin.rs (rotate through proxies)
//!         - weighted.rs (random, or weighted by success rate)
//!     → Proxy attached to request context
//!     → Outcome reported back to record.rs (health hysteresis)
//! ```
//!
//! # Design Decisions
//! - Selectors are stateless over the record list; the pool owns the records
//! - Unhealthy proxies are excluded from selection until they recover
//! - Health probes run outside the pool lock

pub mod address;
pub mod pool;
pub mod record;
pub mod round_robin;
pub mod weighted;

pub use address::{ProxyAddr, ProxyParseError};
pub use pool::{CheckSummary, ProxyPool};
pub use record::{HealthState, ProxyRecord};

/// Chooses one of the candidate proxies.
pub trait ProxySelector: Send + Sync + std::fmt::Debug {
    /// Returns the index of the chosen candidate, or `None` when there are none.
    fn select(&self, candidates: &[&ProxyRecord]) -> Option<usize>;
}

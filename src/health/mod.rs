//! Proxy health checking subsystem.
//!
//! # Data Flow
//! ```text
//! Active checks (active.rs):
//!     Periodic timer or explicit check_all / add_checked
//!     → Probe each proxy (bounded concurrency, outside the pool lock)
//!     → Apply result to the proxy record exactly once
//!
//! Passive checks (proxy plugin):
//!     Request outcome observed
//!     → report_result on the pool
//! ```
//!
//! # Design Decisions
//! - Active and passive checks are complementary
//! - State transitions require consecutive successes/failures
//! - Concurrent checks of one proxy are coalesced

pub mod active;

pub use active::{probe_proxy, HealthMonitor};

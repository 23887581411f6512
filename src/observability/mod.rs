//! Observability subsystem.
//!
//! # Data Flow
//! ```text
//! All subsystems produce:
//!     → logging.rs (tracing subscriber setup)
//!     → metrics.rs (counters, gauges, histograms via the metrics facade)
//!
//! Client::health_check:
//!     → diagnostics.rs (read-only snapshot of breakers, cache, proxies,
//!       rate limiter and request counters)
//! ```
//!
//! # Design Decisions
//! - Correlation ids flow through every log line of a request
//! - Metrics are cheap (atomic increments); without an exporter they are no-ops

pub mod diagnostics;
pub mod logging;
pub mod metrics;

pub use diagnostics::{HealthReport, PluginInfo, SessionState};

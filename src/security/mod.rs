//! Security subsystem.
//!
//! # Data Flow
//! ```text
//! Outgoing request:
//!     → rate_limit.rs (admit, wait for a slot, or reject)
//! Incoming response:
//!     → limits.rs (declared length check, bounded body read)
//! Logging:
//!     → sanitize.rs (mask credentials in URLs and headers)
//! ```
//!
//! # Design Decisions
//! - Bounded everything: admission windows, body sizes, header parsing
//! - Secrets never reach the logs

pub mod limits;
pub mod rate_limit;
pub mod sanitize;

pub use rate_limit::{RateLimitStatus, RateLimiter};
pub use sanitize::{sanitize_url, sanitize_url_str};

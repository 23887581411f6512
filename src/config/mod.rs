//! Configuration subsystem.
//!
//! # Data Flow
//! ```text
//! caller-provided values (struct literals or any serde source)
//!     → schema.rs (typed, defaulted structs)
//!     → validation.rs (semantic checks)
//!     → ClientConfig (validated, immutable)
//!     → handed to each subsystem at client construction
//! ```
//!
//! # Design Decisions
//! - Config is immutable once a client is built
//! - All fields have defaults to allow minimal configs
//! - Validation separates syntactic (serde) from semantic checks

pub mod schema;
pub mod validation;

pub use schema::{
    AuthConfig, BreakerScope, CacheConfig, CircuitBreakerConfig, ClientConfig, LimitsConfig,
    LogFormat, ObservabilityConfig, OnLimit, ProxyPoolConfig, RateLimitConfig, RateLimitStrategy,
    RetryConfig, RotationStrategy, TimeoutConfig, UserAgentConfig, UserAgentStrategy,
};
pub use validation::{validate_config, ValidationError};

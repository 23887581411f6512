//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the client.
//! All types derive Serde traits so callers can deserialize them from
//! whatever source they load configuration from.

use std::collections::BTreeSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Root configuration for the client.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Base URL prepended to relative request paths.
    pub base_url: Option<String>,

    /// Default headers sent with every request.
    pub default_headers: Vec<(String, String)>,

    /// Turn final responses with status >= 400 into errors.
    pub error_for_status: bool,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Retry configuration.
    pub retries: RetryConfig,

    /// Circuit breaker configuration.
    pub circuit_breaker: CircuitBreakerConfig,

    /// Response cache configuration.
    pub cache: CacheConfig,

    /// Rate limiting configuration.
    pub rate_limit: RateLimitConfig,

    /// Proxy pool configuration.
    pub proxy_pool: ProxyPoolConfig,

    /// Response size limits.
    pub limits: LimitsConfig,

    /// Credentials attached to every request.
    pub auth: Option<AuthConfig>,

    /// User-Agent rotation.
    pub user_agent: UserAgentConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            default_headers: Vec::new(),
            error_for_status: true,
            timeouts: TimeoutConfig::default(),
            retries: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            cache: CacheConfig::default(),
            rate_limit: RateLimitConfig::default(),
            proxy_pool: ProxyPoolConfig::default(),
            limits: LimitsConfig::default(),
            auth: None,
            user_agent: UserAgentConfig::default(),
            observability: ObservabilityConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Configuration with every resilience subsystem switched off.
    pub fn minimal() -> Self {
        let mut config = Self::default();
        config.retries.enabled = false;
        config.circuit_breaker.enabled = false;
        config.cache.enabled = false;
        config.rate_limit.enabled = false;
        config.proxy_pool.enabled = false;
        config
    }
}

/// Timeout configuration for transport calls.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Connection establishment timeout in milliseconds.
    pub connect_ms: u64,

    /// Per-attempt deadline (connect + read) in milliseconds.
    pub request_ms: u64,

    /// Idle pooled connection timeout in seconds.
    pub idle_secs: u64,
}

impl TimeoutConfig {
    pub fn connect(&self) -> Duration {
        Duration::from_millis(self.connect_ms)
    }

    pub fn request(&self) -> Duration {
        Duration::from_millis(self.request_ms)
    }

    pub fn idle(&self) -> Duration {
        Duration::from_secs(self.idle_secs)
    }
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_ms: 5_000,
            request_ms: 30_000,
            idle_secs: 60,
        }
    }
}

/// Retry configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Enable retries.
    pub enabled: bool,

    /// Maximum number of attempts, including the first one.
    pub max_attempts: u32,

    /// Base delay for exponential backoff in milliseconds.
    pub backoff_base_ms: u64,

    /// Multiplier applied per attempt.
    pub backoff_factor: f64,

    /// Upper bound for the computed backoff in milliseconds.
    pub backoff_max_ms: u64,

    /// Perturb each delay by a uniform factor in [0.5, 1.5).
    pub jitter: bool,

    /// Methods that may be repeated safely.
    pub idempotent_methods: BTreeSet<String>,

    /// Status codes that trigger a retry.
    pub retryable_status_codes: BTreeSet<u16>,

    /// Honor the Retry-After header on 429 and 503 responses.
    pub respect_retry_after: bool,

    /// Upper bound for a Retry-After driven wait, in seconds.
    pub retry_after_max_secs: u64,
}

impl RetryConfig {
    pub fn backoff_base(&self) -> Duration {
        Duration::from_millis(self.backoff_base_ms)
    }

    pub fn backoff_max(&self) -> Duration {
        Duration::from_millis(self.backoff_max_ms)
    }

    pub fn retry_after_max(&self) -> Duration {
        Duration::from_secs(self.retry_after_max_secs)
    }

    /// Returns true if `method` may be retried.
    pub fn is_idempotent(&self, method: &str) -> bool {
        self.idempotent_methods
            .iter()
            .any(|m| m.eq_ignore_ascii_case(method))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_factor: 2.0,
            backoff_max_ms: 60_000,
            jitter: true,
            idempotent_methods: ["GET", "HEAD", "PUT", "DELETE", "OPTIONS", "TRACE"]
                .into_iter()
                .map(String::from)
                .collect(),
            retryable_status_codes: [408, 429, 500, 502, 503, 504].into_iter().collect(),
            respect_retry_after: true,
            retry_after_max_secs: 300,
        }
    }
}

/// Granularity at which circuit breakers are kept.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum BreakerScope {
    /// One breaker per host name.
    #[default]
    Host,
    /// One breaker per scheme + host + port.
    Origin,
    /// A single breaker for every target.
    Global,
}

/// Circuit breaker configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CircuitBreakerConfig {
    /// Enable circuit breaking.
    pub enabled: bool,

    /// Consecutive failures before the circuit opens.
    pub failure_threshold: u32,

    /// Time the circuit stays open before allowing trials, in milliseconds.
    pub recovery_timeout_ms: u64,

    /// Maximum concurrent trial requests while half-open.
    pub half_open_max_calls: u32,

    /// Target granularity.
    pub scope: BreakerScope,

    /// Status codes that never count as failures.
    pub excluded_status_codes: BTreeSet<u16>,

    /// Error kinds (see `ErrorKind::as_str`) that never count as failures.
    pub excluded_errors: BTreeSet<String>,
}

impl CircuitBreakerConfig {
    pub fn recovery_timeout(&self) -> Duration {
        Duration::from_millis(self.recovery_timeout_ms)
    }
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            failure_threshold: 5,
            recovery_timeout_ms: 30_000,
            half_open_max_calls: 3,
            scope: BreakerScope::Host,
            excluded_status_codes: BTreeSet::new(),
            excluded_errors: BTreeSet::new(),
        }
    }
}

/// Response cache configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Enable response caching.
    pub enabled: bool,

    /// Entry time-to-live in seconds.
    pub ttl_secs: u64,

    /// Maximum number of entries.
    pub max_size: usize,

    /// Methods whose responses may be cached.
    pub methods: BTreeSet<String>,

    /// Status codes whose responses may be cached.
    pub cacheable_status_codes: BTreeSet<u16>,

    /// Query parameters that take part in the key. `None` means all of them.
    pub key_params: Option<BTreeSet<String>>,

    /// Request headers that take part in the key (case-insensitive).
    pub key_headers: BTreeSet<String>,

    /// Also key on the Authorization header.
    pub include_auth_header: bool,
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_secs)
    }

    /// Returns true if responses to `method` may be cached.
    pub fn caches_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m.eq_ignore_ascii_case(method))
    }

    /// Returns true if the request header `name` takes part in the key.
    pub fn keys_header(&self, name: &str) -> bool {
        self.key_headers.iter().any(|h| h.eq_ignore_ascii_case(name))
            || (self.include_auth_header && name.eq_ignore_ascii_case("authorization"))
    }
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ttl_secs: 300,
            max_size: 1_000,
            methods: ["GET".to_string()].into_iter().collect(),
            cacheable_status_codes: [200].into_iter().collect(),
            key_params: None,
            key_headers: ["accept", "accept-language", "accept-encoding", "content-type"]
                .into_iter()
                .map(String::from)
                .collect(),
            include_auth_header: false,
        }
    }
}

/// Window accounting used by the rate limiter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RateLimitStrategy {
    FixedWindow,
    #[default]
    SlidingWindow,
    TokenBucket,
}

/// What happens when the limit is reached.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OnLimit {
    /// Wait for capacity, up to `max_wait_ms`.
    #[default]
    Block,
    /// Fail immediately with `RateLimitExceeded`.
    Reject,
}

/// Rate limiting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RateLimitConfig {
    /// Enable rate limiting.
    pub enabled: bool,

    /// Requests admitted per window.
    pub max_requests: u32,

    /// Window length in milliseconds.
    pub window_ms: u64,

    pub strategy: RateLimitStrategy,

    pub on_limit: OnLimit,

    /// Longest a blocked caller waits before being rejected.
    pub max_wait_ms: u64,
}

impl RateLimitConfig {
    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_millis(self.max_wait_ms)
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_requests: 10,
            window_ms: 60_000,
            strategy: RateLimitStrategy::SlidingWindow,
            on_limit: OnLimit::Block,
            max_wait_ms: 60_000,
        }
    }
}

/// Proxy rotation strategy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RotationStrategy {
    #[default]
    RoundRobin,
    Random,
    Weighted,
}

/// Proxy pool configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ProxyPoolConfig {
    /// Route requests through the pool.
    pub enabled: bool,

    /// Proxies in `host:port` or `user:pass@host:port` form.
    pub proxies: Vec<String>,

    pub rotation: RotationStrategy,

    /// Consecutive failures before a proxy is excluded.
    pub unhealthy_threshold: u32,

    /// Consecutive successes before a proxy is trusted again.
    pub healthy_threshold: u32,

    /// URL fetched through each proxy during health checks.
    pub check_url: String,

    /// Health probe timeout in milliseconds.
    pub check_timeout_ms: u64,

    /// Maximum concurrent probes.
    pub check_concurrency: usize,

    /// Probe each proxy when it is added.
    pub check_on_add: bool,

    /// Interval of the background health monitor in seconds (0 disables it).
    pub check_interval_secs: u64,
}

impl ProxyPoolConfig {
    pub fn check_timeout(&self) -> Duration {
        Duration::from_millis(self.check_timeout_ms)
    }
}

impl Default for ProxyPoolConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            proxies: Vec::new(),
            rotation: RotationStrategy::RoundRobin,
            unhealthy_threshold: 3,
            healthy_threshold: 1,
            check_url: "http://httpbin.org/ip".to_string(),
            check_timeout_ms: 5_000,
            check_concurrency: 8,
            check_on_add: false,
            check_interval_secs: 0,
        }
    }
}

/// Response size limits.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Maximum response body size in bytes.
    pub max_response_size: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            max_response_size: 100 * 1024 * 1024, // 100MB
        }
    }
}

fn default_api_key_header() -> String {
    "X-API-Key".to_string()
}

/// Request authentication scheme and its credentials.
#[derive(Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AuthConfig {
    /// `Authorization: Bearer <token>`.
    Bearer { token: String },
    /// `Authorization: Basic <base64(username:password)>`.
    Basic { username: String, password: String },
    /// The key sent verbatim in `header`.
    ApiKey {
        key: String,
        #[serde(default = "default_api_key_header")]
        header: String,
    },
}

impl AuthConfig {
    pub fn scheme(&self) -> &'static str {
        match self {
            AuthConfig::Bearer { .. } => "bearer",
            AuthConfig::Basic { .. } => "basic",
            AuthConfig::ApiKey { .. } => "api_key",
        }
    }
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AuthConfig::Basic { username, .. } => f
                .debug_struct("Basic")
                .field("username", username)
                .field("password", &"[REDACTED]")
                .finish(),
            AuthConfig::ApiKey { header, .. } => f
                .debug_struct("ApiKey")
                .field("header", header)
                .field("key", &"[REDACTED]")
                .finish(),
            AuthConfig::Bearer { .. } => f.debug_struct("Bearer").field("token", &"[REDACTED]").finish(),
        }
    }
}

/// How the User-Agent header is picked for each request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum UserAgentStrategy {
    /// Uniformly random.
    #[default]
    Random,
    /// Random, biased towards more common browsers.
    Weighted,
    RoundRobin,
    /// Always the first agent.
    Fixed,
}

/// User-Agent rotation configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UserAgentConfig {
    /// Register the user agent plugin.
    pub enabled: bool,

    pub strategy: UserAgentStrategy,

    /// Agents to rotate through. Empty means the built-in browser list.
    pub agents: Vec<String>,
}

impl Default for UserAgentConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strategy: UserAgentStrategy::Random,
            agents: Vec::new(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    pub log_format: LogFormat,

    /// Register the logging plugin.
    pub log_requests: bool,

    /// Register the monitoring plugin.
    pub metrics_enabled: bool,

    /// Prometheus exporter bind address, if any.
    pub metrics_address: Option<String>,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            log_requests: false,
            metrics_enabled: false,
            metrics_address: None,
        }
    }
}

//! Client error taxonomy.
//!
//! # Classes
//! - Transient: timeout, connect, DNS, proxy failures, 5xx and 429 statuses
//! - Fatal: other 4xx statuses, malformed or oversized responses, bad input
//! - Control flow: breaker rejections, rate limiting, empty proxy pool,
//!   cancellation

use std::fmt;
use std::time::Duration;

use thiserror::Error;

use crate::config::ValidationError;

/// Errors surfaced by the client and its subsystems.
#[derive(Debug, Error)]
pub enum ClientError {
    /// An attempt exceeded its deadline.
    #[error("request to {url} timed out after {after:?}")]
    Timeout { url: String, after: Duration },

    /// Connection could not be established or broke mid-exchange.
    #[error("connection to {url} failed: {message}")]
    Connect { url: String, message: String },

    /// Host name resolution failed.
    #[error("DNS resolution failed for {host}: {message}")]
    Dns { host: String, message: String },

    /// The selected proxy could not carry the request.
    #[error("proxy {proxy} failed: {message}")]
    Proxy { proxy: String, message: String },

    /// The final response carried an error status.
    #[error("HTTP {status} from {url} after {attempts} attempt(s)")]
    Status {
        status: u16,
        url: String,
        attempts: u32,
    },

    /// The response could not be parsed.
    #[error("invalid response from {url}: {message}")]
    InvalidResponse { url: String, message: String },

    /// The response body exceeded the configured size limit.
    #[error("response from {url} exceeds the {limit} byte limit")]
    ResponseTooLarge { url: String, limit: usize },

    /// The request could not be built.
    #[error("invalid request: {0}")]
    InvalidRequest(String),

    /// The transport does not speak this URL scheme.
    #[error("unsupported URL scheme: {0}")]
    UnsupportedScheme(String),

    /// The circuit breaker for the target rejected the call.
    #[error("circuit open for {target}")]
    CircuitOpen {
        target: String,
        retry_in: Option<Duration>,
    },

    /// The rate limiter rejected the call.
    #[error("rate limit exceeded")]
    RateLimitExceeded { retry_after: Option<Duration> },

    /// The proxy pool is empty or every proxy is unhealthy.
    #[error("no proxy available")]
    NoProxyAvailable,

    /// The caller cancelled the request.
    #[error("request cancelled")]
    Cancelled,

    /// Every permitted attempt failed with a retryable outcome.
    #[error("too many retries: gave up after {attempts} attempts, last error: {last}")]
    RetriesExhausted { attempts: u32, last: Box<ClientError> },

    /// The client was closed.
    #[error("client is closed")]
    Closed,

    /// A subsystem lock was poisoned by a panic.
    #[error("{subsystem} state is poisoned")]
    StatePoisoned { subsystem: &'static str },

    /// A plugin hook failed.
    #[error("plugin {plugin} failed: {message}")]
    Plugin { plugin: String, message: String },

    /// The configuration did not validate.
    #[error("invalid configuration: {}", join_errors(.0))]
    Config(Vec<ValidationError>),

    /// The async runtime behind the blocking client could not start.
    #[error("failed to start runtime: {0}")]
    Runtime(#[source] std::io::Error),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}

/// Broad recovery class of an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying.
    Transient,
    /// Never retried.
    Fatal,
    /// Not a failure of the target; a decision made by the client.
    ControlFlow,
}

/// Fine-grained error kind, stable across versions for configuration use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Timeout,
    Connect,
    Dns,
    Proxy,
    Status,
    InvalidResponse,
    ResponseTooLarge,
    InvalidRequest,
    UnsupportedScheme,
    CircuitOpen,
    RateLimitExceeded,
    NoProxyAvailable,
    Cancelled,
    RetriesExhausted,
    Closed,
    StatePoisoned,
    Plugin,
    Config,
    Runtime,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::Timeout => "timeout",
            ErrorKind::Connect => "connect",
            ErrorKind::Dns => "dns",
            ErrorKind::Proxy => "proxy",
            ErrorKind::Status => "status",
            ErrorKind::InvalidResponse => "invalid_response",
            ErrorKind::ResponseTooLarge => "response_too_large",
            ErrorKind::InvalidRequest => "invalid_request",
            ErrorKind::UnsupportedScheme => "unsupported_scheme",
            ErrorKind::CircuitOpen => "circuit_open",
            ErrorKind::RateLimitExceeded => "rate_limit_exceeded",
            ErrorKind::NoProxyAvailable => "no_proxy_available",
            ErrorKind::Cancelled => "cancelled",
            ErrorKind::RetriesExhausted => "retries_exhausted",
            ErrorKind::Closed => "closed",
            ErrorKind::StatePoisoned => "state_poisoned",
            ErrorKind::Plugin => "plugin",
            ErrorKind::Config => "config",
            ErrorKind::Runtime => "runtime",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classify a status code. 2xx and 3xx are not errors and return `None`.
pub fn status_class(status: u16) -> Option<ErrorClass> {
    match status {
        429 | 500..=599 => Some(ErrorClass::Transient),
        400..=499 => Some(ErrorClass::Fatal),
        _ => None,
    }
}

impl ClientError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ClientError::Timeout { .. } => ErrorKind::Timeout,
            ClientError::Connect { .. } => ErrorKind::Connect,
            ClientError::Dns { .. } => ErrorKind::Dns,
            ClientError::Proxy { .. } => ErrorKind::Proxy,
            ClientError::Status { .. } => ErrorKind::Status,
            ClientError::InvalidResponse { .. } => ErrorKind::InvalidResponse,
            ClientError::ResponseTooLarge { .. } => ErrorKind::ResponseTooLarge,
            ClientError::InvalidRequest(_) => ErrorKind::InvalidRequest,
            ClientError::UnsupportedScheme(_) => ErrorKind::UnsupportedScheme,
            ClientError::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            ClientError::RateLimitExceeded { .. } => ErrorKind::RateLimitExceeded,
            ClientError::NoProxyAvailable => ErrorKind::NoProxyAvailable,
            ClientError::Cancelled => ErrorKind::Cancelled,
            ClientError::RetriesExhausted { .. } => ErrorKind::RetriesExhausted,
            ClientError::Closed => ErrorKind::Closed,
            ClientError::StatePoisoned { .. } => ErrorKind::StatePoisoned,
            ClientError::Plugin { .. } => ErrorKind::Plugin,
            ClientError::Config(_) => ErrorKind::Config,
            ClientError::Runtime(_) => ErrorKind::Runtime,
        }
    }

    pub fn class(&self) -> ErrorClass {
        match self {
            ClientError::Timeout { .. }
            | ClientError::Connect { .. }
            | ClientError::Dns { .. }
            | ClientError::Proxy { .. } => ErrorClass::Transient,
            ClientError::Status { status, .. } => {
                status_class(*status).unwrap_or(ErrorClass::Fatal)
            }
            ClientError::CircuitOpen { .. }
            | ClientError::RateLimitExceeded { .. }
            | ClientError::NoProxyAvailable
            | ClientError::Cancelled => ErrorClass::ControlFlow,
            ClientError::RetriesExhausted { last, .. } => last.class(),
            ClientError::InvalidResponse { .. }
            | ClientError::ResponseTooLarge { .. }
            | ClientError::InvalidRequest(_)
            | ClientError::UnsupportedScheme(_)
            | ClientError::Closed
            | ClientError::StatePoisoned { .. }
            | ClientError::Plugin { .. }
            | ClientError::Config(_)
            | ClientError::Runtime(_) => ErrorClass::Fatal,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.class() == ErrorClass::Transient
    }

    pub fn is_control_flow(&self) -> bool {
        self.class() == ErrorClass::ControlFlow
    }

    /// Status code carried by this error, looking through retry exhaustion.
    pub fn status(&self) -> Option<u16> {
        match self {
            ClientError::Status { status, .. } => Some(*status),
            ClientError::RetriesExhausted { last, .. } => last.status(),
            _ => None,
        }
    }

    /// Number of attempts made, when known.
    pub fn attempts(&self) -> Option<u32> {
        match self {
            ClientError::Status { attempts, .. } => Some(*attempts),
            ClientError::RetriesExhausted { attempts, .. } => Some(*attempts),
            _ => None,
        }
    }

    pub(crate) fn plugin(plugin: impl Into<String>, message: impl fmt::Display) -> Self {
        ClientError::Plugin {
            plugin: plugin.into(),
            message: message.to_string(),
        }
    }
}

/// Whether the source chain of `error` reports a response that could not be
/// parsed as HTTP.
pub(crate) fn is_malformed_message(error: &(dyn std::error::Error + 'static)) -> bool {
    let mut source = Some(error);
    while let Some(e) = source {
        if let Some(hyper_error) = e.downcast_ref::<hyper::Error>() {
            if hyper_error.is_parse() || hyper_error.is_parse_status() {
                return true;
            }
        }
        if let Some(io_error) = e.downcast_ref::<std::io::Error>() {
            if matches!(
                io_error.kind(),
                std::io::ErrorKind::InvalidData | std::io::ErrorKind::InvalidInput
            ) {
                return true;
            }
        }
        source = e.source();
    }
    false
}

/// Result type for client operations.
pub type ClientResult<T> = Result<T, ClientError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert_eq!(status_class(200), None);
        assert_eq!(status_class(304), None);
        assert_eq!(status_class(404), Some(ErrorClass::Fatal));
        assert_eq!(status_class(429), Some(ErrorClass::Transient));
        assert_eq!(status_class(503), Some(ErrorClass::Transient));
    }

    #[test]
    fn test_exhaustion_inherits_cause() {
        let err = ClientError::RetriesExhausted {
            attempts: 3,
            last: Box::new(ClientError::Status {
                status: 503,
                url: "http://example.com/".into(),
                attempts: 3,
            }),
        };
        assert!(err.is_transient());
        assert_eq!(err.status(), Some(503));
        assert_eq!(err.attempts(), Some(3));
        assert_eq!(err.kind(), ErrorKind::RetriesExhausted);
        assert!(err.to_string().contains("too many retries"));
    }

    #[test]
    fn test_control_flow_errors() {
        let open = ClientError::CircuitOpen {
            target: "example.com".into(),
            retry_in: None,
        };
        assert!(open.is_control_flow());
        assert!(ClientError::NoProxyAvailable.is_control_flow());
        assert!(!ClientError::Closed.is_control_flow());
    }
}

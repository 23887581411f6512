//! Configuration validation.
//!
//! # Responsibilities
//! - Semantic validation (serde handles syntactic)
//! - Validate value ranges (thresholds > 0, factors >= 1)
//! - Check proxy entries parse
//!
//! # Design Decisions
//! - Returns all validation errors, not just first
//! - Validation is pure function: ClientConfig → Result<(), Vec<ValidationError>>
//! - Runs before a client is built from the config

use thiserror::Error;

use hyper::header::{HeaderName, HeaderValue};

use crate::config::schema::{AuthConfig, ClientConfig, UserAgentStrategy};
use crate::proxy::ProxyAddr;

/// A single semantic problem in a configuration.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{field}: {message}")]
pub struct ValidationError {
    pub field: &'static str,
    pub message: String,
}

impl ValidationError {
    fn new(field: &'static str, message: impl Into<String>) -> Self {
        Self {
            field,
            message: message.into(),
        }
    }
}

/// Validate a configuration, collecting every error found.
pub fn validate_config(config: &ClientConfig) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    if let Some(base) = &config.base_url {
        if url::Url::parse(base).is_err() {
            errors.push(ValidationError::new("base_url", format!("not a valid URL: {base}")));
        }
    }

    for (name, value) in &config.default_headers {
        if HeaderName::from_bytes(name.as_bytes()).is_err() {
            errors.push(ValidationError::new("default_headers", format!("invalid header name: {name}")));
        } else if HeaderValue::from_str(value).is_err() {
            errors.push(ValidationError::new("default_headers", format!("invalid value for {name}")));
        }
    }

    let timeouts = &config.timeouts;
    if timeouts.connect_ms == 0 {
        errors.push(ValidationError::new("timeouts.connect_ms", "must be positive"));
    }
    if timeouts.request_ms == 0 {
        errors.push(ValidationError::new("timeouts.request_ms", "must be positive"));
    }

    let retries = &config.retries;
    if retries.enabled && retries.max_attempts == 0 {
        errors.push(ValidationError::new("retries.max_attempts", "must be at least 1"));
    }
    if !retries.backoff_factor.is_finite() || retries.backoff_factor < 1.0 {
        errors.push(ValidationError::new("retries.backoff_factor", "must be >= 1"));
    }
    if retries.backoff_max_ms < retries.backoff_base_ms {
        errors.push(ValidationError::new(
            "retries.backoff_max_ms",
            "must not be smaller than backoff_base_ms",
        ));
    }

    let breaker = &config.circuit_breaker;
    if breaker.enabled {
        if breaker.failure_threshold == 0 {
            errors.push(ValidationError::new(
                "circuit_breaker.failure_threshold",
                "must be positive",
            ));
        }
        if breaker.half_open_max_calls == 0 {
            errors.push(ValidationError::new(
                "circuit_breaker.half_open_max_calls",
                "must be positive",
            ));
        }
    }

    let cache = &config.cache;
    if cache.enabled && cache.ttl_secs == 0 {
        errors.push(ValidationError::new("cache.ttl_secs", "must be positive"));
    }

    let rate_limit = &config.rate_limit;
    if rate_limit.enabled {
        if rate_limit.max_requests == 0 {
            errors.push(ValidationError::new("rate_limit.max_requests", "must be positive"));
        }
        if rate_limit.window_ms == 0 {
            errors.push(ValidationError::new("rate_limit.window_ms", "must be positive"));
        }
    }

    let pool = &config.proxy_pool;
    if pool.enabled {
        if pool.unhealthy_threshold == 0 {
            errors.push(ValidationError::new(
                "proxy_pool.unhealthy_threshold",
                "must be positive",
            ));
        }
        if pool.healthy_threshold == 0 {
            errors.push(ValidationError::new(
                "proxy_pool.healthy_threshold",
                "must be positive",
            ));
        }
        if pool.check_concurrency == 0 {
            errors.push(ValidationError::new(
                "proxy_pool.check_concurrency",
                "must be positive",
            ));
        }
        for entry in &pool.proxies {
            if let Err(e) = entry.parse::<ProxyAddr>() {
                errors.push(ValidationError::new("proxy_pool.proxies", e.to_string()));
            }
        }
    }

    if let Some(auth) = &config.auth {
        let valid = match auth {
            AuthConfig::Bearer { token } => HeaderValue::from_str(token).is_ok() && !token.is_empty(),
            AuthConfig::Basic { username, .. } => !username.is_empty() && !username.contains(':'),
            AuthConfig::ApiKey { key, header } => {
                HeaderName::from_bytes(header.as_bytes()).is_ok()
                    && HeaderValue::from_str(key).is_ok()
                    && !key.is_empty()
            }
        };
        if !valid {
            errors.push(ValidationError::new(
                "auth",
                format!("invalid {} credentials", auth.scheme()),
            ));
        }
    }

    let user_agent = &config.user_agent;
    if user_agent.enabled {
        if user_agent.strategy == UserAgentStrategy::Fixed && user_agent.agents.is_empty() {
            errors.push(ValidationError::new("user_agent.agents", "fixed strategy needs an agent"));
        }
        for agent in &user_agent.agents {
            if agent.is_empty() || HeaderValue::from_str(agent).is_err() {
                errors.push(ValidationError::new("user_agent.agents", format!("invalid agent: {agent:?}")));
            }
        }
    }

    if config.limits.max_response_size == 0 {
        errors.push(ValidationError::new("limits.max_response_size", "must be positive"));
    }

    let observability = &config.observability;
    let level = observability.log_level.trim().to_ascii_lowercase();
    if !matches!(level.as_str(), "trace" | "debug" | "info" | "warn" | "error") {
        errors.push(ValidationError::new(
            "observability.log_level",
            format!("unknown level: {}", observability.log_level),
        ));
    }
    if let Some(addr) = &observability.metrics_address {
        if addr.parse::<std::net::SocketAddr>().is_err() {
            errors.push(ValidationError::new(
                "observability.metrics_address",
                format!("not a socket address: {addr}"),
            ));
        }
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate_config(&ClientConfig::default()).is_ok());
    }

    #[test]
    fn test_collects_all_errors() {
        let mut config = ClientConfig::default();
        config.retries.max_attempts = 0;
        config.retries.backoff_factor = 0.5;
        config.circuit_breaker.failure_threshold = 0;
        config.proxy_pool.enabled = true;
        config.proxy_pool.proxies = vec!["no-port-here".into()];
        config.observability.log_level = "loud".into();
        config.auth = Some(AuthConfig::ApiKey {
            key: "secret".into(),
            header: "bad header".into(),
        });
        config.user_agent.enabled = true;
        config.user_agent.strategy = UserAgentStrategy::Fixed;

        let errors = validate_config(&config).unwrap_err();
        let fields: Vec<_> = errors.iter().map(|e| e.field).collect();
        assert!(fields.contains(&"retries.max_attempts"));
        assert!(fields.contains(&"retries.backoff_factor"));
        assert!(fields.contains(&"circuit_breaker.failure_threshold"));
        assert!(fields.contains(&"proxy_pool.proxies"));
        assert!(fields.contains(&"observability.log_level"));
        assert!(fields.contains(&"auth"));
        assert!(fields.contains(&"user_agent.agents"));
        assert!(!errors.iter().any(|e| e.message.contains("secret")));
    }
}

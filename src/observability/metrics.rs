//! Metrics collection and exposition.
//!
//! # Metrics
//! - `resilient_http_requests_total` (counter): requests by method, outcome
//! - `resilient_http_request_duration_seconds` (histogram): end-to-end latency
//! - `resilient_http_retries_total` (counter): retries by reason
//! - `resilient_http_breaker_transitions_total` (counter): by target, new state
//! - `resilient_http_cache_{hits,misses,evictions}_total` (counters)
//! - `resilient_http_rate_limited_total` (counter)
//! - `resilient_http_proxy_health` (gauge): 1=healthy, 0=unhealthy
//!
//! Updates go through the `metrics` facade and are no-ops until a recorder
//! is installed, for example with [`init_metrics`].

use std::net::SocketAddr;
use std::time::Duration;

use metrics_exporter_prometheus::{Matcher, PrometheusBuilder};

use crate::config::ValidationError;
use crate::http::error::ClientError;

pub const REQUESTS_TOTAL: &str = "resilient_http_requests_total";
pub const REQUEST_DURATION: &str = "resilient_http_request_duration_seconds";
pub const RETRIES_TOTAL: &str = "resilient_http_retries_total";
pub const BREAKER_TRANSITIONS: &str = "resilient_http_breaker_transitions_total";
pub const CACHE_HITS: &str = "resilient_http_cache_hits_total";
pub const CACHE_MISSES: &str = "resilient_http_cache_misses_total";
pub const CACHE_EVICTIONS: &str = "resilient_http_cache_evictions_total";
pub const RATE_LIMITED: &str = "resilient_http_rate_limited_total";
pub const PROXY_HEALTH: &str = "resilient_http_proxy_health";

const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0,
];

/// Register descriptions for every metric with the installed recorder.
pub fn describe_metrics() {
    metrics::describe_counter!(REQUESTS_TOTAL, "Total number of logical requests.");
    metrics::describe_histogram!(
        REQUEST_DURATION,
        metrics::Unit::Seconds,
        "End-to-end duration of logical requests, retries included."
    );
    metrics::describe_counter!(RETRIES_TOTAL, "Total number of retried attempts.");
    metrics::describe_counter!(BREAKER_TRANSITIONS, "Circuit breaker state transitions.");
    metrics::describe_counter!(CACHE_HITS, "Total number of response cache hits.");
    metrics::describe_counter!(CACHE_MISSES, "Total number of response cache misses.");
    metrics::describe_counter!(CACHE_EVICTIONS, "Total number of evicted cache entries.");
    metrics::describe_counter!(RATE_LIMITED, "Requests rejected or delayed by the rate limiter.");
    metrics::describe_gauge!(PROXY_HEALTH, "Proxy health (1 = healthy, 0 = unhealthy).");
}

/// Install the Prometheus recorder with a scrape endpoint on `addr`.
/// Must be called from within a tokio runtime.
pub fn init_metrics(addr: SocketAddr) -> Result<(), ClientError> {
    let config_error = |message: String| {
        ClientError::Config(vec![ValidationError {
            field: "observability.metrics_address",
            message,
        }])
    };

    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(Matcher::Full(REQUEST_DURATION.to_string()), LATENCY_BUCKETS)
        .map_err(|e| config_error(e.to_string()))?
        .install()
        .map_err(|e| config_error(e.to_string()))?;

    describe_metrics();
    tracing::info!(%addr, "Prometheus metrics exporter listening");
    Ok(())
}

pub fn record_request(method: &str, outcome: &str, duration: Duration) {
    metrics::counter!(REQUESTS_TOTAL, "method" => method.to_string(), "outcome" => outcome.to_string())
        .increment(1);
    metrics::histogram!(REQUEST_DURATION, "method" => method.to_string())
        .record(duration.as_secs_f64());
}

pub fn record_retry(method: &str, reason: &str) {
    metrics::counter!(RETRIES_TOTAL, "method" => method.to_string(), "reason" => reason.to_string())
        .increment(1);
}

pub fn record_breaker_transition(target: &str, state: &str) {
    metrics::counter!(BREAKER_TRANSITIONS, "target" => target.to_string(), "state" => state.to_string())
        .increment(1);
}

pub fn record_cache_hit() {
    metrics::counter!(CACHE_HITS).increment(1);
}

pub fn record_cache_miss() {
    metrics::counter!(CACHE_MISSES).increment(1);
}

pub fn record_cache_evictions(count: u64) {
    metrics::counter!(CACHE_EVICTIONS).increment(count);
}

pub fn record_rate_limited(action: &str) {
    metrics::counter!(RATE_LIMITED, "action" => action.to_string()).increment(1);
}

pub fn record_proxy_health(proxy: &str, healthy: bool) {
    metrics::gauge!(PROXY_HEALTH, "proxy" => proxy.to_string()).set(if healthy { 1.0 } else { 0.0 });
}

//! Request monitoring plugin.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::Serialize;

use crate::http::error::ClientError;
use crate::http::request::RequestContext;
use crate::http::response::HttpResponse;
use crate::observability::metrics;
use crate::plugins::{ErrorAction, Plugin};

/// Aggregate request counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct MonitoringStats {
    pub total: u64,
    pub succeeded: u64,
    pub failed: u64,
    pub served_from_cache: u64,
    pub retried_attempts: u64,
    pub avg_latency_ms: f64,
}

/// Records per-request metrics and keeps running totals.
#[derive(Debug, Default)]
pub struct MonitoringPlugin {
    total: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    from_cache: AtomicU64,
    retried: AtomicU64,
    latency_us: AtomicU64,
}

impl MonitoringPlugin {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stats(&self) -> MonitoringStats {
        let total = self.total.load(Ordering::Relaxed);
        let latency_us = self.latency_us.load(Ordering::Relaxed);
        MonitoringStats {
            total,
            succeeded: self.succeeded.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            served_from_cache: self.from_cache.load(Ordering::Relaxed),
            retried_attempts: self.retried.load(Ordering::Relaxed),
            avg_latency_ms: if total == 0 {
                0.0
            } else {
                latency_us as f64 / total as f64 / 1_000.0
            },
        }
    }

    fn observe(&self, ctx: &RequestContext) {
        self.total.fetch_add(1, Ordering::Relaxed);
        self.retried
            .fetch_add(u64::from(ctx.attempt.saturating_sub(1)), Ordering::Relaxed);
        self.latency_us
            .fetch_add(ctx.elapsed().as_micros() as u64, Ordering::Relaxed);
    }
}

#[async_trait]
impl Plugin for MonitoringPlugin {
    fn name(&self) -> &str {
        "monitoring"
    }

    async fn after_response(&self, ctx: &mut RequestContext, response: &mut HttpResponse) -> Result<(), ClientError> {
        self.observe(ctx);
        if response.status.is_client_error() || response.status.is_server_error() {
            self.failed.fetch_add(1, Ordering::Relaxed);
        } else {
            self.succeeded.fetch_add(1, Ordering::Relaxed);
        }
        if response.from_cache {
            self.from_cache.fetch_add(1, Ordering::Relaxed);
        }
        metrics::record_request(
            ctx.method().as_str(),
            response.status.as_str(),
            ctx.elapsed(),
        );
        Ok(())
    }

    async fn on_error(&self, ctx: &mut RequestContext, error: &ClientError) -> Result<ErrorAction, ClientError> {
        self.observe(ctx);
        self.failed.fetch_add(1, Ordering::Relaxed);
        metrics::record_request(ctx.method().as_str(), error.kind().as_str(), ctx.elapsed());
        Ok(ErrorAction::Propagate)
    }
}

//! Active proxy health checking.
//!
//! # Responsibilities
//! - Probe a proxy with a lightweight GET of the check URL
//! - Periodically run pool-wide checks until shutdown

use std::sync::Arc;
use std::time::Duration;

use hyper::Method;
use tokio::sync::broadcast;
use tokio::time;

use crate::config::ProxyPoolConfig;
use crate::http::request::HttpRequest;
use crate::http::transport::Transport;
use crate::proxy::{ProxyAddr, ProxyPool};

/// GET `config.check_url` through `proxy`. Healthy means a 2xx within `check_timeout`.
pub async fn probe_proxy(transport: &dyn Transport, proxy: &ProxyAddr, config: &ProxyPoolConfig) -> bool {
    let request = match HttpRequest::parse(Method::GET, &config.check_url)
        .and_then(|r| r.header("user-agent", "resilient-http-health-check"))
    {
        Ok(request) => request,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build proxy health check request");
            return false;
        }
    };

    match transport.send(&request, Some(proxy), config.check_timeout()).await {
        Ok(response) => {
            let success = response.is_success();
            if !success {
                tracing::warn!(proxy = %proxy, status = %response.status, "Health check failed: non-success status");
            }
            success
        }
        Err(e) => {
            tracing::warn!(proxy = %proxy, error = %e, "Health check failed");
            false
        }
    }
}

/// Periodic pool-wide health checks.
pub struct HealthMonitor {
    pool: Arc<ProxyPool>,
    transport: Arc<dyn Transport>,
    interval: Duration,
}

impl HealthMonitor {
    pub fn new(pool: Arc<ProxyPool>, transport: Arc<dyn Transport>, interval: Duration) -> Self {
        Self {
            pool,
            transport,
            interval,
        }
    }

    pub async fn run(self, mut shutdown: broadcast::Receiver<()>) {
        if self.interval.is_zero() {
            tracing::info!("Periodic proxy health checks disabled");
            return;
        }

        let concurrency = self.pool.config().check_concurrency;
        tracing::info!(
            interval_secs = self.interval.as_secs(),
            check_url = %self.pool.config().check_url,
            proxies = self.pool.len(),
            "Health monitor starting"
        );

        let mut ticker = time::interval(self.interval);
        ticker.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.pool.check_all(self.transport.as_ref(), concurrency).await {
                        tracing::error!(error = %e, "Proxy health check run failed");
                    }
                }
                _ = shutdown.recv() => {
                    tracing::info!("Health monitor received shutdown signal, exiting loop");
                    break;
                }
            }
        }
    }
}

//! Read-only health report over a client's subsystems.

use serde::Serialize;

use crate::cache::CacheStats;
use crate::http::error::ClientError;
use crate::plugins::{MonitoringStats, PluginKind, PluginPipeline};
use crate::proxy::{HealthState, ProxyRecord};
use crate::resilience::{BreakerSnapshot, CircuitMode};
use crate::security::RateLimitStatus;

/// Lifecycle of the shared transport session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionState {
    /// No request has needed the transport yet.
    Idle,
    Active,
    Closed,
}

/// A registered plugin as seen in the report.
#[derive(Debug, Clone, Serialize)]
pub struct PluginInfo {
    pub name: String,
    pub priority: i32,
    pub critical: bool,
}

/// Snapshot of every subsystem registered on a client.
#[derive(Debug, Clone, Serialize)]
pub struct HealthReport {
    pub session: SessionState,
    pub plugins: Vec<PluginInfo>,
    pub circuit_breakers: Vec<BreakerSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<CacheStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proxies: Option<Vec<ProxyRecord>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requests: Option<MonitoringStats>,
}

impl HealthReport {
    /// Collect from the built-in plugins found in `pipeline`. The first
    /// instance of each kind is reported.
    pub fn collect(pipeline: &PluginPipeline, session: SessionState) -> Result<Self, ClientError> {
        let mut report = HealthReport {
            session,
            plugins: Vec::new(),
            circuit_breakers: Vec::new(),
            cache: None,
            proxies: None,
            rate_limit: None,
            requests: None,
        };

        for registered in pipeline.plugins().iter() {
            let plugin = &registered.plugin;
            report.plugins.push(PluginInfo {
                name: plugin.name().to_string(),
                priority: registered.priority,
                critical: plugin.is_critical(),
            });

            match plugin {
                PluginKind::CircuitBreaker(p) if report.circuit_breakers.is_empty() => {
                    report.circuit_breakers = p.registry().snapshots()?;
                }
                PluginKind::Cache(p) if report.cache.is_none() => {
                    report.cache = Some(p.cache().stats()?);
                }
                PluginKind::ProxyPool(p) if report.proxies.is_none() => {
                    report.proxies = Some(p.pool().records()?);
                }
                PluginKind::RateLimit(p) if report.rate_limit.is_none() => {
                    report.rate_limit = Some(p.limiter().status()?);
                }
                PluginKind::Monitoring(p) if report.requests.is_none() => {
                    report.requests = Some(p.stats());
                }
                _ => {}
            }
        }

        Ok(report)
    }

    /// True when no breaker is open and at least one proxy is usable (if a
    /// pool is configured).
    pub fn is_healthy(&self) -> bool {
        let breakers_ok = self
            .circuit_breakers
            .iter()
            .all(|b| b.state != CircuitMode::Open);
        let proxies_ok = self.proxies.as_ref().map_or(true, |records| {
            records.is_empty()
                || records
                    .iter()
                    .any(|r| r.health != HealthState::Unhealthy)
        });
        self.session != SessionState::Closed && breakers_ok && proxies_ok
    }
}

//! Proxy pool management.
//!
//! # Responsibilities
//! - Manage the set of proxies and their health records
//! - Apply the rotation strategy to select a proxy
//! - Fold request outcomes and health probe results into health state
//!
//! Probes never run while the pool lock is held: a check first claims the
//! record (in-flight flag), releases the lock, probes, then re-locks only to
//! apply the result.

use std::sync::{Mutex, MutexGuard};
use std::time::{Duration, SystemTime};

use futures_util::stream::{self, StreamExt};
use serde::Serialize;

use crate::config::{ProxyPoolConfig, RotationStrategy};
use crate::health::active::probe_proxy;
use crate::http::error::ClientError;
use crate::http::transport::Transport;
use crate::observability::metrics;
use crate::proxy::{
    record::{HealthState, ProxyRecord},
    round_robin::RoundRobin,
    weighted::{Random, Weighted},
    ProxyAddr, ProxySelector,
};

/// Outcome counts of a `check_all` run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CheckSummary {
    pub healthy: usize,
    pub unhealthy: usize,
    /// Proxies whose check was already in flight.
    pub skipped: usize,
}

impl CheckSummary {
    pub fn total(&self) -> usize {
        self.healthy + self.unhealthy + self.skipped
    }
}

/// A claimed health check for one proxy. Dropping an unfinished ticket
/// releases the claim, so a cancelled probe never blocks later checks.
struct CheckTicket<'a> {
    pool: &'a ProxyPool,
    addr: ProxyAddr,
    generation: u64,
    finished: bool,
}

impl Drop for CheckTicket<'_> {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        if let Ok(mut records) = self.pool.records.lock() {
            if let Some(record) = records.iter_mut().find(|r| r.addr == self.addr) {
                record.abandon_check(self.generation);
                tracing::debug!(proxy = %self.addr, "Abandoned proxy health check released");
            }
        }
    }
}

/// Pool of proxies with health tracking and rotation.
pub struct ProxyPool {
    records: Mutex<Vec<ProxyRecord>>,
    selector: Box<dyn ProxySelector>,
    config: ProxyPoolConfig,
}

impl std::fmt::Debug for ProxyPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProxyPool")
            .field("rotation", &self.config.rotation)
            .field("len", &self.len())
            .finish()
    }
}

impl ProxyPool {
    /// Create an empty pool.
    pub fn new(config: ProxyPoolConfig) -> Self {
        let selector: Box<dyn ProxySelector> = match config.rotation {
            RotationStrategy::RoundRobin => Box::new(RoundRobin::new()),
            RotationStrategy::Random => Box::new(Random),
            RotationStrategy::Weighted => Box::new(Weighted),
        };
        Self {
            records: Mutex::new(Vec::new()),
            selector,
            config,
        }
    }

    /// Create a pool holding every proxy listed in the configuration.
    pub fn from_config(config: ProxyPoolConfig) -> Result<Self, ClientError> {
        let proxies = config
            .proxies
            .iter()
            .map(|p| p.parse::<ProxyAddr>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ClientError::InvalidRequest(e.to_string()))?;

        let pool = Self::new(config);
        for addr in proxies {
            pool.add(addr)?;
        }
        Ok(pool)
    }

    pub fn config(&self) -> &ProxyPoolConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, Vec<ProxyRecord>>, ClientError> {
        self.records.lock().map_err(|_| ClientError::StatePoisoned {
            subsystem: "proxy pool",
        })
    }

    /// Add a proxy in Unknown state. Returns false if it is already present.
    pub fn add(&self, addr: ProxyAddr) -> Result<bool, ClientError> {
        let mut records = self.lock()?;
        if records.iter().any(|r| r.addr == addr) {
            return Ok(false);
        }
        tracing::debug!(proxy = %addr, "Proxy added to pool");
        records.push(ProxyRecord::new(addr));
        Ok(true)
    }

    /// Add a proxy and probe it right away. The probe runs without the pool lock.
    pub async fn add_checked(
        &self,
        addr: ProxyAddr,
        transport: &dyn Transport,
    ) -> Result<HealthState, ClientError> {
        self.add(addr.clone())?;
        self.check_one(&addr, transport).await?;
        self.health_of(&addr)?.ok_or(ClientError::NoProxyAvailable)
    }

    /// Remove a proxy. Returns false if it was not in the pool.
    pub fn remove(&self, addr: &ProxyAddr) -> Result<bool, ClientError> {
        let mut records = self.lock()?;
        let before = records.len();
        records.retain(|r| &r.addr != addr);
        Ok(records.len() != before)
    }

    /// Select a proxy: Healthy ones first, then Unknown ones.
    pub fn get_proxy(&self) -> Result<ProxyRecord, ClientError> {
        let mut records = self.lock()?;

        let index = {
            let healthy: Vec<(usize, &ProxyRecord)> = records
                .iter()
                .enumerate()
                .filter(|(_, r)| r.health == HealthState::Healthy)
                .collect();
            let pool = if healthy.is_empty() {
                records
                    .iter()
                    .enumerate()
                    .filter(|(_, r)| r.health == HealthState::Unknown)
                    .collect()
            } else {
                healthy
            };

            let candidates: Vec<&ProxyRecord> = pool.iter().map(|(_, r)| *r).collect();
            self.selector
                .select(&candidates)
                .map(|choice| pool[choice].0)
        };

        match index {
            Some(index) => {
                let record = &mut records[index];
                record.last_used = Some(SystemTime::now());
                Ok(record.clone())
            }
            None => {
                tracing::warn!(total = records.len(), "No usable proxy in pool");
                Err(ClientError::NoProxyAvailable)
            }
        }
    }

    /// Fold the outcome of a request made through `addr` into its health.
    pub fn report_result(&self, addr: &ProxyAddr, success: bool) -> Result<(), ClientError> {
        let mut records = self.lock()?;
        let Some(record) = records.iter_mut().find(|r| &r.addr == addr) else {
            return Ok(());
        };

        let transition = if success {
            record.mark_success(self.config.healthy_threshold)
        } else {
            record.mark_failure(self.config.unhealthy_threshold)
        };
        if let Some(state) = transition {
            log_transition(addr, state);
        }
        Ok(())
    }

    /// Record a successful response through `addr` that took `elapsed`.
    pub fn report_response(&self, addr: &ProxyAddr, elapsed: Duration) -> Result<(), ClientError> {
        {
            let mut records = self.lock()?;
            if let Some(record) = records.iter_mut().find(|r| &r.addr == addr) {
                record.record_response_time(elapsed);
            }
        }
        self.report_result(addr, true)
    }

    /// Probe a single proxy. Returns `None` if a check was already in flight.
    pub async fn check_one(
        &self,
        addr: &ProxyAddr,
        transport: &dyn Transport,
    ) -> Result<Option<bool>, ClientError> {
        let Some(ticket) = self.begin_check(addr)? else {
            return Ok(None);
        };
        let healthy = probe_proxy(transport, &ticket.addr, &self.config).await;
        self.finish_check(ticket, healthy)?;
        Ok(Some(healthy))
    }

    /// Probe every proxy with at most `concurrency` probes in flight.
    pub async fn check_all(
        &self,
        transport: &dyn Transport,
        concurrency: usize,
    ) -> Result<CheckSummary, ClientError> {
        let mut summary = CheckSummary::default();
        let tickets = {
            let mut records = self.lock()?;
            let mut tickets = Vec::with_capacity(records.len());
            for record in records.iter_mut() {
                match record.begin_check() {
                    Some(generation) => tickets.push(CheckTicket {
                        pool: self,
                        addr: record.addr.clone(),
                        generation,
                        finished: false,
                    }),
                    None => summary.skipped += 1,
                }
            }
            tickets
        };

        tracing::debug!(proxies = tickets.len(), concurrency, "Running proxy health checks");

        let config = &self.config;
        let probes: Vec<_> = tickets
            .into_iter()
            .map(|ticket| async move {
                let healthy = probe_proxy(transport, &ticket.addr, config).await;
                (ticket, healthy)
            })
            .collect();
        let mut results = stream::iter(probes)
            .buffer_unordered(concurrency.max(1));

        while let Some((ticket, healthy)) = results.next().await {
            if healthy {
                summary.healthy += 1;
            } else {
                summary.unhealthy += 1;
            }
            self.finish_check(ticket, healthy)?;
        }

        tracing::info!(
            healthy = summary.healthy,
            unhealthy = summary.unhealthy,
            skipped = summary.skipped,
            "Proxy health check finished"
        );
        Ok(summary)
    }

    fn begin_check(&self, addr: &ProxyAddr) -> Result<Option<CheckTicket<'_>>, ClientError> {
        let generation = {
            let mut records = self.lock()?;
            records
                .iter_mut()
                .find(|r| &r.addr == addr)
                .and_then(|r| r.begin_check())
        };
        Ok(generation.map(|generation| CheckTicket {
            pool: self,
            addr: addr.clone(),
            generation,
            finished: false,
        }))
    }

    fn finish_check(&self, mut ticket: CheckTicket<'_>, healthy: bool) -> Result<(), ClientError> {
        ticket.finished = true;
        let mut records = self.lock()?;
        // The proxy may have been removed while the probe ran.
        let Some(record) = records.iter_mut().find(|r| r.addr == ticket.addr) else {
            return Ok(());
        };
        if let Some(Some(state)) = record.finish_check(
            ticket.generation,
            healthy,
            self.config.healthy_threshold,
            self.config.unhealthy_threshold,
        ) {
            log_transition(&ticket.addr, state);
        }
        metrics::record_proxy_health(&ticket.addr.to_string(), record.health == HealthState::Healthy);
        Ok(())
    }

    /// Current health of one proxy.
    pub fn health_of(&self, addr: &ProxyAddr) -> Result<Option<HealthState>, ClientError> {
        let records = self.lock()?;
        Ok(records.iter().find(|r| &r.addr == addr).map(|r| r.health))
    }

    /// Snapshot of every record, for diagnostics.
    pub fn records(&self) -> Result<Vec<ProxyRecord>, ClientError> {
        Ok(self.lock()?.clone())
    }

    pub fn len(&self) -> usize {
        self.lock().map(|r| r.len()).unwrap_or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn log_transition(addr: &ProxyAddr, state: HealthState) {
    match state {
        HealthState::Unhealthy => tracing::warn!(proxy = %addr, "Proxy marked unhealthy"),
        _ => tracing::info!(proxy = %addr, state = ?state, "Proxy health changed"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use async_trait::async_trait;

    use crate::http::request::HttpRequest;
    use crate::http::response::HttpResponse;

    /// Never answers.
    #[derive(Debug)]
    struct Hang;

    #[async_trait]
    impl Transport for Hang {
        async fn send(
            &self,
            _request: &HttpRequest,
            _proxy: Option<&ProxyAddr>,
            _timeout: Duration,
        ) -> Result<HttpResponse, ClientError> {
            std::future::pending().await
        }
    }

    /// Always answers 200.
    #[derive(Debug)]
    struct Up;

    #[async_trait]
    impl Transport for Up {
        async fn send(
            &self,
            _request: &HttpRequest,
            _proxy: Option<&ProxyAddr>,
            _timeout: Duration,
        ) -> Result<HttpResponse, ClientError> {
            Ok(HttpResponse::with_status(200))
        }
    }

    fn pool_with(n: u16) -> (ProxyPool, Vec<ProxyAddr>) {
        let pool = ProxyPool::new(ProxyPoolConfig::default());
        let addrs: Vec<_> = (0..n).map(|i| ProxyAddr::new("127.0.0.1", 9000 + i)).collect();
        for a in &addrs {
            assert!(pool.add(a.clone()).unwrap());
        }
        (pool, addrs)
    }

    #[test]
    fn test_empty_pool() {
        let pool = ProxyPool::new(ProxyPoolConfig::default());
        assert!(matches!(pool.get_proxy(), Err(ClientError::NoProxyAvailable)));
    }

    #[test]
    fn test_duplicate_add() {
        let (pool, addrs) = pool_with(1);
        assert!(!pool.add(addrs[0].clone()).unwrap());
        assert_eq!(pool.len(), 1);
    }

    #[test]
    fn test_prefers_healthy_over_unknown() {
        let (pool, addrs) = pool_with(3);
        pool.report_result(&addrs[1], true).unwrap();

        for _ in 0..5 {
            assert_eq!(pool.get_proxy().unwrap().addr, addrs[1]);
        }
    }

    #[test]
    fn test_failing_proxy_excluded() {
        let (pool, addrs) = pool_with(3);
        for _ in 0..3 {
            pool.report_result(&addrs[0], false).unwrap();
        }
        assert_eq!(pool.health_of(&addrs[0]).unwrap(), Some(HealthState::Unhealthy));

        for _ in 0..10 {
            assert_ne!(pool.get_proxy().unwrap().addr, addrs[0]);
        }
    }

    #[test]
    fn test_all_unhealthy() {
        let (pool, addrs) = pool_with(2);
        for a in &addrs {
            for _ in 0..3 {
                pool.report_result(a, false).unwrap();
            }
        }
        assert!(matches!(pool.get_proxy(), Err(ClientError::NoProxyAvailable)));
    }

    #[test]
    fn test_remove() {
        let (pool, addrs) = pool_with(2);
        assert!(pool.remove(&addrs[0]).unwrap());
        assert!(!pool.remove(&addrs[0]).unwrap());
        assert_eq!(pool.len(), 1);
        // Reports for removed proxies are ignored.
        pool.report_result(&addrs[0], false).unwrap();
    }

    #[tokio::test]
    async fn test_cancelled_check_does_not_block_later_checks() {
        let (pool, addrs) = pool_with(1);
        for _ in 0..3 {
            pool.report_result(&addrs[0], false).unwrap();
        }

        let timed_out =
            tokio::time::timeout(Duration::from_millis(20), pool.check_one(&addrs[0], &Hang)).await;
        assert!(timed_out.is_err());
        assert!(!pool.records().unwrap()[0].check_in_flight);

        assert_eq!(pool.check_one(&addrs[0], &Up).await.unwrap(), Some(true));
        assert_eq!(pool.health_of(&addrs[0]).unwrap(), Some(HealthState::Healthy));
    }

    #[tokio::test]
    async fn test_cancelled_sweep_releases_every_claim() {
        let (pool, addrs) = pool_with(3);
        for _ in 0..3 {
            pool.report_result(&addrs[1], false).unwrap();
        }

        let timed_out = tokio::time::timeout(Duration::from_millis(20), pool.check_all(&Hang, 2)).await;
        assert!(timed_out.is_err());
        assert!(pool.records().unwrap().iter().all(|r| !r.check_in_flight));

        let summary = pool.check_all(&Up, 2).await.unwrap();
        assert_eq!(summary, CheckSummary { healthy: 3, unhealthy: 0, skipped: 0 });
        assert_eq!(pool.health_of(&addrs[1]).unwrap(), Some(HealthState::Healthy));
    }

    #[test]
    fn test_response_times_are_averaged() {
        let (pool, addrs) = pool_with(1);
        pool.report_response(&addrs[0], Duration::from_millis(40)).unwrap();
        pool.report_response(&addrs[0], Duration::from_millis(60)).unwrap();

        let record = &pool.records().unwrap()[0];
        assert_eq!(record.average_response_time(), Some(Duration::from_millis(50)));
        assert_eq!(record.success_count, 2);
        assert_eq!(record.health, HealthState::Healthy);
    }

    #[test]
    fn test_from_config_rejects_bad_entry() {
        let config = ProxyPoolConfig {
            proxies: vec!["good:8080".into(), "bad".into()],
            ..Default::default()
        };
        assert!(ProxyPool::from_config(config).is_err());
    }
}

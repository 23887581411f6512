//! Bounded in-memory response store.
//!
//! # Responsibilities
//! - Hold cached responses with a per-entry TTL
//! - Treat expired entries as misses and drop them on access
//! - Keep the entry count at or below `max_size` with batch LRU eviction
//! - Count hits, misses and evictions
//!
//! Every read-modify-evict sequence runs under one mutex, so no observer
//! ever sees more than `max_size` entries.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use serde::Serialize;
use tokio::time::Instant;

use crate::cache::key::CacheKey;
use crate::config::CacheConfig;
use crate::http::error::ClientError;
use crate::http::request::HttpRequest;
use crate::http::response::HttpResponse;
use crate::observability::metrics;

/// One cached response.
#[derive(Debug, Clone)]
pub struct CacheEntry {
    pub key: CacheKey,
    pub response: HttpResponse,
    pub created_at: Instant,
    pub last_accessed: Instant,
    pub ttl: Duration,
    /// Monotonic access sequence; orders entries for LRU eviction.
    access_seq: u64,
}

impl CacheEntry {
    pub fn is_expired(&self, now: Instant) -> bool {
        now.duration_since(self.created_at) >= self.ttl
    }
}

/// Counters and occupancy of a cache.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStats {
    pub size: usize,
    pub max_size: usize,
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            return 0.0;
        }
        self.hits as f64 / total as f64
    }
}

#[derive(Debug, Default)]
struct Inner {
    entries: HashMap<CacheKey, CacheEntry>,
    next_seq: u64,
    hits: u64,
    misses: u64,
    evictions: u64,
}

impl Inner {
    fn tick(&mut self) -> u64 {
        self.next_seq += 1;
        self.next_seq
    }

    fn purge_expired(&mut self, now: Instant) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !entry.is_expired(now));
        before - self.entries.len()
    }

    /// Evict the least recently accessed tenth of the entries, at least one.
    fn evict_lru(&mut self) -> usize {
        let count = (self.entries.len() / 10).max(1).min(self.entries.len());
        let mut by_access: Vec<(u64, CacheKey)> = self
            .entries
            .values()
            .map(|e| (e.access_seq, e.key.clone()))
            .collect();
        by_access.sort_unstable_by_key(|(seq, _)| *seq);

        for (_, key) in by_access.into_iter().take(count) {
            self.entries.remove(&key);
        }
        count
    }
}

/// Response cache with TTL expiry and batch LRU eviction.
#[derive(Debug)]
pub struct ResponseCache {
    config: CacheConfig,
    inner: Mutex<Inner>,
}

impl ResponseCache {
    pub fn new(config: CacheConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner::default()),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, ClientError> {
        self.inner
            .lock()
            .map_err(|_| ClientError::StatePoisoned { subsystem: "response cache" })
    }

    /// Whether responses to `request` may be looked up or stored.
    pub fn is_cacheable_request(&self, request: &HttpRequest) -> bool {
        self.config.caches_method(request.method.as_str())
    }

    /// Whether `response` may be stored.
    pub fn is_cacheable_response(&self, response: &HttpResponse) -> bool {
        if !self.config.cacheable_status_codes.contains(&response.status_code()) {
            return false;
        }
        let no_store = response
            .headers
            .get_all("cache-control")
            .iter()
            .filter_map(|v| v.to_str().ok())
            .flat_map(|v| v.split(','))
            .any(|directive| directive.trim().eq_ignore_ascii_case("no-store"));
        !no_store
    }

    /// Look up a fresh entry. Returns a copy marked `from_cache`.
    pub fn lookup(&self, key: &CacheKey) -> Result<Option<HttpResponse>, ClientError> {
        let now = Instant::now();
        let mut inner = self.lock()?;

        let expired = match inner.entries.get(key) {
            Some(entry) => entry.is_expired(now),
            None => {
                inner.misses += 1;
                metrics::record_cache_miss();
                return Ok(None);
            }
        };

        if expired {
            inner.entries.remove(key);
            inner.misses += 1;
            metrics::record_cache_miss();
            tracing::debug!(key = %key, "Cache entry expired");
            return Ok(None);
        }

        let seq = inner.tick();
        inner.hits += 1;
        metrics::record_cache_hit();
        let entry = inner.entries.get_mut(key).map(|entry| {
            entry.last_accessed = now;
            entry.access_seq = seq;
            let mut response = entry.response.clone();
            response.from_cache = true;
            response
        });
        Ok(entry)
    }

    /// Store `response` under `key` with the configured TTL.
    /// Returns false when the cache is disabled by a zero `max_size`.
    pub fn store(&self, key: CacheKey, response: &HttpResponse) -> Result<bool, ClientError> {
        self.store_with_ttl(key, response, self.config.ttl())
    }

    pub fn store_with_ttl(
        &self,
        key: CacheKey,
        response: &HttpResponse,
        ttl: Duration,
    ) -> Result<bool, ClientError> {
        let max_size = self.config.max_size;
        if max_size == 0 {
            return Ok(false);
        }

        let now = Instant::now();
        let mut inner = self.lock()?;

        if !inner.entries.contains_key(&key) && inner.entries.len() >= max_size {
            let expired = inner.purge_expired(now);
            let mut evicted = 0;
            while inner.entries.len() >= max_size {
                evicted += inner.evict_lru();
            }
            if expired + evicted > 0 {
                inner.evictions += (expired + evicted) as u64;
                metrics::record_cache_evictions((expired + evicted) as u64);
                tracing::debug!(expired, evicted, size = inner.entries.len(), "Cache eviction");
            }
        }

        let seq = inner.tick();
        let mut response = response.clone();
        response.from_cache = false;
        inner.entries.insert(
            key.clone(),
            CacheEntry {
                key,
                response,
                created_at: now,
                last_accessed: now,
                ttl,
                access_seq: seq,
            },
        );
        Ok(true)
    }

    /// Remove one entry. Returns whether it was present.
    pub fn invalidate(&self, key: &CacheKey) -> Result<bool, ClientError> {
        Ok(self.lock()?.entries.remove(key).is_some())
    }

    /// Remove every entry. Counters are kept.
    pub fn clear(&self) -> Result<(), ClientError> {
        let mut inner = self.lock()?;
        let size = inner.entries.len();
        inner.entries.clear();
        tracing::info!(size, "Response cache cleared");
        Ok(())
    }

    pub fn contains(&self, key: &CacheKey) -> Result<bool, ClientError> {
        Ok(self.lock()?.entries.contains_key(key))
    }

    pub fn size(&self) -> Result<usize, ClientError> {
        Ok(self.lock()?.entries.len())
    }

    pub fn hits(&self) -> Result<u64, ClientError> {
        Ok(self.lock()?.hits)
    }

    pub fn misses(&self) -> Result<u64, ClientError> {
        Ok(self.lock()?.misses)
    }

    pub fn evictions(&self) -> Result<u64, ClientError> {
        Ok(self.lock()?.evictions)
    }

    pub fn stats(&self) -> Result<CacheStats, ClientError> {
        let inner = self.lock()?;
        Ok(CacheStats {
            size: inner.entries.len(),
            max_size: self.config.max_size,
            hits: inner.hits,
            misses: inner.misses,
            evictions: inner.evictions,
        })
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use hyper::{HeaderMap, Method, StatusCode};

    use super::*;
    use crate::cache::key::cache_key;

    fn cache(max_size: usize) -> ResponseCache {
        ResponseCache::new(CacheConfig {
            enabled: true,
            max_size,
            ttl_secs: 60,
            ..CacheConfig::default()
        })
    }

    fn key(i: usize) -> CacheKey {
        let request = HttpRequest::parse(Method::GET, &format!("http://example.com/{i}")).unwrap();
        cache_key(&request, &CacheConfig::default())
    }

    fn body(text: &'static str) -> HttpResponse {
        HttpResponse::new(StatusCode::OK, HeaderMap::new(), Bytes::from_static(text.as_bytes()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_round_trip_and_expiry() {
        let c = cache(10);
        c.store(key(1), &body("hello")).unwrap();

        let hit = c.lookup(&key(1)).unwrap().expect("fresh entry");
        assert_eq!(hit.body, Bytes::from_static(b"hello"));
        assert!(hit.from_cache);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert!(c.lookup(&key(1)).unwrap().is_none());
        assert_eq!(c.size().unwrap(), 0);
        assert_eq!(c.hits().unwrap(), 1);
        assert_eq!(c.misses().unwrap(), 1);
    }

    #[test]
    fn test_size_never_exceeds_max() {
        for max in [1, 3, 10, 25] {
            let c = cache(max);
            for i in 0..(max * 3 + 1) {
                c.store(key(i), &body("x")).unwrap();
                assert!(c.size().unwrap() <= max);
            }
        }
    }

    #[test]
    fn test_evicts_least_recently_accessed() {
        let c = cache(10);
        for i in 0..10 {
            c.store(key(i), &body("x")).unwrap();
        }
        // Touch the oldest entry so entry 1 becomes the LRU.
        assert!(c.lookup(&key(0)).unwrap().is_some());

        c.store(key(10), &body("x")).unwrap();
        assert_eq!(c.size().unwrap(), 10);
        assert_eq!(c.evictions().unwrap(), 1);
        assert!(c.contains(&key(0)).unwrap());
        assert!(!c.contains(&key(1)).unwrap());
        assert!(c.contains(&key(10)).unwrap());
    }

    #[test]
    fn test_batch_eviction_is_a_tenth() {
        let c = cache(50);
        for i in 0..51 {
            c.store(key(i), &body("x")).unwrap();
        }
        assert_eq!(c.evictions().unwrap(), 5);
        assert_eq!(c.size().unwrap(), 46);
    }

    #[test]
    fn test_zero_size_disables_storing() {
        let c = cache(0);
        assert!(!c.store(key(1), &body("x")).unwrap());
        assert_eq!(c.size().unwrap(), 0);
    }

    #[test]
    fn test_cacheability() {
        let c = cache(10);
        assert!(c.is_cacheable_response(&body("x")));
        assert!(!c.is_cacheable_response(&HttpResponse::with_status(404)));
        assert!(!c.is_cacheable_response(&HttpResponse::with_status(500)));

        let mut no_store = body("x");
        no_store.headers.insert("cache-control", "private, No-Store".parse().unwrap());
        assert!(!c.is_cacheable_response(&no_store));

        let post = HttpRequest::parse(Method::POST, "http://example.com/").unwrap();
        assert!(!c.is_cacheable_request(&post));
    }

    #[test]
    fn test_methods_ignore_case() {
        let c = ResponseCache::new(CacheConfig {
            enabled: true,
            methods: ["get".to_string()].into_iter().collect(),
            ..CacheConfig::default()
        });
        let get = HttpRequest::parse(Method::GET, "http://example.com/").unwrap();
        assert!(c.is_cacheable_request(&get));
    }

    #[test]
    fn test_invalidate_and_clear() {
        let c = cache(10);
        c.store(key(1), &body("x")).unwrap();
        c.store(key(2), &body("x")).unwrap();
        assert!(c.invalidate(&key(1)).unwrap());
        assert!(!c.invalidate(&key(1)).unwrap());
        c.clear().unwrap();
        assert_eq!(c.stats().unwrap().size, 0);
    }
}

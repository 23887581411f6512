//! Round-robin rotation strategy.

use std::sync::atomic::{AtomicUsize, Ordering};

use crate::proxy::{record::ProxyRecord, ProxySelector};

/// Round-robin selector.
/// Stores an internal counter to rotate through proxies.
#[derive(Debug, Default)]
pub struct RoundRobin {
    counter: AtomicUsize,
}

impl RoundRobin {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProxySelector for RoundRobin {
    fn select(&self, candidates: &[&ProxyRecord]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        let next = self.counter.fetch_add(1, Ordering::Relaxed);
        Some(next % candidates.len())
    }
}

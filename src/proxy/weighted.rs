//! Random and success-rate weighted rotation strategies.

use crate::proxy::{record::ProxyRecord, ProxySelector};

/// Uniformly random selector.
#[derive(Debug, Default)]
pub struct Random;

impl ProxySelector for Random {
    fn select(&self, candidates: &[&ProxyRecord]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }
        Some(fastrand::usize(..candidates.len()))
    }
}

/// Picks proxies with probability proportional to their success rate.
#[derive(Debug, Default)]
pub struct Weighted;

impl ProxySelector for Weighted {
    fn select(&self, candidates: &[&ProxyRecord]) -> Option<usize> {
        if candidates.is_empty() {
            return None;
        }

        let total: f64 = candidates.iter().map(|p| p.success_rate()).sum();
        if total <= 0.0 {
            return Some(fastrand::usize(..candidates.len()));
        }

        let mut point = fastrand::f64() * total;
        for (index, proxy) in candidates.iter().enumerate() {
            point -= proxy.success_rate();
            if point < 0.0 {
                return Some(index);
            }
        }
        Some(candidates.len() - 1)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proxy::ProxyAddr;

    #[test]
    fn test_weighted_skips_zero_rate() {
        let good = ProxyRecord::new(ProxyAddr::new("127.0.0.1", 8080));
        let mut bad = ProxyRecord::new(ProxyAddr::new("127.0.0.1", 8081));
        bad.mark_failure(10);

        let candidates = vec![&bad, &good];
        for _ in 0..50 {
            assert_eq!(Weighted.select(&candidates), Some(1));
        }
    }

    #[test]
    fn test_random_in_bounds() {
        let p1 = ProxyRecord::new(ProxyAddr::new("127.0.0.1", 8080));
        let p2 = ProxyRecord::new(ProxyAddr::new("127.0.0.1", 8081));
        let candidates = vec![&p1, &p2];
        for _ in 0..50 {
            assert!(Random.select(&candidates).unwrap() < 2);
        }
    }
}

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

/// Lifetime counters for one reader cache. Relaxed ordering: these are
/// reporting numbers, never used for synchronization.
#[derive(Debug, Default)]
pub struct CacheStats {
    hits: AtomicU64,
    misses: AtomicU64,
    builds: AtomicU64,
    build_failures: AtomicU64,
    evictions: AtomicU64,
    closes: AtomicU64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub builds: u64,
    pub build_failures: u64,
    pub evictions: u64,
    pub closes: u64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            builds: self.builds.load(Ordering::Relaxed),
            build_failures: self.build_failures.load(Ordering::Relaxed),
            evictions: self.evictions.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
        }
    }

    pub(crate) fn inc_hit(&self) {
        self.hits.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_build(&self) {
        self.builds.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn inc_build_failure(&self) {
        self.build_failures.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn add_evictions(&self, n: usize) {
        self.evictions.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub(crate) fn inc_close(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn snapshot_starts_at_zero() {
        assert_eq!(CacheStats::default().snapshot(), CacheStatsSnapshot::default());
    }

    #[test]
    fn counters_accumulate() {
        let stats = CacheStats::default();
        stats.inc_hit();
        stats.inc_hit();
        stats.inc_miss();
        stats.inc_build();
        stats.add_evictions(3);
        stats.inc_close();
        let snap = stats.snapshot();
        assert_eq!(snap.hits, 2);
        assert_eq!(snap.misses, 1);
        assert_eq!(snap.builds, 1);
        assert_eq!(snap.build_failures, 0);
        assert_eq!(snap.evictions, 3);
        assert_eq!(snap.closes, 1);
    }
}

//! Cache statistics tracking
//!
//! The engine reports events through [`CacheReporter`]; what happens to them
//! is up to the owner. [`CacheStats`] keeps plain atomic counters.

use std::sync::atomic::{AtomicU64, Ordering};

use crate::entry::Freshness;
use crate::revalidator::RevalidationOutcome;

/// Tier an entry was served from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    /// In-memory LRU
    Memory,
    /// Disk store
    Disk,
}

/// Receiver for cache events
///
/// Every method defaults to doing nothing.
pub trait CacheReporter: Send + Sync {
    /// A servable entry was found
    fn record_hit(&self, _tier: Tier, _freshness: Freshness) {}

    /// Nothing servable was found
    fn record_miss(&self) {}

    /// A full fetch finished
    fn record_fetch(&self, _success: bool) {}

    /// A revalidation finished or was skipped
    fn record_revalidation(&self, _outcome: RevalidationOutcome) {}

    /// Entries were removed by the memory LRU or the disk evictor
    fn record_evictions(&self, _count: usize) {}
}

/// Reporter that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopReporter;

impl CacheReporter for NoopReporter {}

/// Statistics for cache performance tracking
#[derive(Debug, Default)]
pub struct CacheStats {
    memory_hits: AtomicU64,
    disk_hits: AtomicU64,
    stale_hits: AtomicU64,
    misses: AtomicU64,
    fetches: AtomicU64,
    fetch_failures: AtomicU64,
    revalidated: AtomicU64,
    revalidation_failures: AtomicU64,
    revalidations_skipped: AtomicU64,
    evictions: AtomicU64,
}

impl CacheStats {
    /// Create new stats tracker
    pub fn new() -> Self {
        Self::default()
    }

    /// Hits served from memory
    pub fn memory_hits(&self) -> u64 {
        self.memory_hits.load(Ordering::Relaxed)
    }

    /// Hits served from disk
    pub fn disk_hits(&self) -> u64 {
        self.disk_hits.load(Ordering::Relaxed)
    }

    /// All hits
    pub fn hits(&self) -> u64 {
        self.memory_hits() + self.disk_hits()
    }

    /// Hits that were stale and triggered (or would trigger) a revalidation
    pub fn stale_hits(&self) -> u64 {
        self.stale_hits.load(Ordering::Relaxed)
    }

    /// Get total misses
    pub fn misses(&self) -> u64 {
        self.misses.load(Ordering::Relaxed)
    }

    /// Successful full fetches
    pub fn fetches(&self) -> u64 {
        self.fetches.load(Ordering::Relaxed)
    }

    /// Failed full fetches
    pub fn fetch_failures(&self) -> u64 {
        self.fetch_failures.load(Ordering::Relaxed)
    }

    /// Revalidations that confirmed or replaced an entry
    pub fn revalidated(&self) -> u64 {
        self.revalidated.load(Ordering::Relaxed)
    }

    /// Revalidations that failed
    pub fn revalidation_failures(&self) -> u64 {
        self.revalidation_failures.load(Ordering::Relaxed)
    }

    /// Revalidations skipped because one was already in flight
    pub fn revalidations_skipped(&self) -> u64 {
        self.revalidations_skipped.load(Ordering::Relaxed)
    }

    /// Get total evictions
    pub fn evictions(&self) -> u64 {
        self.evictions.load(Ordering::Relaxed)
    }

    /// Calculate hit ratio (0.0 to 1.0)
    pub fn hit_ratio(&self) -> f64 {
        let hits = self.hits();
        let total = hits + self.misses();
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    /// Reset all statistics
    pub fn reset(&self) {
        for counter in [
            &self.memory_hits,
            &self.disk_hits,
            &self.stale_hits,
            &self.misses,
            &self.fetches,
            &self.fetch_failures,
            &self.revalidated,
            &self.revalidation_failures,
            &self.revalidations_skipped,
            &self.evictions,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

impl CacheReporter for CacheStats {
    fn record_hit(&self, tier: Tier, freshness: Freshness) {
        match tier {
            Tier::Memory => self.memory_hits.fetch_add(1, Ordering::Relaxed),
            Tier::Disk => self.disk_hits.fetch_add(1, Ordering::Relaxed),
        };
        if freshness == Freshness::Stale {
            self.stale_hits.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_miss(&self) {
        self.misses.fetch_add(1, Ordering::Relaxed);
    }

    fn record_fetch(&self, success: bool) {
        if success {
            self.fetches.fetch_add(1, Ordering::Relaxed);
        } else {
            self.fetch_failures.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn record_revalidation(&self, outcome: RevalidationOutcome) {
        let counter = match outcome {
            RevalidationOutcome::NotModified | RevalidationOutcome::Updated => &self.revalidated,
            RevalidationOutcome::Failed => &self.revalidation_failures,
            RevalidationOutcome::Skipped => &self.revalidations_skipped,
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    fn record_evictions(&self, count: usize) {
        self.evictions.fetch_add(count as u64, Ordering::Relaxed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_basic() {
        let stats = CacheStats::new();

        stats.record_hit(Tier::Memory, Freshness::Fresh);
        stats.record_hit(Tier::Disk, Freshness::Stale);
        stats.record_miss();

        assert_eq!(stats.hits(), 2);
        assert_eq!(stats.memory_hits(), 1);
        assert_eq!(stats.disk_hits(), 1);
        assert_eq!(stats.stale_hits(), 1);
        assert_eq!(stats.misses(), 1);
        assert_eq!(stats.hit_ratio(), 2.0 / 3.0);
    }

    #[test]
    fn test_stats_revalidation_counters() {
        let stats = CacheStats::new();

        stats.record_revalidation(RevalidationOutcome::NotModified);
        stats.record_revalidation(RevalidationOutcome::Updated);
        stats.record_revalidation(RevalidationOutcome::Failed);
        stats.record_revalidation(RevalidationOutcome::Skipped);
        stats.record_fetch(true);
        stats.record_fetch(false);
        stats.record_evictions(3);

        assert_eq!(stats.revalidated(), 2);
        assert_eq!(stats.revalidation_failures(), 1);
        assert_eq!(stats.revalidations_skipped(), 1);
        assert_eq!(stats.fetches(), 1);
        assert_eq!(stats.fetch_failures(), 1);
        assert_eq!(stats.evictions(), 3);
    }

    #[test]
    fn test_stats_reset() {
        let stats = CacheStats::new();

        stats.record_hit(Tier::Memory, Freshness::Fresh);
        stats.record_miss();
        stats.record_evictions(2);
        stats.reset();

        assert_eq!(stats.hits(), 0);
        assert_eq!(stats.misses(), 0);
        assert_eq!(stats.evictions(), 0);
        assert_eq!(stats.hit_ratio(), 0.0);
    }

    #[test]
    fn test_noop_reporter() {
        let reporter: &dyn CacheReporter = &NoopReporter;
        reporter.record_hit(Tier::Disk, Freshness::Fresh);
        reporter.record_miss();
    }
}

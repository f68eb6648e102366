//! Read and write paths across the memory and disk tiers

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use shellstore::{CacheKey, DiskStore, Error as StoreError};
use tracing::{debug, warn};

use crate::entry::{CacheEntry, Freshness};
use crate::memory::MemoryCache;
use crate::stats::{CacheReporter, Tier};

/// Both storage tiers plus the reporter that observes them
///
/// Memory only ever holds entries that made it to disk.
pub(crate) struct Tiers {
    pub memory: MemoryCache,
    pub disk: DiskStore,
    pub reporter: Arc<dyn CacheReporter>,
    pub fresh_window: Duration,
    pub stale_window: Duration,
}

impl Tiers {
    pub(crate) fn classify(&self, entry: &CacheEntry, now: SystemTime) -> Freshness {
        Freshness::classify(entry.stored_at, now, self.fresh_window, self.stale_window)
    }

    /// Find a servable entry, memory first
    ///
    /// Expired memory entries are dropped and disk is consulted. A servable
    /// disk entry is promoted to memory. Disk errors count as a miss.
    pub(crate) fn lookup(
        &self,
        key: &CacheKey,
        url: &str,
        now: SystemTime,
    ) -> Option<(CacheEntry, Freshness)> {
        if let Some(entry) = self.memory.get(key) {
            let freshness = self.classify(&entry, now);
            if freshness.is_servable() {
                self.reporter.record_hit(Tier::Memory, freshness);
                return Some((entry, freshness));
            }
            self.memory.remove(key);
        }

        let found = match self.disk.read(key) {
            Ok(Some(disk)) => {
                let entry = CacheEntry::from_disk(disk, url);
                let freshness = self.classify(&entry, now);
                freshness.is_servable().then_some((entry, freshness))
            }
            Ok(None) => None,
            Err(e) => {
                warn!(url, error = %e, "disk read failed, treating as miss");
                None
            }
        };

        match found {
            Some((entry, freshness)) => {
                self.promote(&entry);
                self.reporter.record_hit(Tier::Disk, freshness);
                Some((entry, freshness))
            }
            None => {
                self.reporter.record_miss();
                None
            }
        }
    }

    /// Current entry regardless of age
    pub(crate) fn peek(&self, key: &CacheKey, url: &str) -> Option<CacheEntry> {
        if let Some(entry) = self.memory.get(key) {
            return Some(entry);
        }
        match self.disk.read(key) {
            Ok(found) => found.map(|disk| CacheEntry::from_disk(disk, url)),
            Err(e) => {
                debug!(url, error = %e, "disk read failed");
                None
            }
        }
    }

    /// Persist a new or replaced entry: disk, then memory
    ///
    /// # Returns
    /// * `bool` - Whether the disk write succeeded
    pub(crate) fn store(&self, entry: &CacheEntry) -> bool {
        match self
            .disk
            .write(&entry.key, &entry.body, &entry.metadata(), entry.stored_at)
        {
            Ok(()) => {
                self.promote(entry);
                true
            }
            Err(e) => {
                warn!(url = %entry.url, error = %e, "cache write failed");
                self.memory.remove(&entry.key);
                false
            }
        }
    }

    /// Record a 304: move `stored_at` forward and keep the body
    ///
    /// Rewrites the sidecar when the validators changed and falls back to a
    /// full write when the body vanished from disk.
    pub(crate) fn refresh(&self, entry: &CacheEntry, validators_changed: bool) -> bool {
        let result = match self.disk.touch(&entry.key, entry.stored_at) {
            Err(StoreError::NotFound(_)) => {
                debug!(url = %entry.url, "body gone during revalidation, rewriting");
                return self.store(entry);
            }
            Ok(()) if validators_changed => {
                let metadata = entry.metadata().with_body(&entry.body);
                self.disk.write_metadata(&entry.key, &metadata)
            }
            other => other,
        };

        match result {
            Ok(()) => {
                self.promote(entry);
                true
            }
            Err(e) => {
                warn!(url = %entry.url, error = %e, "failed to refresh cache entry");
                self.memory.remove(&entry.key);
                false
            }
        }
    }

    /// Drop an entry from both tiers
    pub(crate) fn remove(&self, key: &CacheKey) {
        self.memory.remove(key);
        if let Err(e) = self.disk.delete(key) {
            warn!(key = %key, error = %e, "failed to delete cache entry");
        }
    }

    fn promote(&self, entry: &CacheEntry) {
        let evicted = self.memory.put(entry.key.clone(), entry.clone());
        if evicted > 0 {
            self.reporter.record_evictions(evicted);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;
    use shellstore::Validators;
    use tempfile::TempDir;

    use crate::stats::CacheStats;

    const HOUR: Duration = Duration::from_secs(3600);

    fn tiers(dir: &TempDir, stats: Arc<CacheStats>) -> Tiers {
        Tiers {
            memory: MemoryCache::new(1 << 20),
            disk: DiskStore::open(dir.path()).unwrap(),
            reporter: stats,
            fresh_window: HOUR,
            stale_window: HOUR,
        }
    }

    fn secs(t: SystemTime) -> u64 {
        t.duration_since(SystemTime::UNIX_EPOCH).unwrap().as_secs()
    }

    fn entry(url: &str, stored_at: SystemTime) -> CacheEntry {
        CacheEntry {
            key: CacheKey::encode(url),
            url: url.to_string(),
            body: Bytes::from_static(b"console.log(1)"),
            mime_type: "application/javascript".into(),
            encoding: "utf-8".into(),
            validators: Validators::new(Some("\"v1\"".into()), None),
            stored_at,
        }
    }

    #[test]
    fn test_store_then_lookup_memory() {
        let dir = TempDir::new().unwrap();
        let stats = Arc::new(CacheStats::new());
        let tiers = tiers(&dir, stats.clone());
        let now = SystemTime::now();
        let e = entry("https://a.test/app.js", now);

        assert!(tiers.store(&e));
        let (found, freshness) = tiers.lookup(&e.key, &e.url, now).unwrap();

        assert_eq!(found.body, e.body);
        assert_eq!(freshness, Freshness::Fresh);
        assert_eq!(stats.memory_hits(), 1);
    }

    #[test]
    fn test_disk_hit_is_promoted() {
        let dir = TempDir::new().unwrap();
        let stats = Arc::new(CacheStats::new());
        let tiers = tiers(&dir, stats.clone());
        let now = SystemTime::now();
        let e = entry("https://a.test/app.js", now);

        tiers.store(&e);
        tiers.memory.clear();

        let (_, freshness) = tiers.lookup(&e.key, &e.url, now + HOUR + HOUR / 2).unwrap();
        assert_eq!(freshness, Freshness::Stale);
        assert_eq!(stats.disk_hits(), 1);
        assert!(tiers.memory.get(&e.key).is_some());
    }

    #[test]
    fn test_expired_is_miss() {
        let dir = TempDir::new().unwrap();
        let stats = Arc::new(CacheStats::new());
        let tiers = tiers(&dir, stats.clone());
        let now = SystemTime::now();
        let e = entry("https://a.test/app.js", now);

        tiers.store(&e);
        assert!(tiers.lookup(&e.key, &e.url, now + HOUR * 3).is_none());
        assert!(tiers.memory.get(&e.key).is_none());
        assert_eq!(stats.misses(), 1);
        // Expired entries stay on disk until cleanup
        assert!(tiers.disk.exists(&e.key));
    }

    #[test]
    fn test_refresh_rewrites_missing_body() {
        let dir = TempDir::new().unwrap();
        let tiers = tiers(&dir, Arc::new(CacheStats::new()));
        let now = SystemTime::now();
        let e = entry("https://a.test/app.js", now);

        tiers.store(&e);
        tiers.disk.delete(&e.key).unwrap();

        let later = e.clone().with_stored_at(now + HOUR);
        assert!(tiers.refresh(&later, false));

        let disk = tiers.disk.read(&e.key).unwrap().unwrap();
        assert_eq!(disk.body, e.body);
        assert_eq!(secs(disk.stored_at), secs(now + HOUR));
    }

    #[test]
    fn test_refresh_updates_validators() {
        let dir = TempDir::new().unwrap();
        let tiers = tiers(&dir, Arc::new(CacheStats::new()));
        let now = SystemTime::now();
        let e = entry("https://a.test/app.js", now);
        tiers.store(&e);

        let mut later = e.clone().with_stored_at(now + HOUR);
        later.validators = Validators::new(Some("\"v2\"".into()), None);
        assert!(tiers.refresh(&later, true));

        let disk = tiers.disk.read(&e.key).unwrap().unwrap();
        assert_eq!(disk.metadata.validators.etag.as_deref(), Some("\"v2\""));
        assert_eq!(secs(disk.stored_at), secs(now + HOUR));
        assert_eq!(tiers.memory.get(&e.key).unwrap().stored_at, now + HOUR);
    }

    #[test]
    fn test_mismatched_disk_entry_is_not_promoted() {
        let dir = TempDir::new().unwrap();
        let stats = Arc::new(CacheStats::new());
        let tiers = tiers(&dir, stats.clone());
        let now = SystemTime::now();
        let e = entry("https://a.test/app.js", now);
        tiers.store(&e);
        tiers.memory.clear();

        // Another write's body behind this entry's sidecar
        let body_path = dir.path().join(format!("{}.body", e.key));
        std::fs::write(&body_path, b"console.log(2)").unwrap();

        assert!(tiers.lookup(&e.key, &e.url, now).is_none());
        assert!(tiers.memory.get(&e.key).is_none());
        assert_eq!(stats.misses(), 1);
    }

    #[test]
    fn test_failed_write_leaves_memory_empty() {
        let dir = TempDir::new().unwrap();
        let tiers = tiers(&dir, Arc::new(CacheStats::new()));
        let e = entry("https://a.test/app.js", SystemTime::now());

        std::fs::remove_dir_all(dir.path()).unwrap();
        std::fs::write(dir.path(), b"not a directory").unwrap();

        assert!(!tiers.store(&e));
        assert!(tiers.memory.get(&e.key).is_none());
        assert!(tiers.lookup(&e.key, &e.url, SystemTime::now()).is_none());

        std::fs::remove_file(dir.path()).unwrap();
        std::fs::create_dir(dir.path()).unwrap();
    }
}

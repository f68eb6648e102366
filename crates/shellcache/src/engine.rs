//! CacheEngine: stale-while-revalidate cache over a memory LRU and a disk store

use std::sync::Arc;
use std::time::Duration;

use shellstore::{CacheKey, DiskStore};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::clock::{Clock, SystemClock};
use crate::config::CacheConfig;
use crate::entry::{CacheEntry, Freshness};
use crate::error::Result;
use crate::evictor::{CleanupReport, Evictor};
use crate::fetcher::Fetcher;
use crate::http::HttpBackend;
use crate::memory::MemoryCache;
use crate::request::{InterceptedRequest, RequestHeaders};
use crate::revalidator::{RevalidationOutcome, Revalidator};
use crate::stats::{CacheReporter, NoopReporter};
use crate::tiers::Tiers;

/// Builder for [`CacheEngine`]
pub struct CacheEngineBuilder {
    config: CacheConfig,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn CacheReporter>,
}

impl CacheEngineBuilder {
    /// Use a different time source
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Receive cache events
    pub fn reporter(mut self, reporter: Arc<dyn CacheReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    /// Validate the configuration, create the cache directory and build the engine
    pub fn build(self) -> Result<CacheEngine> {
        let Self {
            config,
            clock,
            reporter,
        } = self;
        config.validate()?;

        let disk = DiskStore::open(config.cache_dir())?;
        let memory = MemoryCache::new(config.memory_capacity());
        let http = HttpBackend::new(&config)?;

        let tiers = Arc::new(Tiers {
            memory,
            disk: disk.clone(),
            reporter: Arc::clone(&reporter),
            fresh_window: config.fresh_window,
            stale_window: config.stale_window,
        });
        let evictor = Evictor::new(
            disk,
            config.hard_expiry(),
            config.disk_cap_bytes,
            Arc::clone(&clock),
            reporter,
        );

        info!(
            dir = %config.cache_dir().display(),
            memory_bytes = tiers.memory.capacity_bytes(),
            disk_cap_bytes = config.disk_cap_bytes,
            "cache engine ready"
        );

        Ok(CacheEngine {
            inner: Arc::new(Inner {
                fetcher: Fetcher::new(http.clone(), Arc::clone(&tiers), Arc::clone(&clock)),
                revalidator: Arc::new(Revalidator::new(http, Arc::clone(&tiers), Arc::clone(&clock))),
                evictor: Arc::new(evictor),
                tiers,
                clock,
                config,
            }),
        })
    }
}

struct Inner {
    config: CacheConfig,
    tiers: Arc<Tiers>,
    fetcher: Fetcher,
    revalidator: Arc<Revalidator>,
    evictor: Arc<Evictor>,
    clock: Arc<dyn Clock>,
}

/// Two-tier resource cache
///
/// Cheap to clone; clones share all state. Nothing here returns an error
/// after construction: every failure degrades to a miss so the caller falls
/// back to the network.
///
/// [`lookup_async`](Self::lookup_async) and [`spawn_cleanup_task`](Self::spawn_cleanup_task)
/// must run inside a tokio runtime.
#[derive(Clone)]
pub struct CacheEngine {
    inner: Arc<Inner>,
}

impl CacheEngine {
    /// Build an engine with the system clock and no reporter
    pub fn new(config: CacheConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    /// Start building an engine
    pub fn builder(config: CacheConfig) -> CacheEngineBuilder {
        CacheEngineBuilder {
            config,
            clock: Arc::new(SystemClock),
            reporter: Arc::new(NoopReporter),
        }
    }

    /// Serve from the cache without touching the network
    ///
    /// Returns Fresh and Stale entries alike and never schedules a
    /// revalidation.
    pub fn lookup_sync(&self, url: &str) -> Option<CacheEntry> {
        let key = CacheKey::encode(url);
        self.inner
            .tiers
            .lookup(&key, url, self.inner.clock.now())
            .map(|(entry, _)| entry)
    }

    /// Serve from the cache, fetching on a miss
    ///
    /// * Fresh: returned as-is
    /// * Stale: returned as-is, one background revalidation per key
    /// * Expired or absent: fetched; `None` when the fetch fails
    pub async fn lookup_async(&self, url: &str, headers: &RequestHeaders) -> Option<CacheEntry> {
        let key = CacheKey::encode(url);
        match self.inner.tiers.lookup(&key, url, self.inner.clock.now()) {
            Some((entry, Freshness::Stale)) => {
                self.schedule_revalidation(url, headers, &entry);
                Some(entry)
            }
            Some((entry, _)) => Some(entry),
            None => self.inner.fetcher.fetch(url, headers).await,
        }
    }

    /// [`lookup_async`](Self::lookup_async) for an intercepted request; non-GET requests bypass the cache
    pub async fn lookup_request(&self, request: &InterceptedRequest) -> Option<CacheEntry> {
        if !request.is_get() {
            debug!(url = %request.url, method = %request.method, "bypassing cache");
            return None;
        }
        self.lookup_async(&request.url, &request.headers).await
    }

    /// Revalidate `url` now and wait for the result
    ///
    /// # Returns
    /// * `None` - Nothing cached for `url`
    /// * `Some(outcome)` - How the revalidation ended
    pub async fn revalidate(
        &self,
        url: &str,
        headers: &RequestHeaders,
    ) -> Option<RevalidationOutcome> {
        let key = CacheKey::encode(url);
        let current = self.inner.tiers.peek(&key, url)?;
        Some(self.inner.revalidator.revalidate(url, headers, current).await)
    }

    fn schedule_revalidation(&self, url: &str, headers: &RequestHeaders, entry: &CacheEntry) {
        let revalidator = &self.inner.revalidator;
        let Some(guard) = revalidator.try_begin(&entry.key) else {
            self.inner
                .tiers
                .reporter
                .record_revalidation(RevalidationOutcome::Skipped);
            return;
        };

        let revalidator = Arc::clone(revalidator);
        let url = url.to_string();
        let headers = headers.clone();
        let current = entry.clone();
        debug!(url = %url, "scheduling revalidation");

        tokio::spawn(async move {
            revalidator.run(guard, &url, &headers, current).await;
        });
    }

    /// Run one disk cleanup pass on the calling thread
    pub fn cleanup(&self) -> CleanupReport {
        self.inner.evictor.cleanup()
    }

    /// Run cleanup every `interval` on the blocking pool
    ///
    /// The first pass runs immediately. Abort the handle to stop.
    pub fn spawn_cleanup_task(&self, interval: Duration) -> JoinHandle<()> {
        let evictor = Arc::clone(&self.inner.evictor);

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                ticker.tick().await;
                let evictor = Arc::clone(&evictor);
                if let Err(e) = tokio::task::spawn_blocking(move || evictor.cleanup()).await {
                    warn!(error = %e, "cache cleanup task panicked");
                }
            }
        })
    }

    /// Drop `url` from both tiers
    pub fn invalidate(&self, url: &str) {
        self.inner.tiers.remove(&CacheKey::encode(url));
    }

    /// Drop every entry from both tiers
    ///
    /// # Returns
    /// * `usize` - Number of disk entries removed
    pub fn clear(&self) -> usize {
        self.inner.tiers.memory.clear();
        match self.inner.tiers.disk.clear() {
            Ok(removed) => removed,
            Err(e) => {
                warn!(error = %e, "failed to clear disk cache");
                0
            }
        }
    }

    /// Freshness of an entry at the engine's current time
    pub fn classify(&self, entry: &CacheEntry) -> Freshness {
        self.inner.tiers.classify(entry, self.inner.clock.now())
    }

    /// Number of revalidations currently running
    pub fn in_flight_count(&self) -> usize {
        self.inner.revalidator.in_flight_count()
    }

    /// Active configuration
    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Memory tier
    pub fn memory(&self) -> &MemoryCache {
        &self.inner.tiers.memory
    }

    /// Disk tier
    pub fn disk(&self) -> &DiskStore {
        &self.inner.tiers.disk
    }
}

//! # shellcache
//!
//! Stale-while-revalidate cache for resources loaded by an embedded web view.
//!
//! ## Architecture
//! - **Memory tier**: byte-bounded LRU over AHash, shared behind a mutex
//! - **Disk tier**: [`shellstore`] bodies plus versioned metadata sidecars
//! - **Freshness**: entries are Fresh, Stale (served, revalidated in the
//!   background) or Expired (refetched)
//! - **Revalidation**: conditional GETs, at most one in flight per key
//! - **Eviction**: hard expiry and an oldest-first disk cap
//!
//! Every failure after construction degrades to a miss; the caller then
//! loads from the network as if no cache existed.

#![warn(missing_docs)]

mod clock;
mod config;
mod engine;
mod entry;
mod error;
mod evictor;
mod fetcher;
mod http;
mod lru;
mod memory;
mod request;
mod revalidator;
mod stats;
mod tiers;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    CacheConfig, DEFAULT_DISK_CAP_BYTES, DEFAULT_FRESH_WINDOW, DEFAULT_MEMORY_FRACTION,
    DEFAULT_STALE_WINDOW, DEFAULT_TIMEOUT,
};
pub use engine::{CacheEngine, CacheEngineBuilder};
pub use entry::{CacheEntry, CacheResponse, Freshness};
pub use error::{Error, Result};
pub use evictor::{CleanupReport, ORPHAN_GRACE};
pub use lru::{LruCache, Weighted};
pub use memory::MemoryCache;
pub use request::{InterceptedRequest, RequestHeaders};
pub use revalidator::RevalidationOutcome;
pub use stats::{CacheReporter, CacheStats, NoopReporter, Tier};

pub use shellstore::{CacheKey, CacheMetadata, DiskEntry, DiskStore, StoredFile, Validators};

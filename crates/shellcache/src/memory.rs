//! Memory tier: a shared byte-bounded LRU of cache entries

use parking_lot::Mutex;
use shellstore::CacheKey;

use crate::entry::CacheEntry;
use crate::lru::LruCache;

/// Self-synchronized memory tier
///
/// Holds copies of disk entries; never performs I/O. Cloning an entry out is
/// cheap because bodies are reference-counted.
pub struct MemoryCache {
    lru: Mutex<LruCache<CacheKey, CacheEntry>>,
}

impl MemoryCache {
    /// Create a memory tier holding at most `capacity_bytes`
    pub fn new(capacity_bytes: usize) -> Self {
        Self {
            lru: Mutex::new(LruCache::new(capacity_bytes)),
        }
    }

    /// Look up an entry, marking it most recently used
    pub fn get(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.lru.lock().get(key).cloned()
    }

    /// Insert or replace an entry
    ///
    /// # Returns
    /// * `usize` - Number of entries evicted to make room
    pub fn put(&self, key: CacheKey, entry: CacheEntry) -> usize {
        self.lru.lock().put(key, entry)
    }

    /// Remove an entry
    pub fn remove(&self, key: &CacheKey) -> Option<CacheEntry> {
        self.lru.lock().remove(key)
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.lru.lock().clear();
    }

    /// Number of entries
    pub fn len(&self) -> usize {
        self.lru.lock().len()
    }

    /// Check if the tier is empty
    pub fn is_empty(&self) -> bool {
        self.lru.lock().is_empty()
    }

    /// Bytes currently held
    pub fn size_bytes(&self) -> usize {
        self.lru.lock().size()
    }

    /// Byte capacity
    pub fn capacity_bytes(&self) -> usize {
        self.lru.lock().capacity()
    }
}

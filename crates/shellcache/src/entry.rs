//! Cache entries and freshness classification

use std::time::{Duration, SystemTime};

use bytes::{Buf, Bytes};
use shellstore::{CacheKey, CacheMetadata, DiskEntry, Validators};

use crate::lru::Weighted;

/// Era of an entry relative to the configured windows
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Freshness {
    /// Serve as-is
    Fresh,
    /// Serve, and revalidate in the background
    Stale,
    /// Not servable
    Expired,
}

impl Freshness {
    /// Classify an entry stored at `stored_at`
    ///
    /// Boundaries are inclusive: an age of exactly `fresh` is still fresh and
    /// an age of exactly `fresh + stale` is still stale. An entry stored in
    /// the future counts as age zero.
    pub fn classify(
        stored_at: SystemTime,
        now: SystemTime,
        fresh: Duration,
        stale: Duration,
    ) -> Self {
        let age = now.duration_since(stored_at).unwrap_or(Duration::ZERO);
        if age <= fresh {
            Freshness::Fresh
        } else if age <= fresh.saturating_add(stale) {
            Freshness::Stale
        } else {
            Freshness::Expired
        }
    }

    /// Whether the entry may be returned to a caller
    pub fn is_servable(self) -> bool {
        !matches!(self, Freshness::Expired)
    }
}

/// A cached resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    /// Storage key
    pub key: CacheKey,
    /// URL the body came from
    pub url: String,
    /// Resource payload
    pub body: Bytes,
    /// MIME type without parameters
    pub mime_type: String,
    /// Character encoding
    pub encoding: String,
    /// Validators for conditional requests
    pub validators: Validators,
    /// When the entry was last confirmed fresh
    pub stored_at: SystemTime,
}

impl CacheEntry {
    /// Rebuild an entry read from the disk tier
    ///
    /// `url` is used when the sidecar did not record one.
    pub fn from_disk(disk: DiskEntry, url: &str) -> Self {
        let DiskEntry {
            key,
            body,
            metadata,
            stored_at,
            ..
        } = disk;
        let url = if metadata.url.is_empty() {
            url.to_string()
        } else {
            metadata.url
        };

        Self {
            key,
            url,
            body,
            mime_type: metadata.mime_type,
            encoding: metadata.encoding,
            validators: metadata.validators,
            stored_at,
        }
    }

    /// Sidecar record for this entry
    pub fn metadata(&self) -> CacheMetadata {
        CacheMetadata::new(&self.url, &self.mime_type, &self.encoding)
            .with_validators(self.validators.clone())
    }

    /// Same entry with a new `stored_at`
    pub fn with_stored_at(mut self, stored_at: SystemTime) -> Self {
        self.stored_at = stored_at;
        self
    }

    /// What the interception layer hands back to the web view
    pub fn response(&self) -> CacheResponse {
        CacheResponse {
            mime_type: self.mime_type.clone(),
            encoding: self.encoding.clone(),
            body: self.body.clone(),
        }
    }
}

impl Weighted for CacheEntry {
    fn weight(&self) -> usize {
        self.body.len()
            + self.url.len()
            + self.mime_type.len()
            + self.encoding.len()
            + self.validators.etag.as_ref().map_or(0, String::len)
            + self.validators.last_modified.as_ref().map_or(0, String::len)
    }
}

/// Response served from the cache
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheResponse {
    /// MIME type
    pub mime_type: String,
    /// Character encoding
    pub encoding: String,
    /// Payload
    pub body: Bytes,
}

impl CacheResponse {
    /// Stream the body
    pub fn body_reader(&self) -> bytes::buf::Reader<Bytes> {
        self.body.clone().reader()
    }
}

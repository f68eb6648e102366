//! Full fetches on a cache miss

use std::sync::Arc;

use shellstore::CacheKey;
use tracing::{debug, info};

use crate::clock::Clock;
use crate::entry::CacheEntry;
use crate::http::{FetchOutcome, HttpBackend};
use crate::request::RequestHeaders;
use crate::tiers::Tiers;

/// Downloads a resource and writes it through both tiers
pub(crate) struct Fetcher {
    http: HttpBackend,
    tiers: Arc<Tiers>,
    clock: Arc<dyn Clock>,
}

impl Fetcher {
    pub(crate) fn new(http: HttpBackend, tiers: Arc<Tiers>, clock: Arc<dyn Clock>) -> Self {
        Self { http, tiers, clock }
    }

    /// Fetch `url` unconditionally
    ///
    /// # Returns
    /// * `Some(entry)` - 200 with an acceptable body; returned even when the
    ///   disk write failed
    /// * `None` - Anything else; the caller falls back to the network
    pub(crate) async fn fetch(&self, url: &str, headers: &RequestHeaders) -> Option<CacheEntry> {
        let fetched = match self.http.get(url, headers, None).await {
            Ok(FetchOutcome::Fetched(fetched)) => fetched,
            Ok(FetchOutcome::NotModified(_)) => {
                self.tiers.reporter.record_fetch(false);
                return None;
            }
            Err(e) => {
                debug!(url, error = %e, "fetch failed");
                self.tiers.reporter.record_fetch(false);
                return None;
            }
        };

        let entry = fetched.into_entry(CacheKey::encode(url), url, self.clock.now());
        let stored = self.tiers.store(&entry);
        info!(
            url,
            bytes = entry.body.len(),
            mime = %entry.mime_type,
            stored,
            "fetched resource"
        );

        self.tiers.reporter.record_fetch(true);
        Some(entry)
    }
}

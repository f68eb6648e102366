//! Background conditional revalidation with per-key deduplication

use std::collections::HashSet;
use std::sync::Arc;

use ahash::RandomState;
use parking_lot::Mutex;
use shellstore::CacheKey;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::entry::CacheEntry;
use crate::http::{FetchOutcome, HttpBackend};
use crate::request::RequestHeaders;
use crate::tiers::Tiers;

type InFlightSet = Arc<Mutex<HashSet<CacheKey, RandomState>>>;

/// How a revalidation ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RevalidationOutcome {
    /// Another revalidation for the key was already running
    Skipped,
    /// Server answered 304; `stored_at` moved forward
    NotModified,
    /// Server answered 200; the entry was replaced
    Updated,
    /// Network error, other status, rejected body or local write failure
    Failed,
}

/// Marks a key as in flight until dropped
pub(crate) struct InFlightGuard {
    set: InFlightSet,
    key: CacheKey,
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.set.lock().remove(&self.key);
    }
}

/// Runs conditional GETs for stale entries
pub(crate) struct Revalidator {
    http: HttpBackend,
    tiers: Arc<Tiers>,
    clock: Arc<dyn Clock>,
    in_flight: InFlightSet,
}

impl Revalidator {
    pub(crate) fn new(http: HttpBackend, tiers: Arc<Tiers>, clock: Arc<dyn Clock>) -> Self {
        Self {
            http,
            tiers,
            clock,
            in_flight: Arc::new(Mutex::new(HashSet::default())),
        }
    }

    /// Claim `key`; `None` when a revalidation is already running
    pub(crate) fn try_begin(&self, key: &CacheKey) -> Option<InFlightGuard> {
        let mut set = self.in_flight.lock();
        if !set.insert(key.clone()) {
            return None;
        }
        Some(InFlightGuard {
            set: Arc::clone(&self.in_flight),
            key: key.clone(),
        })
    }

    pub(crate) fn in_flight_count(&self) -> usize {
        self.in_flight.lock().len()
    }

    /// Revalidate `current`, unless one is already running for its key
    pub(crate) async fn revalidate(
        &self,
        url: &str,
        headers: &RequestHeaders,
        current: CacheEntry,
    ) -> RevalidationOutcome {
        match self.try_begin(&current.key) {
            Some(guard) => self.run(guard, url, headers, current).await,
            None => {
                debug!(url, "revalidation already in flight");
                self.tiers
                    .reporter
                    .record_revalidation(RevalidationOutcome::Skipped);
                RevalidationOutcome::Skipped
            }
        }
    }

    /// Revalidate with the key already claimed
    ///
    /// The claim is released when this returns or the future is dropped.
    pub(crate) async fn run(
        &self,
        _guard: InFlightGuard,
        url: &str,
        headers: &RequestHeaders,
        current: CacheEntry,
    ) -> RevalidationOutcome {
        let outcome = match self.http.get(url, headers, Some(&current.validators)).await {
            Ok(FetchOutcome::NotModified(validators)) => {
                let stored_at = self.clock.now().max(current.stored_at);
                let merged = current.validators.merge(&validators);
                let changed = merged != current.validators;

                let mut refreshed = current.with_stored_at(stored_at);
                refreshed.validators = merged;

                if self.tiers.refresh(&refreshed, changed) {
                    debug!(url, "revalidated, not modified");
                    RevalidationOutcome::NotModified
                } else {
                    RevalidationOutcome::Failed
                }
            }
            Ok(FetchOutcome::Fetched(fetched)) => {
                let stored_at = self.clock.now().max(current.stored_at);
                let entry = fetched.into_entry(current.key, url, stored_at);

                if self.tiers.store(&entry) {
                    info!(url, bytes = entry.body.len(), "revalidated, updated");
                    RevalidationOutcome::Updated
                } else {
                    RevalidationOutcome::Failed
                }
            }
            Err(e) => {
                warn!(url, error = %e, "revalidation failed, keeping stale entry");
                RevalidationOutcome::Failed
            }
        };

        self.tiers.reporter.record_revalidation(outcome);
        outcome
    }
}

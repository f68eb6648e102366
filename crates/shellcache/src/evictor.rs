//! Disk housekeeping: expiry, size cap and orphaned files
//!
//! Age is measured from each body's modification time, which is the entry's
//! `stored_at`. The memory tier is never touched here; it drops expired
//! entries on its own read path.

use std::sync::Arc;
use std::time::{Duration, SystemTime};

use parking_lot::Mutex;
use shellstore::{DiskStore, StoredFile};
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::stats::CacheReporter;

/// Sidecars and temporaries younger than this may belong to a write in progress
pub const ORPHAN_GRACE: Duration = Duration::from_secs(5 * 60);

/// What one cleanup pass did
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Entries removed because they were past `fresh + stale`
    pub expired_removed: usize,
    /// Entries removed to get under the disk cap, oldest first
    pub trimmed_removed: usize,
    /// Orphaned sidecars and temporary files removed
    pub orphans_removed: usize,
    /// Disk usage before the pass
    pub bytes_before: u64,
    /// Disk usage after the pass
    pub bytes_after: u64,
}

impl CleanupReport {
    /// Entries removed by expiry and trimming
    pub fn entries_removed(&self) -> usize {
        self.expired_removed + self.trimmed_removed
    }
}

/// Enforces hard expiry and the disk cap
pub(crate) struct Evictor {
    disk: DiskStore,
    hard_expiry: Duration,
    disk_cap_bytes: u64,
    clock: Arc<dyn Clock>,
    reporter: Arc<dyn CacheReporter>,
    running: Mutex<()>,
}

impl Evictor {
    pub(crate) fn new(
        disk: DiskStore,
        hard_expiry: Duration,
        disk_cap_bytes: u64,
        clock: Arc<dyn Clock>,
        reporter: Arc<dyn CacheReporter>,
    ) -> Self {
        Self {
            disk,
            hard_expiry,
            disk_cap_bytes,
            clock,
            reporter,
            running: Mutex::new(()),
        }
    }

    /// Run one pass; concurrent callers wait for each other
    ///
    /// Failures on individual files are logged and skipped.
    pub(crate) fn cleanup(&self) -> CleanupReport {
        let _running = self.running.lock();

        let files = match self.disk.list_all_with_age() {
            Ok(files) => files,
            Err(e) => {
                warn!(error = %e, "cache cleanup could not list entries");
                return CleanupReport::default();
            }
        };
        self.sweep(files, self.clock.now())
    }

    /// Expire, trim and sweep orphans given a listing taken before `now`
    fn sweep(&self, files: Vec<StoredFile>, now: SystemTime) -> CleanupReport {
        let mut report = CleanupReport {
            bytes_before: files.iter().map(|f| f.size_bytes).sum(),
            ..CleanupReport::default()
        };
        let mut remaining = Vec::with_capacity(files.len());

        for file in files {
            if age(now, file.modified) > self.hard_expiry {
                match self.delete_if_unchanged(&file) {
                    Ok(Removal::Deleted) => {
                        report.expired_removed += 1;
                        continue;
                    }
                    Ok(Removal::Gone) => continue,
                    Ok(Removal::Refreshed) => {}
                    Err(e) => warn!(key = %file.key, error = %e, "failed to delete expired entry"),
                }
            }
            remaining.push(file);
        }

        let mut total: u64 = remaining.iter().map(|f| f.size_bytes).sum();
        if total > self.disk_cap_bytes {
            remaining.sort_by_key(|f| f.modified);
            for file in &remaining {
                if total <= self.disk_cap_bytes {
                    break;
                }
                match self.delete_if_unchanged(file) {
                    Ok(Removal::Deleted) => {
                        total -= file.size_bytes;
                        report.trimmed_removed += 1;
                    }
                    Ok(Removal::Gone) => total -= file.size_bytes,
                    Ok(Removal::Refreshed) => {}
                    Err(e) => warn!(key = %file.key, error = %e, "failed to trim entry"),
                }
            }
        }
        report.bytes_after = total;

        match self.disk.remove_orphans(ORPHAN_GRACE, now) {
            Ok(removed) => report.orphans_removed = removed,
            Err(e) => warn!(error = %e, "failed to remove orphaned cache files"),
        }

        if report.entries_removed() > 0 {
            self.reporter.record_evictions(report.entries_removed());
            info!(
                expired = report.expired_removed,
                trimmed = report.trimmed_removed,
                bytes_before = report.bytes_before,
                bytes_after = report.bytes_after,
                "cache cleanup finished"
            );
        } else {
            debug!(bytes = report.bytes_after, "cache cleanup found nothing to remove");
        }

        report
    }

    /// Delete a listed entry unless a write or a 304 moved its mtime since
    fn delete_if_unchanged(&self, file: &StoredFile) -> shellstore::Result<Removal> {
        match self.disk.modified(&file.key)? {
            None => Ok(Removal::Gone),
            Some(modified) if modified > file.modified => {
                debug!(key = %file.key, "entry refreshed during cleanup, keeping it");
                Ok(Removal::Refreshed)
            }
            Some(_) => {
                self.disk.delete(&file.key)?;
                Ok(Removal::Deleted)
            }
        }
    }
}

enum Removal {
    Deleted,
    Refreshed,
    Gone,
}

fn age(now: SystemTime, modified: SystemTime) -> Duration {
    now.duration_since(modified).unwrap_or(Duration::ZERO)
}

//! Command handler for the operator CLI

use std::fmt::Write as _;
use std::path::Path;
use std::time::SystemTime;

use anyhow::{bail, Context, Result};
use chrono::{DateTime, Utc};
use shellcache::{
    CacheEngine, CacheEntry, CleanupReport, Freshness, RequestHeaders, RevalidationOutcome,
};

pub struct CommandHandler {
    engine: CacheEngine,
}

impl CommandHandler {
    pub fn new(engine: CacheEngine) -> Self {
        Self { engine }
    }

    /// Serve `url` through the cache, fetching on a miss
    pub async fn get(&self, url: &str, headers: &[String], output: Option<&Path>) -> Result<String> {
        let headers = parse_headers(headers)?;
        let Some(entry) = self.engine.lookup_async(url, &headers).await else {
            bail!("{} is not available (fetch failed or response not cacheable)", url);
        };

        if let Some(output) = output {
            std::fs::write(output, &entry.body)
                .with_context(|| format!("failed to write {}", output.display()))?;
        }
        Ok(self.describe(&entry))
    }

    /// Inspect `url` without touching the network
    pub fn peek(&self, url: &str) -> String {
        match self.engine.lookup_sync(url) {
            Some(entry) => self.describe(&entry),
            None => format!("MISS {}", url),
        }
    }

    pub async fn revalidate(&self, url: &str) -> String {
        match self.engine.revalidate(url, &RequestHeaders::new()).await {
            Some(outcome) => format!("{} {}", outcome_label(outcome), url),
            None => format!("MISS {}", url),
        }
    }

    pub fn invalidate(&self, url: &str) -> String {
        self.engine.invalidate(url);
        format!("INVALIDATED {}", url)
    }

    /// One line per disk entry, oldest first
    pub fn list(&self) -> Result<String> {
        let disk = self.engine.disk();
        let mut files = disk.list_all_with_age().context("failed to list cache entries")?;
        files.sort_by_key(|f| f.modified);

        let mut out = String::new();
        for file in &files {
            let url = match disk.read(&file.key) {
                Ok(Some(entry)) => entry.metadata.url,
                _ => String::new(),
            };
            let freshness = Freshness::classify(
                file.modified,
                SystemTime::now(),
                self.engine.config().fresh_window,
                self.engine.config().stale_window,
            );
            writeln!(
                out,
                "{:?}  {:>10}  {}  {:<7}  {}",
                file.key,
                file.size_bytes,
                format_time(file.modified),
                format!("{:?}", freshness),
                url
            )?;
        }
        let total: u64 = files.iter().map(|f| f.size_bytes).sum();
        write!(out, "{} entries, {} bytes", files.len(), total)?;
        Ok(out)
    }

    pub fn cleanup(&self) -> String {
        format_report(&self.engine.cleanup())
    }

    pub fn clear(&self) -> String {
        format!("removed {} entries", self.engine.clear())
    }

    fn describe(&self, entry: &CacheEntry) -> String {
        format!(
            "{:?} {} {}; charset={} {} bytes, stored {}",
            self.engine.classify(entry),
            entry.url,
            entry.mime_type,
            entry.encoding,
            entry.body.len(),
            format_time(entry.stored_at)
        )
    }
}

/// Parse `Name: value` pairs
pub fn parse_headers(raw: &[String]) -> Result<RequestHeaders> {
    let mut headers = RequestHeaders::new();
    for header in raw {
        let Some((name, value)) = header.split_once(':') else {
            bail!("invalid header '{}', expected 'Name: value'", header);
        };
        let name = name.trim();
        if name.is_empty() {
            bail!("invalid header '{}', empty name", header);
        }
        headers.insert(name.to_string(), value.trim().to_string());
    }
    Ok(headers)
}

pub fn format_report(report: &CleanupReport) -> String {
    format!(
        "expired={} trimmed={} orphans={} bytes {} -> {}",
        report.expired_removed,
        report.trimmed_removed,
        report.orphans_removed,
        report.bytes_before,
        report.bytes_after
    )
}

fn outcome_label(outcome: RevalidationOutcome) -> &'static str {
    match outcome {
        RevalidationOutcome::Skipped => "SKIPPED",
        RevalidationOutcome::NotModified => "NOT_MODIFIED",
        RevalidationOutcome::Updated => "UPDATED",
        RevalidationOutcome::Failed => "FAILED",
    }
}

fn format_time(time: SystemTime) -> String {
    DateTime::<Utc>::from(time)
        .format("%Y-%m-%d %H:%M:%S")
        .to_string()
}

//! Engine configuration
//!
//! Supplied once at construction. Serializable so operators can keep it in
//! a JSON file; durations are written as whole seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Default fresh window (24 hours)
pub const DEFAULT_FRESH_WINDOW: Duration = Duration::from_secs(24 * 60 * 60);

/// Default stale window (1 hour)
pub const DEFAULT_STALE_WINDOW: Duration = Duration::from_secs(60 * 60);

/// Default disk cap (100 MiB)
pub const DEFAULT_DISK_CAP_BYTES: u64 = 100 * 1024 * 1024;

/// Default share of system memory given to the memory tier
pub const DEFAULT_MEMORY_FRACTION: f64 = 0.125;

/// Default connect and read timeout
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(15);

/// Memory tier size when the platform reports no memory figure (64 MiB)
const FALLBACK_MEMORY_BYTES: u64 = 64 * 1024 * 1024;

/// Cache engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Directory dedicated to cache files
    pub cache_dir: PathBuf,

    /// Age up to which an entry is served without revalidation
    #[serde(rename = "fresh_window_secs", with = "secs", default = "default_fresh_window")]
    pub fresh_window: Duration,

    /// Extra age during which an entry is served while revalidating
    #[serde(rename = "stale_window_secs", with = "secs", default = "default_stale_window")]
    pub stale_window: Duration,

    /// Upper bound for bodies plus sidecars on disk
    #[serde(default = "default_disk_cap_bytes")]
    pub disk_cap_bytes: u64,

    /// Fraction of total system memory for the memory tier
    #[serde(default = "default_memory_fraction")]
    pub memory_fraction: f64,

    /// Explicit memory tier size, overrides `memory_fraction`
    #[serde(default)]
    pub memory_capacity_bytes: Option<u64>,

    /// TCP/TLS connect timeout
    #[serde(rename = "connect_timeout_secs", with = "secs", default = "default_timeout")]
    pub connect_timeout: Duration,

    /// Time allowed for the response once connected
    #[serde(rename = "read_timeout_secs", with = "secs", default = "default_timeout")]
    pub read_timeout: Duration,

    /// User-Agent sent when the caller supplies none
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

impl CacheConfig {
    /// Configuration with defaults for everything but the directory
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        Self {
            cache_dir: cache_dir.into(),
            fresh_window: DEFAULT_FRESH_WINDOW,
            stale_window: DEFAULT_STALE_WINDOW,
            disk_cap_bytes: DEFAULT_DISK_CAP_BYTES,
            memory_fraction: DEFAULT_MEMORY_FRACTION,
            memory_capacity_bytes: None,
            connect_timeout: DEFAULT_TIMEOUT,
            read_timeout: DEFAULT_TIMEOUT,
            user_agent: default_user_agent(),
        }
    }

    /// Set the fresh window
    pub fn with_fresh_window(mut self, window: Duration) -> Self {
        self.fresh_window = window;
        self
    }

    /// Set the stale window
    pub fn with_stale_window(mut self, window: Duration) -> Self {
        self.stale_window = window;
        self
    }

    /// Set the disk cap
    pub fn with_disk_cap_bytes(mut self, bytes: u64) -> Self {
        self.disk_cap_bytes = bytes;
        self
    }

    /// Set the memory fraction
    pub fn with_memory_fraction(mut self, fraction: f64) -> Self {
        self.memory_fraction = fraction;
        self
    }

    /// Pin the memory tier to a fixed size
    pub fn with_memory_capacity_bytes(mut self, bytes: u64) -> Self {
        self.memory_capacity_bytes = Some(bytes);
        self
    }

    /// Set the connect timeout
    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Set the read timeout
    pub fn with_read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Set the default User-Agent
    pub fn with_user_agent(mut self, user_agent: impl Into<String>) -> Self {
        self.user_agent = user_agent.into();
        self
    }

    /// Directory dedicated to cache files
    pub fn cache_dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Age beyond which an entry is no longer servable
    pub fn hard_expiry(&self) -> Duration {
        self.fresh_window.saturating_add(self.stale_window)
    }

    /// Check the configuration for programmer errors
    pub fn validate(&self) -> Result<()> {
        if self.cache_dir.as_os_str().is_empty() {
            return Err(Error::Config("cache_dir must not be empty".into()));
        }
        if self.disk_cap_bytes == 0 {
            return Err(Error::Config("disk_cap_bytes must be greater than 0".into()));
        }
        if !(self.memory_fraction > 0.0 && self.memory_fraction <= 1.0) {
            return Err(Error::Config(format!(
                "memory_fraction must be in (0, 1], got {}",
                self.memory_fraction
            )));
        }
        if self.memory_capacity_bytes == Some(0) {
            return Err(Error::Config("memory_capacity_bytes must be greater than 0".into()));
        }
        if self.connect_timeout.is_zero() || self.read_timeout.is_zero() {
            return Err(Error::Config("timeouts must be greater than 0".into()));
        }
        Ok(())
    }

    /// Resolve the memory tier size in bytes
    pub fn memory_capacity(&self) -> usize {
        let bytes = match self.memory_capacity_bytes {
            Some(bytes) => bytes,
            None => {
                let total = total_memory_bytes();
                let total = if total == 0 { FALLBACK_MEMORY_BYTES } else { total };
                ((total as f64) * self.memory_fraction) as u64
            }
        };
        usize::try_from(bytes).unwrap_or(usize::MAX).max(1)
    }
}

fn total_memory_bytes() -> u64 {
    let mut system = sysinfo::System::new();
    system.refresh_memory();
    system.total_memory()
}

fn default_fresh_window() -> Duration {
    DEFAULT_FRESH_WINDOW
}

fn default_stale_window() -> Duration {
    DEFAULT_STALE_WINDOW
}

fn default_disk_cap_bytes() -> u64 {
    DEFAULT_DISK_CAP_BYTES
}

fn default_memory_fraction() -> f64 {
    DEFAULT_MEMORY_FRACTION
}

fn default_timeout() -> Duration {
    DEFAULT_TIMEOUT
}

fn default_user_agent() -> String {
    format!("shellcache/{}", env!("CARGO_PKG_VERSION"))
}

/// Durations as whole seconds
mod secs {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(value: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        u64::deserialize(deserializer).map(Duration::from_secs)
    }
}

//! Error types for shellcache
//!
//! Only construction can fail. Lookups, fetches, revalidations and cleanup
//! absorb their failures and degrade to "no cache".

/// Result type alias for shellcache construction
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while building a cache engine
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Configuration rejected by validation
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Cache directory could not be prepared
    #[error("Disk store error: {0}")]
    Store(#[from] shellstore::Error),

    /// HTTP client could not be built
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),
}

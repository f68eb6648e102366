//! # shellstore
//!
//! Durable tier of the embedded web shell resource cache.
//!
//! ## Layout
//! - **Keys**: hex SHA-256 of the request URL, used as file name stems
//! - **Bodies**: one `<key>.body` file per entry, mtime = last confirmed fresh
//! - **Sidecars**: one `<key>.meta` file per entry, versioned line format
//!
//! No index is kept; everything is derived from the directory listing.

#![warn(missing_docs)]

mod error;
mod key;
mod metadata;
mod store;

pub use error::{Error, Result};
pub use key::{CacheKey, KEY_LEN};
pub use metadata::{
    body_digest, CacheMetadata, Validators, DEFAULT_ENCODING, DEFAULT_MIME_TYPE, META_VERSION,
};
pub use store::{DiskEntry, DiskStore, StoredFile};

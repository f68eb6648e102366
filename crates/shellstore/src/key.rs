//! Cache key derivation
//!
//! A key is the lowercase hex SHA-256 of the request URL. Keys double as
//! file name stems in the store directory.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Length of a key in hex characters
pub const KEY_LEN: usize = 64;

/// Stable storage key derived from a URL
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive the key for a URL
    ///
    /// Deterministic across calls and processes; never fails.
    pub fn encode(url: &str) -> Self {
        let digest = Sha256::digest(url.as_bytes());
        CacheKey(hex::encode(digest))
    }

    /// Parse a key previously produced by [`CacheKey::encode`]
    ///
    /// # Arguments
    /// * `s` - 64 lowercase hex characters
    pub fn parse(s: &str) -> Result<Self> {
        let valid = s.len() == KEY_LEN
            && s
                .bytes()
                .all(|b| b.is_ascii_digit() || (b'a'..=b'f').contains(&b));
        if valid {
            Ok(CacheKey(s.to_string()))
        } else {
            Err(Error::InvalidKey(s.to_string()))
        }
    }

    /// Hex representation
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for CacheKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short prefix keeps log lines readable
        write!(f, "CacheKey({})", &self.0[..12])
    }
}

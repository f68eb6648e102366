//! Error types for shellstore

use std::io;

use crate::key::CacheKey;

/// Result type alias for shellstore operations
pub type Result<T> = std::result::Result<T, Error>;

/// Error types for disk store operations
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Metadata sidecar could not be parsed
    #[error("Parse error: {0}")]
    Parse(String),

    /// No body file exists for the key
    #[error("Entry not found: {0}")]
    NotFound(CacheKey),

    /// The body on disk is not the one its sidecar was written for
    #[error("Body does not match its sidecar: {0}")]
    Mismatch(CacheKey),

    /// A string is not a valid cache key
    #[error("Invalid cache key: {0:?}")]
    InvalidKey(String),
}

impl Error {
    /// Whether this error means the entry simply is not there
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::NotFound(_) => true,
            Error::Io(e) => e.kind() == io::ErrorKind::NotFound,
            _ => false,
        }
    }
}

impl From<nom::Err<nom::error::Error<&[u8]>>> for Error {
    fn from(err: nom::Err<nom::error::Error<&[u8]>>) -> Self {
        let detail = match err {
            nom::Err::Incomplete(_) => "unexpected end of input".to_string(),
            nom::Err::Error(e) | nom::Err::Failure(e) => {
                format!("{:?} with {} bytes remaining", e.code, e.input.len())
            }
        };
        Error::Parse(detail)
    }
}

//! Metadata sidecar format using nom
//!
//! Each cached body has a `<key>.meta` sidecar next to it:
//! ```text
//! SHELLMETA 1
//! url: https://a.test/app.js
//! mime-type: text/javascript
//! encoding: utf-8
//! etag: "abc123"
//! last-modified: Wed, 21 Oct 2015 07:28:00 GMT
//! content-length: 5120
//! body-sha256: 9f86d081884c7d659a2feaa0c55ad015a3bf4f1b2b0b822cd15d6c15b0f00a08
//! ```
//!
//! Optional fields are omitted when absent. Readers skip fields they do not
//! know, so new fields can be added without a version bump. A version newer
//! than [`META_VERSION`] is rejected.

use nom::{
    bytes::complete::{tag, take_while, take_while1},
    character::complete::{char, digit1, space0},
    combinator::{all_consuming, map_res},
    multi::many0,
    sequence::{delimited, pair, separated_pair, terminated},
    IResult,
};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// Magic prefix of the sidecar header line
pub const META_MAGIC: &[u8] = b"SHELLMETA ";

/// Sidecar format version written by this crate
pub const META_VERSION: u32 = 1;

/// MIME type used when nothing better is known
pub const DEFAULT_MIME_TYPE: &str = "application/octet-stream";

/// Encoding used when nothing better is known
pub const DEFAULT_ENCODING: &str = "utf-8";

/// HTTP validators used for conditional requests
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Validators {
    /// `ETag` response header
    pub etag: Option<String>,
    /// `Last-Modified` response header
    pub last_modified: Option<String>,
}

impl Validators {
    /// Create validators from optional header values
    pub fn new(etag: Option<String>, last_modified: Option<String>) -> Self {
        Self {
            etag,
            last_modified,
        }
    }

    /// True when neither validator is present
    pub fn is_empty(&self) -> bool {
        self.etag.is_none() && self.last_modified.is_none()
    }

    /// Combine with validators from a newer response, preferring the newer ones
    pub fn merge(&self, newer: &Validators) -> Validators {
        Validators {
            etag: newer.etag.clone().or_else(|| self.etag.clone()),
            last_modified: newer
                .last_modified
                .clone()
                .or_else(|| self.last_modified.clone()),
        }
    }
}

/// Per-entry metadata persisted next to the body
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheMetadata {
    /// URL the body was fetched from
    pub url: String,
    /// MIME type without parameters
    pub mime_type: String,
    /// Character encoding
    pub encoding: String,
    /// Validators for revalidation
    pub validators: Validators,
    /// Body length recorded by the store at write time
    pub content_length: Option<u64>,
    /// Hex SHA-256 of the body recorded by the store at write time
    pub body_sha256: Option<String>,
}

impl Default for CacheMetadata {
    fn default() -> Self {
        Self {
            url: String::new(),
            mime_type: DEFAULT_MIME_TYPE.to_string(),
            encoding: DEFAULT_ENCODING.to_string(),
            validators: Validators::default(),
            content_length: None,
            body_sha256: None,
        }
    }
}

impl CacheMetadata {
    /// Create metadata for a URL
    pub fn new(url: impl Into<String>, mime_type: impl Into<String>, encoding: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            mime_type: mime_type.into(),
            encoding: encoding.into(),
            validators: Validators::default(),
            content_length: None,
            body_sha256: None,
        }
    }

    /// Attach validators
    pub fn with_validators(mut self, validators: Validators) -> Self {
        self.validators = validators;
        self
    }

    /// Record the length and digest of the body this sidecar describes
    pub fn with_body(mut self, body: &[u8]) -> Self {
        self.content_length = Some(body.len() as u64);
        self.body_sha256 = Some(body_digest(body));
        self
    }

    /// Whether `body` is the one this sidecar was written for
    ///
    /// Sidecars without a recorded length or digest accept any body.
    pub fn describes(&self, body: &[u8]) -> bool {
        if self.content_length.is_some_and(|len| len != body.len() as u64) {
            return false;
        }
        match &self.body_sha256 {
            Some(digest) => *digest == body_digest(body),
            None => true,
        }
    }

    /// Serialize to the sidecar format
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(128);
        out.extend_from_slice(META_MAGIC);
        out.extend_from_slice(META_VERSION.to_string().as_bytes());
        out.push(b'\n');

        push_field(&mut out, "url", &self.url);
        push_field(&mut out, "mime-type", &self.mime_type);
        push_field(&mut out, "encoding", &self.encoding);
        if let Some(etag) = &self.validators.etag {
            push_field(&mut out, "etag", etag);
        }
        if let Some(last_modified) = &self.validators.last_modified {
            push_field(&mut out, "last-modified", last_modified);
        }
        if let Some(len) = self.content_length {
            push_field(&mut out, "content-length", &len.to_string());
        }
        if let Some(digest) = &self.body_sha256 {
            push_field(&mut out, "body-sha256", digest);
        }
        out
    }

    /// Parse a sidecar
    ///
    /// # Returns
    /// * `Result<CacheMetadata>` - Error on malformed input or unsupported version
    pub fn decode(input: &[u8]) -> Result<Self> {
        let (_, (version, fields)) = all_consuming(pair(parse_header, many0(parse_field)))(input)?;

        if version == 0 || version > META_VERSION {
            return Err(Error::Parse(format!(
                "unsupported metadata version {}",
                version
            )));
        }

        let mut meta = CacheMetadata::default();
        for (name, value) in fields {
            if value.is_empty() {
                continue;
            }
            let value = String::from_utf8_lossy(value).into_owned();
            match name {
                b"url" => meta.url = value,
                b"mime-type" => meta.mime_type = value,
                b"encoding" => meta.encoding = value,
                b"etag" => meta.validators.etag = Some(value),
                b"last-modified" => meta.validators.last_modified = Some(value),
                b"content-length" => {
                    let len = value
                        .parse::<u64>()
                        .map_err(|_| Error::Parse(format!("invalid content-length {:?}", value)))?;
                    meta.content_length = Some(len);
                }
                b"body-sha256" => meta.body_sha256 = Some(value.to_ascii_lowercase()),
                _ => {} // written by a newer release
            }
        }

        Ok(meta)
    }

    /// Parse a sidecar, falling back to [`CacheMetadata::default`] on any error
    pub fn decode_or_default(input: &[u8]) -> Self {
        match Self::decode(input) {
            Ok(meta) => meta,
            Err(e) => {
                tracing::warn!(error = %e, "unreadable metadata sidecar, using defaults");
                Self::default()
            }
        }
    }
}

/// Lowercase hex SHA-256 of a body
pub fn body_digest(body: &[u8]) -> String {
    hex::encode(Sha256::digest(body))
}

fn push_field(out: &mut Vec<u8>, name: &str, value: &str) {
    if value.is_empty() {
        return;
    }
    out.extend_from_slice(name.as_bytes());
    out.extend_from_slice(b": ");
    // Line breaks would end the field early
    out.extend(value.bytes().filter(|&b| b != b'\r' && b != b'\n'));
    out.push(b'\n');
}

/// Parse the `SHELLMETA <version>` line
fn parse_header(input: &[u8]) -> IResult<&[u8], u32> {
    delimited(
        tag(META_MAGIC),
        map_res(digit1, |digits: &[u8]| {
            std::str::from_utf8(digits)
                .map_err(|_| ())
                .and_then(|s| s.parse::<u32>().map_err(|_| ()))
        }),
        char('\n'),
    )(input)
}

/// Parse one `name: value` line
fn parse_field(input: &[u8]) -> IResult<&[u8], (&[u8], &[u8])> {
    terminated(
        separated_pair(
            take_while1(|b: u8| b.is_ascii_alphanumeric() || b == b'-'),
            pair(char(':'), space0),
            take_while(|b: u8| b != b'\n'),
        ),
        char('\n'),
    )(input)
}

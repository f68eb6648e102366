//! HTTP layer: request building, status mapping and body validation.
//!
//! This is the only place that interprets status codes. The fetcher and the
//! revalidator only see a [`FetchOutcome`] or a [`FetchError`].

use std::time::SystemTime;

use bytes::Bytes;
use reqwest::header::{
    HeaderMap, HeaderName, HeaderValue, CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH,
    LAST_MODIFIED, USER_AGENT,
};
use reqwest::StatusCode;
use shellstore::{CacheKey, Validators, DEFAULT_ENCODING, DEFAULT_MIME_TYPE};
use tracing::debug;

use crate::config::CacheConfig;
use crate::entry::CacheEntry;
use crate::error::Result;
use crate::request::RequestHeaders;

/// Request headers the engine owns or that make no sense to forward
const SKIPPED_HEADERS: &[&str] = &[
    "connection",
    "content-length",
    "host",
    "if-modified-since",
    "if-none-match",
    "if-range",
    "keep-alive",
    "proxy-connection",
    "range",
    "te",
    "trailer",
    "transfer-encoding",
    "upgrade",
];

/// Outcome of a GET that reached the server
#[derive(Debug)]
pub(crate) enum FetchOutcome {
    /// 304 to a conditional request, with any validators it carried
    NotModified(Validators),
    /// 200 with a body fit for caching
    Fetched(FetchedBody),
}

/// A validated 200 response
#[derive(Debug)]
pub(crate) struct FetchedBody {
    pub body: Bytes,
    pub mime_type: String,
    pub encoding: String,
    pub validators: Validators,
}

impl FetchedBody {
    pub(crate) fn into_entry(self, key: CacheKey, url: &str, stored_at: SystemTime) -> CacheEntry {
        CacheEntry {
            key,
            url: url.to_string(),
            body: self.body,
            mime_type: self.mime_type,
            encoding: self.encoding,
            validators: self.validators,
            stored_at,
        }
    }
}

/// Why a GET produced nothing cacheable
#[derive(Debug, thiserror::Error)]
pub(crate) enum FetchError {
    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("response rejected: {0}")]
    Rejected(&'static str),
}

/// HTTP backend shared by the fetcher and the revalidator
#[derive(Debug, Clone)]
pub(crate) struct HttpBackend {
    client: reqwest::Client,
    user_agent: String,
}

impl HttpBackend {
    pub(crate) fn new(config: &CacheConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .connect_timeout(config.connect_timeout)
            // Per read, so a slow but steady download is not cut off
            .read_timeout(config.read_timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()?;

        Ok(Self {
            client,
            user_agent: config.user_agent.clone(),
        })
    }

    /// GET `url`, conditionally when `validators` is given
    ///
    /// 304 is only accepted for conditional requests; every status other
    /// than 200/304 is an error.
    pub(crate) async fn get(
        &self,
        url: &str,
        headers: &RequestHeaders,
        validators: Option<&Validators>,
    ) -> std::result::Result<FetchOutcome, FetchError> {
        let forwarded = forwarded_headers(headers);
        let has_user_agent = forwarded.contains_key(USER_AGENT);
        let mut request = self.client.get(url).headers(forwarded);

        if !has_user_agent {
            request = request.header(USER_AGENT, self.user_agent.as_str());
        }

        if let Some(validators) = validators {
            if let Some(etag) = &validators.etag {
                request = request.header(IF_NONE_MATCH, etag.as_str());
            }
            if let Some(last_modified) = &validators.last_modified {
                request = request.header(IF_MODIFIED_SINCE, last_modified.as_str());
            }
        }

        let response = request.send().await?;
        let status = response.status();

        if status == StatusCode::NOT_MODIFIED && validators.is_some() {
            debug!(url, "not modified (304)");
            return Ok(FetchOutcome::NotModified(validators_from(response.headers())));
        }
        if status != StatusCode::OK {
            return Err(FetchError::Status(status.as_u16()));
        }

        let validators = validators_from(response.headers());
        let (mime_type, encoding) = match response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
        {
            Some(content_type) => parse_content_type(content_type),
            None => (guess_mime_type(url).to_string(), DEFAULT_ENCODING.to_string()),
        };

        let body = response.bytes().await?;
        validate_body(&body, &mime_type)?;

        Ok(FetchOutcome::Fetched(FetchedBody {
            body,
            mime_type,
            encoding,
            validators,
        }))
    }
}

/// Copy caller headers that are safe to forward
fn forwarded_headers(headers: &RequestHeaders) -> HeaderMap {
    let mut map = HeaderMap::with_capacity(headers.len());

    for (name, value) in headers {
        if SKIPPED_HEADERS
            .iter()
            .any(|skipped| name.eq_ignore_ascii_case(skipped))
        {
            continue;
        }
        match (
            HeaderName::from_bytes(name.as_bytes()),
            HeaderValue::from_str(value),
        ) {
            (Ok(name), Ok(value)) => {
                map.insert(name, value);
            }
            _ => debug!(header = %name, "dropping malformed request header"),
        }
    }

    map
}

fn validators_from(headers: &HeaderMap) -> Validators {
    let get = |name: HeaderName| {
        headers
            .get(name)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
    };
    Validators::new(get(ETAG), get(LAST_MODIFIED))
}

/// Split `type/subtype; charset=x` into a MIME type and an encoding
pub(crate) fn parse_content_type(content_type: &str) -> (String, String) {
    let mut parts = content_type.split(';');
    let mime_type = parts
        .next()
        .map(|m| m.trim().to_ascii_lowercase())
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_MIME_TYPE.to_string());

    let encoding = parts
        .filter_map(|param| param.split_once('='))
        .find(|(name, _)| name.trim().eq_ignore_ascii_case("charset"))
        .map(|(_, value)| value.trim().trim_matches('"').to_ascii_lowercase())
        .filter(|value| !value.is_empty())
        .unwrap_or_else(|| DEFAULT_ENCODING.to_string());

    (mime_type, encoding)
}

/// MIME type from the URL path extension
pub(crate) fn guess_mime_type(url: &str) -> &'static str {
    let extension = reqwest::Url::parse(url).ok().and_then(|parsed| {
        let path = parsed.path();
        let file = path.rsplit('/').next().unwrap_or(path);
        file.rsplit_once('.').map(|(_, ext)| ext.to_ascii_lowercase())
    });

    match extension.as_deref() {
        Some("js") | Some("mjs") => "application/javascript",
        Some("css") => "text/css",
        Some("html") | Some("htm") => "text/html",
        Some("json") | Some("map") => "application/json",
        Some("xml") => "application/xml",
        Some("txt") => "text/plain",
        Some("svg") => "image/svg+xml",
        Some("png") => "image/png",
        Some("jpg") | Some("jpeg") => "image/jpeg",
        Some("gif") => "image/gif",
        Some("webp") => "image/webp",
        Some("ico") => "image/x-icon",
        Some("woff") => "font/woff",
        Some("woff2") => "font/woff2",
        Some("ttf") => "font/ttf",
        Some("otf") => "font/otf",
        Some("wasm") => "application/wasm",
        _ => DEFAULT_MIME_TYPE,
    }
}

/// Whether blank bodies of this type are suspect
pub(crate) fn is_textual(mime_type: &str) -> bool {
    mime_type.starts_with("text/")
        || mime_type.contains("javascript")
        || mime_type.contains("json")
        || mime_type.contains("xml")
}

/// Reject bodies that would poison the cache
pub(crate) fn validate_body(body: &[u8], mime_type: &str) -> std::result::Result<(), FetchError> {
    if body.is_empty() {
        return Err(FetchError::Rejected("empty body"));
    }
    if is_textual(mime_type) && body.iter().all(u8::is_ascii_whitespace) {
        return Err(FetchError::Rejected("blank textual body"));
    }
    Ok(())
}

//! Requests handed over by the interception layer

use std::collections::HashMap;

/// Request headers as the interception layer sees them
pub type RequestHeaders = HashMap<String, String>;

/// One intercepted request that already passed the cacheability policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InterceptedRequest {
    /// Absolute URL
    pub url: String,
    /// Request headers
    pub headers: RequestHeaders,
    /// HTTP method
    pub method: String,
}

impl InterceptedRequest {
    /// A GET request without headers
    pub fn get(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            headers: RequestHeaders::new(),
            method: "GET".to_string(),
        }
    }

    /// Add a header
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    /// Only GET requests are served from the cache
    pub fn is_get(&self) -> bool {
        self.method.eq_ignore_ascii_case("GET")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_method_check() {
        assert!(InterceptedRequest::get("https://a.test/").is_get());

        let mut post = InterceptedRequest::get("https://a.test/");
        post.method = "POST".into();
        assert!(!post.is_get());

        let mut lower = InterceptedRequest::get("https://a.test/");
        lower.method = "get".into();
        assert!(lower.is_get());
    }

    #[test]
    fn test_with_header() {
        let req = InterceptedRequest::get("https://a.test/").with_header("Accept", "text/css");
        assert_eq!(req.headers.get("Accept").map(String::as_str), Some("text/css"));
    }
}

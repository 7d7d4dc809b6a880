//! Cache debugging headers.

use serde::{Deserialize, Serialize};

use crate::key::CacheKey;

/// Header names for cache debugging.
pub mod header_names {
    /// Cache status header (HIT, MISS, BYPASS).
    pub const X_CACHE_STATUS: &str = "X-Cache-Status";
    /// Digest of the cache key used for lookup.
    pub const X_CACHE_KEY: &str = "X-Cache-Key";
    /// Request ID for tracing.
    pub const X_REQUEST_ID: &str = "X-Request-ID";
}

/// How a request was served with respect to the page cache.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheStatus {
    /// Served from a stored page or by joining an in-flight render.
    Hit,
    /// This request started the render.
    Miss,
    /// The cache was not consulted.
    Bypass,
}

impl std::fmt::Display for CacheStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Hit => write!(f, "HIT"),
            Self::Miss => write!(f, "MISS"),
            Self::Bypass => write!(f, "BYPASS"),
        }
    }
}

/// Cache explain headers for debugging.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CacheExplainHeaders {
    /// Overall cache status.
    pub status: Option<CacheStatus>,
    /// Digest of the cache key used.
    pub key_digest: Option<String>,
    /// Request ID.
    pub request_id: Option<String>,
}

impl CacheExplainHeaders {
    /// Create new explain headers.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set cache status.
    pub fn with_status(mut self, status: CacheStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Set cache key. Only the digest is exposed.
    pub fn with_key(mut self, key: &CacheKey) -> Self {
        self.key_digest = Some(key.digest());
        self
    }

    /// Set request ID.
    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    /// Convert to HTTP headers.
    pub fn to_headers(&self) -> Vec<(String, String)> {
        let mut headers = Vec::new();

        if let Some(status) = &self.status {
            headers.push((header_names::X_CACHE_STATUS.to_string(), status.to_string()));
        }

        if let Some(digest) = &self.key_digest {
            headers.push((header_names::X_CACHE_KEY.to_string(), digest.clone()));
        }

        if let Some(request_id) = &self.request_id {
            headers.push((header_names::X_REQUEST_ID.to_string(), request_id.clone()));
        }

        headers
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_display() {
        assert_eq!(CacheStatus::Hit.to_string(), "HIT");
        assert_eq!(CacheStatus::Miss.to_string(), "MISS");
        assert_eq!(CacheStatus::Bypass.to_string(), "BYPASS");
    }

    #[test]
    fn test_to_headers() {
        let key = CacheKey::new("/posts/1");
        let headers = CacheExplainHeaders::new()
            .with_status(CacheStatus::Miss)
            .with_key(&key)
            .to_headers();

        assert_eq!(headers.len(), 2);
        assert_eq!(headers[0], ("X-Cache-Status".to_string(), "MISS".to_string()));
        assert_eq!(headers[1], ("X-Cache-Key".to_string(), key.digest()));
    }

    #[test]
    fn test_bypass_has_no_key() {
        let headers = CacheExplainHeaders::new()
            .with_status(CacheStatus::Bypass)
            .with_request_id("req-1")
            .to_headers();

        assert!(headers.iter().all(|(name, _)| name != "X-Cache-Key"));
        assert!(headers.contains(&("X-Request-ID".to_string(), "req-1".to_string())));
    }
}

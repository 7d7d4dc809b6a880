//! Inbound page request.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

use http::Method;

/// Unique request identifier for log correlation.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RequestId(pub String);

static REQUEST_SEQ: AtomicU64 = AtomicU64::new(1);

impl RequestId {
    /// Generate a new request ID.
    pub fn generate() -> Self {
        let nanos = std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap_or_default()
            .as_nanos();
        let seq = REQUEST_SEQ.fetch_add(1, Ordering::Relaxed);
        Self(format!("{:x}-{:x}", nanos, seq))
    }

    /// Create from an existing ID string.
    pub fn from_string(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the ID as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for RequestId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Query string parameters, sorted by name.
pub type QueryParams = BTreeMap<String, String>;

/// HTTP headers keyed by lower-cased name.
pub type Headers = BTreeMap<String, String>;

/// Cookies parsed from the `cookie` header.
pub type Cookies = BTreeMap<String, String>;

/// An inbound page request.
///
/// Built once per HTTP request through [`RenderRequestBuilder`] and never
/// mutated afterwards. Cloning is cheap enough to hand a copy to a spawned
/// render task.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    request_id: RequestId,
    method: Method,
    path: String,
    query: QueryParams,
    headers: Headers,
    cookies: Cookies,
}

impl RenderRequest {
    /// Start building a request for the given target (`/path?query`).
    pub fn builder(target: impl AsRef<str>) -> RenderRequestBuilder {
        RenderRequestBuilder::new(target)
    }

    /// Build a plain `GET` request with no headers.
    pub fn get(target: impl AsRef<str>) -> Self {
        Self::builder(target).build()
    }

    /// Request identifier.
    pub fn request_id(&self) -> &RequestId {
        &self.request_id
    }

    /// HTTP method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Request path without the query string.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// All query parameters.
    pub fn query(&self) -> &QueryParams {
        &self.query
    }

    /// Get a query parameter by name.
    pub fn query_param(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(|s| s.as_str())
    }

    /// All headers, keyed by lower-cased name.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Get a header value by name (case-insensitive).
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .get(&name.to_ascii_lowercase())
            .map(|s| s.as_str())
    }

    /// All cookies.
    pub fn cookies(&self) -> &Cookies {
        &self.cookies
    }

    /// Get a cookie value by name.
    pub fn cookie(&self, name: &str) -> Option<&str> {
        self.cookies.get(name).map(|s| s.as_str())
    }

    /// Path plus the canonical (sorted) query string.
    pub fn url(&self) -> String {
        if self.query.is_empty() {
            return self.path.clone();
        }
        let query: Vec<String> = self
            .query
            .iter()
            .map(|(k, v)| {
                if v.is_empty() {
                    k.clone()
                } else {
                    format!("{}={}", k, v)
                }
            })
            .collect();
        format!("{}?{}", self.path, query.join("&"))
    }
}

/// Builder for [`RenderRequest`].
#[derive(Debug)]
pub struct RenderRequestBuilder {
    request_id: Option<RequestId>,
    method: Method,
    path: String,
    query: QueryParams,
    headers: Headers,
}

impl RenderRequestBuilder {
    /// Create a builder from a request target.
    pub fn new(target: impl AsRef<str>) -> Self {
        let (path, query) = split_target(target.as_ref());
        Self {
            request_id: None,
            method: Method::GET,
            path,
            query,
            headers: Headers::new(),
        }
    }

    /// Set the HTTP method.
    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    /// Use an existing request ID instead of generating one.
    pub fn request_id(mut self, id: RequestId) -> Self {
        self.request_id = Some(id);
        self
    }

    /// Add a header. Repeated names are joined with `, ` (`; ` for cookies).
    pub fn header(mut self, name: impl AsRef<str>, value: impl Into<String>) -> Self {
        let name = name.as_ref().to_ascii_lowercase();
        let value = value.into();
        let separator = if name == "cookie" { "; " } else { ", " };
        self.headers
            .entry(name)
            .and_modify(|existing| {
                existing.push_str(separator);
                existing.push_str(&value);
            })
            .or_insert(value);
        self
    }

    /// Finish the request.
    pub fn build(self) -> RenderRequest {
        let cookies = self
            .headers
            .get("cookie")
            .map(|raw| parse_cookies(raw))
            .unwrap_or_default();

        RenderRequest {
            request_id: self.request_id.unwrap_or_else(RequestId::generate),
            method: self.method,
            path: self.path,
            query: self.query,
            headers: self.headers,
            cookies,
        }
    }
}

fn split_target(target: &str) -> (String, QueryParams) {
    let target = target.split('#').next().unwrap_or_default();
    let (path, query_string) = match target.split_once('?') {
        Some((path, query)) => (path, query),
        None => (target, ""),
    };

    let path = if path.is_empty() { "/" } else { path };

    let query = query_string
        .split('&')
        .filter(|pair| !pair.is_empty())
        .map(|pair| match pair.split_once('=') {
            Some((k, v)) => (k.to_string(), v.to_string()),
            None => (pair.to_string(), String::new()),
        })
        .collect();

    (path.to_string(), query)
}

fn parse_cookies(raw: &str) -> Cookies {
    raw.split(';')
        .filter_map(|pair| {
            let (name, value) = pair.trim().split_once('=')?;
            let name = name.trim();
            if name.is_empty() {
                return None;
            }
            Some((name.to_string(), value.trim().trim_matches('"').to_string()))
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_path_and_query() {
        let req = RenderRequest::get("/posts/1?sort=new&page=2");

        assert_eq!(req.path(), "/posts/1");
        assert_eq!(req.query_param("sort"), Some("new"));
        assert_eq!(req.query_param("page"), Some("2"));
        assert_eq!(req.url(), "/posts/1?page=2&sort=new");
    }

    #[test]
    fn test_empty_target_is_root() {
        let req = RenderRequest::get("?a=1");
        assert_eq!(req.path(), "/");
    }

    #[test]
    fn test_fragment_is_dropped() {
        let req = RenderRequest::get("/posts/1#comments");
        assert_eq!(req.url(), "/posts/1");
    }

    #[test]
    fn test_header_lookup_is_case_insensitive() {
        let req = RenderRequest::builder("/")
            .header("Accept-Language", "en-US")
            .build();

        assert_eq!(req.header("accept-language"), Some("en-US"));
        assert_eq!(req.header("ACCEPT-LANGUAGE"), Some("en-US"));
    }

    #[test]
    fn test_cookies_parsed_from_header() {
        let req = RenderRequest::builder("/")
            .header("Cookie", "loginToken=abc; theme=\"dark\"")
            .header("cookie", "a=1")
            .build();

        assert_eq!(req.cookie("loginToken"), Some("abc"));
        assert_eq!(req.cookie("theme"), Some("dark"));
        assert_eq!(req.cookie("a"), Some("1"));
    }

    #[test]
    fn test_request_ids_are_unique() {
        let a = RequestId::generate();
        let b = RequestId::generate();
        assert_ne!(a, b);
    }
}

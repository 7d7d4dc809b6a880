//! Cache key composition.

use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use ssr_core::{CacheConfig, QueryKeyword, QueryParamSelection, RenderRequest};

/// A cache key uniquely identifying a cached page.
///
/// Two requests producing the same key are served the same render, so every
/// request dimension that changes output must be a key component.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheKey {
    /// The canonical key string.
    key: String,
    /// Route path, when the key includes it.
    #[serde(skip_serializing_if = "Option::is_none")]
    route: Option<String>,
}

impl CacheKey {
    /// Create a cache key from a string.
    pub fn new(key: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            route: None,
        }
    }

    /// Get the key string.
    pub fn as_str(&self) -> &str {
        &self.key
    }

    /// Route path the key was built for.
    pub fn route(&self) -> Option<&str> {
        self.route.as_deref()
    }

    /// Short stable hash of the key, for headers and logs.
    pub fn digest(&self) -> String {
        let mut hasher = std::collections::hash_map::DefaultHasher::new();
        self.key.hash(&mut hasher);
        format!("{:016x}", hasher.finish())
    }
}

impl PartialEq for CacheKey {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for CacheKey {}

impl Hash for CacheKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key.hash(state);
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.key)
    }
}

/// Component of a cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum KeyComponent {
    /// The route path.
    Route,
    /// Specific query parameters.
    QueryParams(Vec<String>),
    /// All query parameters.
    AllQueryParams,
    /// Specific header.
    Header(String),
    /// Specific cookie.
    Cookie(String),
    /// Custom static value (e.g. a deploy or A/B cohort tag).
    Custom(String),
}

/// Builder for composing cache keys.
#[derive(Debug, Clone, Default)]
pub struct CacheKeyBuilder {
    components: Vec<KeyComponent>,
    prefix: Option<String>,
}

impl CacheKeyBuilder {
    /// Create a new cache key builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder matching a cache config: route, the selected query
    /// parameters, then vary headers and cookies.
    pub fn from_config(config: &CacheConfig) -> Self {
        let mut builder = Self::new().route();

        builder = match &config.query_params {
            QueryParamSelection::Keyword(QueryKeyword::All) => builder.all_query_params(),
            QueryParamSelection::Keyword(QueryKeyword::None) => builder,
            QueryParamSelection::Only(names) => {
                let names: Vec<&str> = names.iter().map(String::as_str).collect();
                builder.query_params(&names)
            }
        };

        for header in &config.vary_headers {
            builder = builder.header(header);
        }
        for cookie in &config.vary_cookies {
            builder = builder.cookie(cookie);
        }

        builder
    }

    /// Set a prefix for the cache key.
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = Some(prefix.into());
        self
    }

    /// Include the route path in the key.
    pub fn route(mut self) -> Self {
        self.components.push(KeyComponent::Route);
        self
    }

    /// Include specific query parameters.
    pub fn query_params(mut self, params: &[&str]) -> Self {
        let mut params: Vec<String> = params.iter().map(|s| s.to_string()).collect();
        params.sort();
        params.dedup();
        self.components.push(KeyComponent::QueryParams(params));
        self
    }

    /// Include all query parameters.
    pub fn all_query_params(mut self) -> Self {
        self.components.push(KeyComponent::AllQueryParams);
        self
    }

    /// Include a header value.
    pub fn header(mut self, name: impl AsRef<str>) -> Self {
        self.components
            .push(KeyComponent::Header(name.as_ref().to_ascii_lowercase()));
        self
    }

    /// Include a cookie value.
    pub fn cookie(mut self, name: impl Into<String>) -> Self {
        self.components.push(KeyComponent::Cookie(name.into()));
        self
    }

    /// Include a custom static value.
    pub fn custom(mut self, value: impl Into<String>) -> Self {
        self.components.push(KeyComponent::Custom(value.into()));
        self
    }

    /// Build the cache key for a request.
    pub fn build(&self, request: &RenderRequest) -> CacheKey {
        let mut parts = Vec::new();
        let mut route = None;

        if let Some(prefix) = &self.prefix {
            parts.push(escape(prefix));
        }

        for component in &self.components {
            match component {
                KeyComponent::Route => {
                    parts.push(escape(request.path()));
                    route = Some(request.path().to_string());
                }
                KeyComponent::QueryParams(params) => {
                    for param in params {
                        if let Some(value) = request.query_param(param) {
                            parts.push(format!("q:{}={}", escape(param), escape(value)));
                        }
                    }
                }
                KeyComponent::AllQueryParams => {
                    for (k, v) in request.query() {
                        parts.push(format!("q:{}={}", escape(k), escape(v)));
                    }
                }
                KeyComponent::Header(name) => {
                    if let Some(value) = request.header(name) {
                        parts.push(format!("h:{}={}", name, escape(value)));
                    }
                }
                KeyComponent::Cookie(name) => {
                    if let Some(value) = request.cookie(name) {
                        parts.push(format!("c:{}={}", escape(name), escape(value)));
                    }
                }
                KeyComponent::Custom(value) => {
                    parts.push(format!("x:{}", escape(value)));
                }
            }
        }

        CacheKey {
            key: parts.join("|"),
            route,
        }
    }
}

// Keeps component boundaries unambiguous.
fn escape(value: &str) -> String {
    value.replace('%', "%25").replace('|', "%7C")
}

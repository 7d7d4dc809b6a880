//! Page cache policy.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use ssr_core::CacheConfig;

/// Default bound on stored pages.
pub const DEFAULT_MAX_ENTRIES: usize = 1024;

/// How the page cache stores and expires renders.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageCachePolicy {
    /// When false every request bypasses the cache.
    pub enabled: bool,
    /// Entry lifetime. `None` keeps entries until evicted or invalidated.
    pub ttl: Option<Duration>,
    /// Maximum number of stored pages.
    pub max_entries: usize,
    /// Store renders where a phase failed.
    pub store_degraded: bool,
}

impl Default for PageCachePolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl: None,
            max_entries: DEFAULT_MAX_ENTRIES,
            store_degraded: false,
        }
    }
}

impl PageCachePolicy {
    /// Policy with defaults: enabled, no expiry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Policy that bypasses the cache for every request.
    pub fn disabled() -> Self {
        Self {
            enabled: false,
            ..Self::default()
        }
    }

    /// Build from the `[cache]` config section.
    pub fn from_config(config: &CacheConfig) -> Self {
        Self {
            enabled: config.enabled,
            ttl: config.ttl(),
            max_entries: config.max_entries,
            store_degraded: config.store_degraded,
        }
    }

    /// Set the entry lifetime.
    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }

    /// Set the capacity.
    pub fn with_max_entries(mut self, max_entries: usize) -> Self {
        self.max_entries = max_entries;
        self
    }

    /// Allow degraded renders to be stored.
    pub fn store_degraded(mut self) -> Self {
        self.store_degraded = true;
        self
    }

    /// Check whether an entry of the given age is past its lifetime.
    pub fn is_expired(&self, age: Duration) -> bool {
        self.ttl.is_some_and(|ttl| age >= ttl)
    }

    /// `Cache-Control` value for a page served from the shared cache.
    ///
    /// Pages stay `private` to downstream caches: only this process decides
    /// which requests are anonymous.
    pub fn cache_control_header(&self) -> String {
        match (self.enabled, self.ttl) {
            (false, _) => "no-store".to_string(),
            (true, Some(ttl)) => format!("private, max-age={}", ttl.as_secs()),
            (true, None) => "private, no-cache".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_never_expires() {
        let policy = PageCachePolicy::new();
        assert!(policy.enabled);
        assert!(!policy.is_expired(Duration::from_secs(86_400 * 365)));
    }

    #[test]
    fn test_ttl_expiry() {
        let policy = PageCachePolicy::new().with_ttl(Duration::from_secs(60));
        assert!(!policy.is_expired(Duration::from_secs(59)));
        assert!(policy.is_expired(Duration::from_secs(60)));
    }

    #[test]
    fn test_from_config() {
        let config = CacheConfig {
            enabled: false,
            ttl_secs: Some(30),
            max_entries: 8,
            store_degraded: true,
            ..Default::default()
        };
        let policy = PageCachePolicy::from_config(&config);

        assert!(!policy.enabled);
        assert_eq!(policy.ttl, Some(Duration::from_secs(30)));
        assert_eq!(policy.max_entries, 8);
        assert!(policy.store_degraded);
    }

    #[test]
    fn test_cache_control_header() {
        assert_eq!(PageCachePolicy::disabled().cache_control_header(), "no-store");
        assert_eq!(
            PageCachePolicy::new()
                .with_ttl(Duration::from_secs(300))
                .cache_control_header(),
            "private, max-age=300"
        );
    }
}

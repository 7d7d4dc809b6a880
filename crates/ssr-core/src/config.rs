//! Pipeline configuration.

use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::ConfigError;

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SsrConfig {
    /// HTTP front end.
    #[serde(default)]
    pub server: ServerConfig,

    /// Page cache.
    #[serde(default)]
    pub cache: CacheConfig,

    /// Render orchestration.
    #[serde(default)]
    pub render: RenderConfig,

    /// Logging.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl SsrConfig {
    /// Load config from a file. `.json` files are parsed as JSON, anything
    /// else as TOML.
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config = if path.extension().is_some_and(|ext| ext == "json") {
            Self::from_json_str(&content)
        } else {
            Self::from_toml_str(&content)
        }
        .with_context(|| format!("Failed to parse config file: {}", path.display()))?;

        Ok(config)
    }

    /// Parse and validate TOML.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse and validate JSON.
    pub fn from_json_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(content)?;
        config.validate()?;
        Ok(config)
    }

    /// Check cross-field constraints.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.cache.ttl_secs == Some(0) {
            return Err(ConfigError::Invalid(
                "cache.ttl_secs must be positive (omit it to never expire)".to_string(),
            ));
        }
        if self.render.slow_render_threshold_ms == 0 {
            return Err(ConfigError::Invalid(
                "render.slow_render_threshold_ms must be positive".to_string(),
            ));
        }
        if self.render.app_root_id.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "render.app_root_id must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// HTTP front-end configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Listen address.
    #[serde(default = "default_bind")]
    pub bind: String,
}

fn default_bind() -> String {
    "127.0.0.1:3000".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: default_bind(),
        }
    }
}

/// Which query parameters take part in the cache key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum QueryParamSelection {
    /// `"all"` or `"none"`.
    Keyword(QueryKeyword),
    /// An explicit list of parameter names.
    Only(Vec<String>),
}

/// Keyword form of [`QueryParamSelection`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum QueryKeyword {
    All,
    None,
}

impl Default for QueryParamSelection {
    fn default() -> Self {
        Self::Keyword(QueryKeyword::All)
    }
}

/// Page cache configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Whether anonymous requests use the cache at all.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Entry lifetime; `None` keeps entries until invalidated or evicted.
    #[serde(default)]
    pub ttl_secs: Option<u64>,

    /// Maximum stored entries.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Store renders that completed in degraded form.
    #[serde(default)]
    pub store_degraded: bool,

    /// Request headers that change rendered output.
    #[serde(default)]
    pub vary_headers: Vec<String>,

    /// Cookies that change rendered output.
    #[serde(default)]
    pub vary_cookies: Vec<String>,

    /// Query parameters that change rendered output.
    #[serde(default)]
    pub query_params: QueryParamSelection,
}

fn default_true() -> bool {
    true
}

fn default_max_entries() -> usize {
    1024
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            ttl_secs: None,
            max_entries: default_max_entries(),
            store_degraded: false,
            vary_headers: Vec::new(),
            vary_cookies: Vec::new(),
            query_params: QueryParamSelection::default(),
        }
    }
}

impl CacheConfig {
    /// Entry lifetime as a `Duration`.
    pub fn ttl(&self) -> Option<Duration> {
        self.ttl_secs.map(Duration::from_secs)
    }
}

/// Render orchestration configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RenderConfig {
    /// Renders slower than this raise an alert.
    #[serde(default = "default_slow_render_threshold_ms")]
    pub slow_render_threshold_ms: u64,

    /// Hard limit for one render; unset means no limit.
    #[serde(default)]
    pub timeout_ms: Option<u64>,

    /// Id of the element wrapping body markup. Must match the client
    /// bootstrap.
    #[serde(default = "default_app_root_id")]
    pub app_root_id: String,
}

fn default_slow_render_threshold_ms() -> u64 {
    3000
}

fn default_app_root_id() -> String {
    "app-root".to_string()
}

impl Default for RenderConfig {
    fn default() -> Self {
        Self {
            slow_render_threshold_ms: default_slow_render_threshold_ms(),
            timeout_ms: None,
            app_root_id: default_app_root_id(),
        }
    }
}

impl RenderConfig {
    /// Slow-render alert threshold.
    pub fn slow_render_threshold(&self) -> Duration {
        Duration::from_millis(self.slow_render_threshold_ms)
    }

    /// Enforced render timeout, if any.
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms.map(Duration::from_millis)
    }
}

/// Output format for logs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// JSON format (for production/log aggregation).
    Json,
    /// Human-readable format (for development).
    #[default]
    Human,
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "json" => Ok(Self::Json),
            "human" => Ok(Self::Human),
            other => Err(ConfigError::Invalid(format!("unknown log format: {}", other))),
        }
    }
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Level or `EnvFilter` directive.
    #[serde(default = "default_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

fn default_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
            format: LogFormat::default(),
        }
    }
}

//! Error types shared across the pipeline.

use std::time::Duration;

use thiserror::Error;

/// Errors raised while rendering a page.
///
/// `Clone` because a single failed render is handed to every request waiting
/// on it.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RenderError {
    /// Data prefetch failed.
    #[error("prefetch failed: {0}")]
    Prefetch(String),

    /// Markup serialization failed.
    #[error("serialization failed: {0}")]
    Serialize(String),

    /// The configured render timeout elapsed.
    #[error("render timed out after {0:?}")]
    Timeout(Duration),
}

/// Configuration errors.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Invalid TOML.
    #[error("invalid TOML config: {0}")]
    Toml(#[from] toml::de::Error),

    /// Invalid JSON.
    #[error("invalid JSON config: {0}")]
    Json(#[from] serde_json::Error),

    /// Semantically invalid value.
    #[error("invalid config value: {0}")]
    Invalid(String),
}

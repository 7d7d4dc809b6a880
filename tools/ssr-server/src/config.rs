//! Server configuration loading.

use std::path::Path;

use anyhow::{Context, Result};
use ssr_core::{LogFormat, SsrConfig};

/// Load the config file (defaults when absent) and apply CLI overrides.
pub fn load(path: Option<&Path>, bind: Option<&str>, log_format: Option<LogFormat>) -> Result<SsrConfig> {
    let mut config = match path {
        Some(path) => SsrConfig::load(path)?,
        None => SsrConfig::default(),
    };

    if let Some(bind) = bind {
        config.server.bind = bind.to_string();
    }
    if let Some(format) = log_format {
        config.logging.format = format;
    }

    config.validate().context("Invalid configuration")?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_without_file() {
        let config = load(None, None, None).unwrap();
        assert_eq!(config.server.bind, "127.0.0.1:3000");
        assert_eq!(config.logging.format, LogFormat::Human);
    }

    #[test]
    fn test_cli_overrides() {
        let config = load(None, Some("0.0.0.0:8080"), Some(LogFormat::Json)).unwrap();
        assert_eq!(config.server.bind, "0.0.0.0:8080");
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn test_missing_file_is_an_error() {
        let err = load(Some(Path::new("/nonexistent/ssr.toml")), None, None).unwrap_err();
        assert!(err.to_string().contains("Failed to read config file"));
    }
}

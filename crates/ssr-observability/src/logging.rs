//! `tracing` subscriber setup.

use anyhow::{anyhow, Result};
use ssr_core::{LogFormat, LoggingConfig};
use tracing_subscriber::EnvFilter;

/// Build the filter for a config, letting `RUST_LOG` take precedence.
pub fn env_filter(config: &LoggingConfig) -> Result<EnvFilter> {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        return Ok(filter);
    }
    EnvFilter::try_new(&config.level)
        .map_err(|e| anyhow!("invalid log level '{}': {}", config.level, e))
}

/// Install the global subscriber. Fails if one is already installed.
pub fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = env_filter(config)?;

    let result = match config.format {
        LogFormat::Json => tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(true)
            .with_current_span(false)
            .try_init(),
        LogFormat::Human => tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_target(true)
            .with_thread_ids(false)
            .with_level(true)
            .try_init(),
    };

    result.map_err(|e| anyhow!("failed to install log subscriber: {}", e))?;
    tracing::info!(level = %config.level, format = ?config.format, "Logging initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_accepts_directives() {
        let config = LoggingConfig {
            level: "info,ssr_cache=debug".to_string(),
            format: LogFormat::Human,
        };
        assert!(env_filter(&config).is_ok());
    }
}

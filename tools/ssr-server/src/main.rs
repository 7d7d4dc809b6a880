//! SSR server - HTTP front end for the server-side render pipeline.
//!
//! Routes:
//! - `GET /_ssr/health` - Liveness check
//! - `GET /_ssr/metrics` - Cache and render counters as JSON
//! - `GET /*` - Server-side rendered pages

mod app;
mod config;
mod demo;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use ssr_core::LogFormat;
use ssr_identity::{InMemoryUserStore, TokenIdentityResolver};
use ssr_observability::init_logging;
use ssr_render::PageService;

/// Server-side render server with a shared page cache
#[derive(Parser)]
#[command(name = "ssr-server")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Config file path (TOML, or JSON by extension)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Address to listen on, overriding the config file
    #[arg(short, long)]
    bind: Option<String>,

    /// Log output format (human or json)
    #[arg(long)]
    log_format: Option<LogFormat>,

    /// Login token accepted for the demo user
    #[arg(long, default_value = "demo-token")]
    demo_token: String,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = config::load(cli.config.as_deref(), cli.bind.as_deref(), cli.log_format)?;
    init_logging(&config.logging)?;

    let store = InMemoryUserStore::new().with_user(
        cli.demo_token.as_str(),
        ssr_core::UserRef::new("demo").with_display_name("Demo User"),
    );
    let service = PageService::from_config(
        &config,
        Arc::new(TokenIdentityResolver::new(store)),
        Arc::new(demo::DemoSite::new()),
    );

    let listener = tokio::net::TcpListener::bind(&config.server.bind)
        .await
        .with_context(|| format!("Failed to bind {}", config.server.bind))?;
    tracing::info!(
        bind = %config.server.bind,
        cache_enabled = config.cache.enabled,
        ttl_secs = ?config.cache.ttl_secs,
        "SSR server listening"
    );

    axum::serve(listener, app::router(Arc::new(service)))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("SSR server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
}

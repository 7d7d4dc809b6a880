//! Observability for the server-side render pipeline.
//!
//! This crate provides:
//! - `SsrMetrics` - Process-wide cache and render counters
//! - `SlowRenderAlert` - Fire-and-forget alerting for slow renders
//! - `init_logging` - `tracing` subscriber setup

mod alert;
mod logging;
mod metrics;

pub use alert::*;
pub use logging::*;
pub use metrics::*;

// Re-export for convenience
pub use ssr_core::{LogFormat, LoggingConfig, RequestId};

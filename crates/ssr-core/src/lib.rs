//! Core data model for the server-side render pipeline.
//!
//! This crate provides the fundamental types shared by every stage:
//! - `RenderRequest` - Immutable inbound page request
//! - `RenderResult` - Immutable output of one two-phase render
//! - `TimingContext` - Per-request timing marks
//! - `SsrConfig` - File-backed configuration

mod config;
mod context;
mod error;
mod lifecycle;
mod render;

pub use config::*;
pub use context::*;
pub use error::*;
pub use lifecycle::*;
pub use render::*;

pub use http::StatusCode;

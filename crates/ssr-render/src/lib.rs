//! Render orchestration for server-side rendered pages.
//!
//! This crate provides:
//! - `RenderTree` / `RenderTreeFactory` - The render collaborator
//! - `RenderOrchestrator` - Strictly ordered prefetch then serialization
//! - `StyleAccumulator` - Deterministic style ids for one serialization
//! - `PageService` - Request to classifier to cache or direct render to sink
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use ssr_render::PageService;
//! use ssr_streaming::ResponseSink;
//!
//! let service = PageService::from_config(&config, resolver, Arc::new(MyTreeFactory));
//! let mut sink = ResponseSink::new(frames_tx);
//! let report = service.handle(request, &mut sink).await;
//! ```

mod orchestrator;
mod pipeline;
mod style;
mod tree;

pub use orchestrator::*;
pub use pipeline::*;
pub use style::*;
pub use tree::*;

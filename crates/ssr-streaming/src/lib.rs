//! Streaming primitives for server-side rendered pages.
//!
//! This crate provides:
//! - `StreamSink` - Head/body segment sink with status and redirect control
//! - `ResponseSink` - `StreamSink` over any `futures::Sink<ResponseFrame>`
//! - `DocumentShell` - Document opening and closing markup
//! - `FlushPolicy` - Explicit flush control

mod flush;
mod section;
mod shell;
mod sink;

pub use flush::*;
pub use section::*;
pub use shell::*;
pub use sink::*;

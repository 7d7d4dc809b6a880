//! Request classification for the server-side render pipeline.
//!
//! This crate provides:
//! - `RequestClassifier` - Anonymous vs identified split
//! - `IdentityResolver` - User lookup collaborator
//! - `TokenIdentityResolver` - Login-token based resolver over a `UserStore`

mod classifier;
mod resolver;

pub use classifier::*;
pub use resolver::*;

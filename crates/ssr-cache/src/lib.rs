//! Page caching for the server-side render pipeline.
//!
//! This crate provides:
//! - `PageCache` - Single-flight store of completed renders
//! - `PageCachePolicy` - TTL, capacity and degraded-render handling
//! - `CacheKeyBuilder` - Deterministic cache key composition
//! - `CacheExplainHeaders` - Debug headers for cache behavior
//!
//! # Example
//!
//! ```ignore
//! use std::sync::Arc;
//! use std::time::Duration;
//! use ssr_cache::{CacheKeyBuilder, PageCache, PageCachePolicy};
//! use ssr_observability::SsrMetrics;
//!
//! let cache = PageCache::new(
//!     PageCachePolicy::new().with_ttl(Duration::from_secs(300)),
//!     Arc::new(SsrMetrics::new()),
//! );
//! let key = CacheKeyBuilder::new()
//!     .route()
//!     .all_query_params()
//!     .header("accept-language")
//!     .build(&request);
//!
//! let page = cache.get_or_render(&key, move || render(request)).await?;
//! ```

mod headers;
mod key;
mod page;
mod policy;

pub use headers::*;
pub use key::*;
pub use page::*;
pub use policy::*;

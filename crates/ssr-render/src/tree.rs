//! Render tree collaborator.

use async_trait::async_trait;
use ssr_core::{RenderError, RenderRequest, RequestStatus, UserRef};

use crate::style::StyleAccumulator;

/// Context for the prefetch phase.
///
/// Carries no style accumulator: style ids cannot be generated before
/// serialization.
#[derive(Debug, Clone, Copy)]
pub struct PrefetchContext<'a> {
    request: &'a RenderRequest,
    user: Option<&'a UserRef>,
}

impl<'a> PrefetchContext<'a> {
    /// Create a prefetch context.
    pub fn new(request: &'a RenderRequest, user: Option<&'a UserRef>) -> Self {
        Self { request, user }
    }

    /// The request being rendered.
    pub fn request(&self) -> &'a RenderRequest {
        self.request
    }

    /// The identified user, if any.
    pub fn user(&self) -> Option<&'a UserRef> {
        self.user
    }

    /// Always true; components must not emit styles while prefetching.
    pub fn suppress_style_generation(&self) -> bool {
        true
    }
}

/// Context for the serialization phase.
#[derive(Debug)]
pub struct SerializeContext<'a> {
    request: &'a RenderRequest,
    user: Option<&'a UserRef>,
    styles: StyleAccumulator,
}

impl<'a> SerializeContext<'a> {
    /// Create a serialization context with a fresh style accumulator.
    pub fn new(request: &'a RenderRequest, user: Option<&'a UserRef>) -> Self {
        Self {
            request,
            user,
            styles: StyleAccumulator::new(),
        }
    }

    /// The request being rendered.
    pub fn request(&self) -> &'a RenderRequest {
        self.request
    }

    /// The identified user, if any.
    pub fn user(&self) -> Option<&'a UserRef> {
        self.user
    }

    /// Style accumulator for this pass.
    pub fn styles(&mut self) -> &mut StyleAccumulator {
        &mut self.styles
    }

    /// Consume the context, returning the collected styles.
    pub fn into_styles(self) -> StyleAccumulator {
        self.styles
    }
}

/// A page's component tree.
///
/// `prefetch` takes `&mut self` and resolves data; every serialization
/// method takes `&self`, so serialization cannot start while prefetch holds
/// the tree and cannot change what it traverses.
#[async_trait]
pub trait RenderTree: Send + Sync {
    /// Resolve every asynchronous data dependency. May run several passes.
    async fn prefetch(&mut self, ctx: &PrefetchContext<'_>) -> Result<(), RenderError>;

    /// Serialize body markup in a single traversal.
    fn render_body(&self, ctx: &mut SerializeContext<'_>) -> Result<String, RenderError>;

    /// Head markup (title, meta, links).
    fn render_head(&self, ctx: &SerializeContext<'_>) -> Result<String, RenderError>;

    /// Snapshot of prefetched data for client hydration.
    fn extract_state(&self) -> Result<String, RenderError>;

    /// Status or redirect requested while rendering.
    fn request_status(&self) -> RequestStatus {
        RequestStatus::none()
    }
}

/// Builds a render tree for a request.
pub trait RenderTreeFactory: Send + Sync {
    /// Create the tree for `request`, rendered for `user` when identified.
    fn create(&self, request: &RenderRequest, user: Option<&UserRef>) -> Box<dyn RenderTree>;
}

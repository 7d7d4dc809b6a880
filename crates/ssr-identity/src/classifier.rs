//! Anonymous / identified request split.

use std::sync::Arc;

use ssr_core::{RenderRequest, UserRef};
use tracing::warn;

use crate::IdentityResolver;

/// Result of classifying a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Classification {
    /// No resolved user; eligible for the page cache.
    Anonymous,
    /// Bound to a known user; never cached.
    Identified(UserRef),
}

impl Classification {
    /// Check if the request may use the page cache.
    pub fn is_anonymous(&self) -> bool {
        matches!(self, Self::Anonymous)
    }

    /// The identified user, if any.
    pub fn user(&self) -> Option<&UserRef> {
        match self {
            Self::Anonymous => None,
            Self::Identified(user) => Some(user),
        }
    }

    /// Consume into the identified user, if any.
    pub fn into_user(self) -> Option<UserRef> {
        match self {
            Self::Anonymous => None,
            Self::Identified(user) => Some(user),
        }
    }
}

/// Decides whether a request is anonymous or identified.
///
/// Performs exactly one identity lookup per call and keeps no state. A failed
/// lookup classifies the request as anonymous: an identity outage degrades to
/// public cached pages rather than failing requests.
#[derive(Clone)]
pub struct RequestClassifier {
    resolver: Arc<dyn IdentityResolver>,
}

impl RequestClassifier {
    /// Create a classifier over an identity resolver.
    pub fn new(resolver: Arc<dyn IdentityResolver>) -> Self {
        Self { resolver }
    }

    /// Classify a request.
    pub async fn classify(&self, request: &RenderRequest) -> Classification {
        match self.resolver.resolve_user(request).await {
            Ok(Some(user)) => Classification::Identified(user),
            Ok(None) => Classification::Anonymous,
            Err(err) => {
                warn!(
                    request_id = %request.request_id(),
                    url = %request.url(),
                    error = %err,
                    "identity lookup failed, treating request as anonymous"
                );
                Classification::Anonymous
            }
        }
    }
}

impl std::fmt::Debug for RequestClassifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestClassifier").finish_non_exhaustive()
    }
}

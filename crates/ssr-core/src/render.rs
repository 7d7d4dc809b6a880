//! Render output and identity values.

use std::time::Duration;

use chrono::{DateTime, Utc};
use http::StatusCode;
use serde::{Deserialize, Serialize};

/// Reference to an identified user.
///
/// The pipeline never looks inside it; it only decides that a request with a
/// user must not share cached output with anyone else.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct UserRef {
    /// Stable user ID.
    pub id: String,
    /// Display name, if known.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl UserRef {
    /// Create a user reference.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: None,
        }
    }

    /// Set the display name.
    pub fn with_display_name(mut self, name: impl Into<String>) -> Self {
        self.display_name = Some(name.into());
        self
    }
}

/// Status and redirect requested by the render tree.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RequestStatus {
    /// Status code override.
    pub status: Option<StatusCode>,
    /// Redirect target.
    pub redirect_url: Option<String>,
}

impl RequestStatus {
    /// No override.
    pub fn none() -> Self {
        Self::default()
    }

    /// Redirect to `url`, optionally with an explicit status code.
    pub fn redirect(url: impl Into<String>, status: Option<StatusCode>) -> Self {
        Self {
            status,
            redirect_url: Some(url.into()),
        }
    }

    /// Override the status code only.
    pub fn with_status(status: StatusCode) -> Self {
        Self {
            status: Some(status),
            redirect_url: None,
        }
    }
}

/// Output of one two-phase render.
///
/// Values are shared behind `Arc` between every request served from the same
/// cache entry, so nothing mutates them after construction.
#[derive(Debug, Clone, PartialEq)]
pub struct RenderResult {
    /// Head markup fragment.
    pub head: String,
    /// Body markup fragment (already wrapped in the app root element).
    pub body: String,
    /// Serialized application state fragment.
    pub serialized_state: String,
    /// Inline stylesheet fragment.
    pub style_sheet: String,
    /// Status code override.
    pub status_code: Option<StatusCode>,
    /// Redirect target.
    pub redirect_url: Option<String>,
    /// When the render finished.
    pub rendered_at: DateTime<Utc>,
    /// Prefetch phase duration.
    pub prefetch_time: Duration,
    /// Serialization phase duration.
    pub serialize_time: Duration,
    /// Whether any phase failed and the output is best-effort.
    pub degraded: bool,
}

impl RenderResult {
    /// An empty, degraded page.
    pub fn empty() -> Self {
        Self {
            head: String::new(),
            body: String::new(),
            serialized_state: String::new(),
            style_sheet: String::new(),
            status_code: None,
            redirect_url: None,
            rendered_at: Utc::now(),
            prefetch_time: Duration::ZERO,
            serialize_time: Duration::ZERO,
            degraded: true,
        }
    }

    /// Total render time.
    pub fn total_time(&self) -> Duration {
        self.prefetch_time + self.serialize_time
    }

    /// Whether the render asked for a redirect.
    pub fn is_redirect(&self) -> bool {
        self.redirect_url.is_some()
    }

    /// Effective response status: the override, `301` for a bare redirect,
    /// `200` otherwise.
    pub fn effective_status(&self) -> StatusCode {
        match (self.status_code, &self.redirect_url) {
            (Some(status), _) => status,
            (None, Some(_)) => StatusCode::MOVED_PERMANENTLY,
            (None, None) => StatusCode::OK,
        }
    }
}

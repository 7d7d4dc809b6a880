//! Two-phase render orchestration.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use ssr_core::{RenderConfig, RenderError, RenderPhase, RenderRequest, RenderResult, TimingContext, UserRef};
use ssr_observability::{SlowRenderAlert, SlowRenderReport, SsrMetrics, TracingAlert};
use tracing::{error, info, warn};

use crate::tree::{PrefetchContext, RenderTree, RenderTreeFactory, SerializeContext};

/// Id of the element wrapping serialized styles.
pub const STYLE_ELEMENT_ID: &str = "ssr-styles";

/// Global the client bootstrap reads hydration state from.
pub const STATE_GLOBAL: &str = "window.__APP_STATE__";

/// Output of one serialization pass, before framing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Serialized {
    /// Head markup.
    pub head: String,
    /// Body markup, framed in the app root element.
    pub body: String,
    /// Hydration state script, empty when extraction failed.
    pub state: String,
    /// Style element, empty when no styles were used.
    pub styles: String,
    /// Whether any part failed.
    pub degraded: bool,
}

/// Drives a render tree through prefetch then serialization.
///
/// Owns no per-request state; one orchestrator serves every request.
#[derive(Clone)]
pub struct RenderOrchestrator {
    config: RenderConfig,
    metrics: Arc<SsrMetrics>,
    alert: Arc<dyn SlowRenderAlert>,
}

impl RenderOrchestrator {
    /// Create an orchestrator that alerts through `tracing`.
    pub fn new(config: RenderConfig, metrics: Arc<SsrMetrics>) -> Self {
        Self {
            config,
            metrics,
            alert: Arc::new(TracingAlert),
        }
    }

    /// Use a custom slow-render alert.
    pub fn with_alert(mut self, alert: Arc<dyn SlowRenderAlert>) -> Self {
        self.alert = alert;
        self
    }

    /// Render configuration.
    pub fn config(&self) -> &RenderConfig {
        &self.config
    }

    /// Render `request` for `user`.
    ///
    /// Phase failures produce a degraded result rather than an error; the
    /// only error is an elapsed `timeout_ms`.
    pub async fn render(
        &self,
        factory: &dyn RenderTreeFactory,
        request: &RenderRequest,
        user: Option<&UserRef>,
    ) -> Result<RenderResult, RenderError> {
        let Some(limit) = self.config.timeout() else {
            return Ok(self.render_phases(factory, request, user).await);
        };

        match tokio::time::timeout(limit, self.render_phases(factory, request, user)).await {
            Ok(result) => Ok(result),
            Err(_) => {
                warn!(
                    request_id = %request.request_id(),
                    url = %request.url(),
                    timeout_ms = limit.as_millis() as u64,
                    "render timed out"
                );
                Err(RenderError::Timeout(limit))
            }
        }
    }

    async fn render_phases(
        &self,
        factory: &dyn RenderTreeFactory,
        request: &RenderRequest,
        user: Option<&UserRef>,
    ) -> RenderResult {
        let mut timing = TimingContext::new();
        let mut tree = factory.create(request, user);

        timing.mark_phase_start(RenderPhase::Prefetch);
        let prefetch_ok = self.prefetch(tree.as_mut(), request, user).await;
        timing.mark_phase_end(RenderPhase::Prefetch);

        timing.mark_phase_start(RenderPhase::Serialize);
        let serialized = self.serialize(tree.as_ref(), request, user);
        timing.mark_phase_end(RenderPhase::Serialize);

        let status = tree.request_status();
        let result = RenderResult {
            head: serialized.head,
            body: serialized.body,
            serialized_state: serialized.state,
            style_sheet: serialized.styles,
            status_code: status.status,
            redirect_url: status.redirect_url,
            rendered_at: Utc::now(),
            prefetch_time: timing.phase_duration(RenderPhase::Prefetch).unwrap_or_default(),
            serialize_time: timing.phase_duration(RenderPhase::Serialize).unwrap_or_default(),
            degraded: !prefetch_ok || serialized.degraded,
        };

        self.observe(request, &result);
        result
    }

    /// Run the prefetch phase. Failures are logged and reported as `false`.
    pub async fn prefetch(
        &self,
        tree: &mut dyn RenderTree,
        request: &RenderRequest,
        user: Option<&UserRef>,
    ) -> bool {
        let ctx = PrefetchContext::new(request, user);
        match tree.prefetch(&ctx).await {
            Ok(()) => true,
            Err(err) => {
                error!(
                    request_id = %request.request_id(),
                    url = %request.url(),
                    at = %Utc::now().to_rfc3339(),
                    error = %err,
                    "error while fetching page data"
                );
                false
            }
        }
    }

    /// Run the serialization phase over a resolved tree.
    ///
    /// Uses a fresh style accumulator, so repeated calls over the same tree
    /// give identical output.
    pub fn serialize(
        &self,
        tree: &dyn RenderTree,
        request: &RenderRequest,
        user: Option<&UserRef>,
    ) -> Serialized {
        let mut ctx = SerializeContext::new(request, user);
        let mut degraded = false;

        let mut fragment = |part: &str, outcome: Result<String, RenderError>| match outcome {
            Ok(markup) => markup,
            Err(err) => {
                degraded = true;
                error!(
                    request_id = %request.request_id(),
                    url = %request.url(),
                    at = %Utc::now().to_rfc3339(),
                    part,
                    error = %err,
                    "error while rendering page"
                );
                String::new()
            }
        };

        let markup = fragment("body", tree.render_body(&mut ctx));
        let head = fragment("head", tree.render_head(&ctx));
        let state = fragment("state", tree.extract_state());
        let css = ctx.into_styles().to_css();

        Serialized {
            head,
            body: self.frame_body(&markup),
            state: frame_state(&state),
            styles: frame_styles(&css),
            degraded,
        }
    }

    /// Page served when no render result is available.
    pub fn fallback_page(&self) -> RenderResult {
        RenderResult {
            body: self.frame_body(""),
            ..RenderResult::empty()
        }
    }

    fn frame_body(&self, markup: &str) -> String {
        format!("<div id=\"{}\">{}</div>", self.config.app_root_id, markup)
    }

    fn observe(&self, request: &RenderRequest, result: &RenderResult) {
        let threshold = self.config.slow_render_threshold();
        let total = result.total_time();
        let slow = total > threshold;

        self.metrics.record_render(total, result.degraded, slow);
        info!(
            request_id = %request.request_id(),
            url = %request.url(),
            prefetch_ms = millis(result.prefetch_time),
            render_ms = millis(result.serialize_time),
            degraded = result.degraded,
            "page rendered"
        );

        if slow {
            self.alert.alert(&SlowRenderReport::new(
                request.request_id(),
                request.url(),
                result.prefetch_time,
                result.serialize_time,
                threshold,
            ));
        }
    }
}

impl std::fmt::Debug for RenderOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderOrchestrator")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

fn millis(duration: Duration) -> u64 {
    duration.as_millis() as u64
}

// `<` is escaped so the payload cannot close the script element.
fn frame_state(state: &str) -> String {
    if state.is_empty() {
        return String::new();
    }
    format!(
        "<script>{} = {};</script>",
        STATE_GLOBAL,
        state.replace('<', "\\u003c")
    )
}

fn frame_styles(css: &str) -> String {
    if css.is_empty() {
        return String::new();
    }
    format!("<style id=\"{}\">{}</style>", STYLE_ELEMENT_ID, css)
}

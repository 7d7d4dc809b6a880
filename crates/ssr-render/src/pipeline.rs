//! Request handling: classify, look up or render, deliver.

use std::fmt::Display;
use std::future::Future;
use std::sync::Arc;

use futures::future::{BoxFuture, FutureExt, Shared};
use futures::Sink;
use ssr_cache::{
    CacheExplainHeaders, CacheKeyBuilder, CacheLookup, CacheStatus, PageCache, PageCachePolicy,
    RenderOutcome,
};
use ssr_core::{RenderError, RenderRequest, RenderResult, RequestId, SsrConfig, StatusCode, UserRef};
use ssr_identity::{Classification, IdentityResolver, RequestClassifier};
use ssr_observability::{SlowRenderAlert, SsrMetrics};
use ssr_streaming::{
    ResponseControl, ResponseFrame, ResponseSink, SectionContent, StreamError, StreamSink,
};
use tracing::{debug, error, info, warn};

use crate::orchestrator::RenderOrchestrator;
use crate::tree::RenderTreeFactory;

/// How a response ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// The document was written in full.
    Delivered,
    /// A redirect head was written without a document.
    Redirected,
    /// Downstream stopped accepting writes.
    Disconnected,
}

/// Summary of one handled request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Request ID.
    pub request_id: RequestId,
    /// How the response ended.
    pub outcome: DeliveryOutcome,
    /// How the page cache served the request.
    pub cache_status: CacheStatus,
    /// Committed status, when the head was written.
    pub status: Option<StatusCode>,
}

type PageFuture = Shared<BoxFuture<'static, Arc<RenderResult>>>;

/// Serves pages for requests.
///
/// Owns the classifier, page cache, metrics and orchestrator; construct one
/// per process and share it behind an `Arc`.
pub struct PageService {
    classifier: RequestClassifier,
    cache: PageCache,
    key_builder: CacheKeyBuilder,
    orchestrator: RenderOrchestrator,
    factory: Arc<dyn RenderTreeFactory>,
    metrics: Arc<SsrMetrics>,
    explain_headers: bool,
}

impl PageService {
    /// Build a service from configuration.
    pub fn from_config(
        config: &SsrConfig,
        resolver: Arc<dyn IdentityResolver>,
        factory: Arc<dyn RenderTreeFactory>,
    ) -> Self {
        let metrics = Arc::new(SsrMetrics::new());
        Self {
            classifier: RequestClassifier::new(resolver),
            cache: PageCache::new(PageCachePolicy::from_config(&config.cache), Arc::clone(&metrics)),
            key_builder: CacheKeyBuilder::from_config(&config.cache),
            orchestrator: RenderOrchestrator::new(config.render.clone(), Arc::clone(&metrics)),
            factory,
            metrics,
            explain_headers: true,
        }
    }

    /// Use a custom slow-render alert.
    pub fn with_alert(mut self, alert: Arc<dyn SlowRenderAlert>) -> Self {
        self.orchestrator = self.orchestrator.with_alert(alert);
        self
    }

    /// Use a custom cache key builder.
    pub fn with_key_builder(mut self, key_builder: CacheKeyBuilder) -> Self {
        self.key_builder = key_builder;
        self
    }

    /// Toggle `X-Cache-*` debug headers.
    pub fn with_explain_headers(mut self, enabled: bool) -> Self {
        self.explain_headers = enabled;
        self
    }

    /// Shared counters.
    pub fn metrics(&self) -> &Arc<SsrMetrics> {
        &self.metrics
    }

    /// The page cache, for invalidation.
    pub fn cache(&self) -> &PageCache {
        &self.cache
    }

    /// Serve `request` into `sink`.
    ///
    /// Never fails: render failures degrade to an empty page and write
    /// failures are reported as [`DeliveryOutcome::Disconnected`].
    pub async fn handle<S, E>(&self, request: RenderRequest, sink: &mut ResponseSink<S, E>) -> DeliveryReport
    where
        S: Sink<ResponseFrame, Error = E> + Unpin,
        E: Display,
    {
        let request = Arc::new(request);
        let request_id = request.request_id().clone();

        let (lookup, key) = match self.classifier.classify(&request).await {
            Classification::Identified(user) => {
                let handle = self
                    .cache
                    .bypass_handle(self.render_fn(Arc::clone(&request), Some(user)));
                info!(
                    request_id = %request_id,
                    url = %request.url(),
                    "rendering {} (identified request; hit rate={:.1}%)",
                    request.url(),
                    self.metrics.hit_rate() * 100.0
                );
                let lookup = CacheLookup::Pending {
                    handle,
                    status: CacheStatus::Bypass,
                };
                (lookup, None)
            }
            Classification::Anonymous => {
                let key = self.key_builder.build(&request);
                let lookup = self
                    .cache
                    .lookup_or_render(&key, self.render_fn(Arc::clone(&request), None));
                debug!(
                    request_id = %request_id,
                    url = %request.url(),
                    cache_key = %key,
                    cache_status = %lookup.status(),
                    "anonymous request"
                );
                (lookup, Some(key))
            }
        };

        let cache_status = lookup.status();
        if self.explain_headers {
            let mut explain = CacheExplainHeaders::new()
                .with_status(cache_status)
                .with_request_id(request_id.as_str());
            if let Some(key) = &key {
                explain = explain.with_key(key);
            }
            for (name, value) in explain.to_headers() {
                // A fresh sink cannot have committed its head yet.
                let _ = sink.insert_header(&name, &value);
            }
        }

        let cache_control = match key {
            Some(_) => self.cache.policy().cache_control_header(),
            None => "private, no-store".to_string(),
        };
        let _ = sink.insert_header("Cache-Control", &cache_control);

        let appended = match lookup {
            CacheLookup::Ready(page) => deliver_buffered(sink, &page),
            CacheLookup::Pending { handle, .. } => {
                let page = self.page_future(handle, &request);
                deliver_streaming(sink, page)
            }
        };

        let finished = match appended {
            Ok(()) => sink.finish().await,
            Err(err) => Err(err),
        };

        match finished {
            Ok(report) => DeliveryReport {
                request_id,
                outcome: if report.redirected {
                    DeliveryOutcome::Redirected
                } else {
                    DeliveryOutcome::Delivered
                },
                cache_status,
                status: Some(report.status),
            },
            Err(err) => {
                self.metrics.record_disconnect();
                match &err {
                    StreamError::Write(_) => warn!(
                        request_id = %request_id,
                        url = %request.url(),
                        error = %err,
                        "client disconnected, response abandoned"
                    ),
                    _ => error!(
                        request_id = %request_id,
                        url = %request.url(),
                        error = %err,
                        "response sink misused, response abandoned"
                    ),
                }
                DeliveryReport {
                    request_id,
                    outcome: DeliveryOutcome::Disconnected,
                    cache_status,
                    status: None,
                }
            }
        }
    }

    fn render_fn(
        &self,
        request: Arc<RenderRequest>,
        user: Option<UserRef>,
    ) -> impl FnOnce() -> BoxFuture<'static, Result<RenderResult, RenderError>> {
        let orchestrator = self.orchestrator.clone();
        let factory = Arc::clone(&self.factory);
        move || {
            async move {
                orchestrator
                    .render(factory.as_ref(), &request, user.as_ref())
                    .await
            }
            .boxed()
        }
    }

    // Resolves once per request, so a failure is logged once.
    fn page_future<F>(&self, render: F, request: &RenderRequest) -> PageFuture
    where
        F: Future<Output = RenderOutcome> + Send + 'static,
    {
        let fallback = self.orchestrator.fallback_page();
        let request_id = request.request_id().clone();
        let url = request.url();

        render
            .map(move |outcome| match outcome {
                Ok(page) => page,
                Err(err) => {
                    error!(
                        request_id = %request_id,
                        url = %url,
                        error = %err,
                        "render failed, serving empty page"
                    );
                    Arc::new(fallback)
                }
            })
            .boxed()
            .shared()
    }
}

impl std::fmt::Debug for PageService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageService")
            .field("cache", &self.cache)
            .field("orchestrator", &self.orchestrator)
            .finish_non_exhaustive()
    }
}

/// Apply a page's status and redirect: `set_status_code(code)` then
/// `redirect(url, code)`.
pub fn apply_status(control: &ResponseControl, page: &RenderResult) -> Result<(), StreamError> {
    if let Some(status) = page.status_code {
        control.set_status_code(status)?;
    }
    if let Some(url) = &page.redirect_url {
        control.redirect(url, page.status_code)?;
    }
    Ok(())
}

/// Deliver a completed page.
pub fn deliver_buffered(sink: &mut dyn StreamSink, page: &RenderResult) -> Result<(), StreamError> {
    apply_status(&sink.control(), page)?;
    sink.append_to_head(SectionContent::ready(page.head.as_str()))?;
    sink.append_to_head(SectionContent::ready(page.style_sheet.as_str()))?;
    sink.append_to_body(SectionContent::ready(page.body.as_str()))?;
    sink.append_to_body(SectionContent::ready(page.serialized_state.as_str()))?;
    Ok(())
}

/// Deliver a page that is still rendering.
///
/// The first head segment applies status and redirect before the sink
/// commits the response head.
pub fn deliver_streaming(
    sink: &mut dyn StreamSink,
    page: Shared<BoxFuture<'static, Arc<RenderResult>>>,
) -> Result<(), StreamError> {
    let control = sink.control();
    let head_page = page.clone();
    sink.append_to_head(SectionContent::lazy(async move {
        let page = head_page.await;
        if let Err(err) = apply_status(&control, &page) {
            debug!(error = %err, "status not applied");
        }
        page.head.clone()
    }))?;

    let fragment = |select: fn(&RenderResult) -> &str| {
        let page = page.clone();
        SectionContent::lazy(async move {
            let page = page.await;
            select(&page).to_string()
        })
    };
    sink.append_to_head(fragment(|p| &p.style_sheet))?;
    sink.append_to_body(fragment(|p| &p.body))?;
    sink.append_to_body(fragment(|p| &p.serialized_state))?;
    Ok(())
}

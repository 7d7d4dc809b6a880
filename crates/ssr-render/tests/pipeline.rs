//! End-to-end request handling over in-memory sinks.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::channel::mpsc;
use ssr_cache::CacheStatus;
use ssr_core::{
    RenderError, RenderRequest, RequestStatus, SsrConfig, StatusCode, UserRef,
};
use ssr_identity::{InMemoryUserStore, TokenIdentityResolver};
use ssr_render::{
    DeliveryOutcome, PageService, PrefetchContext, RenderTree, RenderTreeFactory,
    SerializeContext,
};
use ssr_streaming::{ResponseFrame, ResponseMeta, ResponseSink};

#[derive(Clone, Default)]
struct Behaviour {
    delay: Duration,
    fail_prefetch: bool,
    panic_body: bool,
    redirect: Option<&'static str>,
}

struct PostTree {
    behaviour: Behaviour,
    path: String,
    viewer: Option<String>,
    title: Option<String>,
}

#[async_trait]
impl RenderTree for PostTree {
    async fn prefetch(&mut self, _ctx: &PrefetchContext<'_>) -> Result<(), RenderError> {
        tokio::time::sleep(self.behaviour.delay).await;
        if self.behaviour.fail_prefetch {
            return Err(RenderError::Prefetch("posts query failed".to_string()));
        }
        self.title = Some(format!("Post at {}", self.path));
        Ok(())
    }

    fn render_body(&self, ctx: &mut SerializeContext<'_>) -> Result<String, RenderError> {
        if self.behaviour.panic_body {
            panic!("template bug");
        }
        let class = ctx.styles().class_for("PostsPage", "padding: 8px;");
        let viewer = self.viewer.as_deref().unwrap_or("guest");
        Ok(format!(
            "<article class=\"{}\">{} for {}</article>",
            class,
            self.title.as_deref().unwrap_or("Untitled"),
            viewer
        ))
    }

    fn render_head(&self, _ctx: &SerializeContext<'_>) -> Result<String, RenderError> {
        Ok("<title>Posts</title>".to_string())
    }

    fn extract_state(&self) -> Result<String, RenderError> {
        Ok(format!("{{\"path\":\"{}\"}}", self.path))
    }

    fn request_status(&self) -> RequestStatus {
        match self.behaviour.redirect {
            Some(url) => RequestStatus::redirect(url, Some(StatusCode::MOVED_PERMANENTLY)),
            None => RequestStatus::none(),
        }
    }
}

#[derive(Default)]
struct CountingFactory {
    behaviour: Behaviour,
    created: AtomicUsize,
}

impl CountingFactory {
    fn new(behaviour: Behaviour) -> Arc<Self> {
        Arc::new(Self {
            behaviour,
            created: AtomicUsize::new(0),
        })
    }

    fn renders(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl RenderTreeFactory for CountingFactory {
    fn create(&self, request: &RenderRequest, user: Option<&UserRef>) -> Box<dyn RenderTree> {
        self.created.fetch_add(1, Ordering::SeqCst);
        Box::new(PostTree {
            behaviour: self.behaviour.clone(),
            path: request.path().to_string(),
            viewer: user.map(|u| u.id.clone()),
            title: None,
        })
    }
}

fn service(factory: Arc<CountingFactory>, config: SsrConfig) -> PageService {
    let store = InMemoryUserStore::new().with_user("tok-alice", UserRef::new("alice"));
    PageService::from_config(&config, Arc::new(TokenIdentityResolver::new(store)), factory)
}

fn anonymous(path: &str) -> RenderRequest {
    RenderRequest::get(path)
}

fn identified(path: &str) -> RenderRequest {
    RenderRequest::builder(path)
        .header("cookie", "loginToken=tok-alice")
        .build()
}

fn sink() -> ResponseSink<Vec<ResponseFrame>, std::convert::Infallible> {
    ResponseSink::new(Vec::new())
}

fn document(frames: &[ResponseFrame]) -> String {
    frames
        .iter()
        .filter_map(|frame| match frame {
            ResponseFrame::Chunk(chunk) => Some(chunk.as_str()),
            ResponseFrame::Head(_) => None,
        })
        .collect()
}

fn head(frames: &[ResponseFrame]) -> &ResponseMeta {
    match &frames[0] {
        ResponseFrame::Head(meta) => meta,
        other => panic!("expected head frame, got {:?}", other),
    }
}

fn header<'a>(meta: &'a ResponseMeta, name: &str) -> Option<&'a str> {
    meta.headers
        .iter()
        .find(|(n, _)| n == name)
        .map(|(_, v)| v.as_str())
}

// === Cache Scenarios ===

#[tokio::test]
async fn test_concurrent_anonymous_requests_share_one_render() {
    let factory = CountingFactory::new(Behaviour {
        delay: Duration::from_millis(50),
        ..Default::default()
    });
    let service = service(Arc::clone(&factory), SsrConfig::default());

    let mut sink_a = sink();
    let mut sink_b = sink();
    let (a, b) = tokio::join!(service.handle(anonymous("/posts/1"), &mut sink_a), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        service.handle(anonymous("/posts/1"), &mut sink_b).await
    });

    assert_eq!(factory.renders(), 1);
    assert_eq!(a.cache_status, CacheStatus::Miss);
    assert_eq!(b.cache_status, CacheStatus::Hit);
    assert_eq!(service.metrics().misses(), 1);
    assert_eq!(service.metrics().hits(), 1);
    assert_eq!(
        document(&sink_a.into_inner()),
        document(&sink_b.into_inner())
    );
    assert_eq!(service.cache().len(), 1);
}

#[tokio::test]
async fn test_identified_request_renders_independently() {
    let factory = CountingFactory::new(Behaviour {
        delay: Duration::from_millis(30),
        ..Default::default()
    });
    let service = service(Arc::clone(&factory), SsrConfig::default());

    let mut sink_a = sink();
    let mut sink_b = sink();
    let mut sink_c = sink();
    let (_, _, c) = tokio::join!(
        service.handle(anonymous("/posts/1"), &mut sink_a),
        service.handle(anonymous("/posts/1"), &mut sink_b),
        service.handle(identified("/posts/1"), &mut sink_c),
    );

    assert_eq!(c.cache_status, CacheStatus::Bypass);
    assert_eq!(factory.renders(), 2);
    assert_eq!(service.metrics().bypasses(), 1);
    assert_eq!(service.metrics().hits() + service.metrics().misses(), 2);
    assert_eq!(service.cache().len(), 1);

    let personal_frames = sink_c.into_inner();
    let personal = document(&personal_frames);
    assert!(personal.contains("for alice"));
    assert_eq!(header(head(&personal_frames), "Cache-Control"), Some("private, no-store"));
    assert!(document(&sink_a.into_inner()).contains("for guest"));
}

#[tokio::test]
async fn test_stored_page_is_served_without_rendering() {
    let factory = CountingFactory::new(Behaviour::default());
    let service = service(Arc::clone(&factory), SsrConfig::default());

    let mut streamed = sink();
    service.handle(anonymous("/posts/1"), &mut streamed).await;
    let mut buffered = sink();
    let report = service.handle(anonymous("/posts/1"), &mut buffered).await;

    assert_eq!(report.cache_status, CacheStatus::Hit);
    assert_eq!(factory.renders(), 1);

    let streamed = streamed.into_inner();
    let buffered = buffered.into_inner();
    assert_eq!(document(&streamed), document(&buffered));
    assert_eq!(header(head(&streamed), "X-Cache-Status"), Some("MISS"));
    assert_eq!(header(head(&buffered), "X-Cache-Status"), Some("HIT"));
    assert_eq!(header(head(&buffered), "Cache-Control"), Some("private, no-cache"));
    assert_eq!(
        header(head(&streamed), "X-Cache-Key"),
        header(head(&buffered), "X-Cache-Key")
    );
}

#[tokio::test]
async fn test_disabled_cache_bypasses_everything() {
    let factory = CountingFactory::new(Behaviour::default());
    let mut config = SsrConfig::default();
    config.cache.enabled = false;
    let service = service(Arc::clone(&factory), config);

    service.handle(anonymous("/posts/1"), &mut sink()).await;
    service.handle(anonymous("/posts/1"), &mut sink()).await;

    assert_eq!(factory.renders(), 2);
    assert_eq!(service.metrics().bypasses(), 2);
    assert!(service.cache().is_empty());
}

// === Document Tests ===

#[tokio::test]
async fn test_document_layout() {
    let service = service(CountingFactory::new(Behaviour::default()), SsrConfig::default());
    let mut sink = sink();

    let report = service.handle(anonymous("/posts/1"), &mut sink).await;
    let frames = sink.into_inner();
    let html = document(&frames);

    assert_eq!(report.outcome, DeliveryOutcome::Delivered);
    assert_eq!(head(&frames).status, StatusCode::OK);

    let title = html.find("<title>Posts</title>").unwrap();
    let style = html.find("<style id=\"ssr-styles\">").unwrap();
    let body = html.find("<body>").unwrap();
    let app = html.find("<div id=\"app-root\"><article class=\"PostsPage-1\">").unwrap();
    let state = html
        .find("<script>window.__APP_STATE__ = {\"path\":\"/posts/1\"};</script>")
        .unwrap();
    assert!(title < style && style < body && body < app && app < state);
}

#[tokio::test]
async fn test_redirect_sets_status_and_omits_body() {
    let factory = CountingFactory::new(Behaviour {
        redirect: Some("/posts/1/slug"),
        ..Default::default()
    });
    let service = service(factory, SsrConfig::default());
    let mut sink = sink();

    let report = service.handle(anonymous("/posts/1"), &mut sink).await;
    let frames = sink.into_inner();

    assert_eq!(report.outcome, DeliveryOutcome::Redirected);
    assert_eq!(report.status, Some(StatusCode::MOVED_PERMANENTLY));
    assert_eq!(frames.len(), 1);
    assert_eq!(head(&frames).location.as_deref(), Some("/posts/1/slug"));
}

#[tokio::test]
async fn test_degraded_render_is_served_but_not_stored() {
    let factory = CountingFactory::new(Behaviour {
        fail_prefetch: true,
        ..Default::default()
    });
    let service = service(Arc::clone(&factory), SsrConfig::default());
    let mut sink = sink();

    let report = service.handle(anonymous("/posts/1"), &mut sink).await;
    let html = document(&sink.into_inner());

    assert_eq!(report.status, Some(StatusCode::OK));
    assert!(html.contains("<title>Posts</title>"));
    assert!(html.contains("Untitled for guest"));
    assert!(service.cache().is_empty());
    assert_eq!(service.metrics().snapshot().degraded_renders, 1);
}

#[tokio::test]
async fn test_timed_out_render_serves_empty_page() {
    let factory = CountingFactory::new(Behaviour {
        delay: Duration::from_millis(200),
        ..Default::default()
    });
    let mut config = SsrConfig::default();
    config.render.timeout_ms = Some(10);
    let service = service(factory, config);
    let mut sink = sink();

    let report = service.handle(anonymous("/posts/1"), &mut sink).await;
    let html = document(&sink.into_inner());

    assert_eq!(report.outcome, DeliveryOutcome::Delivered);
    assert_eq!(report.status, Some(StatusCode::OK));
    assert!(html.contains("<div id=\"app-root\"></div>"));
    assert!(service.cache().is_empty());
}

#[tokio::test]
async fn test_panicking_render_serves_empty_page_for_every_request_class() {
    let factory = CountingFactory::new(Behaviour {
        panic_body: true,
        ..Default::default()
    });
    let service = service(factory, SsrConfig::default());

    for request in [anonymous("/posts/1"), identified("/posts/1")] {
        let mut sink = sink();
        let report = service.handle(request, &mut sink).await;
        let frames = sink.into_inner();

        assert_eq!(report.outcome, DeliveryOutcome::Delivered);
        assert_eq!(report.status, Some(StatusCode::OK));
        assert_eq!(head(&frames).status, StatusCode::OK);
        assert!(document(&frames).contains("<div id=\"app-root\"></div>"));
    }
    assert!(service.cache().is_empty());
}

// === Delivery Failure Tests ===

#[tokio::test]
async fn test_disconnect_is_reported_and_render_still_stored() {
    let factory = CountingFactory::new(Behaviour::default());
    let service = service(Arc::clone(&factory), SsrConfig::default());

    let (tx, rx) = mpsc::unbounded::<ResponseFrame>();
    drop(rx);
    let mut sink = ResponseSink::new(tx);

    let report = service.handle(anonymous("/posts/1"), &mut sink).await;

    assert_eq!(report.outcome, DeliveryOutcome::Disconnected);
    assert_eq!(report.status, None);
    assert_eq!(service.metrics().snapshot().disconnects, 1);
    assert_eq!(service.cache().len(), 1);
}

//! HTTP routes and the bridge from [`ResponseFrame`]s to axum responses.

use std::convert::Infallible;
use std::sync::Arc;

use axum::body::Body;
use axum::extract::{Request, State};
use axum::http::{header, Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use futures::channel::mpsc;
use futures::{future, StreamExt};
use ssr_core::RenderRequest;
use ssr_render::PageService;
use ssr_streaming::{ResponseFrame, ResponseMeta, ResponseSink};
use tracing::{debug, warn};

/// Frames buffered between the render task and the client.
const FRAME_BUFFER: usize = 16;

/// Build the application router.
pub fn router(service: Arc<PageService>) -> Router {
    Router::new()
        .route("/_ssr/health", get(health))
        .route("/_ssr/metrics", get(metrics))
        .fallback(render)
        .with_state(service)
}

async fn health() -> &'static str {
    "OK"
}

async fn metrics(State(service): State<Arc<PageService>>) -> Response {
    (
        [(header::CONTENT_TYPE, "application/json")],
        service.metrics().snapshot().to_json(),
    )
        .into_response()
}

async fn render(State(service): State<Arc<PageService>>, request: Request) -> Response {
    if request.method() != Method::GET && request.method() != Method::HEAD {
        return StatusCode::METHOD_NOT_ALLOWED.into_response();
    }

    let render_request = to_render_request(&request);
    let (tx, mut rx) = mpsc::channel::<ResponseFrame>(FRAME_BUFFER);

    tokio::spawn(async move {
        let mut sink = ResponseSink::new(tx);
        let report = service.handle(render_request, &mut sink).await;
        debug!(
            request_id = %report.request_id,
            outcome = ?report.outcome,
            cache_status = %report.cache_status,
            "request handled"
        );
    });

    let meta = match rx.next().await {
        Some(ResponseFrame::Head(meta)) => meta,
        _ => {
            warn!("response ended before its head was written");
            return StatusCode::INTERNAL_SERVER_ERROR.into_response();
        }
    };

    let chunks = rx.filter_map(|frame| {
        future::ready(match frame {
            ResponseFrame::Chunk(chunk) => Some(Ok::<_, Infallible>(chunk)),
            ResponseFrame::Head(_) => None,
        })
    });

    build_response(&meta, Body::from_stream(chunks))
}

fn to_render_request(request: &Request) -> RenderRequest {
    let target = request
        .uri()
        .path_and_query()
        .map(|pq| pq.as_str())
        .unwrap_or("/");

    let mut builder = RenderRequest::builder(target).method(request.method().clone());
    for (name, value) in request.headers() {
        if let Ok(value) = value.to_str() {
            builder = builder.header(name.as_str(), value);
        }
    }
    builder.build()
}

fn build_response(meta: &ResponseMeta, body: Body) -> Response {
    let mut response = Response::builder()
        .status(meta.status)
        .header(header::CONTENT_TYPE, "text/html; charset=utf-8");
    if let Some(location) = &meta.location {
        response = response.header(header::LOCATION, location.as_str());
    }
    for (name, value) in &meta.headers {
        response = response.header(name.as_str(), value.as_str());
    }

    match response.body(body) {
        Ok(response) => response,
        Err(e) => {
            warn!(error = %e, "invalid response head");
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

//! Head/body streaming sink.

use std::fmt::Display;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::stream::FuturesOrdered;
use futures::{Sink, SinkExt, StreamExt};
use ssr_core::{StatusCode, TimingContext};
use thiserror::Error;

use crate::flush::{FlushController, FlushPolicy};
use crate::section::{Section, SectionContent};
use crate::shell::DocumentShell;

/// Errors raised by a stream sink.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StreamError {
    /// Downstream write failed; the response is over.
    #[error("downstream write failed: {0}")]
    Write(String),

    /// Status or headers changed after the response head was sent.
    #[error("response head already committed")]
    HeadCommitted,

    /// The sink already finished.
    #[error("sink already completed")]
    Completed,
}

/// Status line and headers of a response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResponseMeta {
    /// Response status.
    pub status: StatusCode,
    /// Redirect target.
    pub location: Option<String>,
    /// Extra headers, in insertion order.
    pub headers: Vec<(String, String)>,
}

impl ResponseMeta {
    /// Check if this head redirects the client.
    pub fn is_redirect(&self) -> bool {
        self.location.is_some() && self.status.is_redirection()
    }
}

/// One frame written downstream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ResponseFrame {
    /// Response head; always the first frame.
    Head(ResponseMeta),
    /// Document bytes.
    Chunk(String),
}

#[derive(Debug, Default)]
struct ControlState {
    status: Option<StatusCode>,
    location: Option<String>,
    headers: Vec<(String, String)>,
    committed: bool,
}

/// Cloneable handle to the response head.
///
/// Lets lazy sources set status, redirect or headers until the head is
/// committed.
#[derive(Debug, Clone, Default)]
pub struct ResponseControl {
    state: Arc<Mutex<ControlState>>,
}

impl ResponseControl {
    fn lock(&self) -> MutexGuard<'_, ControlState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open(&self) -> Result<MutexGuard<'_, ControlState>, StreamError> {
        let state = self.lock();
        if state.committed {
            return Err(StreamError::HeadCommitted);
        }
        Ok(state)
    }

    /// Override the default 200 status.
    pub fn set_status_code(&self, status: StatusCode) -> Result<(), StreamError> {
        self.open()?.status = Some(status);
        Ok(())
    }

    /// Redirect to `url` with `status`, or 301 when none is given.
    pub fn redirect(&self, url: &str, status: Option<StatusCode>) -> Result<(), StreamError> {
        let mut state = self.open()?;
        state.location = Some(url.to_string());
        state.status = Some(status.unwrap_or(StatusCode::MOVED_PERMANENTLY));
        Ok(())
    }

    /// Add a response header.
    pub fn insert_header(&self, name: impl Into<String>, value: impl Into<String>) -> Result<(), StreamError> {
        self.open()?.headers.push((name.into(), value.into()));
        Ok(())
    }

    /// Check if the head has been sent.
    pub fn is_committed(&self) -> bool {
        self.lock().committed
    }

    /// Current head, without committing it.
    pub fn meta(&self) -> ResponseMeta {
        Self::meta_of(&self.lock())
    }

    fn commit(&self) -> ResponseMeta {
        let mut state = self.lock();
        state.committed = true;
        Self::meta_of(&state)
    }

    fn meta_of(state: &ControlState) -> ResponseMeta {
        ResponseMeta {
            status: state.status.unwrap_or(StatusCode::OK),
            location: state.location.clone(),
            headers: state.headers.clone(),
        }
    }
}

/// Outbound response for one request.
///
/// Head and body segments are appended in order; the sink may flush them
/// independently. Status and redirect default to 200 with no redirect.
pub trait StreamSink {
    /// Append a segment inside `<head>`.
    fn append_to_head(&mut self, content: SectionContent) -> Result<(), StreamError>;

    /// Append a segment inside `<body>`.
    fn append_to_body(&mut self, content: SectionContent) -> Result<(), StreamError>;

    /// Override the response status.
    fn set_status_code(&mut self, status: StatusCode) -> Result<(), StreamError> {
        self.control().set_status_code(status)
    }

    /// Redirect the client. Implies 301 unless `status` is given; a later
    /// `set_status_code` overrides it.
    fn redirect(&mut self, url: &str, status: Option<StatusCode>) -> Result<(), StreamError> {
        self.control().redirect(url, status)
    }

    /// Add a response header.
    fn insert_header(&mut self, name: &str, value: &str) -> Result<(), StreamError> {
        self.control().insert_header(name, value)
    }

    /// Handle for changing the head from inside lazy sources.
    fn control(&self) -> ResponseControl;
}

/// State of the response sink.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SinkState {
    /// Accepting segments.
    Collecting,
    /// Finished or failed.
    Completed,
}

/// Summary of a finished response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkReport {
    /// Committed status.
    pub status: StatusCode,
    /// Whether the response was a redirect without a document.
    pub redirected: bool,
    /// Document bytes written.
    pub bytes_written: usize,
    /// Chunk frames written.
    pub chunks: usize,
    /// Segments resolved and written.
    pub segments: usize,
}

/// [`StreamSink`] over any `futures::Sink<ResponseFrame>`.
///
/// Segments are collected until [`finish`](Self::finish), which drives every
/// source concurrently and writes them in call order:
///
/// ```text
/// Head | shell opening | head segments | </head><body> | body segments | shell closing
/// ```
///
/// The head frame is committed once the first segment resolves, so lazy
/// sources that resolve first can still change status or redirect. A
/// redirect omits the document.
///
/// Nothing is written downstream before that first segment resolves, shell
/// opening included. When the first head segment waits on a whole render,
/// time to first byte is the render time; later segments still stream as
/// they become ready.
pub struct ResponseSink<S, E>
where
    S: Sink<ResponseFrame, Error = E> + Unpin,
    E: Display,
{
    inner: S,
    state: SinkState,
    shell: DocumentShell,
    head: Vec<SectionContent>,
    body: Vec<SectionContent>,
    control: ResponseControl,
    flush: FlushController,
    timing: TimingContext,
    buffer: String,
    report: SinkReport,
}

impl<S, E> ResponseSink<S, E>
where
    S: Sink<ResponseFrame, Error = E> + Unpin,
    E: Display,
{
    /// Create a sink with the default shell and flush policy.
    pub fn new(sink: S) -> Self {
        Self {
            inner: sink,
            state: SinkState::Collecting,
            shell: DocumentShell::default(),
            head: Vec::new(),
            body: Vec::new(),
            control: ResponseControl::default(),
            flush: FlushController::default(),
            timing: TimingContext::new(),
            buffer: String::new(),
            report: SinkReport {
                status: StatusCode::OK,
                redirected: false,
                bytes_written: 0,
                chunks: 0,
                segments: 0,
            },
        }
    }

    /// Use a custom document shell.
    pub fn with_shell(mut self, shell: DocumentShell) -> Self {
        self.shell = shell;
        self
    }

    /// Use a custom flush controller.
    pub fn with_flush(mut self, flush: FlushController) -> Self {
        self.flush = flush;
        self
    }

    /// Use a flush policy with no buffer cap.
    pub fn with_flush_policy(self, policy: FlushPolicy) -> Self {
        self.with_flush(FlushController::new(policy))
    }

    /// Resolve every segment and write the response.
    ///
    /// A failed downstream write ends the response with
    /// [`StreamError::Write`]; the sink is completed either way.
    pub async fn finish(&mut self) -> Result<SinkReport, StreamError> {
        if self.state == SinkState::Completed {
            return Err(StreamError::Completed);
        }
        self.state = SinkState::Completed;

        let head_count = self.head.len();
        let mut sources: FuturesOrdered<_> = self
            .head
            .drain(..)
            .chain(self.body.drain(..))
            .map(SectionContent::into_source)
            .collect();

        let mut next = sources.next().await;

        let meta = self.control.commit();
        self.report.status = meta.status;
        self.report.redirected = meta.is_redirect();
        let redirected = meta.is_redirect();
        self.send(ResponseFrame::Head(meta)).await?;
        self.timing.mark("head_committed");

        if redirected {
            self.timing.mark("complete");
            return Ok(self.report.clone());
        }

        let opening = self.shell.render_opening();
        self.write(&opening, false).await?;
        if head_count == 0 {
            self.write(self.shell.render_head_end(), true).await?;
        }

        let mut written = 0;
        while let Some(segment) = next {
            self.write(&segment, false).await?;
            written += 1;
            self.report.segments = written;
            if written == head_count {
                self.write(self.shell.render_head_end(), true).await?;
            }
            next = sources.next().await;
        }

        self.write(self.shell.render_closing(), true).await?;
        self.timing.mark("complete");

        Ok(self.report.clone())
    }

    /// Get timing context reference.
    pub fn timing(&self) -> &TimingContext {
        &self.timing
    }

    /// Check if the sink has finished.
    pub fn is_completed(&self) -> bool {
        self.state == SinkState::Completed
    }

    /// Consume the sink and return the inner value.
    pub fn into_inner(self) -> S {
        self.inner
    }

    fn append(&mut self, section: Section, content: SectionContent) -> Result<(), StreamError> {
        if self.state == SinkState::Completed {
            return Err(StreamError::Completed);
        }
        match section {
            Section::Head => self.head.push(content),
            Section::Body => self.body.push(content),
        }
        Ok(())
    }

    async fn write(&mut self, markup: &str, at_boundary: bool) -> Result<(), StreamError> {
        self.buffer.push_str(markup);
        self.flush.add_bytes(markup.len());

        if self.flush.should_flush(at_boundary) {
            let chunk = std::mem::take(&mut self.buffer);
            self.flush.reset();
            self.report.bytes_written += chunk.len();
            self.report.chunks += 1;
            if self.report.chunks == 1 {
                self.timing.mark("first_chunk");
            }
            self.send(ResponseFrame::Chunk(chunk)).await?;
        }
        Ok(())
    }

    async fn send(&mut self, frame: ResponseFrame) -> Result<(), StreamError> {
        if let Err(e) = self.inner.send(frame).await {
            tracing::debug!(error = %e, "downstream write failed");
            return Err(StreamError::Write(e.to_string()));
        }
        Ok(())
    }
}

impl<S, E> StreamSink for ResponseSink<S, E>
where
    S: Sink<ResponseFrame, Error = E> + Unpin,
    E: Display,
{
    fn append_to_head(&mut self, content: SectionContent) -> Result<(), StreamError> {
        self.append(Section::Head, content)
    }

    fn append_to_body(&mut self, content: SectionContent) -> Result<(), StreamError> {
        self.append(Section::Body, content)
    }

    fn control(&self) -> ResponseControl {
        self.control.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures::channel::{mpsc, oneshot};
    use std::time::Duration;

    fn document(frames: &[ResponseFrame]) -> String {
        frames
            .iter()
            .filter_map(|frame| match frame {
                ResponseFrame::Chunk(chunk) => Some(chunk.as_str()),
                ResponseFrame::Head(_) => None,
            })
            .collect()
    }

    fn head_of(frames: &[ResponseFrame]) -> &ResponseMeta {
        match &frames[0] {
            ResponseFrame::Head(meta) => meta,
            other => panic!("expected head frame, got {:?}", other),
        }
    }

    // === Ordering Tests ===

    #[tokio::test]
    async fn test_ready_segments_in_order() {
        let mut sink = ResponseSink::new(Vec::<ResponseFrame>::new());
        sink.append_to_head("<title>t</title>".into()).unwrap();
        sink.append_to_body("<div>a</div>".into()).unwrap();
        sink.append_to_body("<script>s</script>".into()).unwrap();
        sink.append_to_head("<style>x</style>".into()).unwrap();

        let report = sink.finish().await.unwrap();
        let frames = sink.into_inner();
        let html = document(&frames);

        assert_eq!(head_of(&frames).status, StatusCode::OK);
        assert_eq!(report.segments, 4);
        assert!(html.starts_with("<!DOCTYPE html>\n"));
        let title = html.find("<title>").unwrap();
        let style = html.find("<style>").unwrap();
        let head_end = html.find("</head>\n<body>\n").unwrap();
        let div = html.find("<div>a</div>").unwrap();
        let script = html.find("<script>").unwrap();
        assert!(title < style && style < head_end && head_end < div && div < script);
        assert!(html.ends_with("</body>\n</html>\n"));
    }

    #[tokio::test]
    async fn test_lazy_and_ready_are_byte_identical() {
        let mut buffered = ResponseSink::new(Vec::<ResponseFrame>::new());
        buffered.append_to_head("<title>t</title>".into()).unwrap();
        buffered.append_to_body("<div>a</div>".into()).unwrap();
        buffered.finish().await.unwrap();

        let mut streamed = ResponseSink::new(Vec::<ResponseFrame>::new());
        streamed
            .append_to_head(SectionContent::lazy(async {
                tokio::time::sleep(Duration::from_millis(10)).await;
                "<title>t</title>".to_string()
            }))
            .unwrap();
        streamed
            .append_to_body(SectionContent::lazy(async { "<div>a</div>".to_string() }))
            .unwrap();
        streamed.finish().await.unwrap();

        assert_eq!(
            document(&buffered.into_inner()),
            document(&streamed.into_inner())
        );
    }

    #[tokio::test]
    async fn test_lazy_sources_run_concurrently() {
        let (tx, rx) = oneshot::channel::<String>();
        let mut sink = ResponseSink::new(Vec::<ResponseFrame>::new());

        // The head segment waits on a value only the later body segment sends.
        sink.append_to_head(SectionContent::lazy(async move {
            rx.await.unwrap_or_default()
        }))
        .unwrap();
        sink.append_to_body(SectionContent::lazy(async move {
            let _ = tx.send("<meta name=\"x\">".to_string());
            "<p>body</p>".to_string()
        }))
        .unwrap();

        sink.finish().await.unwrap();
        let html = document(&sink.into_inner());
        assert!(html.find("<meta name=\"x\">").unwrap() < html.find("<p>body</p>").unwrap());
    }

    #[tokio::test]
    async fn test_nothing_written_before_first_segment() {
        let (gate_tx, gate_rx) = oneshot::channel::<()>();
        let (tx, mut rx) = mpsc::unbounded::<ResponseFrame>();
        let mut sink = ResponseSink::new(tx);
        sink.append_to_head(SectionContent::lazy(async move {
            let _ = gate_rx.await;
            "<title>t</title>".to_string()
        }))
        .unwrap();
        sink.append_to_body("<p>ready</p>".into()).unwrap();

        let (report, _) = tokio::join!(sink.finish(), async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            assert!(rx.try_next().is_err());
            let _ = gate_tx.send(());
        });

        assert_eq!(report.unwrap().segments, 2);
        assert!(matches!(rx.try_next(), Ok(Some(ResponseFrame::Head(_)))));
    }

    #[tokio::test]
    async fn test_section_boundary_coalesces() {
        let mut sink = ResponseSink::new(Vec::<ResponseFrame>::new()).with_flush_policy(FlushPolicy::SectionBoundary);
        sink.append_to_head("<title>t</title>".into()).unwrap();
        sink.append_to_body("<p>1</p>".into()).unwrap();
        sink.append_to_body("<p>2</p>".into()).unwrap();

        let report = sink.finish().await.unwrap();
        assert_eq!(report.chunks, 2);

        let frames = sink.into_inner();
        match &frames[1] {
            ResponseFrame::Chunk(chunk) => assert!(chunk.ends_with("</head>\n<body>\n")),
            other => panic!("unexpected frame {:?}", other),
        }
    }

    // === Status Tests ===

    #[tokio::test]
    async fn test_redirect_omits_document() {
        let mut sink = ResponseSink::new(Vec::<ResponseFrame>::new());
        sink.set_status_code(StatusCode::MOVED_PERMANENTLY).unwrap();
        sink.redirect("/posts/1/slug", Some(StatusCode::MOVED_PERMANENTLY))
            .unwrap();

        let report = sink.finish().await.unwrap();
        let frames = sink.into_inner();

        assert!(report.redirected);
        assert_eq!(frames.len(), 1);
        let meta = head_of(&frames);
        assert_eq!(meta.status, StatusCode::MOVED_PERMANENTLY);
        assert_eq!(meta.location.as_deref(), Some("/posts/1/slug"));
    }

    #[test]
    fn test_redirect_defaults_to_301_and_can_be_overridden() {
        let control = ResponseControl::default();
        control.redirect("/next", None).unwrap();
        assert_eq!(control.meta().status, StatusCode::MOVED_PERMANENTLY);

        control.set_status_code(StatusCode::FOUND).unwrap();
        assert_eq!(control.meta().status, StatusCode::FOUND);
        assert_eq!(control.meta().location.as_deref(), Some("/next"));
    }

    #[tokio::test]
    async fn test_lazy_source_sets_status_before_commit() {
        let mut sink = ResponseSink::new(Vec::<ResponseFrame>::new());
        let control = sink.control();
        sink.append_to_head(SectionContent::lazy(async move {
            control.set_status_code(StatusCode::NOT_FOUND).unwrap();
            "<title>missing</title>".to_string()
        }))
        .unwrap();

        sink.finish().await.unwrap();
        assert_eq!(head_of(&sink.into_inner()).status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_status_after_commit_fails() {
        let mut sink = ResponseSink::new(Vec::<ResponseFrame>::new());
        sink.finish().await.unwrap();

        assert_eq!(
            sink.set_status_code(StatusCode::NOT_FOUND),
            Err(StreamError::HeadCommitted)
        );
        assert_eq!(
            sink.append_to_body("late".into()),
            Err(StreamError::Completed)
        );
        assert_eq!(sink.finish().await, Err(StreamError::Completed));
    }

    // === Failure Tests ===

    #[tokio::test]
    async fn test_write_failure_is_reported() {
        let (tx, rx) = mpsc::unbounded::<ResponseFrame>();
        drop(rx);

        let mut sink = ResponseSink::new(tx);
        sink.append_to_body("<p>lost</p>".into()).unwrap();

        assert!(matches!(sink.finish().await, Err(StreamError::Write(_))));
        assert!(sink.is_completed());
    }
}

//! Segments of the document head and body.

use std::future::Future;

use futures::future::{BoxFuture, FutureExt};

/// Section of the document a segment is appended to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Section {
    /// Inside `<head>`.
    Head,
    /// Inside `<body>`.
    Body,
}

impl std::fmt::Display for Section {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Head => write!(f, "head"),
            Self::Body => write!(f, "body"),
        }
    }
}

/// Markup for one segment, available now or later.
pub enum SectionContent {
    /// Markup that is already available.
    Ready(String),
    /// Markup produced by an asynchronous source.
    Lazy(BoxFuture<'static, String>),
}

impl SectionContent {
    /// Content that is already available.
    pub fn ready(markup: impl Into<String>) -> Self {
        Self::Ready(markup.into())
    }

    /// Content resolved by `source`.
    pub fn lazy<F>(source: F) -> Self
    where
        F: Future<Output = String> + Send + 'static,
    {
        Self::Lazy(source.boxed())
    }

    /// Check if the content is available without waiting.
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready(_))
    }

    /// Future yielding the markup.
    pub fn into_source(self) -> BoxFuture<'static, String> {
        match self {
            Self::Ready(markup) => futures::future::ready(markup).boxed(),
            Self::Lazy(source) => source,
        }
    }
}

impl From<String> for SectionContent {
    fn from(markup: String) -> Self {
        Self::Ready(markup)
    }
}

impl From<&str> for SectionContent {
    fn from(markup: &str) -> Self {
        Self::Ready(markup.to_string())
    }
}

impl std::fmt::Debug for SectionContent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Ready(markup) => f.debug_tuple("Ready").field(markup).finish(),
            Self::Lazy(_) => f.write_str("Lazy(..)"),
        }
    }
}

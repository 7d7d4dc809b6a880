//! Demo site: a post index and post pages.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use ssr_core::{RenderError, RenderRequest, RequestStatus, StatusCode, UserRef};
use ssr_render::{PrefetchContext, RenderTree, RenderTreeFactory, SerializeContext};

/// Simulated data-source latency.
const QUERY_LATENCY: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
struct Post {
    id: u32,
    slug: &'static str,
    title: &'static str,
    body: &'static str,
}

const POSTS: &[Post] = &[
    Post {
        id: 1,
        slug: "hello-world",
        title: "Hello, world",
        body: "The first post, rendered on the server.",
    },
    Post {
        id: 2,
        slug: "shared-renders",
        title: "Shared renders",
        body: "Anonymous visitors share one render per page.",
    },
];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Route {
    Index,
    Post { id: u32, slug: Option<String> },
    NotFound,
}

impl Route {
    fn parse(path: &str) -> Self {
        let segments: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match segments.as_slice() {
            [] => Route::Index,
            ["posts", id] => match id.parse() {
                Ok(id) => Route::Post { id, slug: None },
                Err(_) => Route::NotFound,
            },
            ["posts", id, slug] => match id.parse() {
                Ok(id) => Route::Post {
                    id,
                    slug: Some(slug.to_string()),
                },
                Err(_) => Route::NotFound,
            },
            _ => Route::NotFound,
        }
    }
}

/// Factory for demo pages.
#[derive(Debug, Clone)]
pub struct DemoSite {
    posts: Arc<[Post]>,
}

impl DemoSite {
    pub fn new() -> Self {
        Self {
            posts: Arc::from(POSTS),
        }
    }
}

impl Default for DemoSite {
    fn default() -> Self {
        Self::new()
    }
}

impl RenderTreeFactory for DemoSite {
    fn create(&self, request: &RenderRequest, user: Option<&UserRef>) -> Box<dyn RenderTree> {
        Box::new(DemoPage {
            posts: Arc::clone(&self.posts),
            route: Route::parse(request.path()),
            viewer: user.map(|u| u.display_name.clone().unwrap_or_else(|| u.id.clone())),
            loaded: Vec::new(),
            status: RequestStatus::none(),
        })
    }
}

struct DemoPage {
    posts: Arc<[Post]>,
    route: Route,
    viewer: Option<String>,
    loaded: Vec<Post>,
    status: RequestStatus,
}

#[async_trait]
impl RenderTree for DemoPage {
    async fn prefetch(&mut self, _ctx: &PrefetchContext<'_>) -> Result<(), RenderError> {
        tokio::time::sleep(QUERY_LATENCY).await;

        match &self.route {
            Route::Index => self.loaded = self.posts.to_vec(),
            Route::Post { id, slug } => match self.posts.iter().find(|p| p.id == *id) {
                Some(post) if slug.as_deref() == Some(post.slug) => self.loaded = vec![post.clone()],
                Some(post) => {
                    self.status = RequestStatus::redirect(
                        format!("/posts/{}/{}", post.id, post.slug),
                        Some(StatusCode::MOVED_PERMANENTLY),
                    );
                }
                None => self.status = RequestStatus::with_status(StatusCode::NOT_FOUND),
            },
            Route::NotFound => self.status = RequestStatus::with_status(StatusCode::NOT_FOUND),
        }
        Ok(())
    }

    fn render_body(&self, ctx: &mut SerializeContext<'_>) -> Result<String, RenderError> {
        let header_class = ctx.styles().class_for("Header", "font-weight: bold;");
        let mut html = format!(
            "<header class=\"{}\">Signed in as {}</header>",
            header_class,
            escape(self.viewer.as_deref().unwrap_or("guest"))
        );

        if self.status.status == Some(StatusCode::NOT_FOUND) {
            html.push_str("<main><h1>Not found</h1></main>");
            return Ok(html);
        }

        let post_class = ctx.styles().class_for("Post", "margin: 16px 0;");
        html.push_str("<main>");
        for post in &self.loaded {
            html.push_str(&format!(
                "<article class=\"{}\"><h2><a href=\"/posts/{}/{}\">{}</a></h2><p>{}</p></article>",
                post_class,
                post.id,
                post.slug,
                escape(post.title),
                escape(post.body)
            ));
        }
        html.push_str("</main>");
        Ok(html)
    }

    fn render_head(&self, _ctx: &SerializeContext<'_>) -> Result<String, RenderError> {
        let title = match (&self.route, self.loaded.as_slice()) {
            (Route::Post { .. }, [post]) => post.title,
            (Route::Index, _) => "Posts",
            _ => "Not found",
        };
        Ok(format!("<title>{}</title>", escape(title)))
    }

    fn extract_state(&self) -> Result<String, RenderError> {
        let posts: Vec<_> = self
            .loaded
            .iter()
            .map(|p| json!({ "id": p.id, "slug": p.slug, "title": p.title }))
            .collect();
        serde_json::to_string(&json!({ "posts": posts }))
            .map_err(|e| RenderError::Serialize(e.to_string()))
    }

    fn request_status(&self) -> RequestStatus {
        self.status.clone()
    }
}

fn escape(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn prefetched(path: &str) -> Box<dyn RenderTree> {
        let request = RenderRequest::get(path);
        let mut tree = DemoSite::new().create(&request, None);
        tree.prefetch(&PrefetchContext::new(&request, None)).await.unwrap();
        tree
    }

    #[test]
    fn test_route_parse() {
        assert_eq!(Route::parse("/"), Route::Index);
        assert_eq!(Route::parse("/posts/2"), Route::Post { id: 2, slug: None });
        assert_eq!(
            Route::parse("/posts/2/shared-renders"),
            Route::Post {
                id: 2,
                slug: Some("shared-renders".to_string())
            }
        );
        assert_eq!(Route::parse("/posts/abc"), Route::NotFound);
        assert_eq!(Route::parse("/about"), Route::NotFound);
    }

    #[tokio::test]
    async fn test_post_without_slug_redirects() {
        let tree = prefetched("/posts/1").await;
        let status = tree.request_status();
        assert_eq!(status.redirect_url.as_deref(), Some("/posts/1/hello-world"));
        assert_eq!(status.status, Some(StatusCode::MOVED_PERMANENTLY));
    }

    #[tokio::test]
    async fn test_unknown_post_is_not_found() {
        let request = RenderRequest::get("/posts/99/missing");
        let tree = prefetched("/posts/99/missing").await;
        assert_eq!(tree.request_status().status, Some(StatusCode::NOT_FOUND));

        let mut ctx = SerializeContext::new(&request, None);
        assert!(tree.render_body(&mut ctx).unwrap().contains("Not found"));
    }

    #[tokio::test]
    async fn test_index_lists_posts() {
        let request = RenderRequest::get("/");
        let tree = prefetched("/").await;
        let mut ctx = SerializeContext::new(&request, None);

        let body = tree.render_body(&mut ctx).unwrap();
        assert!(body.contains("Hello, world"));
        assert!(body.contains("Signed in as guest"));
        assert_eq!(ctx.into_styles().len(), 2);
        assert!(tree.extract_state().unwrap().contains("\"slug\":\"shared-renders\""));
    }
}

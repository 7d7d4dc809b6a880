//! Document shell.

/// Markup surrounding the head and body segments of a page.
#[derive(Debug, Clone)]
pub struct DocumentShell {
    /// Include doctype declaration.
    pub doctype: bool,
    /// Value of the `lang` attribute on `<html>`.
    pub lang: Option<String>,
    /// `<meta name=.. content=..>` tags emitted after the charset.
    pub meta: Vec<(String, String)>,
}

impl Default for DocumentShell {
    fn default() -> Self {
        Self {
            doctype: true,
            lang: Some("en".to_string()),
            meta: vec![(
                "viewport".to_string(),
                "width=device-width, initial-scale=1".to_string(),
            )],
        }
    }
}

impl DocumentShell {
    /// Shell with doctype, `lang="en"`, charset and viewport meta.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the document language.
    pub fn with_lang(mut self, lang: impl Into<String>) -> Self {
        self.lang = Some(lang.into());
        self
    }

    /// Add a meta tag.
    pub fn with_meta(mut self, name: &str, content: &str) -> Self {
        self.meta.push((name.to_string(), content.to_string()));
        self
    }

    /// Everything before the head segments.
    pub fn render_opening(&self) -> String {
        let mut html = String::new();

        if self.doctype {
            html.push_str("<!DOCTYPE html>\n");
        }

        match &self.lang {
            Some(lang) => html.push_str(&format!("<html lang=\"{}\">\n", lang)),
            None => html.push_str("<html>\n"),
        }
        html.push_str("<head>\n<meta charset=\"utf-8\">\n");

        for (name, content) in &self.meta {
            html.push_str(&format!(r#"<meta name="{}" content="{}">"#, name, content));
            html.push('\n');
        }

        html
    }

    /// Markup between the head and body segments.
    pub fn render_head_end(&self) -> &'static str {
        "</head>\n<body>\n"
    }

    /// Everything after the body segments.
    pub fn render_closing(&self) -> &'static str {
        "</body>\n</html>\n"
    }
}

//! The HTML page served to a browser before its peer connects.
//!
//! A [`PageTemplate`] is filled in by plugins and by the application's page
//! builder, then [`PageTemplate::render`] embeds the session id, the bridge
//! path and the bootstrap script that turns the browser into a tether peer.

use std::fmt::Write as _;

use tether_core::SessionId;

/// Document skeleton with `{{name}}` placeholders.
const PAGE_SKELETON: &str = include_str!("../../assets/page.html");

/// Script that opens the bridge socket and runs incoming commands.
pub const BOOTSTRAP_SCRIPT: &str = include_str!("../../assets/bootstrap.js");

/// Mutable description of the page a session will load.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PageTemplate {
    /// Plain-text document title; escaped on render.
    pub title: String,
    /// Raw HTML fragments appended to `<head>`, in order.
    pub head: Vec<String>,
    /// Raw HTML fragments appended to `<body>`, in order.
    pub body: Vec<String>,
}

impl PageTemplate {
    pub fn new(title: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            ..Self::default()
        }
    }

    /// Appends an inline stylesheet to `<head>`.
    pub fn add_style(&mut self, css: &str) {
        self.head.push(format!("<style>\n{css}\n</style>"));
    }

    /// Appends an inline script to `<head>`; it runs before the peer connects.
    pub fn add_script(&mut self, js: &str) {
        self.head.push(format!("<script>\n{js}\n</script>"));
    }

    /// Appends raw HTML to `<body>`.
    pub fn add_body(&mut self, html: impl Into<String>) {
        self.body.push(html.into());
    }

    /// Produces the final document for `session`.
    ///
    /// Inserted text is never rescanned, so a fragment containing `{{...}}`
    /// is emitted verbatim.
    pub fn render(&self, session: &SessionId, bridge_path: &str) -> String {
        let title = escape_html(&self.title);
        let head = self.head.join("\n");
        let body = self.body.join("\n");
        substitute(PAGE_SKELETON, |name| match name {
            "title" => Some(title.as_str()),
            "head" => Some(head.as_str()),
            "body" => Some(body.as_str()),
            "session" => Some(session.as_str()),
            "bridge_path" => Some(bridge_path),
            "bootstrap" => Some(BOOTSTRAP_SCRIPT),
            _ => None,
        })
    }
}

/// Single-pass `{{name}}` substitution.  Unknown placeholders are kept.
fn substitute<'a>(template: &str, lookup: impl Fn(&str) -> Option<&'a str>) -> String {
    let mut out = String::with_capacity(template.len() + 4096);
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        match after.find("}}") {
            Some(end) => {
                let name = &after[..end];
                match lookup(name) {
                    Some(value) => out.push_str(value),
                    None => {
                        let _ = write!(out, "{{{{{name}}}}}");
                    }
                }
                rest = &after[end + 2..];
            }
            None => {
                out.push_str(&rest[start..]);
                rest = "";
            }
        }
    }
    out.push_str(rest);
    out
}

fn escape_html(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            other => out.push(other),
        }
    }
    out
}

// ── Tests ─────────────────────────────────────────────────────────────────────

//! Markdown to safe HTML for message bodies.
//!
//! Message text comes from users and from model output. It is rendered with
//! pulldown-cmark, then the HTML goes through ammonia's allowlist cleaner:
//! unknown tags, event-handler attributes and non-allowlisted URL schemes are
//! stripped. Rendering is pure and never fails.

use pulldown_cmark::{Options, Parser, html};

/// Render markdown `text` as sanitized HTML.
#[must_use]
pub fn render(text: &str) -> String {
    let mut options = Options::empty();
    options.insert(Options::ENABLE_TABLES);
    options.insert(Options::ENABLE_STRIKETHROUGH);
    options.insert(Options::ENABLE_TASKLISTS);

    let mut out = String::with_capacity(text.len() + text.len() / 2);
    html::push_html(&mut out, Parser::new_ext(text, options));
    ammonia::clean(&out)
}

#[cfg(test)]
#[path = "render_test.rs"]
mod tests;

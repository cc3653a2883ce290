//! Markdown output for a resolved reading order.
//!
//! One section per page, in [`DocumentOrder`] order, each holding the
//! page's detected main content converted to Markdown.

use std::collections::BTreeMap;

use serde::Serialize;

use crate::order::DocumentOrder;
use crate::pipeline::{PageAnalysis, PipelineResult};
use crate::{Result, SiteweaveError};
#[cfg(feature = "markdown")]
use tracing::warn;

/// Configuration for Markdown rendering
#[derive(Debug, Clone, Default)]
pub struct RenderConfig {
    /// Include TOML frontmatter describing the document
    pub include_frontmatter: bool,
    /// Emit an HTML comment with the source url before each page
    pub source_comments: bool,
    /// Prefix pages whose content has no leading heading with their title
    pub title_headings: bool,
    /// Strip images from output
    pub strip_images: bool,
}

#[derive(Serialize)]
struct Frontmatter<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    title: Option<&'a str>,
    source: &'a str,
    pages: usize,
    order: String,
    order_confidence: f64,
}

/// Renders a whole pipeline run.
pub fn render_result(result: &PipelineResult, config: &RenderConfig) -> Result<String> {
    render_sections(&result.crawl.root, &result.order, result.ordered_pages(), config)
}

/// Concatenates the pages of `order` into one Markdown document.
///
/// Urls in `order` without an analysis are skipped.
pub fn render_markdown(
    root: &str, order: &DocumentOrder, pages: &BTreeMap<String, PageAnalysis>, config: &RenderConfig,
) -> Result<String> {
    let sections = order.urls.iter().filter_map(|url| pages.get(url).map(|page| (url.as_str(), page)));
    render_sections(root, order, sections, config)
}

fn render_sections<'a>(
    root: &str, order: &DocumentOrder, sections: impl Iterator<Item = (&'a str, &'a PageAnalysis)>,
    config: &RenderConfig,
) -> Result<String> {
    let mut sections = sections.peekable();
    let mut output = String::new();

    if config.include_frontmatter {
        let lead = sections.peek().copied().filter(|&(url, _)| order.urls.first().is_some_and(|first| first == url));
        let frontmatter = Frontmatter {
            title: lead.and_then(|(_, page)| page.title.as_deref()),
            source: root,
            pages: order.urls.len(),
            order: order.method.to_string(),
            order_confidence: (order.confidence * 100.0).round() / 100.0,
        };
        let body = toml::to_string(&frontmatter).map_err(|e| SiteweaveError::Config(e.to_string()))?;
        output.push_str("+++\n");
        output.push_str(&body);
        output.push_str("+++\n\n");
    }

    let mut first = true;
    for (url, page) in sections {
        if !first {
            output.push_str("\n\n");
        }
        first = false;

        if config.source_comments {
            output.push_str(&format!("<!-- source: {} -->\n\n", url));
        }

        let html = if config.strip_images { strip_images(&page.content.html) } else { page.content.html.clone() };
        let markdown = html_to_markdown(&html, &page.content.text, url);
        let markdown = markdown.trim();

        if config.title_headings
            && !markdown.starts_with('#')
            && let Some(title) = &page.title
        {
            output.push_str(&format!("# {}\n\n", title));
        }
        output.push_str(markdown);
    }

    output.push('\n');
    Ok(output)
}

#[cfg(feature = "markdown")]
fn html_to_markdown(html: &str, text: &str, url: &str) -> String {
    markdown_or_text(htmd::convert(html), text, url)
}

/// Falls back to the block's plain text when conversion fails.
#[cfg(feature = "markdown")]
fn markdown_or_text(converted: std::result::Result<String, impl std::fmt::Display>, text: &str, url: &str) -> String {
    match converted {
        Ok(markdown) => markdown,
        Err(e) => {
            warn!("Markdown conversion failed for {}, using plain text: {}", url, e);
            text.to_string()
        }
    }
}

#[cfg(not(feature = "markdown"))]
fn html_to_markdown(html: &str, _text: &str, _url: &str) -> String {
    let doc = scraper::Html::parse_fragment(html);
    doc.root_element().text().collect::<Vec<_>>().join(" ")
}

fn strip_images(html: &str) -> String {
    let mut output = Vec::new();
    let mut rewriter = lol_html::HtmlRewriter::new(
        lol_html::Settings {
            element_content_handlers: vec![lol_html::element!("img, picture", |el| {
                el.remove();
                Ok(())
            })],
            ..Default::default()
        },
        |c: &[u8]| output.extend_from_slice(c),
    );

    if rewriter.write(html.as_bytes()).is_err() || rewriter.end().is_err() {
        return html.to_string();
    }
    String::from_utf8(output).unwrap_or_else(|_| html.to_string())
}

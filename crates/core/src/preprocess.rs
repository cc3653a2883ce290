use std::sync::LazyLock;

use regex::Regex;
use url::Url;

static COMMENT_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)<!--.*?-->").expect("comment pattern is valid"));

static HIDDEN_STYLE_PATTERN: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)(display\s*:\s*none|visibility\s*:\s*hidden)").expect("hidden style pattern is valid")
});

/// Configuration for HTML preprocessing
#[derive(Debug, Clone)]
pub struct PreprocessConfig {
    /// Whether to remove script, style, noscript and template tags
    pub remove_non_content: bool,
    /// Whether to remove embedded media that carries no readable text (iframe, svg, canvas)
    pub remove_embeds: bool,
    /// Whether to remove elements hidden with inline styles or the `hidden` attribute
    pub remove_hidden: bool,
    /// Whether to strip HTML comments
    pub remove_comments: bool,
    /// Base URL for converting relative URLs; `None` leaves links untouched
    pub base_url: Option<Url>,
}

impl Default for PreprocessConfig {
    fn default() -> Self {
        Self { remove_non_content: true, remove_embeds: true, remove_hidden: true, remove_comments: true, base_url: None }
    }
}

/// Preprocess HTML before detection.
///
/// Strips markup that never contributes visible text, so text and link
/// densities are computed over what a reader would actually see. Navigation
/// and content regions are left intact; unlike article extraction, nothing
/// is dropped based on class names here.
pub fn preprocess_html(html: &str, config: &PreprocessConfig) -> String {
    let mut processed = html.to_string();

    if config.remove_comments {
        processed = COMMENT_PATTERN.replace_all(&processed, "").into_owned();
    }

    if config.remove_non_content || config.remove_embeds || config.remove_hidden {
        processed = remove_unwanted_elements(&processed, config);
    }

    if let Some(base_url) = &config.base_url {
        processed = convert_relative_urls(&processed, base_url);
    }

    processed
}

/// Runs a lol_html rewriter over `html`, falling back to the input on error
fn rewrite(html: &str, handlers: Vec<(std::borrow::Cow<'_, lol_html::Selector>, lol_html::ElementContentHandlers<'_>)>) -> String {
    let mut output = String::with_capacity(html.len());
    let mut rewriter = lol_html::HtmlRewriter::new(
        lol_html::Settings { element_content_handlers: handlers, ..Default::default() },
        |c: &[u8]| {
            output.push_str(&String::from_utf8_lossy(c));
        },
    );

    if rewriter.write(html.as_bytes()).is_err() || rewriter.end().is_err() {
        return html.to_string();
    }

    if output.is_empty() { html.to_string() } else { output }
}

fn remove_unwanted_elements(html: &str, config: &PreprocessConfig) -> String {
    let mut handlers = Vec::new();

    if config.remove_non_content {
        handlers.push(lol_html::element!("script, style, noscript, template", |el| {
            el.remove();
            Ok(())
        }));
    }

    if config.remove_embeds {
        handlers.push(lol_html::element!("iframe, svg, canvas", |el| {
            el.remove();
            Ok(())
        }));
    }

    if config.remove_hidden {
        handlers.push(lol_html::element!("*", |el| {
            let hidden_attr = el.has_attribute("hidden");
            let hidden_style = el.get_attribute("style").is_some_and(|s| HIDDEN_STYLE_PATTERN.is_match(&s));
            if hidden_attr || hidden_style {
                el.remove();
            }
            Ok(())
        }));
    }

    rewrite(html, handlers)
}

/// Convert relative URLs in anchors, images and stylesheets to absolute URLs
pub fn convert_relative_urls(html: &str, base_url: &Url) -> String {
    rewrite(
        html,
        vec![
            lol_html::element!("a[href], link[href]", |el| {
                if let Some(href) = el.get_attribute("href")
                    && let Ok(absolute) = base_url.join(&href)
                {
                    el.set_attribute("href", absolute.as_str()).ok();
                }
                Ok(())
            }),
            lol_html::element!("img[src]", |el| {
                if let Some(src) = el.get_attribute("src")
                    && let Ok(absolute) = base_url.join(&src)
                {
                    el.set_attribute("src", absolute.as_str()).ok();
                }
                Ok(())
            }),
        ],
    )
}

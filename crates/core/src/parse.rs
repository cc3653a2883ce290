//! HTML parsing and DOM navigation.
//!
//! This module provides the [`Document`] and [`Element`] types the detectors
//! and the crawler work against. A document is immutable once parsed.
//!
//! # Example
//!
//! ```rust
//! use siteweave_core::parse::Document;
//!
//! let html = r#"
//!     <html>
//!         <body>
//!             <main id="content"><h1>Title</h1><p>Paragraph</p></main>
//!         </body>
//!     </html>
//! "#;
//!
//! let doc = Document::parse(html).unwrap();
//! let main = &doc.select("main").unwrap()[0];
//! assert_eq!(main.locator(), "main#content");
//! ```

use std::collections::HashSet;
use std::sync::LazyLock;

use chardetng::EncodingDetector;
use encoding_rs::{Encoding, UTF_8};
use regex::bytes::Regex;
use scraper::{ElementRef, Html, Selector};
use tracing::debug;
use url::Url;

use crate::preprocess::{PreprocessConfig, preprocess_html};
use crate::urls;
use crate::{Result, SiteweaveError};

/// Bytes inspected when sniffing for binary content and `<meta charset>`
const SNIFF_LEN: usize = 1024;

static META_CHARSET: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(?i)<meta[^>]+charset\s*=\s*["']?\s*([a-z0-9_.:-]+)"#).expect("meta charset pattern is valid")
});

/// Represents a parsed HTML document.
pub struct Document {
    html: Html,
    url: Option<Url>,
}

impl std::fmt::Debug for Document {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Document").field("url", &self.url).finish_non_exhaustive()
    }
}

/// What kind of resource an outbound link points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResourceKind {
    /// A page that is fetched and followed
    Page,
    /// A stylesheet, image, script or download that is fetched but never parsed
    Asset,
}

/// An absolute outbound link found on a page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutboundLink {
    pub url: Url,
    pub kind: ResourceKind,
}

/// The `charset` parameter of a Content-Type value.
fn charset_param(content_type: &str) -> Option<&str> {
    content_type.split(';').skip(1).find_map(|param| {
        let (name, value) = param.split_once('=')?;
        name.trim()
            .eq_ignore_ascii_case("charset")
            .then(|| value.trim().trim_matches(|c| c == '"' || c == '\''))
    })
}

fn meta_charset(bytes: &[u8]) -> Option<&'static Encoding> {
    let head = &bytes[..bytes.len().min(SNIFF_LEN)];
    let label = META_CHARSET.captures(head)?.get(1)?;
    // A page cannot declare itself UTF-16 from inside an ASCII-compatible byte stream.
    Encoding::for_label(label.as_bytes()).map(Encoding::output_encoding)
}

/// Picks the encoding of BOM-less page bytes.
///
/// The Content-Type charset wins over `<meta charset>`; without either,
/// valid UTF-8 is taken as such and anything else goes to the statistical
/// detector.
pub fn detect_encoding(bytes: &[u8], content_type: Option<&str>) -> &'static Encoding {
    let declared = content_type
        .and_then(charset_param)
        .and_then(|label| Encoding::for_label(label.as_bytes()))
        .or_else(|| meta_charset(bytes));
    if let Some(encoding) = declared {
        return encoding;
    }

    if std::str::from_utf8(bytes).is_ok() {
        return UTF_8;
    }

    let mut detector = EncodingDetector::new();
    detector.feed(bytes, true);
    detector.guess(None, true)
}

/// Decodes fetched bytes into markup.
///
/// A byte-order mark decides the encoding first, then [`detect_encoding`].
/// Malformed sequences are replaced rather than rejected; empty and binary
/// payloads are a [`SiteweaveError::Parse`].
pub fn decode_html(bytes: &[u8], content_type: Option<&str>, url: &str) -> Result<String> {
    let bom = Encoding::for_bom(bytes);
    let body = &bytes[bom.map_or(0, |(_, len)| len)..];

    if body.iter().all(u8::is_ascii_whitespace) {
        return Err(SiteweaveError::Parse { url: url.to_string(), reason: "document is empty".to_string() });
    }

    let encoding = match bom {
        Some((encoding, _)) => encoding,
        None => {
            if body[..body.len().min(SNIFF_LEN)].contains(&0) {
                return Err(SiteweaveError::Parse { url: url.to_string(), reason: "content looks binary".to_string() });
            }
            detect_encoding(body, content_type)
        }
    };

    let (text, had_errors) = encoding.decode_without_bom_handling(body);
    if had_errors {
        debug!("Replaced malformed {} sequences in {}", encoding.name(), url);
    }
    Ok(text.into_owned())
}

fn parse_selector(selector: &str) -> Result<Selector> {
    Selector::parse(selector).map_err(|e| SiteweaveError::Parse {
        url: String::new(),
        reason: format!("invalid selector '{}': {}", selector, e),
    })
}

impl Document {
    /// Parses HTML from a string without preprocessing.
    pub fn parse(html: &str) -> Result<Self> {
        Ok(Self { html: Html::parse_document(html), url: None })
    }

    /// Parses HTML with preprocessing, resolving relative links against `url`.
    pub fn parse_with_preprocessing(html: &str, url: Option<Url>) -> Result<Self> {
        let config = PreprocessConfig { base_url: url.clone(), ..Default::default() };
        let cleaned = preprocess_html(html, &config);
        Ok(Self { html: Html::parse_document(&cleaned), url })
    }

    /// Decodes stored bytes and parses them for detection.
    ///
    /// `content_type` is the Content-Type the bytes were served with, if
    /// known; its charset takes part in [`decode_html`].
    pub fn from_bytes(bytes: &[u8], content_type: Option<&str>, url: Option<Url>) -> Result<Self> {
        let label = url.as_ref().map(Url::to_string).unwrap_or_default();
        let html = decode_html(bytes, content_type, &label)?;
        Self::parse_with_preprocessing(&html, url)
    }

    /// The url this document was fetched from, if known.
    pub fn url(&self) -> Option<&Url> {
        self.url.as_ref()
    }

    /// Selects elements using a CSS selector.
    ///
    /// # Errors
    ///
    /// Returns [`SiteweaveError::Parse`] if the selector is invalid.
    pub fn select(&'_ self, selector: &str) -> Result<Vec<Element<'_>>> {
        let sel = parse_selector(selector)?;
        Ok(self.html.select(&sel).map(|el| Element { element: el }).collect())
    }

    /// Gets the title of the document.
    pub fn title(&self) -> Option<String> {
        let selector = Selector::parse("title").ok()?;
        self.html
            .select(&selector)
            .next()
            .map(|el| el.text().collect::<String>().trim().to_string())
            .filter(|t| !t.is_empty())
    }

    /// The `<body>` element, or the root element for fragments without one.
    pub fn body(&self) -> Element<'_> {
        let body = Selector::parse("body").ok().and_then(|sel| self.html.select(&sel).next());
        Element { element: body.unwrap_or_else(|| self.html.root_element()) }
    }

    /// Every element below `<body>`, in document order.
    ///
    /// This is the candidate set for both detectors; document order makes
    /// tie-breaking deterministic.
    pub fn candidates(&self) -> Vec<Element<'_>> {
        self.body()
            .element
            .descendants()
            .skip(1)
            .filter_map(ElementRef::wrap)
            .map(|element| Element { element })
            .collect()
    }

    /// Gets all visible text content of the body, whitespace-collapsed.
    pub fn text_content(&self) -> String {
        self.body().visible_text()
    }

    /// Absolute links leaving this page, deduplicated, in document order.
    ///
    /// Anchors are pages unless their extension says otherwise; stylesheets,
    /// icons, images and scripts are assets. A `<base href>` is honoured.
    pub fn outbound_links(&self, page_url: &Url) -> Vec<OutboundLink> {
        let base = self
            .select("base[href]")
            .ok()
            .and_then(|bases| bases.first().and_then(|b| b.attr("href")).and_then(|h| page_url.join(h).ok()))
            .unwrap_or_else(|| page_url.clone());

        let sources: [(&str, &str, Option<ResourceKind>); 4] = [
            ("a[href], area[href]", "href", None),
            ("link[href]", "href", Some(ResourceKind::Asset)),
            ("img[src]", "src", Some(ResourceKind::Asset)),
            ("script[src]", "src", Some(ResourceKind::Asset)),
        ];

        let mut seen = HashSet::new();
        let mut links = Vec::new();

        for (selector, attr, fixed_kind) in sources {
            let Ok(elements) = self.select(selector) else { continue };
            for element in elements {
                if selector.starts_with("link") && !is_fetchable_link_rel(element.attr("rel").unwrap_or_default()) {
                    continue;
                }
                let Some(raw) = element.attr(attr).map(str::trim) else { continue };
                if raw.is_empty() || raw.starts_with('#') {
                    continue;
                }
                let Ok(url) = base.join(raw) else { continue };
                if !matches!(url.scheme(), "http" | "https") {
                    continue;
                }

                let kind = fixed_kind.unwrap_or_else(|| {
                    if urls::is_html(urls::guess_content_type(&url)) { ResourceKind::Page } else { ResourceKind::Asset }
                });

                if seen.insert((urls::normalize(&url), kind)) {
                    links.push(OutboundLink { url, kind });
                }
            }
        }

        links
    }
}

fn is_fetchable_link_rel(rel: &str) -> bool {
    rel.split_ascii_whitespace()
        .any(|r| matches!(r.to_ascii_lowercase().as_str(), "stylesheet" | "icon" | "shortcut"))
}

/// A wrapper around scraper's ElementRef.
#[derive(Clone, Debug)]
pub struct Element<'a> {
    element: ElementRef<'a>,
}

impl<'a> Element<'a> {
    /// Gets the outer HTML of this element.
    pub fn outer_html(&self) -> String {
        self.element.html()
    }

    /// Gets the concatenated text nodes of this element, verbatim.
    pub fn text(&self) -> String {
        self.element.text().collect()
    }

    /// Gets the text with runs of whitespace collapsed to single spaces.
    pub fn visible_text(&self) -> String {
        self.element
            .text()
            .flat_map(str::split_whitespace)
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Gets the value of an attribute.
    pub fn attr(&self, name: &str) -> Option<&'a str> {
        self.element.value().attr(name)
    }

    /// Gets the lowercase tag name.
    pub fn tag_name(&self) -> String {
        self.element.value().name().to_lowercase()
    }

    /// Whitespace-separated class tokens.
    pub fn classes(&self) -> impl Iterator<Item = &'a str> {
        self.element.value().classes()
    }

    /// Selects descendants using a CSS selector.
    pub fn select(&'_ self, selector: &str) -> Result<Vec<Element<'_>>> {
        let sel = parse_selector(selector)?;
        Ok(self.element.select(&sel).map(|el| Element { element: el }).collect())
    }

    /// Direct element children, in order.
    pub fn children(&self) -> Vec<Element<'a>> {
        self.element.children().filter_map(ElementRef::wrap).map(|element| Element { element }).collect()
    }

    /// The parent element, if any.
    pub fn parent(&self) -> Option<Element<'a>> {
        self.element.parent().and_then(ElementRef::wrap).map(|element| Element { element })
    }

    /// Number of element ancestors (`<html>` has depth 0).
    pub fn depth(&self) -> usize {
        self.element.ancestors().filter(|n| n.value().is_element()).count()
    }

    /// Whether `other` is this element or one of its descendants.
    pub fn contains(&self, other: &Element<'_>) -> bool {
        other.element.id() == self.element.id()
            || other.element.ancestors().any(|ancestor| ancestor.id() == self.element.id())
    }

    /// Whether both wrappers point at the same node.
    pub fn same_node(&self, other: &Element<'_>) -> bool {
        self.element.id() == other.element.id()
    }

    /// A stable CSS path for this element.
    ///
    /// The path starts at the nearest ancestor carrying an id (or at `html`)
    /// and uses `:nth-of-type` for every id-less step, so it selects exactly
    /// this element in the same document.
    pub fn locator(&self) -> String {
        let mut segments = Vec::new();
        let mut current = Some(self.clone());

        while let Some(element) = current {
            let tag = element.tag_name();
            if let Some(id) = element.attr("id").filter(|id| is_simple_ident(id)) {
                segments.push(format!("{}#{}", tag, id));
                break;
            }

            let parent = element.parent();
            let segment = match &parent {
                Some(parent) => {
                    let same_tag: Vec<_> = parent.children().into_iter().filter(|c| c.tag_name() == tag).collect();
                    if same_tag.len() > 1 {
                        let index = same_tag.iter().position(|c| c.same_node(&element)).unwrap_or(0) + 1;
                        format!("{}:nth-of-type({})", tag, index)
                    } else {
                        tag
                    }
                }
                None => tag,
            };
            segments.push(segment);
            current = parent;
        }

        segments.reverse();
        segments.join(" > ")
    }
}

fn is_simple_ident(id: &str) -> bool {
    let mut chars = id.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}

use tracing::debug;

use super::content::has_role;
use super::nav::{NavDetection, extract_tree};
use super::{ContentBlock, Detector, select_best};
use crate::parse::{Document, Element};
use crate::scoring::text_density;
use crate::urls::Scope;

/// Semantic selectors for the main region, with their base scores
const MAIN_SELECTORS: &[(&str, f64)] = &[
    ("main", 100.0),
    ("[role='main']", 95.0),
    ("main article", 95.0),
    ("article", 90.0),
    ("div[role='main']", 90.0),
    ("#main-content", 85.0),
    ("#main", 80.0),
    ("#content", 80.0),
    (".main-content", 75.0),
    ("#article", 75.0),
    (".main", 70.0),
    (".content", 70.0),
    ("#post", 70.0),
    ("#entry", 70.0),
    (".article", 65.0),
    (".post", 60.0),
    (".entry", 60.0),
];

/// Semantic selectors for the navigation region, with their base scores
const NAV_SELECTORS: &[(&str, f64)] = &[
    ("nav", 100.0),
    ("[role='navigation']", 95.0),
    ("aside nav", 95.0),
    ("#toc", 85.0),
    ("#sidebar", 80.0),
    ("#nav", 80.0),
    ("#navigation", 80.0),
    (".toc", 75.0),
    (".sidebar", 75.0),
    (".navigation", 75.0),
    (".nav", 70.0),
    (".menu", 70.0),
    ("aside", 60.0),
];

/// Tags, classes and ids a main region must not carry
const EXCLUDED_TAGS: &[&str] = &["nav", "header", "footer", "aside"];
const EXCLUDED_TOKENS: &[&str] = &[
    "nav",
    "header",
    "footer",
    "aside",
    "sidebar",
    "advertisement",
    "ads",
    "ad",
    "banner",
    "comments",
    "comment",
    "social",
    "share",
    "related",
    "recommendation",
];

/// Fewest links a navigation match must hold
const MIN_NAV_LINKS: usize = 2;

/// Detector driven by a ranked table of semantic selectors.
///
/// Each selector's first match is a candidate scored by the table value
/// plus small bonuses (text density, paragraph count and headings for
/// content; link count and list shape for navigation). No scoring of
/// arbitrary containers takes place.
#[derive(Debug, Clone)]
pub struct LandmarkDetector {
    min_confidence: f64,
}

impl LandmarkDetector {
    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }
}

fn is_excluded(element: &Element<'_>) -> bool {
    if EXCLUDED_TAGS.contains(&element.tag_name().as_str()) || has_role(element, "navigation") {
        return true;
    }
    let id_hit = element.attr("id").is_some_and(|id| EXCLUDED_TOKENS.contains(&id.to_ascii_lowercase().as_str()));
    id_hit || element.classes().any(|c| EXCLUDED_TOKENS.contains(&c.to_ascii_lowercase().as_str()))
}

fn count(element: &Element<'_>, selector: &str) -> usize {
    element.select(selector).map(|found| found.len()).unwrap_or_default()
}

fn main_bonus(element: &Element<'_>) -> f64 {
    let mut bonus = 0.0;
    if text_density(element) > 0.1 {
        bonus += 10.0;
    }
    if count(element, "p") > 3 {
        bonus += 10.0;
    }
    if count(element, "h1, h2, h3, h4, h5, h6") > 0 {
        bonus += 5.0;
    }
    bonus
}

fn nav_bonus(element: &Element<'_>) -> f64 {
    let mut bonus = 0.0;
    if count(element, "li") >= 2 {
        bonus += 10.0;
    }
    if count(element, "a[href]") >= 5 {
        bonus += 5.0;
    }
    bonus
}

/// First match per selector, deduplicated, in table order.
fn landmark_matches<'a>(
    doc: &'a Document, table: &[(&str, f64)], accept: impl Fn(&Element<'a>) -> bool,
) -> Vec<(Element<'a>, f64)> {
    let mut found: Vec<(Element<'a>, f64)> = Vec::new();
    for (selector, base) in table {
        let Ok(elements) = doc.select(selector) else { continue };
        let Some(element) = elements.into_iter().find(|el| accept(el)) else { continue };
        if found.iter().any(|(seen, _)| seen.same_node(&element)) {
            continue;
        }
        found.push((element, *base));
    }
    found
}

impl Detector for LandmarkDetector {
    fn name(&self) -> &'static str {
        "landmark"
    }

    fn detect_main(&self, doc: &Document) -> ContentBlock {
        let scored: Vec<_> = landmark_matches(doc, MAIN_SELECTORS, |el| !is_excluded(el))
            .into_iter()
            .map(|(el, base)| {
                let score = base + main_bonus(&el);
                (el, score)
            })
            .collect();

        match select_best(scored, 0.0, self.min_confidence) {
            Some(selection) => ContentBlock::from_element(doc, &selection.element, selection.confidence),
            None => {
                debug!("No landmark matched the main region; using body");
                ContentBlock::fallback(doc)
            }
        }
    }

    fn detect_nav(&self, doc: &Document, scope: Option<&Scope>) -> NavDetection {
        let scored: Vec<_> = landmark_matches(doc, NAV_SELECTORS, |el| count(el, "a[href]") >= MIN_NAV_LINKS)
            .into_iter()
            .map(|(el, base)| {
                let score = base + nav_bonus(&el);
                (el, score)
            })
            .collect();

        match select_best(scored, 0.0, self.min_confidence) {
            Some(selection) => NavDetection {
                tree: extract_tree(&selection.element, doc.url(), scope),
                block: ContentBlock::from_element(doc, &selection.element, selection.confidence),
            },
            None => NavDetection::empty(doc),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn detector() -> LandmarkDetector {
        LandmarkDetector::new(0.2)
    }

    #[test]
    fn test_prefers_main_element() {
        let html = r#"<html><body>
            <div class="content"><p>Wrapper text</p>
                <main><h1>Title</h1><p>Body</p></main>
            </div>
        </body></html>"#;
        let doc = Document::parse(html).unwrap();
        let block = detector().detect_main(&doc);
        assert_eq!(block.locator, "html > body > div > main");
        assert_eq!(block.confidence, 1.0);
    }

    #[test]
    fn test_id_selector_without_semantic_tags() {
        let html = r#"<html><body><div id="sidebar"><a href="/a">A</a></div><div id="content"><p>Text</p></div></body></html>"#;
        let doc = Document::parse(html).unwrap();
        assert_eq!(detector().detect_main(&doc).locator, "div#content");
    }

    #[test]
    fn test_excluded_regions_are_skipped() {
        let html = r#"<html><body><aside class="content"><p>Ad copy</p></aside></body></html>"#;
        let doc = Document::parse(html).unwrap();
        assert!(detector().detect_main(&doc).is_fallback());
    }

    #[test]
    fn test_competing_landmarks_lower_confidence() {
        let html = r#"<html><body>
            <article><h2>One</h2><p>First story.</p></article>
            <div class="post"><h2>Two</h2><p>Second story.</p></div>
        </body></html>"#;
        let doc = Document::parse(html).unwrap();
        let block = detector().detect_main(&doc);
        assert_eq!(block.locator, "html > body > article");
        assert!(block.confidence < 1.0 && block.confidence > 0.2);
    }

    #[test]
    fn test_nav_needs_links() {
        let html = r#"<html><body><nav><a href="/only">Only</a></nav><div class="menu"><a href="/a">A</a><a href="/b">B</a></div></body></html>"#;
        let doc = Document::parse(html).unwrap();
        let nav = detector().detect_nav(&doc, None);
        assert_eq!(nav.block.locator, "html > body > div");
        assert_eq!(nav.tree.len(), 2);
    }
}

use serde::Serialize;
use tracing::debug;

use super::nav::{NavDetection, extract_tree};
use super::{DetectConfig, Detector, select_best};
use crate::parse::{Document, Element};
use crate::scoring::{content_score, nav_score};
use crate::urls::Scope;

/// Tags scored as main content containers
const CONTENT_TAGS: &[&str] = &["main", "article", "section", "div", "td", "blockquote"];

/// Tags scored as navigation containers
const NAV_TAGS: &[&str] = &["nav", "aside", "header", "footer", "ul", "ol", "menu", "div", "section"];

/// A detected region of one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ContentBlock {
    /// Url of the page the region was found on (empty for local files)
    pub source_url: String,
    /// CSS path selecting the region within its page
    pub locator: String,
    /// Detection confidence in [0, 1]; 0 marks the fallback
    pub confidence: f64,
    /// Whitespace-collapsed visible text
    pub text: String,
    /// Outer HTML of the region, links absolutized
    #[serde(skip)]
    pub html: String,
}

impl ContentBlock {
    pub(crate) fn from_element(doc: &Document, element: &Element<'_>, confidence: f64) -> Self {
        Self {
            source_url: doc.url().map(|u| u.to_string()).unwrap_or_default(),
            locator: element.locator(),
            confidence: confidence.clamp(0.0, 1.0),
            text: element.visible_text(),
            html: element.outer_html(),
        }
    }

    /// The body region with confidence 0.
    pub fn fallback(doc: &Document) -> Self {
        Self::from_element(doc, &doc.body(), 0.0)
    }

    /// Whether this block is the no-strong-candidate fallback.
    pub fn is_fallback(&self) -> bool {
        self.confidence == 0.0
    }
}

pub(super) fn has_role(element: &Element<'_>, role: &str) -> bool {
    element.attr("role").is_some_and(|r| r.eq_ignore_ascii_case(role))
}

/// Detector that scores every container on the page.
///
/// Content candidates are ranked by [`content_score`]; navigation candidates
/// by [`nav_score`]. See [`crate::scoring::confidence`] for how the winning
/// score becomes a confidence.
#[derive(Debug, Clone, Default)]
pub struct HeuristicDetector {
    config: DetectConfig,
}

impl HeuristicDetector {
    pub fn new(config: DetectConfig) -> Self {
        Self { config }
    }
}

impl Detector for HeuristicDetector {
    fn name(&self) -> &'static str {
        "heuristic"
    }

    fn detect_main(&self, doc: &Document) -> ContentBlock {
        let scored: Vec<_> = doc
            .candidates()
            .into_iter()
            .filter(|el| CONTENT_TAGS.contains(&el.tag_name().as_str()) || has_role(el, "main"))
            .map(|el| {
                let score = content_score(&el, &self.config.scoring).final_score;
                (el, score)
            })
            .collect();

        let candidate_count = scored.len();
        match select_best(scored, self.config.scoring.min_content_score, self.config.min_confidence) {
            Some(selection) => {
                let block = ContentBlock::from_element(doc, &selection.element, selection.confidence);
                debug!("Main content at {} ({:.2}) among {} candidates", block.locator, block.confidence, candidate_count);
                block
            }
            None => {
                debug!("No main content candidate cleared the floor; using body");
                ContentBlock::fallback(doc)
            }
        }
    }

    fn detect_nav(&self, doc: &Document, scope: Option<&Scope>) -> NavDetection {
        let scored: Vec<_> = doc
            .candidates()
            .into_iter()
            .filter(|el| NAV_TAGS.contains(&el.tag_name().as_str()) || has_role(el, "navigation"))
            .map(|el| {
                let score = nav_score(&el, &self.config.scoring).final_score;
                (el, score)
            })
            .collect();

        match select_best(scored, self.config.scoring.min_nav_score, self.config.min_confidence) {
            Some(selection) => {
                let tree = extract_tree(&selection.element, doc.url(), scope);
                let block = ContentBlock::from_element(doc, &selection.element, selection.confidence);
                debug!("Navigation at {} ({:.2}) with {} links", block.locator, block.confidence, tree.len());
                NavDetection { block, tree }
            }
            None => {
                debug!("No navigation candidate cleared the floor");
                NavDetection::empty(doc)
            }
        }
    }
}

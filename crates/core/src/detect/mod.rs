//! Main content and navigation detection.
//!
//! Detection is a pure function of one parsed page: the same [`Document`]
//! always yields the same region and confidence. Strategies sit behind the
//! [`Detector`] trait and are chosen by [`DetectStrategy`], so the crawler and
//! the order resolver never depend on a particular scoring scheme.
//!
//! # Example
//!
//! ```rust
//! use siteweave_core::detect::{DetectConfig, detector_for};
//! use siteweave_core::parse::Document;
//!
//! let html = r#"<html><body>
//!     <nav><ul><li><a href="/a">A</a></li><li><a href="/b">B</a></li></ul></nav>
//!     <main><h1>Hello</h1><p>Some words, and more words.</p><p>Another paragraph.</p></main>
//! </body></html>"#;
//!
//! let doc = Document::parse(html).unwrap();
//! let detector = detector_for(&DetectConfig::default());
//! let main = detector.detect_main(&doc);
//! assert_eq!(main.locator, "html > body > main");
//! assert!(main.confidence > 0.0 && main.confidence <= 1.0);
//! ```

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::parse::{Document, Element};
use crate::scoring::{ScoreConfig, confidence};
use crate::urls::Scope;
use crate::{Result, SiteweaveError};

mod content;
mod landmark;
mod nav;

pub use content::{ContentBlock, HeuristicDetector};
pub use landmark::LandmarkDetector;
pub use nav::{NavDetection, NavigationNode, NavigationTree, extract_tree};

/// Default confidence floor below which a detection falls back.
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.2;

/// Available detection strategies.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DetectStrategy {
    /// Scores every candidate by text/link density, vocabulary and depth
    #[default]
    Heuristic,
    /// Ranked table of semantic selectors (`main`, `[role=main]`, `#content`, ...)
    Landmark,
}

impl fmt::Display for DetectStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Heuristic => write!(f, "heuristic"),
            Self::Landmark => write!(f, "landmark"),
        }
    }
}

impl FromStr for DetectStrategy {
    type Err = SiteweaveError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "heuristic" => Ok(Self::Heuristic),
            "landmark" => Ok(Self::Landmark),
            other => Err(SiteweaveError::Config(format!(
                "unknown detector '{}' (expected heuristic or landmark)",
                other
            ))),
        }
    }
}

/// Configuration shared by all detectors.
#[derive(Debug, Clone)]
pub struct DetectConfig {
    /// Detections below this confidence fall back to the body region (default: 0.2).
    pub min_confidence: f64,

    /// Which detector to build (default: heuristic).
    pub strategy: DetectStrategy,

    /// Weights for the heuristic detector.
    pub scoring: ScoreConfig,
}

impl Default for DetectConfig {
    fn default() -> Self {
        Self { min_confidence: DEFAULT_MIN_CONFIDENCE, strategy: DetectStrategy::default(), scoring: ScoreConfig::default() }
    }
}

impl DetectConfig {
    /// Creates a new builder for DetectConfig.
    pub fn builder() -> DetectConfigBuilder {
        DetectConfigBuilder::new()
    }
}

/// Builder for DetectConfig.
///
/// ```rust
/// use siteweave_core::detect::{DetectConfig, DetectStrategy};
///
/// let config = DetectConfig::builder().min_confidence(0.35).strategy(DetectStrategy::Landmark).build();
/// assert_eq!(config.min_confidence, 0.35);
/// ```
pub struct DetectConfigBuilder {
    config: DetectConfig,
}

impl DetectConfigBuilder {
    /// Creates a new builder with default values.
    pub fn new() -> Self {
        Self { config: DetectConfig::default() }
    }

    /// Sets the confidence floor, clamped to [0, 1].
    pub fn min_confidence(mut self, value: f64) -> Self {
        self.config.min_confidence = value.clamp(0.0, 1.0);
        self
    }

    /// Sets the detection strategy.
    pub fn strategy(mut self, value: DetectStrategy) -> Self {
        self.config.strategy = value;
        self
    }

    /// Sets the heuristic scoring weights.
    pub fn scoring(mut self, value: ScoreConfig) -> Self {
        self.config.scoring = value;
        self
    }

    /// Builds the config.
    pub fn build(self) -> DetectConfig {
        self.config
    }
}

impl Default for DetectConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A content and navigation detection strategy.
///
/// Implementations must be deterministic and must keep every confidence in
/// [0, 1]. When nothing clears the floor they return the fallback: the body
/// region with confidence 0 for content, an empty tree for navigation.
pub trait Detector: Send + Sync {
    /// Short name used in logs and CLI output.
    fn name(&self) -> &'static str;

    /// Locates the main content region.
    fn detect_main(&self, doc: &Document) -> ContentBlock;

    /// Locates the navigation region and extracts its link tree.
    ///
    /// `scope` decides which targets are flagged external; without it the
    /// document's own url is used as the boundary.
    fn detect_nav(&self, doc: &Document, scope: Option<&Scope>) -> NavDetection;
}

/// Builds the detector selected by `config`.
pub fn detector_for(config: &DetectConfig) -> Box<dyn Detector> {
    match config.strategy {
        DetectStrategy::Heuristic => Box::new(HeuristicDetector::new(config.clone())),
        DetectStrategy::Landmark => Box::new(LandmarkDetector::new(config.min_confidence)),
    }
}

/// The winning candidate of one detection pass.
pub(crate) struct Selection<'a> {
    pub element: Element<'a>,
    pub confidence: f64,
}

/// Picks the highest-scoring candidate and derives its confidence.
///
/// Candidates must be in document order; the first of equal scores wins.
/// Scores below `min_score` are ignored. Only candidates that neither
/// contain nor sit inside the winner count as rivals. Returns `None` when
/// nothing is eligible or the confidence is below `min_confidence`.
pub(crate) fn select_best<'a>(
    scored: Vec<(Element<'a>, f64)>, min_score: f64, min_confidence: f64,
) -> Option<Selection<'a>> {
    let mut best: Option<usize> = None;
    for (idx, (_, score)) in scored.iter().enumerate() {
        if !score.is_finite() || *score < min_score {
            continue;
        }
        if best.is_none_or(|b| *score > scored[b].1) {
            best = Some(idx);
        }
    }

    let best = best?;
    let (winner, best_score) = &scored[best];
    let rivals: Vec<f64> = scored
        .iter()
        .filter(|(candidate, _)| !winner.contains(candidate) && !candidate.contains(winner))
        .map(|(_, score)| *score)
        .collect();

    let confidence = confidence(*best_score, &rivals);
    if confidence < min_confidence {
        return None;
    }

    Some(Selection { element: winner.clone(), confidence })
}

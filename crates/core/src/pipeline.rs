//! Fetch, detect and order in one pass.
//!
//! [`Pipeline::run`] crawls a site into its page store, detects the content
//! and navigation regions of every stored HTML page, and resolves one reading
//! order over them. Per-page problems end up in
//! [`PipelineResult::warnings`]; only invalid input, configuration errors and
//! a broken order invariant fail the whole run.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use siteweave_core::pipeline::{Pipeline, PipelineOptions};
//! use siteweave_core::settings::Settings;
//! use siteweave_core::transport::HttpTransport;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let settings = Settings::load(None)?;
//! let transport = Arc::new(HttpTransport::new(&settings.fetch_config())?);
//! let pipeline = Pipeline::new(settings, transport);
//!
//! let result = pipeline.run("https://docs.example.com/", PipelineOptions::default()).await?;
//! for url in &result.order.urls {
//!     println!("{}", url);
//! }
//! # Ok(())
//! # }
//! ```

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use rayon::prelude::*;
use serde::Serialize;
use tracing::{debug, info, warn};
use url::Url;

use crate::crawl::{self, CrawlResult, Crawler, PageOutcome};
use crate::detect::{ContentBlock, Detector, NavDetection, detector_for};
use crate::order::{DocumentOrder, OrderInput, OrderPage, resolve_order, resolver_for};
use crate::parse::Document;
use crate::settings::Settings;
use crate::store::PageStore;
use crate::transport::Transport;
use crate::urls::{self, Scope};
use crate::{Result, SiteweaveError};

/// Per-run options on top of [`Settings`].
#[derive(Debug, Clone, Copy, Default)]
pub struct PipelineOptions {
    /// Link-following depth; `None` uses `Settings::max_depth`
    pub max_depth: Option<usize>,
    /// Re-request every page regardless of staleness
    pub force_refresh: bool,
}

/// Which detected region a warning is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Region {
    Main,
    Navigation,
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Main => write!(f, "main"),
            Self::Navigation => write!(f, "navigation"),
        }
    }
}

/// Non-fatal problems collected during a run.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PipelineWarning {
    /// The page's stored bytes could not be parsed; it is left out of
    /// detection and ordering.
    Parse { url: String, reason: String },
    /// A detection did not clear the confidence floor.
    AmbiguousDetection { url: String, region: Region, confidence: f64 },
    /// The url could not be fetched or stored during the crawl.
    FetchFailed { url: String, reason: String },
}

impl fmt::Display for PipelineWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Parse { url, reason } => write!(f, "{}: not parsed ({})", url, reason),
            Self::AmbiguousDetection { url, region, confidence } => {
                write!(f, "{}: ambiguous {} region (confidence {:.2})", url, region, confidence)
            }
            Self::FetchFailed { url, reason } => write!(f, "{}: {}", url, reason),
        }
    }
}

/// Detection results for one page.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PageAnalysis {
    pub title: Option<String>,
    pub content: ContentBlock,
    pub navigation: NavDetection,
}

/// Everything one pipeline run produced.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineResult {
    pub crawl: CrawlResult,
    /// Analyses keyed by normalized page url
    pub pages: BTreeMap<String, PageAnalysis>,
    pub order: DocumentOrder,
    pub warnings: Vec<PipelineWarning>,
}

impl PipelineResult {
    /// Page analyses in reading order.
    pub fn ordered_pages(&self) -> impl Iterator<Item = (&str, &PageAnalysis)> {
        self.order.urls.iter().filter_map(|url| self.pages.get(url).map(|page| (url.as_str(), page)))
    }
}

/// Sequences crawl, detection and ordering over one transport.
pub struct Pipeline {
    settings: Settings,
    transport: Arc<dyn Transport>,
}

impl Pipeline {
    pub fn new(settings: Settings, transport: Arc<dyn Transport>) -> Self {
        Self { settings, transport }
    }

    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Opens the page store for `root` under the configured cache directory.
    pub fn open_store(&self, root: &Url) -> Result<Arc<PageStore>> {
        Ok(Arc::new(PageStore::open_in(&self.settings.cache_dir, root)?))
    }

    /// Crawls `root`, then analyzes what the store holds afterwards.
    pub async fn run(&self, root: &str, options: PipelineOptions) -> Result<PipelineResult> {
        self.settings.validate()?;
        let root_url = urls::parse_root(root)?;
        let store = self.open_store(&root_url)?;

        let crawler = Crawler::new(Arc::clone(&store), Arc::clone(&self.transport), self.settings.crawl_config());
        let max_depth = options.max_depth.unwrap_or(self.settings.max_depth);
        let result = crawler.crawl(root_url.as_str(), max_depth, options.force_refresh).await?;

        self.analyze(store, result).await
    }

    /// Analyzes an existing cache without touching the network.
    ///
    /// Fails with [`SiteweaveError::InvalidInput`] when nothing is cached
    /// for `root`.
    pub async fn run_cached(&self, root: &str) -> Result<PipelineResult> {
        self.settings.validate()?;
        let root_url = urls::parse_root(root)?;
        let store = self.open_store(&root_url)?;
        let result = crawl::replay(&store)?;
        self.analyze(store, result).await
    }

    /// Detects regions on every stored page of `crawl` and resolves the
    /// reading order.
    ///
    /// Pages whose refresh failed are analyzed from their previous record
    /// and still reported as [`PipelineWarning::FetchFailed`].
    ///
    /// Detection runs on rayon's pool inside a blocking task; the order
    /// resolver runs afterwards on the complete set.
    pub async fn analyze(&self, store: Arc<PageStore>, crawl: CrawlResult) -> Result<PipelineResult> {
        let root = Url::parse(&crawl.root).map_err(|e| SiteweaveError::InvalidUrl(format!("{}: {}", crawl.root, e)))?;

        let mut warnings: Vec<PipelineWarning> = crawl
            .failed()
            .into_iter()
            .filter_map(|entry| match &entry.outcome {
                PageOutcome::Failed { reason, .. } => {
                    Some(PipelineWarning::FetchFailed { url: entry.url.clone(), reason: reason.clone() })
                }
                _ => None,
            })
            .collect();

        // A failed refresh still leaves the previous record in place.
        let targets: Vec<(String, usize)> = crawl
            .entries
            .iter()
            .filter(|e| e.is_page() && (e.outcome.is_stored() || store.get(&e.url).is_some_and(|page| page.is_html())))
            .map(|e| (e.url.clone(), e.depth))
            .collect();
        info!("Detecting regions on {} pages with the {} detector", targets.len(), self.settings.detector);

        let detector: Arc<dyn Detector> = Arc::from(detector_for(&self.settings.detect_config()));
        let scope = Scope::new(&root);
        let detect_store = Arc::clone(&store);
        let detected = tokio::task::spawn_blocking(move || detect_all(&detect_store, detector.as_ref(), &scope, targets))
            .await
            .map_err(|e| SiteweaveError::InternalInvariant(format!("detection worker failed: {}", e)))?;

        let floor = self.settings.min_confidence;
        let mut pages: BTreeMap<String, PageAnalysis> = BTreeMap::new();
        let mut order_pages: Vec<OrderPage> = Vec::with_capacity(detected.len());

        for (url, depth, analysis) in detected {
            match analysis {
                Ok(analysis) => {
                    for (region, confidence) in
                        [(Region::Main, analysis.content.confidence), (Region::Navigation, analysis.navigation.confidence())]
                    {
                        if confidence <= floor {
                            debug!("Ambiguous {} region on {} ({:.2})", region, url, confidence);
                            warnings.push(PipelineWarning::AmbiguousDetection { url: url.clone(), region, confidence });
                        }
                    }
                    order_pages.push(OrderPage { url: url.clone(), depth });
                    pages.insert(url, analysis);
                }
                Err(e) => {
                    warn!("Excluding {} from ordering: {}", url, e);
                    warnings.push(PipelineWarning::Parse { url, reason: e.to_string() });
                }
            }
        }

        let navigation = pages.iter().map(|(url, page)| (url.clone(), page.navigation.clone())).collect();
        let input = OrderInput::new(crawl.root.clone(), order_pages, navigation);
        let resolver = resolver_for(self.settings.order);
        let order = resolve_order(resolver.as_ref(), &input)?;
        info!("Ordered {} pages by {} (confidence {:.2})", order.urls.len(), order.method, order.confidence);

        Ok(PipelineResult { crawl, pages, order, warnings })
    }
}

type Detected = (String, usize, Result<PageAnalysis>);

fn detect_all(store: &PageStore, detector: &dyn Detector, scope: &Scope, targets: Vec<(String, usize)>) -> Vec<Detected> {
    targets
        .into_par_iter()
        .map(|(url, depth)| {
            let analysis = analyze_page(store, detector, scope, &url);
            (url, depth, analysis)
        })
        .collect()
}

/// Parses one stored page and runs both detectors on it.
pub fn analyze_page(store: &PageStore, detector: &dyn Detector, scope: &Scope, url: &str) -> Result<PageAnalysis> {
    let page = store
        .get(url)
        .ok_or_else(|| SiteweaveError::Parse { url: url.to_string(), reason: "no stored record".to_string() })?;
    let bytes = store.read_bytes(&page)?;

    let doc = Document::from_bytes(&bytes, Some(&page.content_type), Some(page.base_url()?))?;
    Ok(PageAnalysis {
        title: doc.title(),
        content: detector.detect_main(&doc),
        navigation: detector.detect_nav(&doc, Some(scope)),
    })
}

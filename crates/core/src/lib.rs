pub mod crawl;
pub mod detect;
pub mod error;
pub mod order;
pub mod parse;
pub mod pipeline;
pub mod preprocess;
pub mod render;
pub mod scoring;
pub mod settings;
pub mod store;
pub mod transport;
pub mod urls;

pub use crawl::{CrawlConfig, CrawlEntry, CrawlResult, CrawlSummary, Crawler, PageOutcome, ResourceKind};
pub use detect::{
    ContentBlock, DetectConfig, DetectStrategy, Detector, HeuristicDetector, LandmarkDetector, NavDetection,
    NavigationNode, NavigationTree, detector_for,
};
pub use error::{Result, SiteweaveError};
pub use order::{
    DocumentOrder, NavigationResolver, OrderInput, OrderMethod, OrderResolver, OrderStrategy, UrlOrderResolver,
    resolve_order,
};
pub use parse::{Document, Element};
pub use pipeline::{PageAnalysis, Pipeline, PipelineOptions, PipelineResult, PipelineWarning};
#[doc(hidden)]
pub use preprocess::{PreprocessConfig, preprocess_html};
pub use render::{RenderConfig, render_markdown, render_result};
#[doc(hidden)]
pub use scoring::{ScoreConfig, ScoreResult, confidence, content_score, nav_score};
pub use settings::Settings;
pub use store::{Page, PageStore, Validator, is_stale};
#[cfg(feature = "fetch")]
pub use transport::HttpTransport;
pub use transport::{FetchConfig, Transport, TransportResponse};
pub use urls::Scope;

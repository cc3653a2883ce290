//! Fetch orchestration.
//!
//! [`Crawler`] walks the site breadth-first from a root url, keeps at most
//! `concurrency` fetches in flight and writes every result through the
//! [`PageStore`]. Per-page failures are recorded in the [`CrawlResult`];
//! only invalid input aborts a crawl.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use siteweave_core::crawl::{CrawlConfig, Crawler};
//! use siteweave_core::store::PageStore;
//! use siteweave_core::transport::{FetchConfig, HttpTransport};
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let root = siteweave_core::urls::parse_root("https://docs.example.com/")?;
//! let store = Arc::new(PageStore::open_in(std::path::Path::new("/tmp/siteweave"), &root)?);
//! let transport = Arc::new(HttpTransport::new(&FetchConfig::default())?);
//!
//! let result = Crawler::new(store, transport, CrawlConfig::default()).crawl(root.as_str(), 2, false).await?;
//! println!("{}", result.summary());
//! # Ok(())
//! # }
//! ```

use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use serde::Serialize;
use time::OffsetDateTime;
use tokio::task::JoinSet;
use tokio::time::{Instant, sleep_until, timeout};
use tracing::{debug, info, warn};
use url::Url;

use crate::parse::{Document, OutboundLink, decode_html};
use crate::store::{Page, PageStore, content_hash, is_stale};
use crate::transport::{Transport, TransportResponse};
use crate::urls::{self, Scope};
use crate::{Result, SiteweaveError};

pub use crate::parse::ResourceKind;

/// Largest accepted `max_depth`.
pub const MAX_DEPTH_LIMIT: usize = 10;

/// Process-wide crawl knobs, fixed for the duration of one crawl.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    /// Maximum fetches in flight (default: 4).
    pub concurrency: usize,
    /// Timeout for a single fetch (default: 30s).
    pub fetch_timeout: Duration,
    /// Deadline for the whole crawl; `None` disables it (default: 10 minutes).
    pub deadline: Option<Duration>,
    /// Age after which a stored page is re-requested (default: 24h).
    pub ttl: Duration,
    /// Minimum gap between two dispatches (default: none).
    pub request_delay: Duration,
    /// Stop dispatching once this many bytes were downloaded (default: 100 MiB).
    pub max_total_bytes: Option<u64>,
    /// Upper bound for `max_depth` (default: 10).
    pub max_depth_limit: usize,
}

impl Default for CrawlConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            fetch_timeout: Duration::from_secs(30),
            deadline: Some(Duration::from_secs(600)),
            ttl: Duration::from_secs(24 * 60 * 60),
            request_delay: Duration::ZERO,
            max_total_bytes: Some(100 * 1024 * 1024),
            max_depth_limit: MAX_DEPTH_LIMIT,
        }
    }
}

/// Why a page counted as unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum UnchangedReason {
    /// The stored copy is younger than the ttl; nothing was requested
    Fresh,
    /// The transport answered "not modified" to the stored validator
    NotModified,
    /// A full body came back with the stored hash
    SameContent,
}

/// Coarse failure category for a page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Network,
    Timeout,
    PermissionDenied,
    HttpStatus,
    Storage,
    Cancelled,
    QuotaExceeded,
    Other,
}

impl From<&SiteweaveError> for FailureKind {
    fn from(err: &SiteweaveError) -> Self {
        match err {
            SiteweaveError::Network { .. } => Self::Network,
            SiteweaveError::Timeout { .. } => Self::Timeout,
            SiteweaveError::PermissionDenied { .. } => Self::PermissionDenied,
            SiteweaveError::HttpStatus { .. } => Self::HttpStatus,
            SiteweaveError::Storage { .. } | SiteweaveError::Io(_) => Self::Storage,
            SiteweaveError::Cancelled(_) => Self::Cancelled,
            _ => Self::Other,
        }
    }
}

/// What happened to one url.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum PageOutcome {
    /// First successful fetch
    Fetched,
    /// Re-fetched with different content
    Updated,
    Unchanged { reason: UnchangedReason },
    Failed { kind: FailureKind, reason: String },
}

impl PageOutcome {
    fn failed(err: &SiteweaveError) -> Self {
        Self::Failed { kind: err.into(), reason: err.to_string() }
    }

    /// Whether a current record exists for the url afterwards.
    pub fn is_stored(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }
}

/// Outcome for one url of a crawl.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CrawlEntry {
    pub url: String,
    pub depth: usize,
    pub kind: ResourceKind,
    pub outcome: PageOutcome,
}

impl CrawlEntry {
    pub fn is_page(&self) -> bool {
        self.kind == ResourceKind::Page
    }
}

/// Per-outcome counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrawlSummary {
    pub fetched: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub assets: usize,
}

impl fmt::Display for CrawlSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} fetched, {} updated, {} unchanged, {} failed, {} assets",
            self.fetched, self.updated, self.unchanged, self.failed, self.assets
        )
    }
}

/// Aggregate result of one crawl, entries sorted by depth then url.
#[derive(Debug, Clone, Serialize)]
pub struct CrawlResult {
    pub root: String,
    pub max_depth: usize,
    pub entries: Vec<CrawlEntry>,
    #[serde(with = "time::serde::rfc3339")]
    pub started_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    pub finished_at: OffsetDateTime,
    /// The deadline fired before the frontier was exhausted
    pub cancelled: bool,
}

impl CrawlResult {
    fn pages_where(&self, pred: impl Fn(&PageOutcome) -> bool) -> Vec<&CrawlEntry> {
        self.entries.iter().filter(|e| e.is_page() && pred(&e.outcome)).collect()
    }

    /// HTML pages fetched for the first time.
    pub fn fetched(&self) -> Vec<&CrawlEntry> {
        self.pages_where(|o| matches!(o, PageOutcome::Fetched))
    }

    /// HTML pages whose content changed.
    pub fn updated(&self) -> Vec<&CrawlEntry> {
        self.pages_where(|o| matches!(o, PageOutcome::Updated))
    }

    /// HTML pages left as they were.
    pub fn unchanged(&self) -> Vec<&CrawlEntry> {
        self.pages_where(|o| matches!(o, PageOutcome::Unchanged { .. }))
    }

    /// Every failed url, pages and assets alike.
    pub fn failed(&self) -> Vec<&CrawlEntry> {
        self.entries.iter().filter(|e| matches!(e.outcome, PageOutcome::Failed { .. })).collect()
    }

    /// Non-HTML resources (stylesheets, images, scripts, downloads).
    pub fn assets(&self) -> Vec<&CrawlEntry> {
        self.entries.iter().filter(|e| !e.is_page()).collect()
    }

    /// HTML pages that have a current store record.
    pub fn pages(&self) -> Vec<&CrawlEntry> {
        self.pages_where(PageOutcome::is_stored)
    }

    /// Looks up the entry for a url.
    pub fn entry(&self, url: &str) -> Option<&CrawlEntry> {
        let key = urls::normalize_str(url).ok()?;
        self.entries.iter().find(|e| e.url == key)
    }

    pub fn summary(&self) -> CrawlSummary {
        CrawlSummary {
            fetched: self.fetched().len(),
            updated: self.updated().len(),
            unchanged: self.unchanged().len(),
            failed: self.failed().len(),
            assets: self.assets().len(),
        }
    }
}

#[derive(Debug, Clone)]
struct FrontierItem {
    url: Url,
    depth: usize,
    kind: ResourceKind,
}

struct TaskOutput {
    key: String,
    kind: ResourceKind,
    outcome: PageOutcome,
    links: Vec<OutboundLink>,
    downloaded: u64,
    /// Normalized redirect target, when it differs from `key`
    redirected_to: Option<String>,
}

struct TaskContext {
    store: Arc<PageStore>,
    transport: Arc<dyn Transport>,
    fetch_timeout: Duration,
    ttl: Duration,
    force_refresh: bool,
}

/// Breadth-first crawler over a [`Transport`], persisting into a [`PageStore`].
pub struct Crawler {
    store: Arc<PageStore>,
    transport: Arc<dyn Transport>,
    config: CrawlConfig,
}

impl Crawler {
    pub fn new(store: Arc<PageStore>, transport: Arc<dyn Transport>, config: CrawlConfig) -> Self {
        Self { store, transport, config }
    }

    pub fn store(&self) -> &Arc<PageStore> {
        &self.store
    }

    /// Crawls from `root` up to `max_depth` link hops (0 = root only).
    ///
    /// # Errors
    ///
    /// [`SiteweaveError::InvalidInput`] for a malformed root, a depth above
    /// the configured limit, a zero concurrency or a root that does not
    /// belong to the store. Everything else is recorded per url.
    pub async fn crawl(&self, root: &str, max_depth: usize, force_refresh: bool) -> Result<CrawlResult> {
        let root = urls::parse_root(root)?;
        if max_depth > self.config.max_depth_limit {
            return Err(SiteweaveError::InvalidInput(format!(
                "max depth {} exceeds the limit of {}",
                max_depth, self.config.max_depth_limit
            )));
        }
        if self.config.concurrency == 0 {
            return Err(SiteweaveError::InvalidInput("concurrency must be at least 1".to_string()));
        }
        if urls::normalize(&root) != self.store.root_url() {
            return Err(SiteweaveError::InvalidInput(format!(
                "store at {} belongs to {}, not {}",
                self.store.dir().display(),
                self.store.root_url(),
                root
            )));
        }

        let started_at = OffsetDateTime::now_utc();
        let scope = Scope::new(&root);
        let ctx = Arc::new(TaskContext {
            store: Arc::clone(&self.store),
            transport: Arc::clone(&self.transport),
            fetch_timeout: self.config.fetch_timeout,
            ttl: self.config.ttl,
            force_refresh,
        });

        info!("Crawling {} (max depth {}, concurrency {})", root, max_depth, self.config.concurrency);

        let deadline = Instant::now() + self.config.deadline.unwrap_or(Duration::from_secs(365 * 24 * 60 * 60));
        let mut visited: HashSet<String> = HashSet::new();
        let mut queue: VecDeque<FrontierItem> = VecDeque::new();
        let mut in_flight: HashMap<String, (usize, ResourceKind)> = HashMap::new();
        let mut entries: Vec<CrawlEntry> = Vec::new();
        let mut tasks: JoinSet<TaskOutput> = JoinSet::new();
        let mut downloaded: u64 = 0;
        let mut next_dispatch: Option<Instant> = None;
        let mut cancelled = false;

        visited.insert(urls::normalize(&root));
        queue.push_back(FrontierItem { url: root.clone(), depth: 0, kind: ResourceKind::Page });

        'crawl: loop {
            while tasks.len() < self.config.concurrency {
                let Some(item) = queue.pop_front() else { break };
                let key = urls::normalize(&item.url);

                if let Some(limit) = self.config.max_total_bytes
                    && downloaded > limit
                {
                    debug!("Quota exceeded; skipping {}", key);
                    entries.push(CrawlEntry {
                        url: key,
                        depth: item.depth,
                        kind: item.kind,
                        outcome: PageOutcome::Failed {
                            kind: FailureKind::QuotaExceeded,
                            reason: format!("download quota of {} bytes exceeded", limit),
                        },
                    });
                    continue;
                }

                if let Some(wait_until) = next_dispatch
                    && wait_until > Instant::now()
                {
                    if wait_until >= deadline {
                        queue.push_front(item);
                        cancelled = true;
                        break 'crawl;
                    }
                    sleep_until(wait_until).await;
                }
                if !self.config.request_delay.is_zero() {
                    next_dispatch = Some(Instant::now() + self.config.request_delay);
                }

                in_flight.insert(key, (item.depth, item.kind));
                tasks.spawn(process(Arc::clone(&ctx), item));
            }

            if tasks.is_empty() {
                break;
            }

            tokio::select! {
                joined = tasks.join_next() => {
                    match joined {
                        Some(Ok(output)) => {
                            let depth = in_flight.remove(&output.key).map(|(depth, _)| depth).unwrap_or_default();
                            downloaded += output.downloaded;
                            if let Some(target) = output.redirected_to {
                                visited.insert(target);
                            }

                            if depth < max_depth {
                                for link in output.links {
                                    let in_scope = match link.kind {
                                        ResourceKind::Page => scope.contains(&link.url),
                                        ResourceKind::Asset => scope.same_site(&link.url),
                                    };
                                    if in_scope && visited.insert(urls::normalize(&link.url)) {
                                        queue.push_back(FrontierItem { url: link.url, depth: depth + 1, kind: link.kind });
                                    }
                                }
                            }

                            entries.push(CrawlEntry { url: output.key, depth, kind: output.kind, outcome: output.outcome });
                        }
                        Some(Err(e)) => warn!("Crawl task failed: {}", e),
                        None => {}
                    }
                }
                _ = sleep_until(deadline) => {
                    cancelled = true;
                    break 'crawl;
                }
            }
        }

        if cancelled {
            warn!("Crawl deadline reached; cancelling {} in-flight and {} queued fetches", tasks.len(), queue.len());
            tasks.shutdown().await;
        }

        let reason = if cancelled { "crawl deadline reached" } else { "crawl task ended without a result" };
        let cancel_err = SiteweaveError::Cancelled(reason.to_string());
        for (key, (depth, kind)) in in_flight {
            entries.push(CrawlEntry { url: key, depth, kind, outcome: PageOutcome::failed(&cancel_err) });
        }
        for item in queue {
            entries.push(CrawlEntry {
                url: urls::normalize(&item.url),
                depth: item.depth,
                kind: item.kind,
                outcome: PageOutcome::failed(&cancel_err),
            });
        }

        entries.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.url.cmp(&b.url)));

        let result = CrawlResult {
            root: urls::normalize(&root),
            max_depth,
            entries,
            started_at,
            finished_at: OffsetDateTime::now_utc(),
            cancelled,
        };

        info!("Crawl of {} finished: {}", result.root, result.summary());
        Ok(result)
    }
}

/// Rebuilds a crawl result from stored records alone, without a request.
///
/// Depths come from a breadth-first walk over stored links starting at the
/// root. Records the walk cannot reach are placed one level below the
/// deepest reachable page. Every entry is `Unchanged { reason: Fresh }`.
pub fn replay(store: &PageStore) -> Result<CrawlResult> {
    let started_at = OffsetDateTime::now_utc();
    let root = Url::parse(store.root_url())
        .map_err(|e| SiteweaveError::InvalidUrl(format!("{}: {}", store.root_url(), e)))?;
    let records: HashMap<String, Page> = store.list().into_iter().map(|p| (p.url.clone(), p)).collect();
    if records.is_empty() {
        return Err(SiteweaveError::InvalidInput(format!("nothing cached for {}", store.root_url())));
    }

    let mut depths: HashMap<String, usize> = HashMap::new();
    let mut queue: VecDeque<(Url, usize)> = VecDeque::new();
    let root_key = urls::normalize(&root);
    if records.contains_key(&root_key) {
        depths.insert(root_key, 0);
        queue.push_back((root.clone(), 0));
    }

    while let Some((url, depth)) = queue.pop_front() {
        let Some(page) = records.get(&urls::normalize(&url)) else { continue };
        let kind = resolve_kind(ResourceKind::Page, &page.content_type);
        for link in stored_links(store, page, kind) {
            let key = urls::normalize(&link.url);
            if records.contains_key(&key) && !depths.contains_key(&key) {
                depths.insert(key, depth + 1);
                queue.push_back((link.url, depth + 1));
            }
        }
    }

    let unreached = depths.values().max().map_or(0, |d| d + 1);
    let mut entries: Vec<CrawlEntry> = records
        .values()
        .map(|page| CrawlEntry {
            url: page.url.clone(),
            depth: depths.get(&page.url).copied().unwrap_or(unreached),
            kind: resolve_kind(ResourceKind::Page, &page.content_type),
            outcome: PageOutcome::Unchanged { reason: UnchangedReason::Fresh },
        })
        .collect();
    entries.sort_by(|a, b| a.depth.cmp(&b.depth).then_with(|| a.url.cmp(&b.url)));

    debug!("Replayed {} cached records for {}", entries.len(), store.root_url());
    Ok(CrawlResult {
        root: urls::normalize(&root),
        max_depth: entries.iter().map(|e| e.depth).max().unwrap_or_default(),
        entries,
        started_at,
        finished_at: OffsetDateTime::now_utc(),
        cancelled: false,
    })
}

/// Fetches, stores and link-extracts one url.
///
/// When the url fails but an earlier record survives, its stored links are
/// still followed so the pages below it stay part of the crawl.
async fn process(ctx: Arc<TaskContext>, item: FrontierItem) -> TaskOutput {
    let existing = ctx.store.get(&urls::normalize(&item.url));
    let mut output = fetch_and_store(&ctx, &item, existing.as_ref()).await;

    if matches!(output.outcome, PageOutcome::Failed { .. })
        && let Some(page) = &existing
    {
        output.kind = resolve_kind(item.kind, &page.content_type);
        output.links = stored_links(&ctx.store, page, output.kind);
        debug!("Keeping the stored copy of {} after a failed refresh", output.key);
    }
    output
}

async fn fetch_and_store(ctx: &TaskContext, item: &FrontierItem, existing: Option<&Page>) -> TaskOutput {
    let key = urls::normalize(&item.url);
    let mut output = TaskOutput {
        key: key.clone(),
        kind: item.kind,
        outcome: PageOutcome::Fetched,
        links: Vec::new(),
        downloaded: 0,
        redirected_to: None,
    };

    if !ctx.force_refresh
        && let Some(page) = existing
        && !is_stale(page, ctx.ttl)
    {
        debug!("Fresh, not requesting: {}", key);
        output.kind = resolve_kind(item.kind, &page.content_type);
        output.outcome = PageOutcome::Unchanged { reason: UnchangedReason::Fresh };
        output.links = stored_links(&ctx.store, page, output.kind);
        return output;
    }

    let validator = existing.and_then(|p| p.validator.clone());
    let response = match timeout(ctx.fetch_timeout, ctx.transport.fetch(&item.url, validator.as_ref())).await {
        Ok(Ok(response)) => response,
        Ok(Err(e)) => {
            warn!("Failed to fetch {}: {}", key, e);
            output.outcome = PageOutcome::failed(&e);
            return output;
        }
        Err(_) => {
            let e = SiteweaveError::Timeout { url: key.clone(), timeout_secs: ctx.fetch_timeout.as_secs() };
            warn!("{}", e);
            output.outcome = PageOutcome::failed(&e);
            return output;
        }
    };

    let now = OffsetDateTime::now_utc();
    match response {
        TransportResponse::NotModified { validator: fresh } => {
            let Some(page) = existing else {
                let e = SiteweaveError::Network {
                    url: key.clone(),
                    reason: "server answered not modified but nothing is stored".to_string(),
                };
                output.outcome = PageOutcome::failed(&e);
                return output;
            };
            output.kind = resolve_kind(item.kind, &page.content_type);
            match ctx.store.refresh(&key, now, fresh) {
                Ok(page) => {
                    debug!("Not modified: {}", key);
                    output.outcome = PageOutcome::Unchanged { reason: UnchangedReason::NotModified };
                    output.links = stored_links(&ctx.store, &page, output.kind);
                }
                Err(e) => {
                    warn!("Failed to refresh {}: {}", key, e);
                    output.outcome = PageOutcome::failed(&e);
                }
            }
        }
        TransportResponse::Fetched { body, content_type, validator: fresh, final_url } => {
            output.downloaded = body.len() as u64;
            let content_type = content_type.unwrap_or_else(|| urls::guess_content_type(&final_url).to_string());
            output.kind = resolve_kind(item.kind, &content_type);
            let target = urls::normalize(&final_url);
            if target != key {
                debug!("{} was served from {}", key, target);
                output.redirected_to = Some(target);
            }

            let stored = match existing {
                Some(page) if page.content_hash == content_hash(&body) => ctx
                    .store
                    .refresh(&key, now, fresh)
                    .map(|_| PageOutcome::Unchanged { reason: UnchangedReason::SameContent }),
                _ => {
                    let page = Page::new(&item.url, &body, &content_type, fresh, now).with_final_url(&final_url);
                    ctx.store.put(page, &body).map(|()| {
                        if existing.is_some() { PageOutcome::Updated } else { PageOutcome::Fetched }
                    })
                }
            };

            match stored {
                Ok(outcome) => {
                    debug!("{:?}: {} ({} bytes)", outcome, key, body.len());
                    output.outcome = outcome;
                    if output.kind == ResourceKind::Page {
                        output.links = links_in(&body, Some(&content_type), &final_url);
                    }
                }
                Err(e) => {
                    warn!("Failed to store {}: {}", key, e);
                    output.outcome = PageOutcome::failed(&e);
                }
            }
        }
    }

    output
}

/// A url only stays a page if it was linked as one and really is HTML.
fn resolve_kind(requested: ResourceKind, content_type: &str) -> ResourceKind {
    if requested == ResourceKind::Page && urls::is_html(content_type) { ResourceKind::Page } else { ResourceKind::Asset }
}

fn stored_links(store: &PageStore, page: &Page, kind: ResourceKind) -> Vec<OutboundLink> {
    if kind != ResourceKind::Page {
        return Vec::new();
    }
    match store.read_bytes(page).and_then(|bytes| page.base_url().map(|base| (bytes, base))) {
        Ok((bytes, base)) => links_in(&bytes, Some(&page.content_type), &base),
        Err(e) => {
            warn!("Could not read stored bytes for {}: {}", page.url, e);
            Vec::new()
        }
    }
}

/// Outbound links of raw page bytes; unparsable pages have none.
fn links_in(bytes: &[u8], content_type: Option<&str>, url: &Url) -> Vec<OutboundLink> {
    match decode_html(bytes, content_type, url.as_str()).and_then(|html| Document::parse(&html)) {
        Ok(doc) => doc.outbound_links(url),
        Err(e) => {
            debug!("No links extracted from {}: {}", url, e);
            Vec::new()
        }
    }
}

//! Crawl integration tests over an in-memory site
mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{ABOUT, GUIDE, MemoryTransport, ROOT, STYLE};
use siteweave_core::crawl::{self, CrawlConfig, Crawler, FailureKind, PageOutcome, ResourceKind, UnchangedReason};
use siteweave_core::store::PageStore;
use siteweave_core::{SiteweaveError, urls};
use tempfile::TempDir;

fn open_store(dir: &TempDir, root: &str) -> Arc<PageStore> {
    let root = urls::parse_root(root).unwrap();
    Arc::new(PageStore::open_in(dir.path(), &root).unwrap())
}

fn crawler(store: &Arc<PageStore>, transport: &Arc<MemoryTransport>) -> Crawler {
    Crawler::new(Arc::clone(store), transport.clone(), CrawlConfig::default())
}

#[tokio::test]
async fn test_four_resource_site() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, ROOT);
    let transport = Arc::new(MemoryTransport::fixture_site());

    let result = crawler(&store, &transport).crawl(ROOT, 2, false).await.unwrap();

    let fetched: Vec<&str> = result.fetched().iter().map(|e| e.url.as_str()).collect();
    assert_eq!(fetched, vec![ROOT, ABOUT, GUIDE]);

    let assets = result.assets();
    assert_eq!(assets.len(), 1);
    assert_eq!(assets[0].url, STYLE);
    assert_eq!(assets[0].kind, ResourceKind::Asset);
    assert_eq!(assets[0].outcome, PageOutcome::Fetched);

    assert!(result.failed().is_empty());
    assert!(!result.cancelled);
    assert_eq!(store.len(), 4);
    assert_eq!(result.entry(GUIDE).unwrap().depth, 1);
}

#[tokio::test]
async fn test_every_stored_entry_has_a_matching_record() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, ROOT);
    let transport = Arc::new(MemoryTransport::fixture_site());

    let result = crawler(&store, &transport).crawl(ROOT, 2, false).await.unwrap();

    for entry in result.entries.iter().filter(|e| e.outcome.is_stored()) {
        let page = store.get(&entry.url).unwrap();
        assert!(store.verify(&page).unwrap(), "hash mismatch for {}", entry.url);
    }
}

#[tokio::test]
async fn test_recrawl_is_idempotent() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, ROOT);
    let transport = Arc::new(MemoryTransport::fixture_site());

    crawler(&store, &transport).crawl(ROOT, 2, false).await.unwrap();
    let before = store.list();
    transport.clear_requests();

    let again = crawler(&store, &transport).crawl(ROOT, 2, false).await.unwrap();

    assert_eq!(again.unchanged().len(), 3);
    assert!(again.updated().is_empty());
    assert!(again.fetched().is_empty());
    assert!(
        again
            .unchanged()
            .iter()
            .all(|e| e.outcome == PageOutcome::Unchanged { reason: UnchangedReason::Fresh })
    );
    assert_eq!(transport.request_count(), 0);

    let urls_before: Vec<_> = before.iter().map(|p| (&p.url, &p.content_hash)).collect();
    let after = store.list();
    let urls_after: Vec<_> = after.iter().map(|p| (&p.url, &p.content_hash)).collect();
    assert_eq!(urls_before, urls_after);
}

#[tokio::test]
async fn test_forced_recrawl_uses_validators() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, ROOT);
    let transport = Arc::new(MemoryTransport::fixture_site());

    crawler(&store, &transport).crawl(ROOT, 2, false).await.unwrap();
    let again = crawler(&store, &transport).crawl(ROOT, 2, true).await.unwrap();

    assert_eq!(again.unchanged().len(), 3);
    assert!(again.updated().is_empty());
    assert!(
        again
            .unchanged()
            .iter()
            .all(|e| e.outcome == PageOutcome::Unchanged { reason: UnchangedReason::NotModified })
    );
}

#[tokio::test]
async fn test_changed_page_is_updated() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, ROOT);
    let transport = Arc::new(MemoryTransport::fixture_site());

    crawler(&store, &transport).crawl(ROOT, 2, false).await.unwrap();
    let old_hash = store.get(ABOUT).unwrap().content_hash;

    transport.set(ABOUT, b"<html><body><main><p>Rewritten.</p></main></body></html>", "text/html");
    let again = crawler(&store, &transport).crawl(ROOT, 2, true).await.unwrap();

    let updated: Vec<&str> = again.updated().iter().map(|e| e.url.as_str()).collect();
    assert_eq!(updated, vec![ABOUT]);

    let page = store.get(ABOUT).unwrap();
    assert_ne!(page.content_hash, old_hash);
    assert!(store.verify(&page).unwrap());
}

#[tokio::test]
async fn test_failures_do_not_stop_the_crawl() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, ROOT);
    let transport = Arc::new(
        MemoryTransport::new()
            .page(ROOT, &common::read_fixture("site/index.html"))
            .page(GUIDE, &common::read_fixture("site/guide/intro.html")),
    );

    let result = crawler(&store, &transport).crawl(ROOT, 2, false).await.unwrap();

    let failed = result.entry(ABOUT).unwrap();
    assert!(matches!(failed.outcome, PageOutcome::Failed { kind: FailureKind::HttpStatus, .. }));
    assert!(store.get(ABOUT).is_none());
    assert_eq!(result.fetched().len(), 2);
}

#[tokio::test]
async fn test_out_of_scope_pages_are_never_requested() {
    let root = "https://docs.example.com/guide/";
    let html = r#"<html><head><link rel="stylesheet" href="/style.css"></head><body>
        <a href="intro.html">Intro</a>
        <a href="../about.html">Parent directory</a>
        <a href="https://other.example.org/guide/">Other host</a>
        <a href="mailto:team@example.com">Mail</a>
    </body></html>"#;

    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, root);
    let transport = Arc::new(
        MemoryTransport::fixture_site().page(root, html).page("https://other.example.org/guide/", "<p>x</p>"),
    );

    let result = crawler(&store, &transport).crawl(root, 1, false).await.unwrap();

    let requested = transport.requests();
    assert!(requested.contains(&GUIDE.to_string()));
    assert!(requested.contains(&STYLE.to_string()));
    assert!(!requested.contains(&ABOUT.to_string()));
    assert!(!requested.iter().any(|u| u.contains("other.example.org")));
    assert!(result.entry(ABOUT).is_none());
}

#[tokio::test]
async fn test_depth_zero_fetches_only_the_root() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, ROOT);
    let transport = Arc::new(MemoryTransport::fixture_site());

    let result = crawler(&store, &transport).crawl(ROOT, 0, false).await.unwrap();

    assert_eq!(result.entries.len(), 1);
    assert_eq!(transport.requests(), vec![ROOT.to_string()]);
}

#[tokio::test]
async fn test_fresh_pages_still_lead_to_new_children() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, ROOT);
    let transport = Arc::new(MemoryTransport::fixture_site());

    crawler(&store, &transport).crawl(ROOT, 0, false).await.unwrap();
    let deeper = crawler(&store, &transport).crawl(ROOT, 1, false).await.unwrap();

    assert_eq!(
        deeper.entry(ROOT).unwrap().outcome,
        PageOutcome::Unchanged { reason: UnchangedReason::Fresh }
    );
    assert_eq!(deeper.fetched().len(), 2);
}

#[tokio::test]
async fn test_deadline_cancels_and_keeps_store_consistent() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, ROOT);
    let transport = Arc::new(MemoryTransport::fixture_site());
    crawler(&store, &transport).crawl(ROOT, 2, false).await.unwrap();

    let slow = Arc::new(MemoryTransport::fixture_site().with_delay(Duration::from_millis(500)));
    let config = CrawlConfig { deadline: Some(Duration::from_millis(50)), ..CrawlConfig::default() };
    let result = Crawler::new(Arc::clone(&store), slow, config).crawl(ROOT, 2, true).await.unwrap();

    assert!(result.cancelled);
    let root = result.entry(ROOT).unwrap();
    assert!(matches!(root.outcome, PageOutcome::Failed { kind: FailureKind::Cancelled, .. }));

    assert_eq!(store.len(), 4);
    for page in store.list() {
        assert!(store.verify(&page).unwrap());
    }
}

#[tokio::test]
async fn test_per_fetch_timeout() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, ROOT);
    let slow = Arc::new(MemoryTransport::fixture_site().with_delay(Duration::from_millis(300)));
    let config = CrawlConfig { fetch_timeout: Duration::from_millis(20), ..CrawlConfig::default() };

    let result = Crawler::new(Arc::clone(&store), slow, config).crawl(ROOT, 2, false).await.unwrap();

    assert!(!result.cancelled);
    assert!(matches!(
        result.entry(ROOT).unwrap().outcome,
        PageOutcome::Failed { kind: FailureKind::Timeout, .. }
    ));
    assert!(store.is_empty());
}

#[tokio::test]
async fn test_quota_stops_new_fetches() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, ROOT);
    let transport = Arc::new(MemoryTransport::fixture_site());
    let config = CrawlConfig { max_total_bytes: Some(10), ..CrawlConfig::default() };

    let result = Crawler::new(Arc::clone(&store), transport, config).crawl(ROOT, 2, false).await.unwrap();

    assert_eq!(result.entry(ROOT).unwrap().outcome, PageOutcome::Fetched);
    assert!(
        result
            .entries
            .iter()
            .filter(|e| e.depth == 1)
            .all(|e| matches!(e.outcome, PageOutcome::Failed { kind: FailureKind::QuotaExceeded, .. }))
    );
}

#[tokio::test]
async fn test_invalid_input_is_rejected_before_fetching() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, ROOT);
    let transport = Arc::new(MemoryTransport::fixture_site());
    let crawler = crawler(&store, &transport);

    assert!(matches!(crawler.crawl("", 1, false).await, Err(SiteweaveError::InvalidInput(_))));
    assert!(matches!(crawler.crawl("ftp://docs.example.com/", 1, false).await, Err(SiteweaveError::InvalidInput(_))));
    assert!(matches!(crawler.crawl(ROOT, 11, false).await, Err(SiteweaveError::InvalidInput(_))));
    assert!(matches!(
        crawler.crawl("https://elsewhere.example.com/", 1, false).await,
        Err(SiteweaveError::InvalidInput(_))
    ));
    assert_eq!(transport.request_count(), 0);
}

#[tokio::test]
async fn test_store_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let transport = Arc::new(MemoryTransport::fixture_site());
    let records = {
        let store = open_store(&dir, ROOT);
        crawler(&store, &transport).crawl(ROOT, 2, false).await.unwrap();
        store.list()
    };

    let reopened = open_store(&dir, ROOT);
    assert_eq!(reopened.list(), records);
}

#[tokio::test]
async fn test_replay_matches_crawl_depths() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, ROOT);
    let transport = Arc::new(MemoryTransport::fixture_site());
    let live = crawler(&store, &transport).crawl(ROOT, 2, false).await.unwrap();

    let replayed = crawl::replay(&store).unwrap();

    let shape = |r: &siteweave_core::CrawlResult| -> Vec<(String, usize, ResourceKind)> {
        r.entries.iter().map(|e| (e.url.clone(), e.depth, e.kind)).collect()
    };
    assert_eq!(shape(&replayed), shape(&live));
    assert_eq!(replayed.unchanged().len(), 3);
}

#[test]
fn test_replay_of_empty_store() {
    let dir = TempDir::new().unwrap();
    let store = open_store(&dir, ROOT);
    assert!(matches!(crawl::replay(&store), Err(SiteweaveError::InvalidInput(_))));
}

//! Persistent page store.
//!
//! One store per root url. Each store is a directory holding a `cache.json`
//! metadata file and the fetched bytes under `pages/`:
//!
//! ```text
//! <cache_dir>/example.com_1a2b3c4d/
//!   cache.json
//!   pages/
//!     index-0123456789ab.html
//!     guide_intro-89abcdef0123.html
//!     style-fedcba987654.css
//! ```
//!
//! Byte files are content-addressed, so replacing a record never touches the
//! file the old record pointed at until the new record has been committed.
//! Both byte files and metadata are written through a temp file and a rename.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use tracing::{debug, warn};
use url::Url;

use crate::urls;
use crate::{Result, SiteweaveError};

/// File name of the metadata file inside a cache directory
pub const METADATA_FILE: &str = "cache.json";

/// Sub-directory holding the page bytes
const PAGES_DIR: &str = "pages";

/// Conditional-request token returned by the transport.
///
/// Opaque to everything but the transport, which turns it into
/// `If-None-Match` / `If-Modified-Since` headers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct Validator {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub etag: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<String>,
}

impl Validator {
    /// Returns `None` when neither header was present.
    pub fn non_empty(self) -> Option<Self> {
        if self.etag.is_none() && self.last_modified.is_none() { None } else { Some(self) }
    }
}

/// A stored page record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Page {
    /// Normalized url, unique within a store
    pub url: String,
    /// Path of the stored bytes, relative to the store directory
    pub local_path: PathBuf,
    /// Lowercase hex SHA-256 of the stored bytes
    pub content_hash: String,
    /// Byte size of the stored bytes
    pub size: u64,
    pub content_type: String,
    #[serde(with = "time::serde::rfc3339")]
    pub fetched_at: OffsetDateTime,
    #[serde(default, rename = "validator_token", skip_serializing_if = "Option::is_none")]
    pub validator: Option<Validator>,
    /// Where the bytes were served from, when a redirect moved the page
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub final_url: Option<String>,
}

impl Page {
    /// Builds a record for freshly fetched bytes.
    pub fn new(
        url: &Url, body: &[u8], content_type: &str, validator: Option<Validator>, fetched_at: OffsetDateTime,
    ) -> Self {
        let content_hash = content_hash(body);
        let file_name = urls::local_file_name(url, &content_hash, content_type);
        Self {
            url: urls::normalize(url),
            local_path: Path::new(PAGES_DIR).join(file_name),
            content_hash,
            size: body.len() as u64,
            content_type: content_type.to_string(),
            fetched_at,
            validator,
            final_url: None,
        }
    }

    /// Records the post-redirect location; a no-op when it is the page's own url.
    pub fn with_final_url(mut self, final_url: &Url) -> Self {
        let normalized = urls::normalize(final_url);
        self.final_url = (normalized != self.url).then_some(normalized);
        self
    }

    /// The url relative links in the stored bytes resolve against.
    pub fn base_url(&self) -> Result<Url> {
        let raw = self.final_url.as_deref().unwrap_or(&self.url);
        Url::parse(raw).map_err(|e| SiteweaveError::InvalidUrl(format!("{}: {}", raw, e)))
    }

    /// Whether the stored bytes are an HTML page.
    pub fn is_html(&self) -> bool {
        urls::is_html(&self.content_type)
    }
}

/// Lowercase hex SHA-256 of `bytes`.
pub fn content_hash(bytes: &[u8]) -> String {
    format!("{:x}", Sha256::digest(bytes))
}

/// True iff `now - page.fetched_at > ttl`.
pub fn is_stale_at(page: &Page, ttl: Duration, now: OffsetDateTime) -> bool {
    let ttl = time::Duration::try_from(ttl).unwrap_or(time::Duration::MAX);
    now - page.fetched_at > ttl
}

/// [`is_stale_at`] against the current wall clock.
pub fn is_stale(page: &Page, ttl: Duration) -> bool {
    is_stale_at(page, ttl, OffsetDateTime::now_utc())
}

/// On-disk shape of `cache.json`.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheMetadata {
    root_url: String,
    #[serde(with = "time::serde::rfc3339")]
    created_at: OffsetDateTime,
    #[serde(with = "time::serde::rfc3339")]
    updated_at: OffsetDateTime,
    pages: Vec<Page>,
}

/// Summary of one cache directory, as shown by `siteweave list`.
#[derive(Debug, Clone, Serialize)]
pub struct CacheSummary {
    pub root_url: String,
    pub dir: PathBuf,
    pub page_count: usize,
    pub total_size: u64,
    #[serde(with = "time::serde::rfc3339")]
    pub last_updated: OffsetDateTime,
}

/// Page store for a single root url.
///
/// Writes for the same url are serialized through a per-url lock, and the
/// metadata file is rewritten under a store-wide lock. Reads never block on
/// disk I/O.
pub struct PageStore {
    dir: PathBuf,
    root_url: String,
    created_at: OffsetDateTime,
    records: RwLock<BTreeMap<String, Page>>,
    url_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
    persist_lock: Mutex<()>,
}

impl std::fmt::Debug for PageStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PageStore")
            .field("dir", &self.dir)
            .field("root_url", &self.root_url)
            .field("pages", &self.len())
            .finish()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl PageStore {
    /// Opens (or creates) the store for `root` under `base_dir`.
    ///
    /// The store directory is `base_dir/<host>_<hash>`.
    pub fn open_in(base_dir: &Path, root: &Url) -> Result<Self> {
        Self::open(&base_dir.join(urls::cache_dir_name(root)), root)
    }

    /// Opens (or creates) a store rooted at `dir`.
    ///
    /// Fails with [`SiteweaveError::Storage`] when the directory cannot be
    /// created, when `cache.json` is unreadable, or when it belongs to a
    /// different root url.
    pub fn open(dir: &Path, root: &Url) -> Result<Self> {
        let root_url = urls::normalize(root);
        fs::create_dir_all(dir.join(PAGES_DIR)).map_err(|e| SiteweaveError::storage(dir, e))?;

        let metadata_path = dir.join(METADATA_FILE);
        let (created_at, records) = if metadata_path.exists() {
            let metadata = read_metadata(&metadata_path)?;
            if metadata.root_url != root_url {
                return Err(SiteweaveError::storage(
                    &metadata_path,
                    format!("cache belongs to {}, not {}", metadata.root_url, root_url),
                ));
            }
            let records = metadata.pages.into_iter().map(|p| (p.url.clone(), p)).collect();
            (metadata.created_at, records)
        } else {
            (OffsetDateTime::now_utc(), BTreeMap::new())
        };

        debug!("Opened page store at {} with {} records", dir.display(), records.len());

        Ok(Self {
            dir: dir.to_path_buf(),
            root_url,
            created_at,
            records: RwLock::new(records),
            url_locks: Mutex::new(HashMap::new()),
            persist_lock: Mutex::new(()),
        })
    }

    /// The store directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Normalized root url this store belongs to.
    pub fn root_url(&self) -> &str {
        &self.root_url
    }

    /// Inserts or replaces the record for `page.url`, storing `body` at
    /// `page.local_path`.
    ///
    /// The record is only swapped once the bytes are on disk and the hash
    /// matches; if anything fails the previous record stays in place.
    pub fn put(&self, mut page: Page, body: &[u8]) -> Result<()> {
        page.url = urls::normalize_str(&page.url)?;

        let actual = content_hash(body);
        if actual != page.content_hash || body.len() as u64 != page.size {
            return Err(SiteweaveError::storage(
                self.dir.join(&page.local_path),
                format!("record for {} does not describe the given bytes", page.url),
            ));
        }

        let url_lock = self.url_lock(&page.url);
        let _guard = lock(&url_lock);

        let path = self.dir.join(&page.local_path);
        write_atomic(&path, body)?;

        let previous = self.write_records().insert(page.url.clone(), page.clone());
        if let Err(e) = self.persist() {
            let reused = previous.as_ref().is_some_and(|p| p.local_path == page.local_path);
            self.restore(&page.url, previous);
            if !reused {
                self.remove_orphan(&page.local_path);
            }
            return Err(e);
        }

        if let Some(previous) = previous
            && previous.local_path != page.local_path
        {
            self.remove_orphan(&previous.local_path);
        }

        debug!("Stored {} ({} bytes) at {}", page.url, page.size, page.local_path.display());
        Ok(())
    }

    /// Re-stamps an existing record after a "not modified" answer.
    ///
    /// The bytes stay as they are; `validator` replaces the stored one only
    /// when the transport returned a new token.
    pub fn refresh(&self, url: &str, fetched_at: OffsetDateTime, validator: Option<Validator>) -> Result<Page> {
        let key = urls::normalize_str(url)?;
        let url_lock = self.url_lock(&key);
        let _guard = lock(&url_lock);

        let previous = self
            .get(&key)
            .ok_or_else(|| SiteweaveError::storage(&self.dir, format!("no record for {}", key)))?;

        let mut updated = previous.clone();
        updated.fetched_at = fetched_at;
        if validator.is_some() {
            updated.validator = validator;
        }

        self.write_records().insert(key.clone(), updated.clone());
        if let Err(e) = self.persist() {
            self.restore(&key, Some(previous));
            return Err(e);
        }

        Ok(updated)
    }

    /// Looks up a record by url (normalized before lookup).
    pub fn get(&self, url: &str) -> Option<Page> {
        let records = self.records.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(page) = records.get(url) {
            return Some(page.clone());
        }
        let key = urls::normalize_str(url).ok()?;
        records.get(&key).cloned()
    }

    /// All records, ordered by url.
    pub fn list(&self) -> Vec<Page> {
        self.records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect()
    }

    /// Number of records.
    pub fn len(&self) -> usize {
        self.records.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Whether the store has no records.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Reads the bytes a record points at.
    pub fn read_bytes(&self, page: &Page) -> Result<Vec<u8>> {
        let path = self.dir.join(&page.local_path);
        fs::read(&path).map_err(|e| SiteweaveError::storage(path, e))
    }

    /// Whether the stored bytes still hash to the recorded value.
    pub fn verify(&self, page: &Page) -> Result<bool> {
        Ok(content_hash(&self.read_bytes(page)?) == page.content_hash)
    }

    /// Summary of this store.
    pub fn summary(&self) -> CacheSummary {
        let pages = self.list();
        CacheSummary {
            root_url: self.root_url.clone(),
            dir: self.dir.clone(),
            page_count: pages.len(),
            total_size: pages.iter().map(|p| p.size).sum(),
            last_updated: pages.iter().map(|p| p.fetched_at).max().unwrap_or(self.created_at),
        }
    }

    fn url_lock(&self, url: &str) -> Arc<Mutex<()>> {
        lock(&self.url_locks).entry(url.to_string()).or_default().clone()
    }

    fn write_records(&self) -> std::sync::RwLockWriteGuard<'_, BTreeMap<String, Page>> {
        self.records.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn restore(&self, url: &str, previous: Option<Page>) {
        let mut records = self.write_records();
        match previous {
            Some(page) => records.insert(url.to_string(), page),
            None => records.remove(url),
        };
    }

    fn remove_orphan(&self, local_path: &Path) {
        let still_used = self
            .records
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .any(|p| p.local_path == local_path);
        if still_used {
            return;
        }
        let path = self.dir.join(local_path);
        if let Err(e) = fs::remove_file(&path) {
            warn!("Failed to remove replaced page file {}: {}", path.display(), e);
        }
    }

    fn persist(&self) -> Result<()> {
        let _guard = lock(&self.persist_lock);
        let pages = self.list();
        let updated_at = pages.iter().map(|p| p.fetched_at).max().unwrap_or(self.created_at);
        let metadata = CacheMetadata { root_url: self.root_url.clone(), created_at: self.created_at, updated_at, pages };

        let path = self.dir.join(METADATA_FILE);
        let json = serde_json::to_vec_pretty(&metadata).map_err(|e| SiteweaveError::storage(&path, e))?;
        write_atomic(&path, &json)
    }
}

fn read_metadata(path: &Path) -> Result<CacheMetadata> {
    let raw = fs::read(path).map_err(|e| SiteweaveError::storage(path, e))?;
    serde_json::from_slice(&raw).map_err(|e| SiteweaveError::storage(path, format!("invalid metadata: {}", e)))
}

/// Atomic write: temp file in the same directory, then rename.
fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let file_name = path.file_name().and_then(|n| n.to_str()).unwrap_or("page");
    let tmp_path = path.with_file_name(format!(".{}.tmp", file_name));

    fs::write(&tmp_path, bytes).map_err(|e| SiteweaveError::storage(&tmp_path, e))?;

    #[cfg(target_os = "windows")]
    if path.exists() {
        fs::remove_file(path).map_err(|e| SiteweaveError::storage(path, e))?;
    }

    fs::rename(&tmp_path, path).map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        SiteweaveError::storage(path, e)
    })
}

/// Lists every cache directory under `base_dir`.
///
/// Directories without a readable `cache.json` are skipped with a warning.
pub fn list_caches(base_dir: &Path) -> Result<Vec<CacheSummary>> {
    if !base_dir.exists() {
        return Ok(Vec::new());
    }

    let mut summaries = Vec::new();
    for entry in fs::read_dir(base_dir)? {
        let entry = entry?;
        let path = entry.path();
        let hidden = entry.file_name().to_string_lossy().starts_with('.');
        if hidden || !path.is_dir() {
            continue;
        }

        let metadata_path = path.join(METADATA_FILE);
        if !metadata_path.exists() {
            continue;
        }

        match read_metadata(&metadata_path) {
            Ok(metadata) => summaries.push(CacheSummary {
                root_url: metadata.root_url,
                dir: path,
                page_count: metadata.pages.len(),
                total_size: metadata.pages.iter().map(|p| p.size).sum(),
                last_updated: metadata.updated_at,
            }),
            Err(e) => warn!("Skipping unreadable cache {}: {}", path.display(), e),
        }
    }

    summaries.sort_by(|a, b| a.root_url.cmp(&b.root_url));
    Ok(summaries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn root() -> Url {
        Url::parse("https://example.com/docs/").unwrap()
    }

    fn page(url: &str, body: &[u8]) -> Page {
        Page::new(
            &Url::parse(url).unwrap(),
            body,
            "text/html",
            Some(Validator { etag: Some("\"v1\"".into()), last_modified: None }),
            OffsetDateTime::now_utc(),
        )
    }

    #[test]
    fn test_put_and_get() {
        let tmp = TempDir::new().unwrap();
        let store = PageStore::open(tmp.path(), &root()).unwrap();
        let p = page("https://example.com/docs/intro.html#top", b"<html>intro</html>");

        store.put(p.clone(), b"<html>intro</html>").unwrap();

        let stored = store.get("https://example.com/docs/intro.html").unwrap();
        assert_eq!(stored.content_hash, p.content_hash);
        assert!(store.verify(&stored).unwrap());
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_put_replaces_single_record() {
        let tmp = TempDir::new().unwrap();
        let store = PageStore::open(tmp.path(), &root()).unwrap();

        let first = page("https://example.com/docs/a.html", b"one");
        let second = page("https://example.com/docs/a.html?x=1", b"two");
        store.put(first.clone(), b"one").unwrap();
        store.put(second.clone(), b"two").unwrap();

        assert_eq!(store.len(), 1);
        let stored = store.get("https://example.com/docs/a.html").unwrap();
        assert_eq!(stored.content_hash, second.content_hash);
        assert!(!tmp.path().join(&first.local_path).exists());
        assert_eq!(store.read_bytes(&stored).unwrap(), b"two");
    }

    #[test]
    fn test_put_rejects_mismatched_bytes() {
        let tmp = TempDir::new().unwrap();
        let store = PageStore::open(tmp.path(), &root()).unwrap();
        let p = page("https://example.com/docs/a.html", b"one");

        let result = store.put(p, b"something else");
        assert!(matches!(result, Err(SiteweaveError::Storage { .. })));
        assert!(store.is_empty());
    }

    #[test]
    fn test_metadata_round_trip() {
        let tmp = TempDir::new().unwrap();
        let written = {
            let store = PageStore::open(tmp.path(), &root()).unwrap();
            store.put(page("https://example.com/docs/", b"root"), b"root").unwrap();
            store.put(page("https://example.com/docs/b.html", b"bee"), b"bee").unwrap();
            store.list()
        };

        let reopened = PageStore::open(tmp.path(), &root()).unwrap();
        assert_eq!(reopened.list(), written);
        for p in reopened.list() {
            assert!(reopened.verify(&p).unwrap());
        }
    }

    #[test]
    fn test_open_rejects_foreign_cache() {
        let tmp = TempDir::new().unwrap();
        {
            let store = PageStore::open(tmp.path(), &root()).unwrap();
            store.put(page("https://example.com/docs/", b"root"), b"root").unwrap();
        }
        let other = Url::parse("https://other.org/").unwrap();
        assert!(matches!(PageStore::open(tmp.path(), &other), Err(SiteweaveError::Storage { .. })));
    }

    #[test]
    fn test_refresh_keeps_bytes() {
        let tmp = TempDir::new().unwrap();
        let store = PageStore::open(tmp.path(), &root()).unwrap();
        let mut p = page("https://example.com/docs/a.html", b"one");
        p.fetched_at = OffsetDateTime::now_utc() - time::Duration::days(3);
        store.put(p.clone(), b"one").unwrap();

        let later = OffsetDateTime::now_utc();
        let refreshed = store.refresh("https://example.com/docs/a.html", later, None).unwrap();

        assert_eq!(refreshed.fetched_at, later);
        assert_eq!(refreshed.content_hash, p.content_hash);
        assert_eq!(refreshed.validator, p.validator);
    }

    #[test]
    fn test_refresh_missing_record() {
        let tmp = TempDir::new().unwrap();
        let store = PageStore::open(tmp.path(), &root()).unwrap();
        let result = store.refresh("https://example.com/docs/missing.html", OffsetDateTime::now_utc(), None);
        assert!(matches!(result, Err(SiteweaveError::Storage { .. })));
    }

    #[test]
    fn test_is_stale_at() {
        let now = OffsetDateTime::now_utc();
        let mut p = page("https://example.com/docs/a.html", b"one");
        let ttl = Duration::from_secs(3600);

        p.fetched_at = now - time::Duration::minutes(30);
        assert!(!is_stale_at(&p, ttl, now));

        p.fetched_at = now - time::Duration::hours(2);
        assert!(is_stale_at(&p, ttl, now));

        p.fetched_at = now - time::Duration::hours(1);
        assert!(!is_stale_at(&p, ttl, now));
    }

    #[test]
    fn test_list_caches() {
        let tmp = TempDir::new().unwrap();
        {
            let store = PageStore::open_in(tmp.path(), &root()).unwrap();
            store.put(page("https://example.com/docs/", b"root"), b"root").unwrap();
        }
        fs::create_dir_all(tmp.path().join(".hidden")).unwrap();
        fs::create_dir_all(tmp.path().join("empty")).unwrap();

        let caches = list_caches(tmp.path()).unwrap();
        assert_eq!(caches.len(), 1);
        assert_eq!(caches[0].root_url, "https://example.com/docs/");
        assert_eq!(caches[0].page_count, 1);
        assert_eq!(caches[0].total_size, 4);
    }

    fn page_files(store: &PageStore) -> Vec<String> {
        let mut names: Vec<String> = fs::read_dir(store.dir().join(PAGES_DIR))
            .unwrap()
            .map(|entry| entry.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_failed_metadata_write_keeps_prior_record() {
        let tmp = TempDir::new().unwrap();
        let store = PageStore::open(tmp.path(), &root()).unwrap();
        let first = page("https://example.com/docs/a.html", b"one");
        store.put(first.clone(), b"one").unwrap();

        // A directory where the metadata temp file goes makes the commit fail.
        fs::create_dir(tmp.path().join(format!(".{}.tmp", METADATA_FILE))).unwrap();
        let result = store.put(page("https://example.com/docs/a.html", b"two"), b"two");

        assert!(matches!(result, Err(SiteweaveError::Storage { .. })));
        let stored = store.get("https://example.com/docs/a.html").unwrap();
        assert_eq!(stored, first);
        assert!(store.verify(&stored).unwrap());
        assert_eq!(page_files(&store), vec![first.local_path.file_name().unwrap().to_string_lossy().into_owned()]);
    }

    #[test]
    fn test_concurrent_puts_for_one_url_leave_one_record() {
        let tmp = TempDir::new().unwrap();
        let store = PageStore::open(tmp.path(), &root()).unwrap();
        let url = "https://example.com/docs/busy.html";

        std::thread::scope(|scope| {
            for i in 0..16 {
                let store = &store;
                scope.spawn(move || {
                    let body = format!("<html>version {}</html>", i).into_bytes();
                    store.put(page(url, &body), &body).unwrap();
                });
            }
        });

        assert_eq!(store.len(), 1);
        let stored = store.get(url).unwrap();
        assert!(store.verify(&stored).unwrap());
        assert_eq!(page_files(&store), vec![stored.local_path.file_name().unwrap().to_string_lossy().into_owned()]);

        let reopened = PageStore::open(tmp.path(), &root()).unwrap();
        assert_eq!(reopened.list(), vec![stored]);
    }

    #[test]
    fn test_final_url_only_kept_when_redirected() {
        let requested = Url::parse("https://example.com/docs").unwrap();
        let moved = Page::new(&requested, b"x", "text/html", None, OffsetDateTime::now_utc())
            .with_final_url(&Url::parse("https://example.com/docs/").unwrap());
        assert_eq!(moved.final_url.as_deref(), Some("https://example.com/docs/"));
        assert_eq!(moved.base_url().unwrap().as_str(), "https://example.com/docs/");

        let same = Page::new(&requested, b"x", "text/html", None, OffsetDateTime::now_utc()).with_final_url(&requested);
        assert_eq!(same.final_url, None);
        assert_eq!(same.base_url().unwrap(), requested);
    }

    #[test]
    fn test_list_caches_missing_dir() {
        let tmp = TempDir::new().unwrap();
        assert!(list_caches(&tmp.path().join("nope")).unwrap().is_empty());
    }
}

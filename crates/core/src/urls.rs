//! Url validation, normalization and crawl scope.
//!
//! Every url that enters the visited set or the page store goes through
//! [`normalize`] first, so `page.html#intro` and `page.html?ref=nav` share one
//! record with `page.html`.

use sha2::{Digest, Sha256};
use url::Url;

use crate::{Result, SiteweaveError};

/// Longest file stem kept when deriving a local file name from a url
const MAX_STEM_LEN: usize = 80;

/// Parses and validates a crawl root.
///
/// The root must be a non-empty absolute http(s) url with a host.
pub fn parse_root(input: &str) -> Result<Url> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(SiteweaveError::InvalidInput("root url is empty".to_string()));
    }

    let url = Url::parse(trimmed).map_err(|e| SiteweaveError::InvalidInput(format!("{}: {}", trimmed, e)))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(SiteweaveError::InvalidInput(format!(
            "unsupported scheme '{}' (expected http or https)",
            url.scheme()
        )));
    }

    if url.host_str().is_none_or(str::is_empty) {
        return Err(SiteweaveError::InvalidInput(format!("{} has no host", trimmed)));
    }

    Ok(url)
}

/// Returns the canonical string key for a url.
///
/// Drops the fragment and the query string. Host lowercasing and default
/// port removal are already done by the `url` crate when parsing. The path
/// is kept verbatim, trailing slash included, because relative links on the
/// page resolve differently with and without it.
pub fn normalize(url: &Url) -> String {
    let mut normalized = url.clone();
    normalized.set_fragment(None);
    normalized.set_query(None);
    normalized.to_string()
}

/// Parses `input` and returns its normalized form.
pub fn normalize_str(input: &str) -> Result<String> {
    let url = Url::parse(input).map_err(|e| SiteweaveError::InvalidUrl(format!("{}: {}", input, e)))?;
    Ok(normalize(&url))
}

/// The in-scope boundary of a crawl.
///
/// A url is in scope when it uses http(s), targets the same host and port as
/// the root, and its path lies below the root's directory. Parent
/// directories are never followed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Scope {
    host: String,
    port: Option<u16>,
    prefix: String,
}

impl Scope {
    /// Builds the scope for a crawl rooted at `root`.
    pub fn new(root: &Url) -> Self {
        let path = root.path();
        let prefix = match path.rfind('/') {
            Some(idx) => path[..=idx].to_string(),
            None => "/".to_string(),
        };

        Self { host: root.host_str().unwrap_or_default().to_string(), port: root.port_or_known_default(), prefix }
    }

    /// Whether `url` may be followed.
    pub fn contains(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https")
            && url.host_str() == Some(self.host.as_str())
            && url.port_or_known_default() == self.port
            && url.path().starts_with(&self.prefix)
    }

    /// Whether `url` is on the same site, ignoring the directory boundary.
    ///
    /// Navigation links are flagged external when this is false.
    pub fn same_site(&self, url: &Url) -> bool {
        matches!(url.scheme(), "http" | "https") && url.host_str() == Some(self.host.as_str())
    }
}

/// Whether a content type denotes an HTML page.
pub fn is_html(content_type: &str) -> bool {
    let essence = content_type.split(';').next().unwrap_or_default().trim().to_ascii_lowercase();
    essence == "text/html" || essence == "application/xhtml+xml"
}

/// Guesses a content type from the url's extension.
///
/// Used when the transport does not report one. Extension-less paths are
/// assumed to be pages.
pub fn guess_content_type(url: &Url) -> &'static str {
    let last = url.path().rsplit('/').next().unwrap_or_default();
    let ext = match last.rfind('.') {
        Some(idx) => last[idx + 1..].to_ascii_lowercase(),
        None => return "text/html",
    };

    match ext.as_str() {
        "html" | "htm" => "text/html",
        "xhtml" => "application/xhtml+xml",
        "css" => "text/css",
        "js" | "mjs" => "application/javascript",
        "json" => "application/json",
        "xml" => "application/xml",
        "png" => "image/png",
        "jpg" | "jpeg" => "image/jpeg",
        "gif" => "image/gif",
        "svg" => "image/svg+xml",
        "webp" => "image/webp",
        "ico" => "image/x-icon",
        "pdf" => "application/pdf",
        "txt" => "text/plain",
        _ => "application/octet-stream",
    }
}

/// Derives a filesystem-safe, content-addressed file name for stored bytes.
///
/// The hash suffix means a re-fetch with new content lands in a new file, so
/// the bytes an existing record points at are never overwritten.
pub fn local_file_name(url: &Url, content_hash: &str, content_type: &str) -> String {
    let trimmed = url.path().trim_matches('/');
    let raw = if trimmed.is_empty() { "index" } else { trimmed };

    let (stem, ext) = match raw.rfind('.') {
        Some(idx) if idx > raw.rfind('/').map_or(0, |s| s + 1) => (&raw[..idx], Some(&raw[idx + 1..])),
        _ => (raw, None),
    };

    let mut safe: String = stem
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
        .collect();
    if safe.len() > MAX_STEM_LEN {
        safe.truncate(MAX_STEM_LEN);
    }

    let ext = match ext {
        Some(ext) if !ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric()) => ext.to_ascii_lowercase(),
        _ if is_html(content_type) => "html".to_string(),
        _ => "bin".to_string(),
    };

    let short_hash = &content_hash[..content_hash.len().min(12)];
    format!("{}-{}.{}", safe, short_hash, ext)
}

/// Directory name for the cache of one root url: `<host>_<8 hex chars>`.
pub fn cache_dir_name(root: &Url) -> String {
    let digest = format!("{:x}", Sha256::digest(normalize(root).as_bytes()));
    let host: String = root
        .host_str()
        .unwrap_or("site")
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '-' { c } else { '_' })
        .collect();
    format!("{}_{}", host, &digest[..8])
}

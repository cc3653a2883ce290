//! Error types for siteweave operations.
//!
//! [`SiteweaveError`] covers every failure the crawl, detection and ordering
//! stages can raise. Per-page failures are normally folded into the crawl or
//! pipeline result instead of being returned; only input validation and
//! invariant violations abort a whole run.
//!
//! # Example
//!
//! ```rust
//! use siteweave_core::{SiteweaveError, urls};
//!
//! match urls::parse_root("ftp://example.com") {
//!     Err(SiteweaveError::InvalidInput(reason)) => println!("rejected: {}", reason),
//!     other => println!("unexpected: {:?}", other),
//! }
//! ```

use std::path::PathBuf;
use thiserror::Error;

/// Main error type for siteweave.
#[derive(Error, Debug)]
pub enum SiteweaveError {
    /// Malformed root url, out-of-range depth or similar caller mistakes.
    ///
    /// Always fatal and raised before any network traffic.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// A url discovered while crawling could not be parsed or resolved.
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),

    /// Transport-level failure (DNS, connection reset, TLS, ...).
    #[error("Network error for {url}: {reason}")]
    Network { url: String, reason: String },

    /// A single fetch exceeded the configured per-fetch timeout.
    #[error("Request to {url} timed out after {timeout_secs} seconds")]
    Timeout { url: String, timeout_secs: u64 },

    /// The server refused access (401/403).
    #[error("Permission denied for {url} (HTTP {status})")]
    PermissionDenied { url: String, status: u16 },

    /// Any other non-success HTTP status.
    #[error("HTTP {status} for {url}")]
    HttpStatus { url: String, status: u16 },

    /// The page store could not be written or its metadata is unreadable.
    ///
    /// The previous record for the url, if any, stays valid.
    #[error("Storage error at {path}: {reason}")]
    Storage { path: PathBuf, reason: String },

    /// Stored bytes could not be turned into a document tree.
    #[error("Failed to parse {url}: {reason}")]
    Parse { url: String, reason: String },

    /// The order resolver produced something other than a permutation of
    /// its input. This is a logic defect, never a user error.
    #[error("Internal invariant violated: {0}")]
    InternalInvariant(String),

    /// The fetch was cancelled because the crawl deadline fired.
    #[error("Cancelled: {0}")]
    Cancelled(String),

    /// Settings file or environment override could not be read.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Plain I/O errors outside the page store.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SiteweaveError {
    /// Builds a [`SiteweaveError::Storage`] from any displayable cause.
    pub fn storage(path: impl Into<PathBuf>, reason: impl std::fmt::Display) -> Self {
        SiteweaveError::Storage { path: path.into(), reason: reason.to_string() }
    }
}

/// Result type alias for SiteweaveError.
pub type Result<T> = std::result::Result<T, SiteweaveError>;

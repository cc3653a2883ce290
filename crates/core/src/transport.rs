//! Network transport used by the crawler.
//!
//! The crawler only talks to the [`Transport`] trait. [`HttpTransport`] is the
//! reqwest-backed implementation; tests plug in an in-memory site instead.

use async_trait::async_trait;
use url::Url;

use crate::Result;
use crate::store::Validator;

/// What the transport returned for one request.
#[derive(Debug, Clone)]
pub enum TransportResponse {
    /// Full body, with a fresh validator when the server sent one.
    ///
    /// `final_url` is where the body actually came from after redirects;
    /// relative links on the page resolve against it.
    Fetched { body: Vec<u8>, content_type: Option<String>, validator: Option<Validator>, final_url: Url },
    /// The validator matched; the stored bytes are still current.
    NotModified { validator: Option<Validator> },
}

/// Fetches a single url.
///
/// Implementations map their failures onto `Network`, `Timeout`,
/// `PermissionDenied` or `HttpStatus` errors; the crawler records them per
/// page and carries on.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn fetch(&self, url: &Url, validator: Option<&Validator>) -> Result<TransportResponse>;
}

/// HTTP client configuration for fetching pages.
#[derive(Debug, Clone)]
pub struct FetchConfig {
    /// Request timeout in seconds.
    pub timeout: u64,
    /// Custom User-Agent string.
    pub user_agent: String,
}

impl Default for FetchConfig {
    fn default() -> Self {
        Self { timeout: 30, user_agent: default_user_agent() }
    }
}

/// Default User-Agent sent with every request.
pub fn default_user_agent() -> String {
    format!("Mozilla/5.0 (compatible; siteweave/{})", env!("CARGO_PKG_VERSION"))
}

#[cfg(feature = "fetch")]
pub use http::HttpTransport;

#[cfg(feature = "fetch")]
mod http {
    use std::time::Duration;

    use async_trait::async_trait;
    use reqwest::header::{CONTENT_TYPE, ETAG, IF_MODIFIED_SINCE, IF_NONE_MATCH, LAST_MODIFIED};
    use reqwest::{Client, StatusCode};
    use tracing::debug;
    use url::Url;

    use super::{FetchConfig, Transport, TransportResponse};
    use crate::store::Validator;
    use crate::{Result, SiteweaveError};

    /// reqwest-backed transport with conditional request support.
    #[derive(Debug, Clone)]
    pub struct HttpTransport {
        client: Client,
        timeout: u64,
    }

    impl HttpTransport {
        /// Creates a transport with the given timeout and User-Agent.
        pub fn new(config: &FetchConfig) -> Result<Self> {
            let client = Client::builder()
                .timeout(Duration::from_secs(config.timeout))
                .user_agent(config.user_agent.as_str())
                .gzip(true)
                .brotli(true)
                .build()
                .map_err(|e| SiteweaveError::Config(format!("failed to build HTTP client: {}", e)))?;

            Ok(Self { client, timeout: config.timeout })
        }

        fn map_error(&self, url: &Url, err: reqwest::Error) -> SiteweaveError {
            if err.is_timeout() {
                SiteweaveError::Timeout { url: url.to_string(), timeout_secs: self.timeout }
            } else {
                SiteweaveError::Network { url: url.to_string(), reason: err.to_string() }
            }
        }
    }

    fn header_string(headers: &reqwest::header::HeaderMap, name: reqwest::header::HeaderName) -> Option<String> {
        headers.get(name).and_then(|v| v.to_str().ok()).map(str::to_string)
    }

    fn validator_from(headers: &reqwest::header::HeaderMap) -> Option<Validator> {
        Validator { etag: header_string(headers, ETAG), last_modified: header_string(headers, LAST_MODIFIED) }
            .non_empty()
    }

    #[async_trait]
    impl Transport for HttpTransport {
        async fn fetch(&self, url: &Url, validator: Option<&Validator>) -> Result<TransportResponse> {
            let mut request = self
                .client
                .get(url.clone())
                .header("Accept", "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8");

            if let Some(validator) = validator {
                if let Some(etag) = &validator.etag {
                    debug!("Setting If-None-Match: {}", etag);
                    request = request.header(IF_NONE_MATCH, etag);
                }
                if let Some(last_modified) = &validator.last_modified {
                    debug!("Setting If-Modified-Since: {}", last_modified);
                    request = request.header(IF_MODIFIED_SINCE, last_modified);
                }
            }

            let response = request.send().await.map_err(|e| self.map_error(url, e))?;
            let status = response.status();

            if status == StatusCode::NOT_MODIFIED {
                debug!("Not modified (304): {}", url);
                return Ok(TransportResponse::NotModified { validator: validator_from(response.headers()) });
            }

            if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
                return Err(SiteweaveError::PermissionDenied { url: url.to_string(), status: status.as_u16() });
            }

            if !status.is_success() {
                return Err(SiteweaveError::HttpStatus { url: url.to_string(), status: status.as_u16() });
            }

            let final_url = response.url().clone();
            if &final_url != url {
                debug!("Redirected: {} -> {}", url, final_url);
            }
            let content_type = header_string(response.headers(), CONTENT_TYPE);
            let validator = validator_from(response.headers());
            let body = response.bytes().await.map_err(|e| self.map_error(url, e))?.to_vec();

            debug!("Fetched {} bytes from {}", body.len(), url);

            Ok(TransportResponse::Fetched { body, content_type, validator, final_url })
        }
    }
}

//! Shared helpers for integration tests.
#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use siteweave_core::store::{Validator, content_hash};
use siteweave_core::transport::{Transport, TransportResponse};
use siteweave_core::{Result, SiteweaveError, urls};
use url::Url;

pub const ROOT: &str = "https://docs.example.com/";
pub const ABOUT: &str = "https://docs.example.com/about.html";
pub const GUIDE: &str = "https://docs.example.com/guide/intro.html";
pub const STYLE: &str = "https://docs.example.com/style.css";

pub fn fixture_path(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("../../tests/fixtures").join(name)
}

pub fn read_fixture(name: &str) -> String {
    std::fs::read_to_string(fixture_path(name)).unwrap()
}

#[derive(Clone)]
struct Resource {
    body: Vec<u8>,
    content_type: String,
}

/// In-memory site answering with strong ETags derived from the body.
pub struct MemoryTransport {
    resources: Mutex<HashMap<String, Resource>>,
    redirects: Mutex<HashMap<String, String>>,
    requests: Mutex<Vec<String>>,
    delay: Option<Duration>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self {
            resources: Mutex::new(HashMap::new()),
            redirects: Mutex::new(HashMap::new()),
            requests: Mutex::new(Vec::new()),
            delay: None,
        }
    }

    /// The four-resource documentation site from `tests/fixtures/site`.
    pub fn fixture_site() -> Self {
        Self::new()
            .page(ROOT, &read_fixture("site/index.html"))
            .page(ABOUT, &read_fixture("site/about.html"))
            .page(GUIDE, &read_fixture("site/guide/intro.html"))
            .resource(STYLE, read_fixture("site/style.css").as_bytes(), "text/css")
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn page(self, url: &str, html: &str) -> Self {
        self.resource(url, html.as_bytes(), "text/html; charset=utf-8")
    }

    pub fn resource(self, url: &str, body: &[u8], content_type: &str) -> Self {
        self.set(url, body, content_type);
        self
    }

    /// Answers `from` with the resource at `to`, as a client following a
    /// permanent redirect would see it.
    pub fn redirect(self, from: &str, to: &str) -> Self {
        let from = urls::normalize_str(from).unwrap();
        self.redirects.lock().unwrap().insert(from, to.to_string());
        self
    }

    pub fn set(&self, url: &str, body: &[u8], content_type: &str) {
        let key = urls::normalize_str(url).unwrap();
        let resource = Resource { body: body.to_vec(), content_type: content_type.to_string() };
        self.resources.lock().unwrap().insert(key, resource);
    }

    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    pub fn request_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn clear_requests(&self) {
        self.requests.lock().unwrap().clear();
    }

    fn etag(body: &[u8]) -> String {
        format!("\"{}\"", &content_hash(body)[..16])
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn fetch(&self, url: &Url, validator: Option<&Validator>) -> Result<TransportResponse> {
        let key = urls::normalize(url);
        self.requests.lock().unwrap().push(key.clone());

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }

        let target = self.redirects.lock().unwrap().get(&key).cloned();
        let final_url = match target {
            Some(to) => Url::parse(&to).unwrap(),
            None => url.clone(),
        };

        let resource = self.resources.lock().unwrap().get(&urls::normalize(&final_url)).cloned();
        let Some(resource) = resource else {
            return Err(SiteweaveError::HttpStatus { url: key, status: 404 });
        };

        let etag = Self::etag(&resource.body);
        if validator.and_then(|v| v.etag.as_deref()) == Some(etag.as_str()) {
            return Ok(TransportResponse::NotModified { validator: None });
        }

        Ok(TransportResponse::Fetched {
            body: resource.body,
            content_type: Some(resource.content_type),
            validator: Some(Validator { etag: Some(etag), last_modified: None }),
            final_url,
        })
    }
}

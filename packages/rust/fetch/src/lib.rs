//! HTTP implementation of the [`Fetcher`] capability.
//!
//! The pipeline core is transport-agnostic; this crate is the shipped
//! implementation for plain HTTP sources. A 404/410 maps to the permanent
//! [`HarvesterError::NotFound`] so callers can skip instead of retrying;
//! every other failure is transient.

use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use scraper::{Html, Selector};
use sha2::{Digest, Sha256};
use tracing::debug;

use harvester_shared::{FetchedContent, Fetcher, HarvesterError, Result};

/// User-Agent string for fetch requests.
const USER_AGENT: &str = concat!("Harvester/", env!("CARGO_PKG_VERSION"));

/// Maximum number of redirects to follow.
const MAX_REDIRECTS: usize = 5;

/// Default per-request timeout in seconds.
const DEFAULT_TIMEOUT_SECS: u64 = 30;

/// Fetches identifiers over HTTP with a shared connection pool.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Create a fetcher with the default request timeout.
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
    }

    /// Create a fetcher with a custom request timeout.
    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let client = Client::builder()
            .user_agent(USER_AGENT)
            .redirect(reqwest::redirect::Policy::limited(MAX_REDIRECTS))
            .timeout(timeout)
            .build()
            .map_err(|e| {
                HarvesterError::Network(format!("failed to build HTTP client: {e}"))
            })?;

        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, identifier: &str) -> Result<FetchedContent> {
        debug!(%identifier, "fetching");

        let response = self
            .client
            .get(identifier)
            .send()
            .await
            .map_err(|e| HarvesterError::Network(format!("{identifier}: {e}")))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND || status == StatusCode::GONE {
            return Err(HarvesterError::not_found(identifier));
        }
        if !status.is_success() {
            return Err(HarvesterError::Network(format!(
                "{identifier}: HTTP {status}"
            )));
        }

        let body = response
            .text()
            .await
            .map_err(|e| HarvesterError::Network(format!("{identifier}: body read failed: {e}")))?;

        let content_hash = compute_hash(&body);
        let title = extract_title(&body);

        Ok(FetchedContent {
            identifier: identifier.to_string(),
            content_len: body.len(),
            body,
            title,
            content_hash,
            status_code: Some(status.as_u16()),
            fetched_at: Utc::now(),
        })
    }
}

/// Extract a page title from the first H1, falling back to `<title>`.
fn extract_title(html: &str) -> Option<String> {
    let doc = Html::parse_document(html);

    let h1_sel = Selector::parse("h1").unwrap();
    if let Some(el) = doc.select(&h1_sel).next() {
        let text = el.text().collect::<String>().trim().to_string();
        if !text.is_empty() {
            return Some(text);
        }
    }

    let title_sel = Selector::parse("title").unwrap();
    doc.select(&title_sel)
        .next()
        .map(|el| el.text().collect::<String>().trim().to_string())
        .filter(|t| !t.is_empty())
}

/// Compute SHA-256 hash of content.
fn compute_hash(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    format!("{:x}", hasher.finalize())
}

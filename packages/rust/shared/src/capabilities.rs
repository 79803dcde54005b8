//! Capability traits at the seams of the pipeline.
//!
//! The orchestration core never talks to the outside world directly; it
//! goes through these traits so that fetching (HTTP today, browser
//! automation tomorrow), cataloging, and indexing stay swappable and
//! testable with in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::StageKind;

/// Content fetched for one identifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FetchedContent {
    /// The identifier this content was fetched for.
    pub identifier: String,
    /// Raw response body.
    pub body: String,
    /// Extracted title, if any.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    /// SHA-256 hash of the body.
    pub content_hash: String,
    /// HTTP status code, when the transport has one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status_code: Option<u16>,
    /// Body length in bytes.
    pub content_len: usize,
    /// When the content was fetched.
    pub fetched_at: DateTime<Utc>,
}

/// Retrieves content for an identifier.
///
/// Implementations must distinguish a permanent "does not exist" outcome
/// ([`HarvesterError::NotFound`](crate::HarvesterError::NotFound)) from a
/// transient failure, so callers can choose skip versus retry.
#[async_trait]
pub trait Fetcher: Send + Sync {
    /// Fetch the content behind `identifier`.
    async fn fetch(&self, identifier: &str) -> Result<FetchedContent>;
}

/// Persisted per-identifier stage ledger: which identifiers have been
/// discovered, retrieved, and indexed.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    /// Whether `identifier` has a record at `stage`.
    async fn has(&self, stage: StageKind, identifier: &str) -> Result<bool>;

    /// Metadata recorded for `identifier` at `stage`, if any.
    async fn get(&self, stage: StageKind, identifier: &str)
    -> Result<Option<serde_json::Value>>;

    /// Record (or overwrite) `identifier` at `stage` with metadata.
    async fn record(
        &self,
        stage: StageKind,
        identifier: &str,
        metadata: &serde_json::Value,
    ) -> Result<()>;
}

/// Splits content into chunks and stores them for later search/answering.
#[async_trait]
pub trait ContentIndexer: Send + Sync {
    /// Index `content`; returns the number of chunks produced.
    ///
    /// `metadata` must carry an `identifier` key naming the source.
    async fn index(&self, content: &str, metadata: &serde_json::Value) -> Result<usize>;
}

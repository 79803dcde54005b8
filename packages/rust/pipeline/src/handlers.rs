//! Per-category task handlers wiring capabilities into the worker pool.
//!
//! The pool dispatches each payload variant to the handler registered for
//! its category; handlers talk to the outside world only through the
//! capability traits, so every external dependency stays swappable.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use harvester_discovery::Discoverer;
use harvester_pool::{FETCH_BREAKER, STORE_BREAKER, TaskHandler, TaskOutcome, TaskPayload};
use harvester_shared::{
    CatalogStore, ContentIndexer, Fetcher, HarvesterError, Result, StageKind, TaskCategory,
};

/// Runs the discovery strategies for a unit and records what they find.
pub struct DiscoverHandler {
    discoverer: Arc<Discoverer>,
    store: Arc<dyn CatalogStore>,
}

impl DiscoverHandler {
    pub fn new(discoverer: Arc<Discoverer>, store: Arc<dyn CatalogStore>) -> Self {
        Self { discoverer, store }
    }
}

#[async_trait]
impl TaskHandler for DiscoverHandler {
    fn breaker(&self) -> &str {
        FETCH_BREAKER
    }

    async fn run(&self, payload: &TaskPayload) -> Result<TaskOutcome> {
        let TaskPayload::Discover { unit } = payload else {
            return Err(HarvesterError::validation(
                "discovery handler received a non-discovery payload",
            ));
        };

        let items = self.discoverer.discover(unit).await?;
        for item in &items {
            self.store
                .record(
                    StageKind::Discovered,
                    &item.identifier,
                    &json!({
                        "unit": unit.name,
                        "priority": item.priority,
                        "strategy": item.strategy,
                    }),
                )
                .await?;
        }

        Ok(TaskOutcome::Discovered(items))
    }
}

/// Fetches one identifier and stages its content in the catalog.
pub struct RetrieveHandler {
    fetcher: Arc<dyn Fetcher>,
    store: Arc<dyn CatalogStore>,
}

impl RetrieveHandler {
    pub fn new(fetcher: Arc<dyn Fetcher>, store: Arc<dyn CatalogStore>) -> Self {
        Self { fetcher, store }
    }
}

#[async_trait]
impl TaskHandler for RetrieveHandler {
    fn breaker(&self) -> &str {
        FETCH_BREAKER
    }

    async fn run(&self, payload: &TaskPayload) -> Result<TaskOutcome> {
        let TaskPayload::Retrieve { unit, identifier } = payload else {
            return Err(HarvesterError::validation(
                "retrieval handler received a non-retrieval payload",
            ));
        };

        let content = self.fetcher.fetch(identifier).await?;

        // Stage the body alongside the seen-set entry so a later run can
        // index it without re-fetching.
        self.store
            .record(
                StageKind::Retrieved,
                identifier,
                &json!({
                    "unit": unit,
                    "content_hash": content.content_hash,
                    "title": content.title,
                    "content": content.body,
                    "fetched_at": content.fetched_at.to_rfc3339(),
                }),
            )
            .await?;

        Ok(TaskOutcome::Retrieved(content))
    }
}

/// Chunks and indexes staged content for one identifier.
pub struct IndexHandler {
    indexer: Arc<dyn ContentIndexer>,
    store: Arc<dyn CatalogStore>,
}

impl IndexHandler {
    pub fn new(indexer: Arc<dyn ContentIndexer>, store: Arc<dyn CatalogStore>) -> Self {
        Self { indexer, store }
    }
}

#[async_trait]
impl TaskHandler for IndexHandler {
    fn breaker(&self) -> &str {
        STORE_BREAKER
    }

    async fn run(&self, payload: &TaskPayload) -> Result<TaskOutcome> {
        let TaskPayload::Index {
            identifier,
            content,
            metadata,
            ..
        } = payload
        else {
            return Err(HarvesterError::validation(
                "indexing handler received a non-indexing payload",
            ));
        };

        if self.store.has(StageKind::Indexed, identifier).await? {
            return Ok(TaskOutcome::Skipped {
                identifier: identifier.clone(),
            });
        }

        let chunks = self.indexer.index(content, metadata).await?;
        self.store
            .record(StageKind::Indexed, identifier, &json!({ "chunks": chunks }))
            .await?;

        Ok(TaskOutcome::Indexed {
            identifier: identifier.clone(),
            chunks,
        })
    }
}

/// The standard handler set: one per category, sharing one catalog store.
pub fn standard_handlers(
    discoverer: Arc<Discoverer>,
    fetcher: Arc<dyn Fetcher>,
    indexer: Arc<dyn ContentIndexer>,
    store: Arc<dyn CatalogStore>,
) -> HashMap<TaskCategory, Arc<dyn TaskHandler>> {
    let mut handlers: HashMap<TaskCategory, Arc<dyn TaskHandler>> = HashMap::new();
    handlers.insert(
        TaskCategory::Discovery,
        Arc::new(DiscoverHandler::new(discoverer, store.clone())),
    );
    handlers.insert(
        TaskCategory::Retrieval,
        Arc::new(RetrieveHandler::new(fetcher, store.clone())),
    );
    handlers.insert(
        TaskCategory::Indexing,
        Arc::new(IndexHandler::new(indexer, store)),
    );
    handlers
}

//! Retrieval stage: one pool task per discovered item, with skip-via-catalog
//! and failure accumulation.

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tracing::{debug, instrument, warn};

use harvester_pool::{Task, TaskOutcome, TaskPayload, WorkerPool};
use harvester_progress::ProgressTracker;
use harvester_shared::{CatalogStore, DiscoveredItem, Result, StageKind, TaskStatus};

use crate::orchestrator::RunCounts;

/// Content available for the indexing stage this run.
#[derive(Debug, Clone)]
pub struct RetrievedItem {
    pub identifier: String,
    pub content: String,
    pub metadata: serde_json::Value,
}

/// What the retrieval stage did for one unit.
#[derive(Debug, Default)]
pub struct RetrievalSummary {
    /// Items with content in hand, fetched or rehydrated from staging.
    pub retrieved: Vec<RetrievedItem>,
    /// Items skipped without an external call.
    pub skipped: usize,
    /// Skipped items that are already fully indexed.
    pub already_indexed: usize,
    /// Per-item failures (identifier, error). Never aborts the unit.
    pub failures: Vec<(String, String)>,
}

/// Submits retrieval tasks for a unit's manifest items.
pub struct Retriever {
    pool: Arc<WorkerPool>,
    store: Arc<dyn CatalogStore>,
    inter_request_delay: Duration,
    max_retries: u32,
    timeout: Duration,
}

impl Retriever {
    pub fn new(
        pool: Arc<WorkerPool>,
        store: Arc<dyn CatalogStore>,
        inter_request_delay: Duration,
        max_retries: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            pool,
            store,
            inter_request_delay,
            max_retries,
            timeout,
        }
    }

    /// Retrieve every item that still needs content, spacing submissions by
    /// the configured inter-request delay.
    #[instrument(skip_all, fields(unit = %unit, items = items.len()))]
    pub async fn run(
        &self,
        unit: &str,
        items: &[DiscoveredItem],
        progress: &ProgressTracker,
        counts: &RunCounts,
    ) -> Result<RetrievalSummary> {
        let mut summary = RetrievalSummary::default();
        let mut pending = Vec::new();

        for item in items {
            let identifier = item.identifier.as_str();

            if self.store.has(StageKind::Indexed, identifier).await? {
                summary.skipped += 1;
                summary.already_indexed += 1;
                counts.item_processed();
                progress.update_counts(counts.discovered(), counts.processed());
                continue;
            }

            if self.store.has(StageKind::Retrieved, identifier).await? {
                if let Some(staged) = self.rehydrate(identifier).await? {
                    debug!(%identifier, "using staged content");
                    summary.retrieved.push(staged);
                    summary.skipped += 1;
                    counts.item_processed();
                    progress.update_counts(counts.discovered(), counts.processed());
                    continue;
                }
                // Staged entry without content: fall through and re-fetch.
            }

            let task = Task::new(
                TaskPayload::Retrieve {
                    unit: unit.to_string(),
                    identifier: identifier.to_string(),
                },
                item.priority,
            )
            .with_max_retries(self.max_retries)
            .with_timeout(self.timeout);

            pending.push((identifier.to_string(), self.pool.add_task(task)?));

            if !self.inter_request_delay.is_zero() {
                tokio::time::sleep(self.inter_request_delay).await;
            }
        }

        for (identifier, task_id) in pending {
            let Some(result) = self.pool.await_result(task_id).await else {
                summary
                    .failures
                    .push((identifier, "task result missing".into()));
                continue;
            };

            match (result.status, result.outcome) {
                (TaskStatus::Completed, Some(TaskOutcome::Retrieved(content))) => {
                    summary.retrieved.push(RetrievedItem {
                        metadata: json!({
                            "identifier": content.identifier,
                            "unit": unit,
                            "title": content.title,
                            "content_hash": content.content_hash,
                        }),
                        identifier,
                        content: content.body,
                    });
                }
                (status, _) => {
                    let error = result
                        .error
                        .unwrap_or_else(|| format!("unexpected status {status:?}"));
                    warn!(%identifier, %error, "retrieval failed");
                    progress.add_error(&format!("{identifier}: {error}"));
                    summary.failures.push((identifier, error));
                }
            }

            counts.item_processed();
            progress.update_counts(counts.discovered(), counts.processed());
        }

        Ok(summary)
    }

    /// Load staged content recorded by a previous retrieval.
    async fn rehydrate(&self, identifier: &str) -> Result<Option<RetrievedItem>> {
        let Some(staged) = self.store.get(StageKind::Retrieved, identifier).await? else {
            return Ok(None);
        };
        let Some(content) = staged.get("content").and_then(|v| v.as_str()) else {
            return Ok(None);
        };

        Ok(Some(RetrievedItem {
            identifier: identifier.to_string(),
            content: content.to_string(),
            metadata: json!({
                "identifier": identifier,
                "unit": staged.get("unit"),
                "title": staged.get("title"),
                "content_hash": staged.get("content_hash"),
            }),
        }))
    }
}

//! Indexing stage: one pool task per retrieved item, skipping identifiers
//! already present in the store.

use std::sync::Arc;
use std::time::Duration;

use tracing::{instrument, warn};

use harvester_pool::{Task, TaskOutcome, TaskPayload, WorkerPool};
use harvester_progress::ProgressTracker;
use harvester_shared::{CatalogStore, Result, StageKind, TaskStatus};

use crate::retrieve::RetrievedItem;

/// Priority for indexing tasks; content in hand should drain promptly.
const INDEXING_PRIORITY: u8 = 10;

/// What the indexing stage did for one unit.
#[derive(Debug, Default)]
pub struct IndexingSummary {
    /// Identifiers newly indexed this run.
    pub indexed: usize,
    /// Identifiers already present in the store.
    pub skipped: usize,
    /// Per-item failures (identifier, error).
    pub failures: Vec<(String, String)>,
}

/// Submits indexing tasks for retrieved content.
pub struct Indexer {
    pool: Arc<WorkerPool>,
    store: Arc<dyn CatalogStore>,
    max_retries: u32,
    timeout: Duration,
}

impl Indexer {
    pub fn new(
        pool: Arc<WorkerPool>,
        store: Arc<dyn CatalogStore>,
        max_retries: u32,
        timeout: Duration,
    ) -> Self {
        Self {
            pool,
            store,
            max_retries,
            timeout,
        }
    }

    /// Index every retrieved item not already in the store.
    #[instrument(skip_all, fields(unit = %unit, items = items.len()))]
    pub async fn run(
        &self,
        unit: &str,
        items: Vec<RetrievedItem>,
        progress: &ProgressTracker,
    ) -> Result<IndexingSummary> {
        let mut summary = IndexingSummary::default();
        let mut pending = Vec::new();

        for item in items {
            if self.store.has(StageKind::Indexed, &item.identifier).await? {
                summary.skipped += 1;
                continue;
            }

            let task = Task::new(
                TaskPayload::Index {
                    unit: unit.to_string(),
                    identifier: item.identifier.clone(),
                    content: item.content,
                    metadata: item.metadata,
                },
                INDEXING_PRIORITY,
            )
            .with_max_retries(self.max_retries)
            .with_timeout(self.timeout);

            pending.push((item.identifier, self.pool.add_task(task)?));
        }

        for (identifier, task_id) in pending {
            let Some(result) = self.pool.await_result(task_id).await else {
                summary
                    .failures
                    .push((identifier, "task result missing".into()));
                continue;
            };

            match (result.status, result.outcome) {
                (TaskStatus::Completed, Some(TaskOutcome::Indexed { .. })) => {
                    summary.indexed += 1;
                    progress.record_indexed(1);
                }
                (TaskStatus::Completed, Some(TaskOutcome::Skipped { .. })) => {
                    summary.skipped += 1;
                }
                (status, _) => {
                    let error = result
                        .error
                        .unwrap_or_else(|| format!("unexpected status {status:?}"));
                    warn!(%identifier, %error, "indexing failed");
                    progress.add_error(&format!("{identifier}: {error}"));
                    summary.failures.push((identifier, error));
                }
            }
        }

        Ok(summary)
    }
}

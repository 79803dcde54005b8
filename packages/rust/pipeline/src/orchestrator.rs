//! Orchestrator: drives each unit through discover → retrieve → index →
//! verify, sequentially or pipelined across units.
//!
//! A run never aborts wholesale because of per-item failures; it always ends
//! with a report of successes, skips, failures, and coverage per unit. The
//! stop flag exits a multi-unit run between units without killing in-flight
//! tasks.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{info, instrument, warn};

use harvester_discovery::ManifestStore;
use harvester_pool::{Task, TaskOutcome, TaskPayload, WorkerPool};
use harvester_progress::ProgressTracker;
use harvester_shared::{
    CatalogStore, DiscoveredItem, ExecutionMode, HarvesterError, OrchestratorConfig, Result,
    TaskStatus, UnitSpec, UnitState, WorkUnit,
};

use crate::index::Indexer;
use crate::retrieve::{RetrievalSummary, Retriever};
use crate::verify::verify_unit;

/// Priority for discovery tasks.
const DISCOVERY_PRIORITY: u8 = 5;

// ---------------------------------------------------------------------------
// Run bookkeeping
// ---------------------------------------------------------------------------

/// Run-wide counters shared between the orchestrator and its stages.
#[derive(Default)]
pub(crate) struct RunCounts {
    discovered: AtomicU64,
    processed: AtomicU64,
}

impl RunCounts {
    pub(crate) fn discovered(&self) -> u64 {
        self.discovered.load(Ordering::Relaxed)
    }

    pub(crate) fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    pub(crate) fn add_discovered(&self, n: u64) {
        self.discovered.fetch_add(n, Ordering::Relaxed);
    }

    pub(crate) fn item_processed(&self) {
        self.processed.fetch_add(1, Ordering::Relaxed);
    }
}

/// One per-item failure in a unit report.
#[derive(Debug, Clone, Serialize)]
pub struct FailureEntry {
    pub identifier: String,
    pub error: String,
}

/// What happened to one unit this run.
#[derive(Debug, Clone, Serialize)]
pub struct UnitReport {
    pub unit: String,
    pub state: UnitState,
    /// Manifest size after discovery.
    pub discovered: usize,
    /// Items with content fetched or rehydrated this run.
    pub retrieved: usize,
    /// Retrieval skips (already retrieved or already indexed).
    pub retrieval_skipped: usize,
    /// Skips because the identifier was already fully indexed.
    pub already_indexed: usize,
    /// Identifiers newly indexed this run.
    pub indexed: usize,
    /// Indexing skips.
    pub indexing_skipped: usize,
    /// Per-item failures across retrieval and indexing.
    pub failures: Vec<FailureEntry>,
    /// Verified coverage in [0, 100].
    pub coverage: f64,
    /// Identifiers still missing from the store, in manifest order.
    pub missing: Vec<String>,
    /// Unit-level error when the unit failed before its stages ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub elapsed_ms: u64,
}

impl UnitReport {
    fn failed(unit: &str, error: String, elapsed: Duration) -> Self {
        Self {
            unit: unit.to_string(),
            state: UnitState::Failed,
            discovered: 0,
            retrieved: 0,
            retrieval_skipped: 0,
            already_indexed: 0,
            indexed: 0,
            indexing_skipped: 0,
            failures: Vec::new(),
            coverage: 0.0,
            missing: Vec::new(),
            error: Some(error),
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }
}

/// Final report for a whole run.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub units: Vec<UnitReport>,
    pub elapsed_ms: u64,
}

impl RunReport {
    /// Identifiers newly indexed across all units.
    pub fn total_indexed(&self) -> usize {
        self.units.iter().map(|u| u.indexed).sum()
    }

    /// Units that failed before their stages completed.
    pub fn failed_units(&self) -> usize {
        self.units
            .iter()
            .filter(|u| u.state == UnitState::Failed)
            .count()
    }
}

/// Externally visible state of one unit.
#[derive(Debug, Clone, Serialize)]
pub struct UnitStatus {
    pub state: UnitState,
    pub discovered: usize,
    pub indexed: usize,
    pub coverage: Option<f64>,
}

/// Handle to a run spawned with [`Orchestrator::submit`].
pub struct RunHandle {
    handle: tokio::task::JoinHandle<RunReport>,
}

impl RunHandle {
    /// Wait for the run to finish and take its report.
    pub async fn wait(self) -> Result<RunReport> {
        self.handle
            .await
            .map_err(|e| HarvesterError::Coordination(format!("run task failed: {e}")))
    }

    /// Abort the run task outright. Prefer [`Orchestrator::stop`] for a
    /// clean exit between units.
    pub fn abort(&self) {
        self.handle.abort();
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives units through the pipeline using the worker pool.
pub struct Orchestrator {
    pool: Arc<WorkerPool>,
    store: Arc<dyn CatalogStore>,
    manifests: ManifestStore,
    progress: Arc<ProgressTracker>,
    retriever: Retriever,
    indexer: Indexer,
    config: OrchestratorConfig,
    statuses: Mutex<HashMap<String, UnitStatus>>,
    stop_flag: AtomicBool,
}

impl Orchestrator {
    pub fn new(
        pool: Arc<WorkerPool>,
        store: Arc<dyn CatalogStore>,
        manifests: ManifestStore,
        progress: Arc<ProgressTracker>,
        config: OrchestratorConfig,
    ) -> Self {
        let retriever = Retriever::new(
            pool.clone(),
            store.clone(),
            config.inter_request_delay,
            config.max_retries,
            config.task_timeout,
        );
        let indexer = Indexer::new(
            pool.clone(),
            store.clone(),
            config.max_retries,
            config.task_timeout,
        );

        Self {
            pool,
            store,
            manifests,
            progress,
            retriever,
            indexer,
            config,
            statuses: Mutex::new(HashMap::new()),
            stop_flag: AtomicBool::new(false),
        }
    }

    /// Current pipeline state of a unit, if it has been seen this run.
    pub fn status(&self, unit: &str) -> Option<UnitStatus> {
        self.statuses
            .lock()
            .expect("status table lock")
            .get(unit)
            .cloned()
    }

    /// Request a clean exit between units. In-flight tasks finish.
    pub fn stop(&self) {
        self.stop_flag.store(true, Ordering::SeqCst);
    }

    /// Spawn a run in the background and return its handle.
    pub fn submit(self: Arc<Self>, units: Vec<UnitSpec>) -> RunHandle {
        RunHandle {
            handle: tokio::spawn(async move { self.run(&units).await }),
        }
    }

    /// Run all units to completion and report.
    #[instrument(skip_all, fields(units = units.len(), mode = ?self.config.mode))]
    pub async fn run(&self, units: &[UnitSpec]) -> RunReport {
        let started = Instant::now();
        info!("run starting");

        let counts = RunCounts::default();
        let unit_reports = match self.config.mode {
            ExecutionMode::Sequential => self.run_sequential(units, &counts).await,
            ExecutionMode::Pipelined => self.run_pipelined(units, &counts).await,
        };

        self.progress.complete();

        let report = RunReport {
            units: unit_reports,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };
        info!(
            units = report.units.len(),
            indexed = report.total_indexed(),
            failed_units = report.failed_units(),
            elapsed_ms = report.elapsed_ms,
            "run complete"
        );
        report
    }

    // -----------------------------------------------------------------------
    // Execution modes
    // -----------------------------------------------------------------------

    async fn run_sequential(&self, units: &[UnitSpec], counts: &RunCounts) -> Vec<UnitReport> {
        let mut reports = Vec::new();
        for spec in units {
            if self.stop_flag.load(Ordering::SeqCst) {
                info!("stop requested, exiting between units");
                break;
            }
            reports.push(self.run_unit(spec, counts).await);
        }
        reports
    }

    /// Discovery of unit k+1 overlaps retrieval/indexing of unit k through a
    /// bounded hand-off channel.
    async fn run_pipelined(&self, units: &[UnitSpec], counts: &RunCounts) -> Vec<UnitReport> {
        let (tx, mut rx) =
            mpsc::channel::<(usize, UnitSpec, Vec<DiscoveredItem>, Instant)>(
                self.config.handoff_capacity,
            );
        let failed: Mutex<Vec<(usize, UnitReport)>> = Mutex::new(Vec::new());

        let producer = async {
            for (idx, spec) in units.iter().enumerate() {
                if self.stop_flag.load(Ordering::SeqCst) {
                    info!("stop requested, halting discovery");
                    break;
                }
                let unit_started = Instant::now();
                match self.discover_unit(spec, counts).await {
                    Ok(items) => {
                        // Bounded send: discovery waits here when the
                        // downstream stages fall behind.
                        if tx
                            .send((idx, spec.clone(), items, unit_started))
                            .await
                            .is_err()
                        {
                            break;
                        }
                    }
                    Err(e) => {
                        failed
                            .lock()
                            .expect("report lock")
                            .push((idx, self.fail_unit(&spec.name, e, unit_started)));
                    }
                }
            }
            drop(tx);
        };

        let consumer = async {
            let mut reports = Vec::new();
            while let Some((idx, spec, items, unit_started)) = rx.recv().await {
                reports.push((idx, self.run_stages(&spec, items, counts, unit_started).await));
            }
            reports
        };

        let ((), mut reports) = tokio::join!(producer, consumer);
        reports.extend(failed.into_inner().expect("report lock"));
        reports.sort_by_key(|(idx, _)| *idx);
        reports.into_iter().map(|(_, report)| report).collect()
    }

    // -----------------------------------------------------------------------
    // Unit lifecycle
    // -----------------------------------------------------------------------

    async fn run_unit(&self, spec: &UnitSpec, counts: &RunCounts) -> UnitReport {
        let unit_started = Instant::now();
        match self.discover_unit(spec, counts).await {
            Ok(items) => self.run_stages(spec, items, counts, unit_started).await,
            Err(e) => self.fail_unit(&spec.name, e, unit_started),
        }
    }

    /// Submit the unit's discovery task and wait for its manifest items.
    async fn discover_unit(
        &self,
        spec: &UnitSpec,
        counts: &RunCounts,
    ) -> Result<Vec<DiscoveredItem>> {
        self.progress.start(&spec.name);
        self.update_status(&spec.name, |s| s.state = UnitState::Discovering);
        self.progress
            .update_step(&format!("discovering {}", spec.name));

        let task = Task::new(
            TaskPayload::Discover { unit: spec.clone() },
            DISCOVERY_PRIORITY,
        )
        .with_max_retries(self.config.max_retries)
        .with_timeout(self.config.discovery_timeout);

        let task_id = self.pool.add_task(task)?;
        let result = self.pool.await_result(task_id).await.ok_or_else(|| {
            HarvesterError::Coordination("discovery task result missing".into())
        })?;

        let items = match (result.status, result.outcome) {
            (TaskStatus::Completed, Some(TaskOutcome::Discovered(items))) => items,
            (TaskStatus::Completed, _) => {
                return Err(HarvesterError::validation(
                    "discovery task returned an unexpected outcome",
                ));
            }
            (_, _) => {
                return Err(HarvesterError::Network(
                    result.error.unwrap_or_else(|| "discovery failed".into()),
                ));
            }
        };

        counts.add_discovered(items.len() as u64);
        self.progress
            .update_counts(counts.discovered(), counts.processed());
        self.update_status(&spec.name, |s| s.discovered = items.len());
        Ok(items)
    }

    /// Retrieval → indexing → verification for one unit.
    async fn run_stages(
        &self,
        spec: &UnitSpec,
        items: Vec<DiscoveredItem>,
        counts: &RunCounts,
        unit_started: Instant,
    ) -> UnitReport {
        let name = spec.name.as_str();
        let mut work_unit = WorkUnit::new(spec);
        work_unit.discovered = items.iter().map(|i| i.identifier.clone()).collect();
        let item_count = work_unit.discovered.len();

        self.update_status(name, |s| s.state = UnitState::Retrieving);
        self.progress
            .update_step(&format!("retrieving {item_count} items"));

        let retrieval = match self
            .retriever
            .run(name, &items, &self.progress, counts)
            .await
        {
            Ok(summary) => summary,
            Err(e) => return self.fail_unit(name, e, unit_started),
        };
        let RetrievalSummary {
            retrieved,
            skipped: retrieval_skipped,
            already_indexed,
            failures: retrieval_failures,
        } = retrieval;
        work_unit.retrieved = retrieved.iter().map(|r| r.identifier.clone()).collect();
        let retrieved_count = work_unit.retrieved.len();

        self.update_status(name, |s| s.state = UnitState::Indexing);
        self.progress.update_step("indexing retrieved content");

        let indexing = match self.indexer.run(name, retrieved, &self.progress).await {
            Ok(summary) => summary,
            Err(e) => return self.fail_unit(name, e, unit_started),
        };

        self.update_status(name, |s| {
            s.state = UnitState::Verifying;
            s.indexed = indexing.indexed;
        });
        self.progress.update_step("verifying coverage");

        let gap = match self.manifests.load(name) {
            Ok(Some(manifest)) => match verify_unit(&manifest, self.store.as_ref()).await {
                Ok(gap) => Some(gap),
                Err(e) => {
                    warn!(unit = %name, error = %e, "verification failed");
                    self.progress.add_error(&format!("{name}: {e}"));
                    None
                }
            },
            Ok(None) => {
                warn!(unit = %name, "manifest missing, skipping verification");
                None
            }
            Err(e) => {
                warn!(unit = %name, error = %e, "manifest unreadable");
                None
            }
        };

        self.progress
            .mark_unit_complete(name, indexing.indexed as u64);

        // Verified coverage when the manifest is readable, else the unit's
        // own view (new plus previously indexed identifiers).
        work_unit.indexed_count = indexing.indexed + already_indexed;
        let coverage = gap
            .as_ref()
            .map(|g| g.coverage)
            .unwrap_or_else(|| work_unit.coverage());
        let missing = gap.map(|g| g.missing).unwrap_or_default();

        let failures: Vec<FailureEntry> = retrieval_failures
            .into_iter()
            .chain(indexing.failures)
            .map(|(identifier, error)| FailureEntry { identifier, error })
            .collect();

        self.update_status(name, |s| {
            s.state = UnitState::Done;
            s.coverage = Some(coverage);
        });

        info!(
            unit = %name,
            discovered = item_count,
            retrieved = retrieved_count,
            indexed = indexing.indexed,
            coverage,
            failures = failures.len(),
            "unit complete"
        );

        UnitReport {
            unit: name.to_string(),
            state: UnitState::Done,
            discovered: item_count,
            retrieved: retrieved_count,
            retrieval_skipped,
            already_indexed,
            indexed: indexing.indexed,
            indexing_skipped: indexing.skipped,
            failures,
            coverage,
            missing,
            error: None,
            elapsed_ms: unit_started.elapsed().as_millis() as u64,
        }
    }

    fn fail_unit(&self, name: &str, error: HarvesterError, unit_started: Instant) -> UnitReport {
        warn!(unit = %name, %error, "unit failed");
        self.progress.add_error(&format!("{name}: {error}"));
        self.update_status(name, |s| s.state = UnitState::Failed);
        UnitReport::failed(name, error.to_string(), unit_started.elapsed())
    }

    fn update_status(&self, unit: &str, apply: impl FnOnce(&mut UnitStatus)) {
        let mut statuses = self.statuses.lock().expect("status table lock");
        let entry = statuses
            .entry(unit.to_string())
            .or_insert_with(|| UnitStatus {
                state: UnitState::Discovering,
                discovered: 0,
                indexed: 0,
                coverage: None,
            });
        apply(entry);
    }
}

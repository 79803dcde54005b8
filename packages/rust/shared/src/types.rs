//! Core domain types for the Harvester pipeline.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ---------------------------------------------------------------------------
// TaskId
// ---------------------------------------------------------------------------

/// A UUID v7 wrapper for task identifiers (time-sortable, unique while active).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub Uuid);

impl TaskId {
    /// Generate a new time-sortable task identifier.
    pub fn new() -> Self {
        Self(Uuid::now_v7())
    }
}

impl Default for TaskId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for TaskId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

// ---------------------------------------------------------------------------
// Task categories and statuses
// ---------------------------------------------------------------------------

/// The fixed task categories, one per pipeline stage.
///
/// Each category has its own priority queue and configured worker count;
/// concurrency in one category never starves another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskCategory {
    Discovery,
    Retrieval,
    Indexing,
}

impl TaskCategory {
    /// All categories, in pipeline order.
    pub const ALL: [TaskCategory; 3] = [
        TaskCategory::Discovery,
        TaskCategory::Retrieval,
        TaskCategory::Indexing,
    ];

    /// Stable lowercase name, used in logs and metrics.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovery => "discovery",
            Self::Retrieval => "retrieval",
            Self::Indexing => "indexing",
        }
    }
}

impl std::fmt::Display for TaskCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Lifecycle status of a task in the pool.
///
/// `Timeout` is deliberately distinct from `Failed`: a deadline overrun and
/// an execution error are different operational signals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Queued,
    Processing,
    Completed,
    Failed,
    Timeout,
    Cancelled,
}

impl TaskStatus {
    /// Whether the task has reached a terminal state.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Queued | Self::Processing)
    }
}

// ---------------------------------------------------------------------------
// Catalog stages
// ---------------------------------------------------------------------------

/// The per-identifier progress stages recorded in the catalog store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Discovered,
    Retrieved,
    Indexed,
}

impl StageKind {
    /// Stable lowercase name, used as the catalog's stage column.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Discovered => "discovered",
            Self::Retrieved => "retrieved",
            Self::Indexed => "indexed",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Discovery output
// ---------------------------------------------------------------------------

/// One identifier found by a discovery strategy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DiscoveredItem {
    /// Normalized content URL.
    pub identifier: String,
    /// Scheduling priority; lower is more urgent.
    pub priority: u8,
    /// Name of the strategy that found this item.
    pub strategy: String,
}

// ---------------------------------------------------------------------------
// UnitSpec / WorkUnit
// ---------------------------------------------------------------------------

/// Configuration for one unit of work: a content source to fully process.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitSpec {
    /// Human-readable unit name (also the manifest file name).
    pub name: String,
    /// Origin URL discovery starts from.
    pub origin: String,
    /// URL include patterns (if non-empty, a URL must match at least one).
    #[serde(default)]
    pub include_patterns: Vec<String>,
    /// URL exclude patterns (a URL matching any is dropped).
    #[serde(default)]
    pub exclude_patterns: Vec<String>,
    /// Known catalog identifiers used for URL synthesis.
    #[serde(default)]
    pub catalog_ids: Vec<String>,
    /// URL template for synthesis, with `{id}` as the placeholder.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url_template: Option<String>,
}

/// Pipeline stage a work unit is currently in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnitState {
    Discovering,
    Retrieving,
    Indexing,
    Verifying,
    Done,
    Failed,
}

/// Runtime state of one unit moving through the pipeline.
///
/// Created when discovery starts, mutated through every stage, closed at
/// verification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkUnit {
    /// Unit name from the spec.
    pub name: String,
    /// Origin URL.
    pub origin: String,
    /// Identifiers discovered for this unit.
    pub discovered: Vec<String>,
    /// Identifiers with retrieved content available this run.
    pub retrieved: Vec<String>,
    /// Identifiers confirmed indexed in the store.
    pub indexed_count: usize,
}

impl WorkUnit {
    /// Start a fresh unit from its spec.
    pub fn new(spec: &UnitSpec) -> Self {
        Self {
            name: spec.name.clone(),
            origin: spec.origin.clone(),
            discovered: Vec::new(),
            retrieved: Vec::new(),
            indexed_count: 0,
        }
    }

    /// Indexed/discovered ratio as a percentage, clamped to [0, 100].
    ///
    /// A unit with nothing discovered is complete by definition: 100.0.
    pub fn coverage(&self) -> f64 {
        coverage_percent(self.indexed_count, self.discovered.len())
    }
}

/// Coverage percentage with the empty-denominator sentinel.
pub fn coverage_percent(indexed: usize, discovered: usize) -> f64 {
    if discovered == 0 {
        return 100.0;
    }
    let pct = indexed as f64 / discovered as f64 * 100.0;
    pct.clamp(0.0, 100.0)
}

// ---------------------------------------------------------------------------
// ProgressRecord
// ---------------------------------------------------------------------------

/// The externally-readable progress document shared across processes.
///
/// Shape and file path are the cross-process contract: external consumers
/// poll this document read-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressRecord {
    /// Whether a run is currently active.
    pub is_running: bool,
    /// Unit currently being processed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_unit: Option<String>,
    /// Human-readable description of the current step.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub current_step: Option<String>,
    /// Identifiers discovered so far this run. Monotonically non-decreasing.
    pub discovered: u64,
    /// Identifiers processed (retrieved or skipped) so far this run.
    pub processed: u64,
    /// Identifiers indexed so far this run.
    pub indexed: u64,
    /// Errors accumulated this run, newest last.
    #[serde(default)]
    pub errors: Vec<String>,
    /// When the run started.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    /// When the record was last written.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_updated: Option<DateTime<Utc>>,
}

impl Default for ProgressRecord {
    fn default() -> Self {
        Self {
            is_running: false,
            current_unit: None,
            current_step: None,
            discovered: 0,
            processed: 0,
            indexed: 0,
            errors: Vec::new(),
            started_at: None,
            last_updated: None,
        }
    }
}

impl ProgressRecord {
    /// Raise `discovered` to `processed` whenever processed overtakes it,
    /// keeping derived percentages inside [0, 100].
    pub fn heal(&mut self) {
        if self.processed > self.discovered {
            self.discovered = self.processed;
        }
    }

    /// Processed/discovered ratio as a percentage.
    pub fn percent(&self) -> f64 {
        if self.discovered == 0 {
            return 0.0;
        }
        (self.processed as f64 / self.discovered as f64 * 100.0).clamp(0.0, 100.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn task_id_roundtrip() {
        let id = TaskId::new();
        let s = id.to_string();
        let parsed: TaskId = s.parse().expect("parse TaskId");
        assert_eq!(id, parsed);
    }

    #[test]
    fn category_names() {
        assert_eq!(TaskCategory::Retrieval.as_str(), "retrieval");
        assert_eq!(TaskCategory::ALL.len(), 3);
    }

    #[test]
    fn terminal_statuses() {
        assert!(!TaskStatus::Queued.is_terminal());
        assert!(!TaskStatus::Processing.is_terminal());
        assert!(TaskStatus::Completed.is_terminal());
        assert!(TaskStatus::Timeout.is_terminal());
        assert!(TaskStatus::Cancelled.is_terminal());
    }

    #[test]
    fn coverage_clamps_and_sentinels() {
        assert_eq!(coverage_percent(0, 0), 100.0);
        assert_eq!(coverage_percent(8, 10), 80.0);
        assert_eq!(coverage_percent(10, 10), 100.0);
        // Over-indexed (self-healing should prevent this, but clamp anyway)
        assert_eq!(coverage_percent(12, 10), 100.0);
        assert_eq!(coverage_percent(0, 10), 0.0);
    }

    #[test]
    fn work_unit_coverage() {
        let spec = UnitSpec {
            name: "acme".into(),
            origin: "https://acme.example.com".into(),
            include_patterns: vec![],
            exclude_patterns: vec![],
            catalog_ids: vec![],
            url_template: None,
        };
        let mut unit = WorkUnit::new(&spec);
        assert_eq!(unit.coverage(), 100.0);

        unit.discovered = (0..10).map(|i| format!("https://a/{i}")).collect();
        unit.indexed_count = 8;
        assert_eq!(unit.coverage(), 80.0);
    }

    #[test]
    fn progress_record_heals_upward() {
        let mut rec = ProgressRecord {
            discovered: 3,
            processed: 10,
            ..Default::default()
        };
        rec.heal();
        assert_eq!(rec.discovered, 10);
        assert!(rec.percent() <= 100.0);
    }

    #[test]
    fn progress_record_serialization() {
        let rec = ProgressRecord {
            is_running: true,
            current_unit: Some("acme".into()),
            current_step: Some("retrieving".into()),
            discovered: 42,
            processed: 17,
            indexed: 12,
            errors: vec!["https://a/9: network error".into()],
            started_at: Some(Utc::now()),
            last_updated: Some(Utc::now()),
        };

        let json = serde_json::to_string_pretty(&rec).expect("serialize");
        let parsed: ProgressRecord = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(parsed, rec);
    }

    #[test]
    fn unit_spec_defaults() {
        let json = r#"{"name": "acme", "origin": "https://acme.example.com"}"#;
        let spec: UnitSpec = serde_json::from_str(json).expect("parse spec");
        assert!(spec.include_patterns.is_empty());
        assert!(spec.catalog_ids.is_empty());
        assert!(spec.url_template.is_none());
    }
}

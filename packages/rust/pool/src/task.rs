//! Task model: payloads, outcomes, results, and the per-category handler trait.
//!
//! Work is described as a tagged union over the fixed categories, each with a
//! strongly-typed payload, and executed through a [`TaskHandler`] registered
//! per category.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use harvester_shared::{
    DiscoveredItem, FetchedContent, Result, TaskCategory, TaskId, TaskStatus, UnitSpec,
};

/// Default total attempt budget when a task does not override it.
pub const DEFAULT_MAX_RETRIES: u32 = 3;

/// Default per-attempt deadline when a task does not override it.
pub const DEFAULT_TASK_TIMEOUT: Duration = Duration::from_secs(120);

// ---------------------------------------------------------------------------
// TaskPayload
// ---------------------------------------------------------------------------

/// What a task does, one variant per category.
#[derive(Debug, Clone)]
pub enum TaskPayload {
    /// Run all discovery strategies for a unit and persist its manifest.
    Discover {
        unit: UnitSpec,
    },
    /// Fetch one discovered identifier and stage its content.
    Retrieve {
        unit: String,
        identifier: String,
    },
    /// Chunk and index staged content for one identifier.
    Index {
        unit: String,
        identifier: String,
        content: String,
        metadata: serde_json::Value,
    },
}

impl TaskPayload {
    /// The category this payload belongs to.
    pub fn category(&self) -> TaskCategory {
        match self {
            Self::Discover { .. } => TaskCategory::Discovery,
            Self::Retrieve { .. } => TaskCategory::Retrieval,
            Self::Index { .. } => TaskCategory::Indexing,
        }
    }

    /// The content identifier this payload targets, when it has one.
    pub fn identifier(&self) -> Option<&str> {
        match self {
            Self::Discover { .. } => None,
            Self::Retrieve { identifier, .. } | Self::Index { identifier, .. } => {
                Some(identifier)
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Task
// ---------------------------------------------------------------------------

/// A unit of work submitted to the pool.
#[derive(Debug, Clone)]
pub struct Task {
    /// Unique while the task is active.
    pub id: TaskId,
    /// What to do.
    pub payload: TaskPayload,
    /// Scheduling priority; lower is more urgent.
    pub priority: u8,
    /// Total attempt budget (first attempt included).
    pub max_retries: u32,
    /// Per-attempt execution deadline.
    pub timeout: Duration,
    /// When the task was created.
    pub created_at: DateTime<Utc>,
}

impl Task {
    /// Create a task with default retry budget and timeout.
    pub fn new(payload: TaskPayload, priority: u8) -> Self {
        Self {
            id: TaskId::new(),
            payload,
            priority,
            max_retries: DEFAULT_MAX_RETRIES,
            timeout: DEFAULT_TASK_TIMEOUT,
            created_at: Utc::now(),
        }
    }

    /// Override the total attempt budget.
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Override the per-attempt deadline.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// The category derived from the payload.
    pub fn category(&self) -> TaskCategory {
        self.payload.category()
    }
}

// ---------------------------------------------------------------------------
// TaskOutcome / TaskResult
// ---------------------------------------------------------------------------

/// Successful output of a task, one variant per category.
#[derive(Debug, Clone)]
pub enum TaskOutcome {
    /// Ranked, deduplicated identifiers for a unit.
    Discovered(Vec<DiscoveredItem>),
    /// Content fetched and staged for one identifier.
    Retrieved(FetchedContent),
    /// Chunks written to the store for one identifier.
    Indexed { identifier: String, chunks: usize },
    /// The identifier was already present; no external call was made.
    Skipped { identifier: String },
}

/// Terminal record of a task. Written exactly once.
#[derive(Debug, Clone)]
pub struct TaskResult {
    pub task_id: TaskId,
    pub status: TaskStatus,
    /// Present on success.
    pub outcome: Option<TaskOutcome>,
    /// Present on failure/timeout/cancellation.
    pub error: Option<String>,
    /// Wall-clock time from first attempt to terminal state.
    pub duration: Duration,
    /// Retries consumed (attempts minus one).
    pub retries: u32,
    pub completed_at: DateTime<Utc>,
}

impl TaskResult {
    pub(crate) fn finished(
        task_id: TaskId,
        status: TaskStatus,
        outcome: Option<TaskOutcome>,
        error: Option<String>,
        duration: Duration,
        retries: u32,
    ) -> Self {
        Self {
            task_id,
            status,
            outcome,
            error,
            duration,
            retries,
            completed_at: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// TaskHandler
// ---------------------------------------------------------------------------

/// Executes payloads of one category.
///
/// Handlers are registered per category at pool construction; the pool
/// consults the handler's breaker before every attempt.
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Name of the breaker guarding this handler's external dependency.
    fn breaker(&self) -> &str;

    /// Execute one payload. Errors are classified through
    /// [`HarvesterError::is_permanent`](harvester_shared::HarvesterError::is_permanent)
    /// to decide retry versus immediate failure.
    async fn run(&self, payload: &TaskPayload) -> Result<TaskOutcome>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn payload_category_mapping() {
        let retrieve = TaskPayload::Retrieve {
            unit: "acme".into(),
            identifier: "https://a/1".into(),
        };
        assert_eq!(retrieve.category(), TaskCategory::Retrieval);
        assert_eq!(retrieve.identifier(), Some("https://a/1"));

        let index = TaskPayload::Index {
            unit: "acme".into(),
            identifier: "https://a/1".into(),
            content: "body".into(),
            metadata: serde_json::json!({}),
        };
        assert_eq!(index.category(), TaskCategory::Indexing);

        let discover = TaskPayload::Discover {
            unit: UnitSpec {
                name: "acme".into(),
                origin: "https://a".into(),
                include_patterns: vec![],
                exclude_patterns: vec![],
                catalog_ids: vec![],
                url_template: None,
            },
        };
        assert_eq!(discover.category(), TaskCategory::Discovery);
        assert!(discover.identifier().is_none());
    }

    #[test]
    fn task_builder_overrides() {
        let task = Task::new(
            TaskPayload::Retrieve {
                unit: "acme".into(),
                identifier: "https://a/1".into(),
            },
            5,
        )
        .with_max_retries(7)
        .with_timeout(Duration::from_secs(9));

        assert_eq!(task.priority, 5);
        assert_eq!(task.max_retries, 7);
        assert_eq!(task.timeout, Duration::from_secs(9));
        assert_eq!(task.category(), TaskCategory::Retrieval);
    }
}

//! Priority worker pool with per-category concurrency, breaker checks,
//! timeouts, and capped exponential backoff retries.
//!
//! One pool hosts a fixed worker count per category. Workers cooperate with
//! shutdown through a watch channel and a short queue poll timeout; task
//! completion is broadcast through a completion counter so waiters never
//! miss a wakeup.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use serde::Serialize;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use harvester_shared::{
    HarvesterError, PoolConfig, Result, TaskCategory, TaskId, TaskStatus,
};

use crate::breaker::BreakerRegistry;
use crate::queue::CategoryQueue;
use crate::task::{Task, TaskHandler, TaskResult};

// ---------------------------------------------------------------------------
// Metrics
// ---------------------------------------------------------------------------

#[derive(Default)]
struct CategoryCounters {
    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    timeouts: AtomicU64,
    retries: AtomicU64,
    circuit_rejections: AtomicU64,
}

impl CategoryCounters {
    fn snapshot(&self) -> CategoryMetrics {
        CategoryMetrics {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            circuit_rejections: self.circuit_rejections.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time counters for one category.
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct CategoryMetrics {
    pub submitted: u64,
    pub completed: u64,
    pub failed: u64,
    /// Tasks whose final attempt timed out.
    pub timeouts: u64,
    /// Retry attempts consumed across all tasks.
    pub retries: u64,
    /// Tasks rejected fast because a breaker was open.
    pub circuit_rejections: u64,
}

/// Point-in-time counters for the whole pool.
#[derive(Debug, Clone, Serialize)]
pub struct PoolMetrics {
    pub categories: Vec<(TaskCategory, CategoryMetrics)>,
}

impl PoolMetrics {
    /// Counters for one category.
    pub fn for_category(&self, category: TaskCategory) -> CategoryMetrics {
        self.categories
            .iter()
            .find(|(c, _)| *c == category)
            .map(|(_, m)| *m)
            .unwrap_or_default()
    }
}

// ---------------------------------------------------------------------------
// WorkerPool
// ---------------------------------------------------------------------------

struct TaskEntry {
    status: TaskStatus,
    result: Option<TaskResult>,
}

struct PoolInner {
    config: PoolConfig,
    handlers: HashMap<TaskCategory, Arc<dyn TaskHandler>>,
    breakers: BreakerRegistry,
    queues: HashMap<TaskCategory, Mutex<CategoryQueue>>,
    wakeups: HashMap<TaskCategory, Notify>,
    tasks: Mutex<HashMap<TaskId, TaskEntry>>,
    seq: AtomicU64,
    counters: HashMap<TaskCategory, CategoryCounters>,
    shutdown_tx: watch::Sender<bool>,
    completions_tx: watch::Sender<u64>,
}

impl PoolInner {
    fn counters(&self, category: TaskCategory) -> &CategoryCounters {
        self.counters
            .get(&category)
            .expect("counters exist for every category")
    }

    fn queue(&self, category: TaskCategory) -> &Mutex<CategoryQueue> {
        self.queues
            .get(&category)
            .expect("queue exists for every category")
    }

    fn wakeup(&self, category: TaskCategory) -> &Notify {
        self.wakeups
            .get(&category)
            .expect("wakeup exists for every category")
    }

    fn store_result(&self, result: TaskResult) {
        {
            let mut tasks = self.tasks.lock().expect("task table lock");
            if let Some(entry) = tasks.get_mut(&result.task_id) {
                entry.status = result.status;
                entry.result = Some(result);
            }
        }
        self.completions_tx.send_modify(|c| *c += 1);
    }
}

/// Owns the category queues and runs N workers per category.
///
/// Constructed explicitly with its handlers and breakers injected; started
/// and stopped by whoever owns it. No global state.
pub struct WorkerPool {
    inner: Arc<PoolInner>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    started: AtomicBool,
}

impl WorkerPool {
    /// Create a pool with one handler per category it should execute.
    pub fn new(
        config: PoolConfig,
        handlers: HashMap<TaskCategory, Arc<dyn TaskHandler>>,
        breakers: BreakerRegistry,
    ) -> Self {
        let queues = TaskCategory::ALL
            .iter()
            .map(|c| (*c, Mutex::new(CategoryQueue::new())))
            .collect();
        let wakeups = TaskCategory::ALL
            .iter()
            .map(|c| (*c, Notify::new()))
            .collect();
        let counters = TaskCategory::ALL
            .iter()
            .map(|c| (*c, CategoryCounters::default()))
            .collect();

        let (shutdown_tx, _) = watch::channel(false);
        let (completions_tx, _) = watch::channel(0u64);

        Self {
            inner: Arc::new(PoolInner {
                config,
                handlers,
                breakers,
                queues,
                wakeups,
                tasks: Mutex::new(HashMap::new()),
                seq: AtomicU64::new(0),
                counters,
                shutdown_tx,
                completions_tx,
            }),
            workers: Mutex::new(Vec::new()),
            started: AtomicBool::new(false),
        }
    }

    /// Enqueue a task into its category queue. Returns the task id.
    pub fn add_task(&self, task: Task) -> Result<TaskId> {
        if *self.inner.shutdown_tx.borrow() {
            return Err(HarvesterError::validation("worker pool is stopped"));
        }

        let category = task.category();
        if !self.inner.handlers.contains_key(&category) {
            return Err(HarvesterError::validation(format!(
                "no handler registered for category '{category}'"
            )));
        }

        let id = task.id;
        {
            let mut tasks = self.inner.tasks.lock().expect("task table lock");
            if tasks.contains_key(&id) {
                return Err(HarvesterError::validation(format!(
                    "task {id} already submitted"
                )));
            }
            tasks.insert(
                id,
                TaskEntry {
                    status: TaskStatus::Queued,
                    result: None,
                },
            );
        }

        let seq = self.inner.seq.fetch_add(1, Ordering::Relaxed);
        self.inner
            .queue(category)
            .lock()
            .expect("queue lock")
            .push(task, seq);
        self.inner
            .counters(category)
            .submitted
            .fetch_add(1, Ordering::Relaxed);
        self.inner.wakeup(category).notify_one();

        debug!(%id, %category, "task enqueued");
        Ok(id)
    }

    /// Current status of a task, or None if the id is unknown.
    pub fn get_task_status(&self, id: TaskId) -> Option<TaskStatus> {
        self.inner
            .tasks
            .lock()
            .expect("task table lock")
            .get(&id)
            .map(|e| e.status)
    }

    /// Terminal result of a task, if it has one yet.
    pub fn get_task_result(&self, id: TaskId) -> Option<TaskResult> {
        self.inner
            .tasks
            .lock()
            .expect("task table lock")
            .get(&id)
            .and_then(|e| e.result.clone())
    }

    /// Wait for a task to reach a terminal state.
    ///
    /// Returns None if the id was never submitted.
    pub async fn await_result(&self, id: TaskId) -> Option<TaskResult> {
        let mut completions = self.inner.completions_tx.subscribe();
        loop {
            {
                let tasks = self.inner.tasks.lock().expect("task table lock");
                match tasks.get(&id) {
                    None => return None,
                    Some(entry) if entry.status.is_terminal() => return entry.result.clone(),
                    Some(_) => {}
                }
            }
            if completions.changed().await.is_err() {
                // Pool dropped mid-wait; report whatever state exists.
                return self.get_task_result(id);
            }
        }
    }

    /// Spawn the configured worker count per category. Idempotent.
    pub fn start(&self) {
        if self.started.swap(true, Ordering::SeqCst) {
            return;
        }

        let mut workers = self.workers.lock().expect("worker list lock");
        for category in TaskCategory::ALL {
            for idx in 0..self.inner.config.workers_for(category) {
                let inner = self.inner.clone();
                workers.push(tokio::spawn(worker_loop(inner, category, idx)));
            }
        }

        info!(
            discovery = self.inner.config.workers_for(TaskCategory::Discovery),
            retrieval = self.inner.config.workers_for(TaskCategory::Retrieval),
            indexing = self.inner.config.workers_for(TaskCategory::Indexing),
            "worker pool started"
        );
    }

    /// Signal shutdown, drain workers within the grace period, abort
    /// stragglers, and mark still-queued tasks cancelled.
    pub async fn stop(&self) {
        self.inner.shutdown_tx.send_replace(true);
        for category in TaskCategory::ALL {
            self.inner.wakeup(category).notify_waiters();
        }

        let handles: Vec<_> = {
            let mut workers = self.workers.lock().expect("worker list lock");
            workers.drain(..).collect()
        };

        let grace = self.inner.config.grace_period;
        for mut handle in handles {
            if tokio::time::timeout(grace, &mut handle).await.is_err() {
                warn!("worker did not drain within grace period, aborting");
                handle.abort();
            }
        }

        // Anything still queued never ran; record it as cancelled.
        let mut cancelled = 0usize;
        for category in TaskCategory::ALL {
            let leftover = self
                .inner
                .queue(category)
                .lock()
                .expect("queue lock")
                .drain();
            for task in leftover {
                cancelled += 1;
                self.inner.store_result(TaskResult::finished(
                    task.id,
                    TaskStatus::Cancelled,
                    None,
                    Some("worker pool stopped".into()),
                    Duration::ZERO,
                    0,
                ));
            }
        }

        self.started.store(false, Ordering::SeqCst);
        info!(cancelled, "worker pool stopped");
    }

    /// Point-in-time metrics for all categories.
    pub fn metrics(&self) -> PoolMetrics {
        PoolMetrics {
            categories: TaskCategory::ALL
                .iter()
                .map(|c| (*c, self.inner.counters(*c).snapshot()))
                .collect(),
        }
    }
}

// ---------------------------------------------------------------------------
// Worker loop
// ---------------------------------------------------------------------------

async fn worker_loop(inner: Arc<PoolInner>, category: TaskCategory, worker_idx: usize) {
    let mut shutdown = inner.shutdown_tx.subscribe();
    debug!(%category, worker_idx, "worker started");

    loop {
        if *shutdown.borrow() {
            break;
        }

        let next = inner.queue(category).lock().expect("queue lock").pop();
        let Some(task) = next else {
            tokio::select! {
                _ = inner.wakeup(category).notified() => {}
                _ = shutdown.changed() => {}
                _ = tokio::time::sleep(inner.config.poll_interval) => {}
            }
            continue;
        };

        let id = task.id;
        {
            let mut tasks = inner.tasks.lock().expect("task table lock");
            if let Some(entry) = tasks.get_mut(&id) {
                entry.status = TaskStatus::Processing;
            }
        }

        let result = execute_task(&inner, task).await;
        debug!(
            %id,
            %category,
            status = ?result.status,
            retries = result.retries,
            duration_ms = result.duration.as_millis() as u64,
            "task finished"
        );
        inner.store_result(result);
    }

    debug!(%category, worker_idx, "worker exited");
}

/// Run one task to a terminal state: breaker checks, timeout per attempt,
/// capped exponential backoff between transient failures.
async fn execute_task(inner: &PoolInner, task: Task) -> TaskResult {
    let started = Instant::now();
    let category = task.category();
    let handler = inner
        .handlers
        .get(&category)
        .expect("handler checked at submission")
        .clone();
    let breaker = inner.breakers.get(handler.breaker());
    let max_attempts = task.max_retries.max(1);
    let mut attempt: u32 = 0;

    loop {
        if let Some(b) = &breaker {
            if !b.can_execute() {
                // Fail fast: no external call, no retry consumed.
                inner
                    .counters(category)
                    .circuit_rejections
                    .fetch_add(1, Ordering::Relaxed);
                inner.counters(category).failed.fetch_add(1, Ordering::Relaxed);
                let err = HarvesterError::circuit_open(b.name());
                return TaskResult::finished(
                    task.id,
                    TaskStatus::Failed,
                    None,
                    Some(err.to_string()),
                    started.elapsed(),
                    attempt.saturating_sub(1),
                );
            }
        }

        attempt += 1;
        match tokio::time::timeout(task.timeout, handler.run(&task.payload)).await {
            Ok(Ok(outcome)) => {
                if let Some(b) = &breaker {
                    b.record_success();
                }
                inner
                    .counters(category)
                    .completed
                    .fetch_add(1, Ordering::Relaxed);
                return TaskResult::finished(
                    task.id,
                    TaskStatus::Completed,
                    Some(outcome),
                    None,
                    started.elapsed(),
                    attempt - 1,
                );
            }
            Ok(Err(err)) if err.is_permanent() => {
                // The dependency answered; this identifier just does not
                // exist. No breaker failure, no retry.
                inner.counters(category).failed.fetch_add(1, Ordering::Relaxed);
                return TaskResult::finished(
                    task.id,
                    TaskStatus::Failed,
                    None,
                    Some(err.to_string()),
                    started.elapsed(),
                    attempt - 1,
                );
            }
            Ok(Err(err)) => {
                if let Some(b) = &breaker {
                    b.record_failure();
                }
                if attempt >= max_attempts {
                    inner.counters(category).failed.fetch_add(1, Ordering::Relaxed);
                    return TaskResult::finished(
                        task.id,
                        TaskStatus::Failed,
                        None,
                        Some(err.to_string()),
                        started.elapsed(),
                        attempt - 1,
                    );
                }
                inner.counters(category).retries.fetch_add(1, Ordering::Relaxed);
                let delay =
                    backoff_delay(attempt, inner.config.backoff_base, inner.config.backoff_cap);
                warn!(
                    id = %task.id,
                    %category,
                    attempt,
                    error = %err,
                    delay_ms = delay.as_millis() as u64,
                    "attempt failed, backing off"
                );
                tokio::time::sleep(delay).await;
            }
            Err(_elapsed) => {
                if let Some(b) = &breaker {
                    b.record_failure();
                }
                if attempt >= max_attempts {
                    inner
                        .counters(category)
                        .timeouts
                        .fetch_add(1, Ordering::Relaxed);
                    return TaskResult::finished(
                        task.id,
                        TaskStatus::Timeout,
                        None,
                        Some(HarvesterError::Timeout(task.timeout).to_string()),
                        started.elapsed(),
                        attempt - 1,
                    );
                }
                inner.counters(category).retries.fetch_add(1, Ordering::Relaxed);
                let delay =
                    backoff_delay(attempt, inner.config.backoff_base, inner.config.backoff_cap);
                warn!(
                    id = %task.id,
                    %category,
                    attempt,
                    timeout_ms = task.timeout.as_millis() as u64,
                    "attempt timed out, backing off"
                );
                tokio::time::sleep(delay).await;
            }
        }
    }
}

/// Exponential backoff after `attempt` completed attempts, capped at `cap`.
fn backoff_delay(attempt: u32, base: Duration, cap: Duration) -> Duration {
    let exp = attempt.saturating_sub(1).min(16);
    let ms = (base.as_millis() as u64).saturating_mul(1u64 << exp);
    Duration::from_millis(ms).min(cap)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    use async_trait::async_trait;

    use crate::breaker::CircuitBreaker;
    use crate::task::{TaskOutcome, TaskPayload};
    use harvester_shared::Result as HvResult;

    const TEST_BREAKER: &str = "test";

    fn test_pool_config(workers: usize) -> PoolConfig {
        PoolConfig {
            discovery_workers: workers,
            retrieval_workers: workers,
            indexing_workers: workers,
            poll_interval: Duration::from_millis(10),
            grace_period: Duration::from_secs(1),
            backoff_base: Duration::from_millis(1),
            backoff_cap: Duration::from_millis(5),
        }
    }

    fn test_registry(threshold: u32) -> BreakerRegistry {
        let mut registry = BreakerRegistry::new();
        registry.register(CircuitBreaker::new(
            TEST_BREAKER,
            threshold,
            Duration::from_secs(60),
        ));
        registry
    }

    fn retrieval_task(identifier: &str, priority: u8) -> Task {
        Task::new(
            TaskPayload::Retrieve {
                unit: "unit".into(),
                identifier: identifier.into(),
            },
            priority,
        )
        .with_timeout(Duration::from_secs(5))
    }

    fn handlers_for(
        handler: Arc<dyn TaskHandler>,
    ) -> HashMap<TaskCategory, Arc<dyn TaskHandler>> {
        TaskCategory::ALL
            .iter()
            .map(|c| (*c, handler.clone()))
            .collect()
    }

    /// Records the order identifiers are executed in.
    struct OrderHandler {
        order: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl TaskHandler for OrderHandler {
        fn breaker(&self) -> &str {
            TEST_BREAKER
        }

        async fn run(&self, payload: &TaskPayload) -> HvResult<TaskOutcome> {
            let identifier = payload.identifier().unwrap_or("").to_string();
            self.order.lock().unwrap().push(identifier.clone());
            Ok(TaskOutcome::Skipped { identifier })
        }
    }

    /// Fails every call with a transient error.
    struct AlwaysFailHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for AlwaysFailHandler {
        fn breaker(&self) -> &str {
            TEST_BREAKER
        }

        async fn run(&self, _payload: &TaskPayload) -> HvResult<TaskOutcome> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(HarvesterError::Network("connection reset".into()))
        }
    }

    /// Fails every call with a permanent not-found error.
    struct NotFoundHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for NotFoundHandler {
        fn breaker(&self) -> &str {
            TEST_BREAKER
        }

        async fn run(&self, payload: &TaskPayload) -> HvResult<TaskOutcome> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            Err(HarvesterError::not_found(payload.identifier().unwrap_or("")))
        }
    }

    /// Sleeps past any reasonable task deadline.
    struct SlowHandler {
        calls: AtomicU32,
    }

    #[async_trait]
    impl TaskHandler for SlowHandler {
        fn breaker(&self) -> &str {
            TEST_BREAKER
        }

        async fn run(&self, payload: &TaskPayload) -> HvResult<TaskOutcome> {
            self.calls.fetch_add(1, Ordering::Relaxed);
            tokio::time::sleep(Duration::from_millis(500)).await;
            Ok(TaskOutcome::Skipped {
                identifier: payload.identifier().unwrap_or("").into(),
            })
        }
    }

    #[tokio::test]
    async fn dequeues_by_priority_with_fifo_ties() {
        let handler = Arc::new(OrderHandler {
            order: Mutex::new(Vec::new()),
        });
        let pool = WorkerPool::new(
            test_pool_config(1),
            handlers_for(handler.clone()),
            test_registry(100),
        );

        // Enqueue before starting so a single worker drains in queue order.
        let ids: Vec<TaskId> = vec![
            pool.add_task(retrieval_task("c", 5)).unwrap(),
            pool.add_task(retrieval_task("a", 1)).unwrap(),
            pool.add_task(retrieval_task("d", 5)).unwrap(),
            pool.add_task(retrieval_task("b", 3)).unwrap(),
        ];

        pool.start();
        for id in &ids {
            let result = pool.await_result(*id).await.expect("result");
            assert_eq!(result.status, TaskStatus::Completed);
        }
        pool.stop().await;

        let order = handler.order.lock().unwrap().clone();
        assert_eq!(order, vec!["a", "b", "c", "d"]);
    }

    #[tokio::test]
    async fn transient_failure_consumes_full_retry_budget() {
        let handler = Arc::new(AlwaysFailHandler {
            calls: AtomicU32::new(0),
        });
        let pool = WorkerPool::new(
            test_pool_config(1),
            handlers_for(handler.clone()),
            test_registry(100),
        );
        pool.start();

        let id = pool
            .add_task(retrieval_task("x", 1).with_max_retries(3))
            .unwrap();
        let result = pool.await_result(id).await.expect("result");
        pool.stop().await;

        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.retries, 2);
        assert_eq!(handler.calls.load(Ordering::Relaxed), 3);
        assert!(result.error.unwrap().contains("network error"));
    }

    #[tokio::test]
    async fn not_found_fails_without_retrying() {
        let handler = Arc::new(NotFoundHandler {
            calls: AtomicU32::new(0),
        });
        let pool = WorkerPool::new(
            test_pool_config(1),
            handlers_for(handler.clone()),
            test_registry(100),
        );
        pool.start();

        let id = pool
            .add_task(retrieval_task("gone", 1).with_max_retries(5))
            .unwrap();
        let result = pool.await_result(id).await.expect("result");
        pool.stop().await;

        assert_eq!(result.status, TaskStatus::Failed);
        assert_eq!(result.retries, 0);
        assert_eq!(handler.calls.load(Ordering::Relaxed), 1);
        assert!(result.error.unwrap().contains("not found"));
    }

    #[tokio::test]
    async fn deadline_overrun_reports_timeout_status() {
        let handler = Arc::new(SlowHandler {
            calls: AtomicU32::new(0),
        });
        let pool = WorkerPool::new(
            test_pool_config(1),
            handlers_for(handler.clone()),
            test_registry(100),
        );
        pool.start();

        let id = pool
            .add_task(
                retrieval_task("slow", 1)
                    .with_max_retries(2)
                    .with_timeout(Duration::from_millis(20)),
            )
            .unwrap();
        let result = pool.await_result(id).await.expect("result");
        pool.stop().await;

        assert_eq!(result.status, TaskStatus::Timeout);
        assert_eq!(result.retries, 1);
        assert_eq!(handler.calls.load(Ordering::Relaxed), 2);
    }

    #[tokio::test]
    async fn open_breaker_rejects_without_external_calls() {
        let handler = Arc::new(AlwaysFailHandler {
            calls: AtomicU32::new(0),
        });
        // Threshold 1: the first failure opens the breaker.
        let pool = WorkerPool::new(
            test_pool_config(1),
            handlers_for(handler.clone()),
            test_registry(1),
        );
        pool.start();

        let first = pool
            .add_task(retrieval_task("a", 1).with_max_retries(1))
            .unwrap();
        let first = pool.await_result(first).await.expect("result");
        assert_eq!(first.status, TaskStatus::Failed);
        assert_eq!(handler.calls.load(Ordering::Relaxed), 1);

        let second = pool
            .add_task(retrieval_task("b", 1).with_max_retries(3))
            .unwrap();
        let second = pool.await_result(second).await.expect("result");
        pool.stop().await;

        assert_eq!(second.status, TaskStatus::Failed);
        assert!(second.error.unwrap().contains("circuit breaker"));
        // The handler was never called for the rejected task.
        assert_eq!(handler.calls.load(Ordering::Relaxed), 1);

        let metrics = pool.metrics().for_category(TaskCategory::Retrieval);
        assert_eq!(metrics.circuit_rejections, 1);
    }

    #[tokio::test]
    async fn stop_cancels_queued_tasks() {
        let handler = Arc::new(OrderHandler {
            order: Mutex::new(Vec::new()),
        });
        let pool = WorkerPool::new(
            test_pool_config(1),
            handlers_for(handler),
            test_registry(100),
        );

        // Never started: everything stays queued until stop() drains it.
        let a = pool.add_task(retrieval_task("a", 1)).unwrap();
        let b = pool.add_task(retrieval_task("b", 2)).unwrap();
        pool.stop().await;

        assert_eq!(pool.get_task_status(a), Some(TaskStatus::Cancelled));
        assert_eq!(pool.get_task_status(b), Some(TaskStatus::Cancelled));

        let result = pool.get_task_result(a).expect("cancelled result");
        assert_eq!(result.status, TaskStatus::Cancelled);

        // A stopped pool refuses new work.
        assert!(pool.add_task(retrieval_task("c", 1)).is_err());
    }

    #[tokio::test]
    async fn metrics_track_submissions_and_completions() {
        let handler = Arc::new(OrderHandler {
            order: Mutex::new(Vec::new()),
        });
        let pool = WorkerPool::new(
            test_pool_config(2),
            handlers_for(handler),
            test_registry(100),
        );
        pool.start();

        let mut ids = Vec::new();
        for i in 0..5 {
            ids.push(pool.add_task(retrieval_task(&format!("p{i}"), 1)).unwrap());
        }
        for id in ids {
            pool.await_result(id).await.expect("result");
        }
        pool.stop().await;

        let metrics = pool.metrics().for_category(TaskCategory::Retrieval);
        assert_eq!(metrics.submitted, 5);
        assert_eq!(metrics.completed, 5);
        assert_eq!(metrics.failed, 0);
    }

    #[tokio::test]
    async fn unknown_task_id_yields_none() {
        let handler = Arc::new(OrderHandler {
            order: Mutex::new(Vec::new()),
        });
        let pool = WorkerPool::new(
            test_pool_config(1),
            handlers_for(handler),
            test_registry(100),
        );

        let ghost = TaskId::new();
        assert!(pool.get_task_status(ghost).is_none());
        assert!(pool.await_result(ghost).await.is_none());
    }

    #[test]
    fn backoff_doubles_and_caps() {
        let base = Duration::from_millis(100);
        let cap = Duration::from_millis(500);
        assert_eq!(backoff_delay(1, base, cap), Duration::from_millis(100));
        assert_eq!(backoff_delay(2, base, cap), Duration::from_millis(200));
        assert_eq!(backoff_delay(3, base, cap), Duration::from_millis(400));
        assert_eq!(backoff_delay(4, base, cap), Duration::from_millis(500));
        assert_eq!(backoff_delay(30, base, cap), Duration::from_millis(500));
    }
}

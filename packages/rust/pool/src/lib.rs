//! Priority worker pool, task model, and circuit breakers.
//!
//! This crate provides:
//! - [`CircuitBreaker`] / [`BreakerRegistry`] — per-dependency failure isolation
//! - [`Task`] / [`TaskPayload`] / [`TaskResult`] — the typed unit of work
//! - [`CategoryQueue`] — priority queue with FIFO tie-break
//! - [`WorkerPool`] — fixed workers per category with retries and timeouts

pub mod breaker;
pub mod pool;
pub mod queue;
pub mod task;

pub use breaker::{
    BreakerRegistry, BreakerState, CircuitBreaker, FETCH_BREAKER, STORE_BREAKER,
};
pub use pool::{CategoryMetrics, PoolMetrics, WorkerPool};
pub use queue::CategoryQueue;
pub use task::{
    DEFAULT_MAX_RETRIES, DEFAULT_TASK_TIMEOUT, Task, TaskHandler, TaskOutcome, TaskPayload,
    TaskResult,
};

//! Priority queue for one task category.
//!
//! Dequeue order is non-decreasing by priority value (lower = more urgent)
//! with FIFO tie-break via a monotonic sequence number assigned at enqueue.

use std::cmp::Ordering;
use std::collections::BinaryHeap;

use crate::task::Task;

struct QueuedTask {
    task: Task,
    seq: u64,
}

impl PartialEq for QueuedTask {
    fn eq(&self, other: &Self) -> bool {
        self.task.priority == other.task.priority && self.seq == other.seq
    }
}

impl Eq for QueuedTask {}

impl PartialOrd for QueuedTask {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueuedTask {
    fn cmp(&self, other: &Self) -> Ordering {
        // BinaryHeap pops the greatest element, so "greatest" must mean the
        // lowest priority value, and among equals the lowest sequence.
        match other.task.priority.cmp(&self.task.priority) {
            Ordering::Equal => other.seq.cmp(&self.seq),
            ord => ord,
        }
    }
}

/// One category's pending tasks, ordered by priority then submission order.
#[derive(Default)]
pub struct CategoryQueue {
    heap: BinaryHeap<QueuedTask>,
}

impl CategoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a task with its global submission sequence number.
    pub fn push(&mut self, task: Task, seq: u64) {
        self.heap.push(QueuedTask { task, seq });
    }

    /// Remove and return the most urgent task.
    pub fn pop(&mut self) -> Option<Task> {
        self.heap.pop().map(|q| q.task)
    }

    /// Remove and return everything still queued, most urgent first.
    pub fn drain(&mut self) -> Vec<Task> {
        let mut out = Vec::with_capacity(self.heap.len());
        while let Some(q) = self.heap.pop() {
            out.push(q.task);
        }
        out
    }

    pub fn len(&self) -> usize {
        self.heap.len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

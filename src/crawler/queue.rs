//! Priority queue backing the scheduler
//!
//! Lower priority values are popped first. Among equal priorities the
//! insertion sequence breaks ties.

use crate::http::Request;
use parking_lot::Mutex;
use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

/// A queued request with its ordering key
#[derive(Debug)]
struct Entry {
    priority: i64,
    seq: u64,
    request: Request,
}

// BinaryHeap is a max-heap; reverse so the lowest (priority, seq) pops first
impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other
            .priority
            .cmp(&self.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.priority == other.priority && self.seq == other.seq
    }
}

impl Eq for Entry {}

/// Thread-safe priority queue with a timed, optionally filtered pop
#[derive(Debug, Default)]
pub struct PriorityQueue {
    heap: Mutex<BinaryHeap<Entry>>,
    seq: AtomicU64,
    notify: Notify,
}

impl PriorityQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a request; never blocks
    pub fn push(&self, request: Request) {
        let entry = Entry {
            priority: request.priority(),
            seq: self.seq.fetch_add(1, AtomicOrdering::Relaxed),
            request,
        };
        self.heap.lock().push(entry);
        self.notify.notify_one();
    }

    /// Pops the highest-priority request, waiting up to `timeout`
    pub async fn pop(&self, timeout: Duration) -> Option<Request> {
        self.pop_filtered(None, timeout).await
    }

    /// Pops the head unless its priority is below `threshold`
    ///
    /// A suppressed head goes back unchanged (same priority and sequence)
    /// and `None` is returned immediately. Only the head is inspected.
    ///
    /// # Arguments
    ///
    /// * `threshold` - Minimum priority allowed out, or `None` for no filter
    /// * `timeout` - Maximum time to wait on an empty queue
    pub async fn pop_filtered(&self, threshold: Option<i64>, timeout: Duration) -> Option<Request> {
        let deadline = Instant::now() + timeout;

        loop {
            {
                let mut heap = self.heap.lock();
                if let Some(entry) = heap.pop() {
                    if matches!(threshold, Some(t) if entry.priority < t) {
                        heap.push(entry);
                        return None;
                    }
                    return Some(entry.request);
                }
            }

            // A push between the check above and this wait leaves a stored permit
            if tokio::time::timeout_at(deadline, self.notify.notified())
                .await
                .is_err()
            {
                return None;
            }
        }
    }

    /// Priority of the current head, if any
    pub fn peek_priority(&self) -> Option<i64> {
        self.heap.lock().peek().map(|entry| entry.priority)
    }

    pub fn len(&self) -> usize {
        self.heap.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.heap.lock().is_empty()
    }
}

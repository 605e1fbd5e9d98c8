//! Scheduler and pause control
//!
//! The scheduler is the engine's only view of pending work. Pausing is
//! expressed as a priority threshold: while one is set, requests whose
//! priority value is below it stay queued.

use crate::crawler::queue::PriorityQueue;
use crate::http::Request;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Duration;

/// Shared pause threshold
///
/// Cloning yields a handle to the same threshold, so a controller outside
/// the engine can pause and resume a running crawl.
#[derive(Debug, Clone, Default)]
pub struct PauseControl {
    threshold: Arc<Mutex<Option<i64>>>,
}

impl PauseControl {
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts with the given threshold already set
    pub fn with_threshold(threshold: Option<i64>) -> Self {
        Self {
            threshold: Arc::new(Mutex::new(threshold)),
        }
    }

    /// Holds back every request with a priority value below `threshold`
    pub fn pause(&self, threshold: i64) {
        *self.threshold.lock() = Some(threshold);
        tracing::info!("Paused requests with priority below {}", threshold);
    }

    /// Lowers (or raises) the threshold to `threshold`
    pub fn resume(&self, threshold: i64) {
        *self.threshold.lock() = Some(threshold);
        tracing::info!("Resumed down to priority {}", threshold);
    }

    /// Clears the threshold entirely
    pub fn proceed(&self) {
        *self.threshold.lock() = None;
        tracing::info!("Pause lifted");
    }

    pub fn current_threshold(&self) -> Option<i64> {
        *self.threshold.lock()
    }

    pub fn is_paused(&self) -> bool {
        self.threshold.lock().is_some()
    }
}

/// Queue façade used by the engine and the output processor
#[derive(Debug)]
pub struct Scheduler {
    queue: PriorityQueue,
    pause: PauseControl,
    dequeue_timeout: Duration,
}

impl Scheduler {
    /// Creates a scheduler
    ///
    /// # Arguments
    ///
    /// * `pause` - Threshold consulted on every `next_request`
    /// * `dequeue_timeout` - How long `next_request` waits on an empty queue
    pub fn new(pause: PauseControl, dequeue_timeout: Duration) -> Self {
        Self {
            queue: PriorityQueue::new(),
            pause,
            dequeue_timeout,
        }
    }

    pub fn enqueue(&self, request: Request) {
        tracing::trace!("Queued {} (priority {})", request, request.priority());
        self.queue.push(request);
    }

    pub async fn dequeue(&self, timeout: Duration) -> Option<Request> {
        self.queue.pop(timeout).await
    }

    pub async fn dequeue_filtered(&self, threshold: i64, timeout: Duration) -> Option<Request> {
        self.queue.pop_filtered(Some(threshold), timeout).await
    }

    /// Next request honouring the live pause threshold
    pub async fn next_request(&self) -> Option<Request> {
        self.next_request_within(self.dequeue_timeout).await
    }

    /// Like `next_request` with an explicit wait
    pub async fn next_request_within(&self, timeout: Duration) -> Option<Request> {
        match self.pause.current_threshold() {
            Some(threshold) => self.dequeue_filtered(threshold, timeout).await,
            None => self.dequeue(timeout).await,
        }
    }

    pub fn dequeue_timeout(&self) -> Duration {
        self.dequeue_timeout
    }

    pub fn pause_control(&self) -> &PauseControl {
        &self.pause
    }

    pub fn idle(&self) -> bool {
        self.queue.is_empty()
    }

    pub fn len(&self) -> usize {
        self.queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
}

//! Admission control for fetch tasks
//!
//! A fixed number of tickets bounds how many fetch-and-handle tasks run at
//! once. Each admitted task holds a `ConcurrencySlot`; dropping the slot
//! returns the ticket and removes the task from the live set, whichever
//! way the task ends.

use futures::FutureExt;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::future::Future;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::task::JoinHandle;

/// Semaphore-backed gate with a live-task set
#[derive(Debug, Clone)]
pub struct ConcurrencyController {
    semaphore: Arc<Semaphore>,
    live: Arc<Mutex<HashSet<u64>>>,
    next_id: Arc<AtomicU64>,
    limit: usize,
}

/// Admission ticket held by one running task
#[derive(Debug)]
pub struct ConcurrencySlot {
    id: u64,
    live: Arc<Mutex<HashSet<u64>>>,
    _permit: OwnedSemaphorePermit,
}

impl ConcurrencySlot {
    pub fn id(&self) -> u64 {
        self.id
    }
}

impl Drop for ConcurrencySlot {
    fn drop(&mut self) {
        self.live.lock().remove(&self.id);
        // the permit field is dropped right after, returning the ticket
    }
}

impl ConcurrencyController {
    /// Creates a controller admitting at most `limit` tasks (minimum 1)
    pub fn new(limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(limit)),
            live: Arc::new(Mutex::new(HashSet::new())),
            next_id: Arc::new(AtomicU64::new(0)),
            limit,
        }
    }

    /// Waits for a free ticket
    ///
    /// Returns `None` only if the semaphore was closed.
    pub async fn acquire(&self) -> Option<ConcurrencySlot> {
        let permit = Arc::clone(&self.semaphore).acquire_owned().await.ok()?;
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.live.lock().insert(id);

        Some(ConcurrencySlot {
            id,
            live: Arc::clone(&self.live),
            _permit: permit,
        })
    }

    /// Runs `task` on the runtime while holding `slot`
    ///
    /// A panic inside the task is caught and logged; the slot is released
    /// either way.
    pub fn spawn<F>(&self, slot: ConcurrencySlot, task: F) -> JoinHandle<()>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        tokio::spawn(async move {
            if let Err(panic) = AssertUnwindSafe(task).catch_unwind().await {
                tracing::error!(
                    "Task {} panicked: {}",
                    slot.id(),
                    panic_message(panic.as_ref())
                );
            }
            drop(slot);
        })
    }

    /// True when no admitted task is still running
    pub fn all_done(&self) -> bool {
        self.live.lock().is_empty()
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    pub fn limit(&self) -> usize {
        self.limit
    }
}

/// Extracts a readable message from a panic payload
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// In-flight counter guard
///
/// Increments on creation and decrements on drop; used by components whose
/// `idle()` means "nothing in flight".
#[derive(Debug)]
pub(crate) struct ActiveGuard {
    counter: Arc<AtomicUsize>,
}

impl ActiveGuard {
    pub(crate) fn new(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self {
            counter: Arc::clone(counter),
        }
    }
}

impl Drop for ActiveGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

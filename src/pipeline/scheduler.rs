//! Three-lane pipeline scheduler
//!
//! - **main**: fresh records, flushed when `batch-size` accumulate or the
//!   flush interval elapses
//! - **retry**: records from failed batches, re-delivered in small batches
//!   on their own interval
//! - **error**: records that reached `max-retry-count`, handed to
//!   `Sink::process_error`
//!
//! All lanes sit behind one async mutex that stays locked across sink I/O,
//! so flushes never overlap.

use crate::config::PipelineConfig;
use crate::pipeline::{BatchResult, Sink, SinkResult};
use crate::record::Record;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

struct Lanes {
    main: VecDeque<Record>,
    retry: VecDeque<Record>,
    error: VecDeque<Record>,
    last_flush: Instant,
    last_retry_flush: Instant,
}

/// Batches records in front of the configured sinks
pub struct PipelineScheduler {
    sinks: Vec<Arc<dyn Sink>>,
    config: PipelineConfig,
    lanes: Mutex<Lanes>,
    main_len: AtomicUsize,
    totals: parking_lot::Mutex<BatchResult>,
}

impl PipelineScheduler {
    pub fn new(sinks: Vec<Arc<dyn Sink>>, config: PipelineConfig) -> Self {
        let now = Instant::now();
        Self {
            sinks,
            config,
            lanes: Mutex::new(Lanes {
                main: VecDeque::new(),
                retry: VecDeque::new(),
                error: VecDeque::new(),
                last_flush: now,
                last_retry_flush: now,
            }),
            main_len: AtomicUsize::new(0),
            totals: parking_lot::Mutex::new(BatchResult::default()),
        }
    }

    /// Opens every sink in order
    pub async fn open(&self) -> SinkResult<()> {
        for sink in &self.sinks {
            tracing::info!("Opening sink: {}", sink.name());
            sink.open().await?;
        }
        Ok(())
    }

    /// Buffers a record and runs whatever flushes are due
    ///
    /// # Returns
    ///
    /// The delivery result of any flushes triggered by this call
    pub async fn process(&self, record: Record) -> BatchResult {
        let mut lanes = self.lanes.lock().await;
        let mut result = BatchResult::default();

        // Make room rather than grow past the cache limit
        if lanes.main.len() >= self.config.max_cache_count {
            result += self.flush_main(&mut lanes).await;
        }

        lanes.main.push_back(record);
        self.main_len.store(lanes.main.len(), Ordering::SeqCst);

        if lanes.main.len() >= self.config.batch_size || self.flush_due(&lanes) {
            result += self.flush_main(&mut lanes).await;
        }
        result += self.run_due_retries(&mut lanes).await;

        self.accumulate(result);
        result
    }

    /// Runs time-based flushes without adding a record
    ///
    /// Called from the engine loop so buffered records drain even when no
    /// new ones arrive. Returns an empty result straight away when a flush is
    /// already in progress, leaving the due work to that flush or the next
    /// tick.
    pub async fn tick(&self) -> BatchResult {
        let Ok(mut lanes) = self.lanes.try_lock() else {
            return BatchResult::default();
        };
        let mut result = BatchResult::default();

        if !lanes.main.is_empty() && self.flush_due(&lanes) {
            result += self.flush_main(&mut lanes).await;
        }
        result += self.run_due_retries(&mut lanes).await;

        self.accumulate(result);
        result
    }

    /// Drains every lane and closes the sinks
    ///
    /// # Shutdown order
    ///
    /// 1. Flush main, each batch followed by one retry flush
    /// 2. Flush retry until empty
    /// 3. Deliver the error lane
    /// 4. Close sinks
    ///
    /// # Returns
    ///
    /// The cumulative result of every flush this scheduler ran
    pub async fn close(&self) -> SinkResult<BatchResult> {
        tracing::debug!("Pipeline scheduler closing");
        let mut lanes = self.lanes.lock().await;
        let mut result = BatchResult::default();

        while !lanes.main.is_empty() {
            result += self.flush_main(&mut lanes).await;
            if let Some(retried) = self.flush_retry(&mut lanes).await {
                result += retried;
            }
        }

        // every failed attempt moves a record closer to the error lane
        while let Some(retried) = self.flush_retry(&mut lanes).await {
            result += retried;
        }

        tracing::info!("Error records to process: {}", lanes.error.len());
        while !lanes.error.is_empty() {
            self.flush_error(&mut lanes).await;
        }
        self.accumulate(result);

        for sink in &self.sinks {
            sink.close().await?;
        }
        tracing::debug!("Pipeline scheduler closed");

        Ok(self.totals())
    }

    /// True when the main lane is empty
    pub fn idle(&self) -> bool {
        self.main_len.load(Ordering::SeqCst) == 0
    }

    pub fn len(&self) -> usize {
        self.main_len.load(Ordering::SeqCst)
    }

    pub fn is_empty(&self) -> bool {
        self.idle()
    }

    /// Cumulative result of every flush so far
    pub fn totals(&self) -> BatchResult {
        *self.totals.lock()
    }

    pub async fn retry_len(&self) -> usize {
        self.lanes.lock().await.retry.len()
    }

    pub async fn error_len(&self) -> usize {
        self.lanes.lock().await.error.len()
    }

    fn accumulate(&self, result: BatchResult) {
        if !result.is_empty() {
            *self.totals.lock() += result;
        }
    }

    fn flush_due(&self, lanes: &Lanes) -> bool {
        lanes.last_flush.elapsed() >= Duration::from_secs(self.config.flush_interval_secs)
    }

    async fn run_due_retries(&self, lanes: &mut Lanes) -> BatchResult {
        let mut result = BatchResult::default();

        if !lanes.retry.is_empty() {
            let interval = Duration::from_secs(self.config.retry_interval_secs);
            if lanes.last_retry_flush.elapsed() >= interval
                || lanes.retry.len() >= self.config.retry_max_cache_count
            {
                if let Some(retried) = self.flush_retry(lanes).await {
                    result += retried;
                }
            }
        }

        if lanes.error.len() >= self.config.error_batch_size {
            self.flush_error(lanes).await;
        }

        result
    }

    /// Sends one main-lane batch to every sink
    async fn flush_main(&self, lanes: &mut Lanes) -> BatchResult {
        lanes.last_flush = Instant::now();

        let count = self.config.batch_size.max(1).min(lanes.main.len());
        let batch: Vec<Record> = lanes.main.drain(..count).collect();
        self.main_len.store(lanes.main.len(), Ordering::SeqCst);

        if batch.is_empty() {
            return BatchResult::default();
        }

        if self.deliver(&batch).await {
            tracing::debug!("Delivered batch of {} records", batch.len());
            BatchResult::success(batch.len())
        } else {
            let result = BatchResult::failure(batch.len());
            self.enqueue_retry(lanes, batch);
            result
        }
    }

    /// Re-delivers one retry batch
    ///
    /// Returns `None` when the retry lane is empty.
    async fn flush_retry(&self, lanes: &mut Lanes) -> Option<BatchResult> {
        lanes.last_retry_flush = Instant::now();

        let count = self.config.retry_batch_size.max(1).min(lanes.retry.len());
        if count == 0 {
            return None;
        }

        let mut batch: Vec<Record> = lanes.retry.drain(..count).collect();
        for record in &mut batch {
            record.retry();
        }

        if self.deliver(&batch).await {
            Some(BatchResult::success(batch.len()))
        } else {
            let result = BatchResult::failure(batch.len());
            self.enqueue_retry(lanes, batch);
            Some(result)
        }
    }

    async fn flush_error(&self, lanes: &mut Lanes) {
        let count = self.config.error_batch_size.max(1).min(lanes.error.len());
        let batch: Vec<Record> = lanes.error.drain(..count).collect();
        if batch.is_empty() {
            return;
        }

        for sink in &self.sinks {
            sink.process_error(&batch).await;
        }
    }

    /// Offers a batch to every sink; false if any of them refused it
    async fn deliver(&self, batch: &[Record]) -> bool {
        let mut delivered = true;
        for sink in &self.sinks {
            if !sink.process(batch).await {
                tracing::warn!("Sink {} failed a batch of {} records", sink.name(), batch.len());
                delivered = false;
            }
        }
        delivered
    }

    fn enqueue_retry(&self, lanes: &mut Lanes, batch: Vec<Record>) {
        for record in batch {
            if record.retry_count() >= self.config.max_retry_count {
                tracing::warn!(
                    "Retries exhausted ({}/{}) for record: {}",
                    record.retry_count(),
                    self.config.max_retry_count,
                    record
                );
                lanes.error.push_back(record);
            } else {
                lanes.retry.push_back(record);
            }
        }
    }
}

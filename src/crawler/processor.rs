//! Routes callback output to the scheduler and the pipeline

use crate::crawler::concurrency::ActiveGuard;
use crate::crawler::scheduler::Scheduler;
use crate::crawler::spider::{Output, OutputStream, SpiderError};
use crate::crawler::stats::StatsCollector;
use crate::distributed::DistributedCoordinator;
use crate::http::Request;
use crate::pipeline::{BatchResult, PipelineScheduler};
use futures::StreamExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// What one output stream produced
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProcessSummary {
    pub requests: usize,
    pub records: usize,
    /// Flushes triggered while routing the records
    pub pipeline: BatchResult,
}

/// Consumes output streams one element at a time
pub struct OutputProcessor {
    scheduler: Arc<Scheduler>,
    pipeline: Arc<PipelineScheduler>,
    coordinator: Option<Arc<DistributedCoordinator>>,
    stats: Arc<StatsCollector>,
    active: Arc<AtomicUsize>,
}

impl OutputProcessor {
    pub fn new(
        scheduler: Arc<Scheduler>,
        pipeline: Arc<PipelineScheduler>,
        coordinator: Option<Arc<DistributedCoordinator>>,
        stats: Arc<StatsCollector>,
    ) -> Self {
        Self {
            scheduler,
            pipeline,
            coordinator,
            stats,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Queues a request, mirroring it first in distributed mode
    pub async fn enqueue_request(&self, request: Request) {
        if let Some(coordinator) = &self.coordinator {
            coordinator.mirror_queued(&request).await;
        }
        self.scheduler.enqueue(request);
    }

    /// Drains `stream`, routing requests and records
    ///
    /// Stops at the first error; everything routed before it stays routed.
    pub async fn process(&self, mut stream: OutputStream) -> Result<ProcessSummary, SpiderError> {
        let _guard = ActiveGuard::new(&self.active);
        let mut summary = ProcessSummary::default();

        while let Some(output) = stream.next().await {
            match output? {
                Output::Request(request) => {
                    self.enqueue_request(request).await;
                    self.stats.record_request_emitted();
                    summary.requests += 1;
                }
                Output::Record(record) => {
                    summary.pipeline += self.pipeline.process(record).await;
                    self.stats.record_record_emitted();
                    summary.records += 1;
                }
            }
        }

        Ok(summary)
    }

    /// True when no stream is being consumed
    pub fn idle(&self) -> bool {
        self.active.load(Ordering::SeqCst) == 0
    }
}

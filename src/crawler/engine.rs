//! Crawl engine - main orchestration loop
//!
//! The engine pulls requests from the spider's generators, queues them,
//! admits them through the concurrency controller and spawns one
//! fetch-and-handle task per request. The loop itself never awaits a fetch.
//!
//! # Phases
//!
//! ```text
//! GeneratingStartRequests -> DrainingQueue
//!     -> (GeneratingTaskRequests -> DrainingQueue)*
//!     -> IdleCheck -> Terminating -> Finished
//! ```
//!
//! A drain ends once its generator is closed and every component reports
//! idle: empty queue, no fetch in flight, no running task, no stream being
//! consumed, empty pipeline main lane, idle spider.

use crate::config::{validate, Config};
use crate::crawler::concurrency::{panic_message, ConcurrencyController};
use crate::crawler::fetcher::{FetchOutcome, Fetcher};
use crate::crawler::processor::{OutputProcessor, ProcessSummary};
use crate::crawler::registry::PluginRegistry;
use crate::crawler::scheduler::{PauseControl, Scheduler};
use crate::crawler::spider::{RequestStream, Spider, SpiderError};
use crate::crawler::stats::{CrawlStats, StatsCollector};
use crate::distributed::{Claim, DistributedCoordinator, LockStore, RedisLockStore};
use crate::http::Request;
use crate::pipeline::{BatchResult, LogSink, PipelineScheduler, Sink};
use crate::ConfigError;
use futures::{FutureExt, StreamExt};
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

/// Where the crawl loop currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum CrawlPhase {
    NotStarted,
    GeneratingStartRequests,
    GeneratingTaskRequests,
    DrainingQueue,
    IdleCheck,
    Terminating,
    Finished,
}

/// Final result of `Engine::run`
#[derive(Debug, Clone, Serialize)]
pub struct CrawlReport {
    pub stats: CrawlStats,
    /// Cumulative pipeline delivery result
    pub pipeline: BatchResult,
}

/// Exponential sleep for loop iterations that made no progress
#[derive(Debug)]
struct Backoff {
    min: Duration,
    max: Duration,
    current: Duration,
}

impl Backoff {
    fn new(min: Duration, max: Duration) -> Self {
        Self {
            min,
            max,
            current: min,
        }
    }

    fn reset(&mut self) {
        self.current = self.min;
    }

    async fn wait(&mut self) {
        tokio::time::sleep(self.current).await;
        self.current = (self.current * 2).min(self.max);
    }
}

/// Everything a spawned fetch task needs
struct CrawlTask {
    spider: Arc<dyn Spider>,
    fetcher: Arc<dyn Fetcher>,
    processor: Arc<OutputProcessor>,
    coordinator: Option<Arc<DistributedCoordinator>>,
    stats: Arc<StatsCollector>,
}

/// A callback that ran to completion, successfully or not
struct Handled {
    callback: String,
    /// Set when an error callback handled a fetch failure
    recovery: bool,
    result: Result<ProcessSummary, SpiderError>,
}

impl CrawlTask {
    /// Fetches one request and consumes the callback output
    ///
    /// Callback errors and panics are logged and counted here; nothing
    /// escapes to the engine loop.
    async fn run(self, request: Request) {
        let label = request.to_string();
        let claimed = self.coordinator.as_ref().map(|_| request.clone());

        let outcome = self.fetcher.fetch(request).await;
        self.stats.record_download(&outcome);

        match AssertUnwindSafe(self.handle(outcome)).catch_unwind().await {
            Ok(None) => {}
            Ok(Some(handled)) => {
                // error callbacks never count as a successful parse
                self.stats
                    .record_parse(handled.result.is_ok() && !handled.recovery);
                match handled.result {
                    Ok(summary) => tracing::trace!(
                        "{}: {} requests, {} records",
                        label,
                        summary.requests,
                        summary.records
                    ),
                    Err(e) => tracing::error!(
                        "Callback '{}' failed for {}: {}",
                        handled.callback,
                        label,
                        e
                    ),
                }
            }
            Err(panic) => {
                self.stats.record_parse(false);
                let error = SpiderError::Panicked(panic_message(panic.as_ref()));
                tracing::error!("Callback for {} aborted: {}", label, error);
            }
        }

        if let (Some(coordinator), Some(request)) = (&self.coordinator, claimed) {
            coordinator.release(&request).await;
        }
    }

    /// Picks the callback for an outcome and drains its output
    ///
    /// Returns `None` for a failure without an error callback.
    async fn handle(&self, outcome: FetchOutcome) -> Option<Handled> {
        let (callback, recovery, stream) = match outcome {
            FetchOutcome::Success(response) => {
                let callback = response.request().callback().cloned();
                match callback {
                    Some(callback) => (callback.name().to_string(), false, callback.call(response)),
                    None => ("parse".to_string(), false, self.spider.parse(response)),
                }
            }
            FetchOutcome::Failure(failure) => {
                let callback = failure.request.error_callback().cloned();
                match callback {
                    Some(callback) => (callback.name().to_string(), true, callback.call(failure)),
                    None => {
                        tracing::warn!("Giving up on {}: {}", failure.request, failure.reason);
                        return None;
                    }
                }
            }
        };

        let result = self.processor.process(stream).await;
        Some(Handled {
            callback,
            recovery,
            result,
        })
    }
}

/// The crawl engine
///
/// Build one with `EngineBuilder`, then call `run`. The engine is meant to
/// run once.
pub struct Engine {
    config: Config,
    spider: Arc<dyn Spider>,
    fetcher: Arc<dyn Fetcher>,
    scheduler: Arc<Scheduler>,
    controller: ConcurrencyController,
    processor: Arc<OutputProcessor>,
    pipeline: Arc<PipelineScheduler>,
    coordinator: Option<Arc<DistributedCoordinator>>,
    stats: Arc<StatsCollector>,
    pause: PauseControl,
    phase: Mutex<CrawlPhase>,
}

impl Engine {
    /// Runs the crawl to completion
    ///
    /// # Returns
    ///
    /// * `Ok(CrawlReport)` - Crawl finished and every component closed
    /// * `Err(EngineError)` - A fetcher, sink or spider failed to open or close
    pub async fn run(&self) -> crate::Result<CrawlReport> {
        tracing::info!(
            "Starting spider '{}' (concurrency {}, distributed {})",
            self.spider.name(),
            self.controller.limit(),
            self.coordinator.is_some()
        );

        self.open().await?;
        self.crawl().await;
        self.close().await?;

        self.stats.log_summary();
        Ok(CrawlReport {
            stats: self.stats.snapshot(),
            pipeline: self.pipeline.totals(),
        })
    }

    /// Handle for pausing and resuming this engine
    pub fn pause_control(&self) -> PauseControl {
        self.pause.clone()
    }

    pub fn phase(&self) -> CrawlPhase {
        *self.phase.lock()
    }

    pub fn stats(&self) -> CrawlStats {
        self.stats.snapshot()
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Requests waiting in the queue
    pub fn pending(&self) -> usize {
        self.scheduler.len()
    }

    /// True when no component has outstanding work
    pub fn idle(&self) -> bool {
        self.scheduler.idle()
            && self.fetcher.idle()
            && self.controller.all_done()
            && self.processor.idle()
            && self.pipeline.idle()
            && self.spider.idle()
    }

    fn set_phase(&self, phase: CrawlPhase) {
        let mut current = self.phase.lock();
        if *current != phase {
            tracing::debug!("Phase {:?} -> {:?}", *current, phase);
            *current = phase;
        }
    }

    async fn open(&self) -> crate::Result<()> {
        self.stats.start();
        self.fetcher.open().await?;
        self.pipeline.open().await?;
        self.spider.open().await?;
        Ok(())
    }

    async fn crawl(&self) {
        self.set_phase(CrawlPhase::GeneratingStartRequests);
        self.drain(self.spider.start_requests()).await;

        loop {
            self.set_phase(CrawlPhase::GeneratingTaskRequests);
            match self.spider.task_requests().await {
                Some(requests) => self.drain(requests).await,
                None => break,
            }
        }

        self.set_phase(CrawlPhase::IdleCheck);
        tracing::info!("All generators closed and engine idle");
    }

    /// Runs the loop for one generator until it is closed and all is idle
    async fn drain(&self, mut generator: RequestStream) {
        let generator_timeout = Duration::from_millis(self.config.engine.generator_timeout_ms);
        let mut backoff = Backoff::new(
            Duration::from_millis(self.config.engine.idle_backoff_min_ms),
            Duration::from_millis(self.config.engine.idle_backoff_max_ms),
        );
        let mut generator_open = true;

        loop {
            // While the generator can still feed us, don't block on an empty queue
            let wait = if generator_open {
                Duration::ZERO
            } else {
                self.scheduler.dequeue_timeout()
            };

            if self.dispatch_next(wait).await {
                backoff.reset();
                continue;
            }

            if generator_open {
                match tokio::time::timeout(generator_timeout, generator.next()).await {
                    Ok(Some(Ok(request))) => {
                        self.processor.enqueue_request(request).await;
                        backoff.reset();
                        continue;
                    }
                    Ok(Some(Err(e))) => {
                        tracing::error!("Request generator failed: {}", e);
                        generator_open = false;
                        self.set_phase(CrawlPhase::DrainingQueue);
                    }
                    Ok(None) => {
                        tracing::debug!("Request generator exhausted");
                        generator_open = false;
                        self.set_phase(CrawlPhase::DrainingQueue);
                    }
                    Err(_) => {
                        tracing::debug!("Request generator stalled for {:?}", generator_timeout);
                    }
                }
            }

            if !generator_open && self.idle() {
                break;
            }

            self.pipeline.tick().await;

            // Work is queued but held back (paused or lock store down)
            if self.scheduler.is_empty() {
                backoff.reset();
            } else {
                backoff.wait().await;
            }
        }
    }

    /// Dequeues one request and spawns its task
    ///
    /// Returns true if a request was consumed, including one dropped because
    /// another engine claimed it.
    async fn dispatch_next(&self, wait: Duration) -> bool {
        let Some(request) = self.scheduler.next_request_within(wait).await else {
            return false;
        };

        if let Some(coordinator) = &self.coordinator {
            match coordinator.claim(&request).await {
                Ok(Claim::Acquired) => {}
                Ok(Claim::Contended) => {
                    self.stats.record_contention();
                    return true;
                }
                Err(e) => {
                    tracing::warn!("Lock store unavailable, requeueing {}: {}", request, e);
                    self.scheduler.enqueue(request);
                    return false;
                }
            }
        }

        let Some(slot) = self.controller.acquire().await else {
            self.scheduler.enqueue(request);
            return false;
        };

        tracing::debug!("Dispatching {} (slot {})", request, slot.id());
        let task = CrawlTask {
            spider: Arc::clone(&self.spider),
            fetcher: Arc::clone(&self.fetcher),
            processor: Arc::clone(&self.processor),
            coordinator: self.coordinator.clone(),
            stats: Arc::clone(&self.stats),
        };
        self.controller.spawn(slot, task.run(request));
        true
    }

    /// Closes the fetcher, then the pipeline, then the spider
    async fn close(&self) -> crate::Result<()> {
        self.set_phase(CrawlPhase::Terminating);

        self.fetcher.close().await;
        let totals = self.pipeline.close().await?;
        self.stats.record_pipeline(totals);
        self.spider.close().await?;

        self.stats.finish();
        self.set_phase(CrawlPhase::Finished);
        tracing::info!("Spider '{}' finished", self.spider.name());
        Ok(())
    }
}

/// Wires an `Engine` together
pub struct EngineBuilder {
    spider: Arc<dyn Spider>,
    config: Config,
    fetcher: Option<Arc<dyn Fetcher>>,
    sinks: Vec<Arc<dyn Sink>>,
    lock_store: Option<Arc<dyn LockStore>>,
    pause: Option<PauseControl>,
}

impl EngineBuilder {
    pub fn new<S: Spider>(spider: S) -> Self {
        Self::from_arc(Arc::new(spider))
    }

    pub fn from_arc(spider: Arc<dyn Spider>) -> Self {
        Self {
            spider,
            config: Config::default(),
            fetcher: None,
            sinks: Vec::new(),
            lock_store: None,
            pause: None,
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn fetcher<F: Fetcher>(self, fetcher: F) -> Self {
        self.shared_fetcher(Arc::new(fetcher))
    }

    pub fn shared_fetcher(mut self, fetcher: Arc<dyn Fetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    /// Adds a sink; sinks receive batches in the order they were added
    pub fn sink<S: Sink>(self, sink: S) -> Self {
        self.shared_sink(Arc::new(sink))
    }

    pub fn shared_sink(mut self, sink: Arc<dyn Sink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Lock store used when `distributed.enabled` is set
    pub fn lock_store(mut self, store: Arc<dyn LockStore>) -> Self {
        self.lock_store = Some(store);
        self
    }

    /// Shares a pause handle instead of creating one from the config
    pub fn pause_control(mut self, pause: PauseControl) -> Self {
        self.pause = Some(pause);
        self
    }

    /// Fills in whatever was not set explicitly from the plugin registry
    ///
    /// Connects to Redis when distributed mode is enabled and no lock store
    /// was given.
    pub async fn from_registry(mut self, registry: &PluginRegistry) -> crate::Result<Self> {
        if self.fetcher.is_none() {
            self.fetcher = Some(registry.build_fetcher(&self.config)?);
        }

        if self.sinks.is_empty() {
            self.sinks = registry.build_sinks(&self.config)?;
        }

        if self.config.distributed.enabled && self.lock_store.is_none() {
            let url = self.config.distributed.redis_url.as_deref().ok_or_else(|| {
                ConfigError::Validation("distributed mode requires redis-url".to_string())
            })?;
            self.lock_store = Some(Arc::new(RedisLockStore::connect(url).await?));
        }

        Ok(self)
    }

    pub fn build(self) -> crate::Result<Engine> {
        validate(&self.config)?;

        let fetcher = self.fetcher.ok_or_else(|| {
            ConfigError::Validation("no fetcher set; use fetcher() or from_registry()".to_string())
        })?;

        let sinks = if self.sinks.is_empty() {
            vec![Arc::new(LogSink::new()) as Arc<dyn Sink>]
        } else {
            self.sinks
        };

        let coordinator = if self.config.distributed.enabled {
            let store = self.lock_store.ok_or_else(|| {
                ConfigError::Validation("distributed mode requires a lock store".to_string())
            })?;
            Some(Arc::new(DistributedCoordinator::new(
                store,
                &self.config.distributed,
                self.spider.name(),
            )))
        } else {
            None
        };

        let pause = self
            .pause
            .unwrap_or_else(|| PauseControl::with_threshold(self.config.engine.pause_threshold));

        let scheduler = Arc::new(Scheduler::new(
            pause.clone(),
            Duration::from_millis(self.config.engine.dequeue_timeout_ms),
        ));
        let pipeline = Arc::new(PipelineScheduler::new(sinks, self.config.pipeline.clone()));
        let stats = Arc::new(StatsCollector::new());
        let processor = Arc::new(OutputProcessor::new(
            Arc::clone(&scheduler),
            Arc::clone(&pipeline),
            coordinator.clone(),
            Arc::clone(&stats),
        ));

        Ok(Engine {
            controller: ConcurrencyController::new(self.config.engine.concurrency),
            config: self.config,
            spider: self.spider,
            fetcher,
            scheduler,
            processor,
            pipeline,
            coordinator,
            stats,
            pause,
            phase: Mutex::new(CrawlPhase::NotStarted),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crawler::spider::{output, OutputStream};
    use crate::http::Response;
    use crate::EngineError;

    struct EmptySpider;

    #[async_trait::async_trait]
    impl Spider for EmptySpider {
        fn name(&self) -> &str {
            "empty"
        }

        fn start_requests(&self) -> RequestStream {
            output::requests(Vec::new())
        }

        fn parse(&self, _response: Response) -> OutputStream {
            output::empty()
        }
    }

    #[test]
    fn test_build_requires_fetcher() {
        let result = EngineBuilder::new(EmptySpider).build();
        assert!(matches!(
            result,
            Err(EngineError::Config(ConfigError::Validation(_)))
        ));
    }

    #[test]
    fn test_build_rejects_invalid_config() {
        let mut config = Config::default();
        config.engine.concurrency = 0;
        let result = EngineBuilder::new(EmptySpider).config(config).build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_distributed_requires_lock_store() {
        let mut config = Config::default();
        config.distributed.enabled = true;
        config.distributed.redis_url = Some("redis://127.0.0.1:6379/0".to_string());

        let registry = PluginRegistry::with_defaults();
        let fetcher = registry.build_fetcher(&config).unwrap();
        let result = EngineBuilder::new(EmptySpider)
            .config(config)
            .shared_fetcher(fetcher)
            .build();
        assert!(matches!(result, Err(EngineError::Config(_))));
    }

    #[tokio::test]
    async fn test_empty_crawl_finishes() {
        let registry = PluginRegistry::with_defaults();
        let engine = EngineBuilder::new(EmptySpider)
            .from_registry(&registry)
            .await
            .unwrap()
            .build()
            .unwrap();

        assert_eq!(engine.phase(), CrawlPhase::NotStarted);
        let report = engine.run().await.unwrap();

        assert_eq!(engine.phase(), CrawlPhase::Finished);
        assert_eq!(report.stats.download_success, 0);
        assert!(report.pipeline.is_empty());
        assert!(engine.idle());
    }

    #[test]
    fn test_config_pause_threshold_is_applied() {
        let mut config = Config::default();
        config.engine.pause_threshold = Some(7);
        let registry = PluginRegistry::with_defaults();
        let fetcher = registry.build_fetcher(&config).unwrap();

        let engine = EngineBuilder::new(EmptySpider)
            .config(config)
            .shared_fetcher(fetcher)
            .build()
            .unwrap();
        assert_eq!(engine.pause_control().current_threshold(), Some(7));
    }

    #[tokio::test]
    async fn test_backoff_doubles_up_to_max() {
        let mut backoff = Backoff::new(Duration::from_millis(1), Duration::from_millis(4));
        backoff.wait().await;
        assert_eq!(backoff.current, Duration::from_millis(2));
        backoff.wait().await;
        backoff.wait().await;
        assert_eq!(backoff.current, Duration::from_millis(4));
        backoff.reset();
        assert_eq!(backoff.current, Duration::from_millis(1));
    }
}

//! Crawl orchestration
//!
//! This module contains the moving parts of a crawl:
//! - The engine loop and its builder
//! - Priority scheduling with pause thresholds
//! - Bounded concurrent fetch tasks
//! - Fetchers (HTTP transport with retries) and the spider contract
//! - Routing of callback output to the queue and the pipeline

mod concurrency;
mod engine;
mod fetcher;
mod pages;
mod processor;
mod queue;
mod registry;
mod scheduler;
mod spider;
mod stats;
mod transport;

pub use concurrency::{ConcurrencyController, ConcurrencySlot};
pub use engine::{CrawlPhase, CrawlReport, Engine, EngineBuilder};
pub use fetcher::{
    FailureReason, FetchFailure, FetchOutcome, Fetcher, RetryPolicy, RetryingFetcher, Transport,
};
pub use pages::{parse_html, PageSpider, ParsedPage};
pub use processor::{OutputProcessor, ProcessSummary};
pub use queue::PriorityQueue;
pub use registry::PluginRegistry;
pub use scheduler::{PauseControl, Scheduler};
pub use spider::{
    output, Callback, ErrorCallback, Output, OutputStream, RequestStream, Spider, SpiderError,
};
pub use stats::{CrawlStats, StatsCollector};
pub use transport::{build_http_client, HttpTransport, TransportError};

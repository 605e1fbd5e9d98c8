//! Crawl statistics
//!
//! Counters are updated from concurrently running fetch tasks, so every
//! field is an atomic or sits behind its own lock.

use crate::crawler::fetcher::FetchOutcome;
use crate::pipeline::BatchResult;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};

/// Point-in-time copy of the counters
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CrawlStats {
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub duration_seconds: Option<f64>,

    pub download_success: u64,
    pub download_fail: u64,
    /// Responses by HTTP status code
    pub status_codes: BTreeMap<u16, u64>,

    /// Callbacks on a fetched response that consumed their output cleanly
    pub parse_success: u64,
    /// Callbacks that errored or panicked, plus every error-callback run
    ///
    /// An error callback only runs for a failed fetch, so it is counted here
    /// even when it finishes cleanly.
    pub parse_fail: u64,

    pub requests_emitted: u64,
    pub records_emitted: u64,

    /// Requests dropped because another engine held their lock
    pub lock_contended: u64,

    pub pipeline_success: u64,
    pub pipeline_fail: u64,
}

/// Thread-safe counters for one crawl
#[derive(Debug, Default)]
pub struct StatsCollector {
    started_at: Mutex<Option<DateTime<Utc>>>,
    finished_at: Mutex<Option<DateTime<Utc>>>,
    download_success: AtomicU64,
    download_fail: AtomicU64,
    status_codes: Mutex<BTreeMap<u16, u64>>,
    parse_success: AtomicU64,
    parse_fail: AtomicU64,
    requests_emitted: AtomicU64,
    records_emitted: AtomicU64,
    lock_contended: AtomicU64,
    pipeline: Mutex<BatchResult>,
}

impl StatsCollector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn start(&self) {
        *self.started_at.lock() = Some(Utc::now());
    }

    pub fn finish(&self) {
        *self.finished_at.lock() = Some(Utc::now());
    }

    pub fn record_download(&self, outcome: &FetchOutcome) {
        match outcome {
            FetchOutcome::Success(response) => {
                self.download_success.fetch_add(1, Ordering::Relaxed);
                *self
                    .status_codes
                    .lock()
                    .entry(response.status())
                    .or_insert(0) += 1;
            }
            FetchOutcome::Failure(_) => {
                self.download_fail.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    pub fn record_parse(&self, ok: bool) {
        let counter = if ok {
            &self.parse_success
        } else {
            &self.parse_fail
        };
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_request_emitted(&self) {
        self.requests_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_record_emitted(&self) {
        self.records_emitted.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_contention(&self) {
        self.lock_contended.fetch_add(1, Ordering::Relaxed);
    }

    /// Stores the pipeline's cumulative result
    pub fn record_pipeline(&self, totals: BatchResult) {
        *self.pipeline.lock() = totals;
    }

    pub fn snapshot(&self) -> CrawlStats {
        let started_at = *self.started_at.lock();
        let finished_at = *self.finished_at.lock();
        let duration_seconds = match (started_at, finished_at) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        };
        let pipeline = *self.pipeline.lock();

        CrawlStats {
            started_at,
            finished_at,
            duration_seconds,
            download_success: self.download_success.load(Ordering::Relaxed),
            download_fail: self.download_fail.load(Ordering::Relaxed),
            status_codes: self.status_codes.lock().clone(),
            parse_success: self.parse_success.load(Ordering::Relaxed),
            parse_fail: self.parse_fail.load(Ordering::Relaxed),
            requests_emitted: self.requests_emitted.load(Ordering::Relaxed),
            records_emitted: self.records_emitted.load(Ordering::Relaxed),
            lock_contended: self.lock_contended.load(Ordering::Relaxed),
            pipeline_success: pipeline.success_count,
            pipeline_fail: pipeline.fail_count,
        }
    }

    /// Logs a summary of the crawl at info level
    pub fn log_summary(&self) {
        let stats = self.snapshot();

        tracing::info!("=== Crawl Statistics ===");
        if let Some(duration) = stats.duration_seconds {
            tracing::info!("Duration: {:.1}s", duration);
        }
        tracing::info!(
            "Downloads: {} succeeded, {} failed",
            stats.download_success,
            stats.download_fail
        );
        for (status, count) in &stats.status_codes {
            tracing::info!("  HTTP {}: {}", status, count);
        }
        tracing::info!(
            "Callbacks: {} succeeded, {} failed",
            stats.parse_success,
            stats.parse_fail
        );
        tracing::info!(
            "Emitted: {} requests, {} records",
            stats.requests_emitted,
            stats.records_emitted
        );
        if stats.lock_contended > 0 {
            tracing::info!("Skipped (claimed elsewhere): {}", stats.lock_contended);
        }
        tracing::info!(
            "Pipeline: {} delivered, {} failed attempts",
            stats.pipeline_success,
            stats.pipeline_fail
        );
    }
}

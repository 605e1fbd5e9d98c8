//! Sink trait and batch accounting

use crate::record::Record;
use async_trait::async_trait;
use serde::Serialize;
use std::iter::Sum;
use std::ops::{Add, AddAssign};
use thiserror::Error;

/// Errors raised by sinks while opening or closing
///
/// Delivery failures are reported through `Sink::process` returning false,
/// not through this type.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("sink '{0}' is not open")]
    NotOpen(String),

    #[error("sink '{name}' is misconfigured: {message}")]
    Config { name: String, message: String },
}

/// Result type for sink operations
pub type SinkResult<T> = Result<T, SinkError>;

/// Destination for records
#[async_trait]
pub trait Sink: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn open(&self) -> SinkResult<()> {
        Ok(())
    }

    /// Delivers a batch; returns false if the batch should be retried
    async fn process(&self, records: &[Record]) -> bool;

    /// Receives records that exhausted their retries
    async fn process_error(&self, records: &[Record]) {
        for record in records {
            tracing::warn!("{}: dropping record after retries: {}", self.name(), record);
        }
    }

    async fn close(&self) -> SinkResult<()> {
        Ok(())
    }
}

/// Records delivered and failed across one or more delivery attempts
///
/// Counts are per attempt: a record that fails twice and then succeeds adds
/// two failures and one success.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct BatchResult {
    pub success_count: u64,
    pub fail_count: u64,
}

impl BatchResult {
    pub fn success(count: usize) -> Self {
        Self {
            success_count: count as u64,
            fail_count: 0,
        }
    }

    pub fn failure(count: usize) -> Self {
        Self {
            success_count: 0,
            fail_count: count as u64,
        }
    }

    pub fn total(&self) -> u64 {
        self.success_count + self.fail_count
    }

    pub fn is_empty(&self) -> bool {
        self.total() == 0
    }
}

impl Add for BatchResult {
    type Output = Self;

    fn add(self, other: Self) -> Self {
        Self {
            success_count: self.success_count + other.success_count,
            fail_count: self.fail_count + other.fail_count,
        }
    }
}

impl AddAssign for BatchResult {
    fn add_assign(&mut self, other: Self) {
        *self = *self + other;
    }
}

impl Sum for BatchResult {
    fn sum<I: Iterator<Item = Self>>(iter: I) -> Self {
        iter.fold(Self::default(), Add::add)
    }
}

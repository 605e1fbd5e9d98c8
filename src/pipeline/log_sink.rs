//! Sink that writes records to the log

use crate::pipeline::Sink;
use crate::record::Record;
use async_trait::async_trait;

/// Logs every record at info level and always succeeds
///
/// The default sink when none is configured.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Sink for LogSink {
    fn name(&self) -> &str {
        "log"
    }

    async fn process(&self, records: &[Record]) -> bool {
        for record in records {
            tracing::info!("{}", record);
        }
        true
    }

    async fn process_error(&self, records: &[Record]) {
        for record in records {
            tracing::error!("Undeliverable record: {}", record);
        }
    }
}

//! Record pipeline
//!
//! Records yielded by callbacks are buffered by the `PipelineScheduler` and
//! delivered to every configured `Sink` in batches. Failed batches are
//! retried a bounded number of times before the records are handed to the
//! sinks' error handler.

mod log_sink;
mod scheduler;
mod sqlite_sink;
mod traits;

pub use log_sink::LogSink;
pub use scheduler::PipelineScheduler;
pub use sqlite_sink::SqliteSink;
pub use traits::{BatchResult, Sink, SinkError, SinkResult};

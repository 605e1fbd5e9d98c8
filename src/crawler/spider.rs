//! Spider trait and the values its callbacks produce
//!
//! Callbacks return an `OutputStream`: a lazy stream of requests and
//! records consumed by the output processor one element at a time.

use crate::crawler::FetchFailure;
use crate::http::{Request, Response};
use crate::record::{Record, RecordError};
use async_trait::async_trait;
use futures::stream::BoxStream;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by spider code
///
/// These are fatal for the task that produced them and never stop the engine.
#[derive(Debug, Error)]
pub enum SpiderError {
    #[error("callback '{callback}' failed: {message}")]
    Callback { callback: String, message: String },

    #[error("unsupported callback output: {0}")]
    UnsupportedOutput(String),

    #[error("request generator failed: {0}")]
    Generator(String),

    #[error("invalid record: {0}")]
    Record(#[from] RecordError),

    #[error("callback panicked: {0}")]
    Panicked(String),
}

impl SpiderError {
    /// Shorthand for a failure inside a named callback
    pub fn callback(callback: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Callback {
            callback: callback.into(),
            message: message.to_string(),
        }
    }
}

/// A single value yielded by a callback
#[derive(Debug, Clone)]
pub enum Output {
    /// Follow-up request for the scheduler
    Request(Request),
    /// Record for the pipeline
    Record(Record),
}

impl Output {
    /// Converts a dynamically typed value into an output
    ///
    /// Accepts `Request`, `Record` or `Output`; anything else is rejected
    /// with `SpiderError::UnsupportedOutput`.
    pub fn from_any(value: Box<dyn Any + Send>) -> Result<Self, SpiderError> {
        let value = match value.downcast::<Output>() {
            Ok(output) => return Ok(*output),
            Err(value) => value,
        };
        let value = match value.downcast::<Request>() {
            Ok(request) => return Ok(Self::Request(*request)),
            Err(value) => value,
        };
        match value.downcast::<Record>() {
            Ok(record) => Ok(Self::Record(*record)),
            Err(_) => Err(SpiderError::UnsupportedOutput(
                "expected a Request or a Record".to_string(),
            )),
        }
    }
}

impl From<Request> for Output {
    fn from(request: Request) -> Self {
        Self::Request(request)
    }
}

impl From<Record> for Output {
    fn from(record: Record) -> Self {
        Self::Record(record)
    }
}

/// Lazy sequence of callback outputs
pub type OutputStream = BoxStream<'static, Result<Output, SpiderError>>;

/// Lazy sequence of requests from a generator
pub type RequestStream = BoxStream<'static, Result<Request, SpiderError>>;

type CallbackFn = dyn Fn(Response) -> OutputStream + Send + Sync;
type ErrorCallbackFn = dyn Fn(FetchFailure) -> OutputStream + Send + Sync;

/// Named response handler attached to a request
///
/// The name is what gets serialized when a request is mirrored externally.
#[derive(Clone)]
pub struct Callback {
    name: Arc<str>,
    func: Arc<CallbackFn>,
}

impl Callback {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(Response) -> OutputStream + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, response: Response) -> OutputStream {
        (self.func)(response)
    }
}

impl fmt::Debug for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Callback({})", self.name)
    }
}

/// Named handler invoked when a request finally fails to fetch
#[derive(Clone)]
pub struct ErrorCallback {
    name: Arc<str>,
    func: Arc<ErrorCallbackFn>,
}

impl ErrorCallback {
    pub fn new<F>(name: &str, func: F) -> Self
    where
        F: Fn(FetchFailure) -> OutputStream + Send + Sync + 'static,
    {
        Self {
            name: Arc::from(name),
            func: Arc::new(func),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn call(&self, failure: FetchFailure) -> OutputStream {
        (self.func)(failure)
    }
}

impl fmt::Debug for ErrorCallback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ErrorCallback({})", self.name)
    }
}

/// A crawl definition: where to start and how to handle responses
///
/// The engine holds the spider behind an `Arc` and calls `parse` from
/// concurrently running fetch tasks.
#[async_trait]
pub trait Spider: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn open(&self) -> Result<(), SpiderError> {
        Ok(())
    }

    async fn close(&self) -> Result<(), SpiderError> {
        Ok(())
    }

    /// Initial requests
    fn start_requests(&self) -> RequestStream;

    /// Next batch of requests for long-running task spiders
    ///
    /// Called repeatedly after the start requests have drained. Returning
    /// `None` ends the crawl once everything is idle.
    async fn task_requests(&self) -> Option<RequestStream> {
        None
    }

    /// Default callback for requests without an explicit one
    fn parse(&self, response: Response) -> OutputStream;

    /// Whether the spider has no work of its own in flight
    fn idle(&self) -> bool {
        true
    }
}

/// Helpers for building output and request streams
pub mod output {
    use super::{Output, OutputStream, RequestStream, SpiderError};
    use crate::http::Request;
    use futures::stream::{self, StreamExt};

    /// A stream that yields nothing
    pub fn empty() -> OutputStream {
        stream::empty().boxed()
    }

    /// A stream over already-computed outputs
    pub fn outputs<I, T>(items: I) -> OutputStream
    where
        I: IntoIterator<Item = T>,
        I::IntoIter: Send + 'static,
        T: Into<Output>,
    {
        stream::iter(items.into_iter().map(|item| Ok(item.into()))).boxed()
    }

    /// A stream that yields a single error
    pub fn fail(error: SpiderError) -> OutputStream {
        stream::once(async move { Err(error) }).boxed()
    }

    /// A request stream over already-built requests
    pub fn requests<I>(items: I) -> RequestStream
    where
        I: IntoIterator<Item = Request>,
        I::IntoIter: Send + 'static,
    {
        stream::iter(items.into_iter().map(Ok)).boxed()
    }
}

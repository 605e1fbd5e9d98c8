//! Fetcher abstraction and retry logic
//!
//! A `Fetcher` turns a `Request` into a `FetchOutcome`. It never returns an
//! error: transport problems end up in the `Failure` arm together with the
//! request, so the engine can hand them to the request's error callback.
//!
//! `RetryingFetcher` layers the retry policy on top of a single-attempt
//! `Transport`.

use crate::crawler::concurrency::ActiveGuard;
use crate::http::{Request, Response, ResponseParts};
use async_trait::async_trait;
use std::fmt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Why a fetch failed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureReason {
    /// Request timed out
    Timeout,
    /// Could not connect to the host
    Connect(String),
    /// Any other transport-level error (TLS, reset, body read)
    Transport(String),
    /// The request itself cannot be sent (bad URL, bad header)
    InvalidRequest(String),
}

impl FailureReason {
    /// Whether another attempt might succeed
    pub fn is_transient(&self) -> bool {
        !matches!(self, Self::InvalidRequest(_))
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "request timeout"),
            Self::Connect(e) => write!(f, "connection failed: {}", e),
            Self::Transport(e) => write!(f, "transport error: {}", e),
            Self::InvalidRequest(e) => write!(f, "invalid request: {}", e),
        }
    }
}

/// A request that could not be fetched, with the reason
#[derive(Debug, Clone)]
pub struct FetchFailure {
    pub request: Request,
    pub reason: FailureReason,
}

/// Result of a fetch
///
/// HTTP error statuses are still a `Success`: the callback decides what a
/// 404 means.
#[derive(Debug)]
pub enum FetchOutcome {
    Success(Response),
    Failure(FetchFailure),
}

impl FetchOutcome {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_))
    }

    pub fn request(&self) -> &Request {
        match self {
            Self::Success(response) => response.request(),
            Self::Failure(failure) => &failure.request,
        }
    }
}

/// Downloads requests
#[async_trait]
pub trait Fetcher: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn open(&self) -> Result<(), crate::crawler::TransportError> {
        Ok(())
    }

    async fn fetch(&self, request: Request) -> FetchOutcome;

    async fn close(&self) {}

    /// True when no fetch is in progress
    fn idle(&self) -> bool {
        true
    }
}

/// One attempt at sending a request
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    fn name(&self) -> &str;

    async fn open(&self) -> Result<(), crate::crawler::TransportError> {
        Ok(())
    }

    async fn send(&self, request: &Request) -> Result<ResponseParts, FailureReason>;

    async fn close(&self) {}
}

/// Retry settings for `RetryingFetcher`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt
    pub max_retry_count: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retry_count: 0,
            delay: Duration::from_millis(500),
        }
    }
}

/// Fetcher that retries transient transport failures
///
/// # Retry Logic
///
/// | Condition | Action |
/// |-----------|--------|
/// | Any HTTP status | Immediate → Success |
/// | Timeout / connect / transport error | Retry while `retry_count < max_retry_count` |
/// | Invalid request | Immediate → Failure |
pub struct RetryingFetcher<T> {
    transport: T,
    policy: RetryPolicy,
    active: Arc<AtomicUsize>,
}

impl<T: Transport> RetryingFetcher<T> {
    pub fn new(transport: T, policy: RetryPolicy) -> Self {
        Self {
            transport,
            policy,
            active: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }
}

#[async_trait]
impl<T: Transport> Fetcher for RetryingFetcher<T> {
    fn name(&self) -> &str {
        self.transport.name()
    }

    async fn open(&self) -> Result<(), crate::crawler::TransportError> {
        self.transport.open().await
    }

    async fn fetch(&self, mut request: Request) -> FetchOutcome {
        let _guard = ActiveGuard::new(&self.active);

        loop {
            match self.transport.send(&request).await {
                Ok(parts) => {
                    tracing::debug!("Fetched {} -> {}", request, parts.status);
                    return FetchOutcome::Success(Response::new(request, parts));
                }
                Err(reason)
                    if reason.is_transient()
                        && request.retry_count() < self.policy.max_retry_count =>
                {
                    request.retry();
                    tracing::warn!(
                        "Retrying {} ({}/{}): {}",
                        request,
                        request.retry_count(),
                        self.policy.max_retry_count,
                        reason
                    );
                    tokio::time::sleep(self.policy.delay).await;
                }
                Err(reason) => {
                    tracing::debug!("Fetch failed for {}: {}", request, reason);
                    return FetchOutcome::Failure(FetchFailure { request, reason });
                }
            }
        }
    }

    async fn close(&self) {
        self.transport.close().await;
    }

    fn idle(&self) -> bool {
        self.active.load(Ordering::SeqCst) == 0
    }
}

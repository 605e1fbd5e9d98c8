//! Distributed coordination
//!
//! Several engine processes can share one crawl. Before a request is
//! dispatched its fingerprint is claimed in a shared `LockStore` with a
//! lease; whoever loses the race drops the request. Queued and running
//! requests are optionally mirrored into the store for observability.

mod coordinator;
mod lock;
mod redis_store;

pub use coordinator::{Claim, DistributedCoordinator};
pub use lock::{LockStore, MemoryLockStore};
pub use redis_store::RedisLockStore;

use thiserror::Error;

/// Errors talking to the shared lock store
#[derive(Debug, Error)]
pub enum CoordinationError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),
}

/// Result type for coordination operations
pub type CoordinationResult<T> = Result<T, CoordinationError>;

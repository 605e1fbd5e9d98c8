//! Sumi-Harvest: a crawl orchestration core
//!
//! This crate drives outbound fetch requests from generation through
//! scheduling, bounded-concurrency execution, result fan-out and
//! persistence. It enforces a global concurrency limit, priority ordering,
//! pause/resume semantics and (optionally) distributed de-duplication
//! across cooperating engine instances.

pub mod config;
pub mod crawler;
pub mod distributed;
pub mod http;
pub mod pipeline;
pub mod record;

use thiserror::Error;

/// Main error type for engine startup and shutdown
///
/// Per-request and per-record failures never surface here; they are logged
/// and counted by the engine instead.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Fetcher error: {0}")]
    Transport(#[from] crawler::TransportError),

    #[error("Sink error: {0}")]
    Sink(#[from] pipeline::SinkError),

    #[error("Spider error: {0}")]
    Spider(#[from] crawler::SpiderError),

    #[error("Distributed coordination error: {0}")]
    Coordination(#[from] distributed::CoordinationError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-specific errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Invalid URL in config: {0}")]
    InvalidUrl(String),

    #[error("Unknown {kind} plugin: '{name}'")]
    UnknownPlugin { kind: &'static str, name: String },
}

/// Result type alias for engine operations
pub type Result<T> = std::result::Result<T, EngineError>;

/// Result type alias for configuration operations
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

// Re-export commonly used types
pub use config::Config;
pub use crawler::{
    Callback, CrawlReport, Engine, EngineBuilder, ErrorCallback, FetchOutcome, Fetcher, Output,
    OutputStream, PauseControl, Spider,
};
pub use http::{Method, Request, Response};
pub use pipeline::{BatchResult, Sink};
pub use record::{FieldKind, Record, RecordSchema};

use serde::{Deserialize, Serialize};

/// Main configuration structure for Sumi-Harvest
///
/// Every section is optional; missing keys take their defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub engine: EngineConfig,
    pub fetcher: FetcherConfig,
    pub pipeline: PipelineConfig,
    pub distributed: DistributedConfig,
    pub sqlite: SqliteConfig,
    pub spider: SpiderConfig,
}

/// Crawl loop behavior
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct EngineConfig {
    /// Maximum number of fetch tasks running at once
    pub concurrency: usize,

    /// How long one dequeue waits on an empty queue (milliseconds)
    pub dequeue_timeout_ms: u64,

    /// How long one pull from a request generator may take (milliseconds)
    pub generator_timeout_ms: u64,

    /// Shortest sleep of an idle loop iteration (milliseconds)
    pub idle_backoff_min_ms: u64,

    /// Longest sleep of an idle loop iteration (milliseconds)
    pub idle_backoff_max_ms: u64,

    /// Initial pause threshold; requests with a lower priority value wait
    #[serde(skip_serializing_if = "Option::is_none")]
    pub pause_threshold: Option<i64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            concurrency: 1,
            dequeue_timeout_ms: 100,
            generator_timeout_ms: 1000,
            idle_backoff_min_ms: 10,
            idle_backoff_max_ms: 500,
            pause_threshold: None,
        }
    }
}

/// Downloader settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct FetcherConfig {
    /// Registered fetcher name
    pub kind: String,

    /// Retries after the first attempt for transient failures
    pub max_retry_count: u32,

    /// Pause between attempts (milliseconds)
    pub retry_delay_ms: u64,

    /// Whole-request timeout (seconds)
    pub request_timeout_secs: u64,

    pub user_agent: String,

    /// Verify TLS certificates
    pub verify_ssl: bool,
}

impl Default for FetcherConfig {
    fn default() -> Self {
        Self {
            kind: "http".to_string(),
            max_retry_count: 0,
            retry_delay_ms: 500,
            request_timeout_secs: 60,
            user_agent: "sumi-harvest/0.1".to_string(),
            verify_ssl: true,
        }
    }
}

/// Record pipeline batching and retry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct PipelineConfig {
    /// Registered sink names, each receiving every batch
    pub sinks: Vec<String>,

    /// Records buffered in the main lane before a flush is forced
    pub max_cache_count: usize,

    /// Records per main-lane batch
    pub batch_size: usize,

    /// Flush the main lane at least this often (seconds)
    pub flush_interval_secs: u64,

    /// Re-deliveries before a record moves to the error lane
    pub max_retry_count: u32,

    /// Capacity of the retry and error lanes
    pub retry_max_cache_count: usize,

    /// Records per retry batch
    pub retry_batch_size: usize,

    /// Records per error-lane delivery
    pub error_batch_size: usize,

    /// Retry the retry lane at least this often (seconds)
    pub retry_interval_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sinks: vec!["log".to_string()],
            max_cache_count: 5000,
            batch_size: 1000,
            flush_interval_secs: 2,
            max_retry_count: 5,
            retry_max_cache_count: 5000,
            retry_batch_size: 1,
            error_batch_size: 1000,
            retry_interval_secs: 60,
        }
    }
}

/// Shared lock store settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct DistributedConfig {
    pub enabled: bool,

    /// Redis connection URL (required when enabled)
    pub redis_url: Option<String>,

    /// Prefix of every key this engine writes
    pub key_prefix: String,

    /// Lifetime of a request claim (seconds)
    pub lock_lease_secs: u64,

    /// Mirror queued and running requests into the store
    pub mirror_state: bool,
}

impl Default for DistributedConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            redis_url: None,
            key_prefix: "sumi".to_string(),
            lock_lease_secs: 600,
            mirror_state: true,
        }
    }
}

/// SQLite sink settings
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SqliteConfig {
    /// Path to the SQLite database file
    pub database_path: Option<String>,
}

/// Built-in page spider settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, rename_all = "kebab-case")]
pub struct SpiderConfig {
    pub name: String,

    /// Seed URLs
    pub start_urls: Vec<String>,

    /// Link hops to follow from a seed
    pub max_depth: u32,
}

impl Default for SpiderConfig {
    fn default() -> Self {
        Self {
            name: "pages".to_string(),
            start_urls: Vec::new(),
            max_depth: 1,
        }
    }
}

use crate::config::types::{
    Config, DistributedConfig, EngineConfig, FetcherConfig, PipelineConfig, SpiderConfig,
    SqliteConfig,
};
use crate::ConfigError;
use url::Url;

/// Validates the entire configuration
///
/// Plugin names (`fetcher.kind`, `pipeline.sinks`) are resolved later by the
/// plugin registry, which owns the list of known names.
pub fn validate(config: &Config) -> Result<(), ConfigError> {
    validate_engine_config(&config.engine)?;
    validate_fetcher_config(&config.fetcher)?;
    validate_pipeline_config(&config.pipeline)?;
    validate_sqlite_config(&config.sqlite, &config.pipeline)?;
    validate_distributed_config(&config.distributed)?;
    validate_spider_config(&config.spider)?;
    Ok(())
}

/// Validates engine configuration
fn validate_engine_config(config: &EngineConfig) -> Result<(), ConfigError> {
    if config.concurrency < 1 || config.concurrency > 1024 {
        return Err(ConfigError::Validation(format!(
            "concurrency must be between 1 and 1024, got {}",
            config.concurrency
        )));
    }

    if config.dequeue_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "dequeue-timeout-ms must be > 0".to_string(),
        ));
    }

    if config.generator_timeout_ms == 0 {
        return Err(ConfigError::Validation(
            "generator-timeout-ms must be > 0".to_string(),
        ));
    }

    if config.idle_backoff_min_ms > config.idle_backoff_max_ms {
        return Err(ConfigError::Validation(format!(
            "idle-backoff-min-ms ({}) must not exceed idle-backoff-max-ms ({})",
            config.idle_backoff_min_ms, config.idle_backoff_max_ms
        )));
    }

    Ok(())
}

/// Validates fetcher configuration
fn validate_fetcher_config(config: &FetcherConfig) -> Result<(), ConfigError> {
    if config.kind.trim().is_empty() {
        return Err(ConfigError::Validation(
            "fetcher kind cannot be empty".to_string(),
        ));
    }

    if config.request_timeout_secs == 0 {
        return Err(ConfigError::Validation(
            "request-timeout-secs must be > 0".to_string(),
        ));
    }

    if config.user_agent.is_empty() {
        return Err(ConfigError::Validation(
            "user-agent cannot be empty".to_string(),
        ));
    }

    Ok(())
}

/// Validates pipeline configuration
fn validate_pipeline_config(config: &PipelineConfig) -> Result<(), ConfigError> {
    if config.sinks.is_empty() {
        return Err(ConfigError::Validation(
            "at least one sink must be configured".to_string(),
        ));
    }

    for (name, value) in [
        ("max-cache-count", config.max_cache_count),
        ("batch-size", config.batch_size),
        ("retry-max-cache-count", config.retry_max_cache_count),
        ("retry-batch-size", config.retry_batch_size),
        ("error-batch-size", config.error_batch_size),
    ] {
        if value == 0 {
            return Err(ConfigError::Validation(format!("{} must be >= 1", name)));
        }
    }

    if config.batch_size > config.max_cache_count {
        return Err(ConfigError::Validation(format!(
            "batch-size ({}) must not exceed max-cache-count ({})",
            config.batch_size, config.max_cache_count
        )));
    }

    if config.retry_batch_size > config.retry_max_cache_count
        || config.error_batch_size > config.retry_max_cache_count
    {
        return Err(ConfigError::Validation(format!(
            "retry-batch-size and error-batch-size must not exceed retry-max-cache-count ({})",
            config.retry_max_cache_count
        )));
    }

    Ok(())
}

/// Validates SQLite configuration when the sqlite sink is in use
fn validate_sqlite_config(
    config: &SqliteConfig,
    pipeline: &PipelineConfig,
) -> Result<(), ConfigError> {
    if !pipeline.sinks.iter().any(|s| s == "sqlite") {
        return Ok(());
    }

    match config.database_path.as_deref() {
        Some(path) if !path.is_empty() => Ok(()),
        _ => Err(ConfigError::Validation(
            "sqlite sink requires [sqlite] database-path".to_string(),
        )),
    }
}

/// Validates distributed configuration
fn validate_distributed_config(config: &DistributedConfig) -> Result<(), ConfigError> {
    if config.key_prefix.is_empty() {
        return Err(ConfigError::Validation(
            "key-prefix cannot be empty".to_string(),
        ));
    }

    if config.lock_lease_secs == 0 {
        return Err(ConfigError::Validation(
            "lock-lease-secs must be > 0".to_string(),
        ));
    }

    if !config.enabled {
        return Ok(());
    }

    let redis_url = config.redis_url.as_deref().ok_or_else(|| {
        ConfigError::Validation("distributed mode requires redis-url".to_string())
    })?;

    let url = Url::parse(redis_url)
        .map_err(|e| ConfigError::InvalidUrl(format!("Invalid redis-url: {}", e)))?;

    if url.scheme() != "redis" && url.scheme() != "rediss" {
        return Err(ConfigError::InvalidUrl(format!(
            "redis-url '{}' must use the redis:// or rediss:// scheme",
            redis_url
        )));
    }

    Ok(())
}

/// Validates page spider configuration
fn validate_spider_config(config: &SpiderConfig) -> Result<(), ConfigError> {
    if config.name.is_empty() {
        return Err(ConfigError::Validation(
            "spider name cannot be empty".to_string(),
        ));
    }

    for start in &config.start_urls {
        let url = Url::parse(start)
            .map_err(|e| ConfigError::InvalidUrl(format!("Invalid start URL '{}': {}", start, e)))?;

        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(ConfigError::Validation(format!(
                "Start URL '{}' must use http or https",
                start
            )));
        }
    }

    Ok(())
}

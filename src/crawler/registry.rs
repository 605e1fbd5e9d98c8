//! Name-to-factory registry for fetchers and sinks
//!
//! Configuration refers to plugins by name (`fetcher.kind`,
//! `pipeline.sinks`); the registry turns those names into instances at
//! startup. Unknown names are a configuration error.

use crate::config::Config;
use crate::crawler::fetcher::{Fetcher, RetryPolicy, RetryingFetcher};
use crate::crawler::transport::HttpTransport;
use crate::pipeline::{LogSink, Sink, SqliteSink};
use crate::{ConfigError, EngineError};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

type FetcherFactory = Box<dyn Fn(&Config) -> crate::Result<Arc<dyn Fetcher>> + Send + Sync>;
type SinkFactory = Box<dyn Fn(&Config) -> crate::Result<Arc<dyn Sink>> + Send + Sync>;

/// Registry of fetcher and sink factories
pub struct PluginRegistry {
    fetchers: HashMap<String, FetcherFactory>,
    sinks: HashMap<String, SinkFactory>,
}

impl PluginRegistry {
    /// An empty registry
    pub fn new() -> Self {
        Self {
            fetchers: HashMap::new(),
            sinks: HashMap::new(),
        }
    }

    /// A registry with the built-in plugins
    ///
    /// - fetcher `http`: reqwest transport with retries
    /// - sink `log`: writes records to the log
    /// - sink `sqlite`: writes records to `[sqlite] database-path`
    pub fn with_defaults() -> Self {
        let mut registry = Self::new();

        registry.register_fetcher("http", |config| {
            let transport = HttpTransport::new(config.fetcher.clone())?;
            let policy = RetryPolicy {
                max_retry_count: config.fetcher.max_retry_count,
                delay: Duration::from_millis(config.fetcher.retry_delay_ms),
            };
            Ok(Arc::new(RetryingFetcher::new(transport, policy)))
        });

        registry.register_sink("log", |_| Ok(Arc::new(LogSink::new())));

        registry.register_sink("sqlite", |config| {
            let path = config.sqlite.database_path.as_deref().ok_or_else(|| {
                ConfigError::Validation("sqlite sink requires [sqlite] database-path".to_string())
            })?;
            Ok(Arc::new(SqliteSink::new(path)))
        });

        registry
    }

    pub fn register_fetcher<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Config) -> crate::Result<Arc<dyn Fetcher>> + Send + Sync + 'static,
    {
        self.fetchers.insert(name.to_string(), Box::new(factory));
    }

    pub fn register_sink<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&Config) -> crate::Result<Arc<dyn Sink>> + Send + Sync + 'static,
    {
        self.sinks.insert(name.to_string(), Box::new(factory));
    }

    /// Builds the fetcher named by `fetcher.kind`
    pub fn build_fetcher(&self, config: &Config) -> crate::Result<Arc<dyn Fetcher>> {
        let factory = self.fetchers.get(&config.fetcher.kind).ok_or_else(|| {
            EngineError::Config(ConfigError::UnknownPlugin {
                kind: "fetcher",
                name: config.fetcher.kind.clone(),
            })
        })?;
        factory(config)
    }

    /// Builds every sink named in `pipeline.sinks`, in order
    pub fn build_sinks(&self, config: &Config) -> crate::Result<Vec<Arc<dyn Sink>>> {
        config
            .pipeline
            .sinks
            .iter()
            .map(|name| {
                let factory = self.sinks.get(name).ok_or_else(|| {
                    EngineError::Config(ConfigError::UnknownPlugin {
                        kind: "sink",
                        name: name.clone(),
                    })
                })?;
                factory(config)
            })
            .collect()
    }

    pub fn fetcher_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.fetchers.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    pub fn sink_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.sinks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_registered() {
        let registry = PluginRegistry::with_defaults();
        assert_eq!(registry.fetcher_names(), vec!["http"]);
        assert_eq!(registry.sink_names(), vec!["log", "sqlite"]);
    }

    #[test]
    fn test_build_default_plugins() {
        let registry = PluginRegistry::default();
        let config = Config::default();

        let fetcher = registry.build_fetcher(&config).unwrap();
        assert_eq!(fetcher.name(), "http");

        let sinks = registry.build_sinks(&config).unwrap();
        assert_eq!(sinks.len(), 1);
        assert_eq!(sinks[0].name(), "log");
    }

    #[test]
    fn test_unknown_fetcher() {
        let registry = PluginRegistry::with_defaults();
        let mut config = Config::default();
        config.fetcher.kind = "browser".to_string();

        match registry.build_fetcher(&config) {
            Err(EngineError::Config(ConfigError::UnknownPlugin { kind, name })) => {
                assert_eq!(kind, "fetcher");
                assert_eq!(name, "browser");
            }
            other => panic!("expected unknown plugin error, got {:?}", other.err()),
        }
    }

    #[test]
    fn test_unknown_sink() {
        let registry = PluginRegistry::with_defaults();
        let mut config = Config::default();
        config.pipeline.sinks = vec!["log".to_string(), "kafka".to_string()];

        assert!(matches!(
            registry.build_sinks(&config),
            Err(EngineError::Config(ConfigError::UnknownPlugin { kind: "sink", .. }))
        ));
    }

    #[test]
    fn test_sqlite_needs_path() {
        let registry = PluginRegistry::with_defaults();
        let mut config = Config::default();
        config.pipeline.sinks = vec!["sqlite".to_string()];
        assert!(registry.build_sinks(&config).is_err());

        config.sqlite.database_path = Some("/tmp/records.db".to_string());
        assert_eq!(registry.build_sinks(&config).unwrap()[0].name(), "sqlite");
    }

    #[test]
    fn test_custom_sink_registration() {
        let mut registry = PluginRegistry::new();
        registry.register_sink("quiet", |_| Ok(Arc::new(LogSink::new())));

        let mut config = Config::default();
        config.pipeline.sinks = vec!["quiet".to_string()];
        assert_eq!(registry.build_sinks(&config).unwrap().len(), 1);
    }
}

//! Sumi-Harvest main entry point
//!
//! Command-line front end that runs the built-in page spider.

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use sumi_harvest::config::{load_config_with_hash, Config};
use sumi_harvest::crawler::{EngineBuilder, PageSpider, PluginRegistry};
use tracing_subscriber::EnvFilter;

/// Sumi-Harvest: a crawl orchestration engine
///
/// Crawls the configured start URLs with bounded concurrency, hands every
/// page record to the configured sinks and, in distributed mode, shares
/// request claims with other instances through Redis.
#[derive(Parser, Debug)]
#[command(name = "sumi-harvest")]
#[command(version)]
#[command(about = "A crawl orchestration engine", long_about = None)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(value_name = "CONFIG")]
    config: PathBuf,

    /// Increase logging verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, conflicts_with = "verbose")]
    quiet: bool,

    /// Validate config and print the effective settings without crawling
    #[arg(long)]
    dry_run: bool,

    /// Print the final statistics as JSON on stdout
    #[arg(long)]
    json: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    setup_logging(cli.verbose, cli.quiet);

    tracing::info!("Loading configuration from: {}", cli.config.display());
    let (config, hash) = load_config_with_hash(&cli.config)
        .with_context(|| format!("failed to load {}", cli.config.display()))?;
    tracing::info!("Configuration loaded successfully (hash: {})", hash);

    if cli.dry_run {
        return handle_dry_run(&config);
    }

    handle_crawl(config, cli.json).await
}

/// Sets up the logging/tracing subscriber based on verbosity level
fn setup_logging(verbose: u8, quiet: bool) {
    let filter = if quiet {
        EnvFilter::new("error")
    } else {
        match verbose {
            0 => EnvFilter::new("sumi_harvest=info,warn"),
            1 => EnvFilter::new("sumi_harvest=debug,info"),
            2 => EnvFilter::new("sumi_harvest=trace,debug"),
            _ => EnvFilter::new("trace"),
        }
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .init();
}

/// Handles --dry-run: prints the effective configuration
fn handle_dry_run(config: &Config) -> anyhow::Result<()> {
    println!("=== Sumi-Harvest Dry Run ===\n");
    println!("{}", toml::to_string_pretty(config)?);

    let registry = PluginRegistry::with_defaults();
    println!("Available fetchers: {}", registry.fetcher_names().join(", "));
    println!("Available sinks: {}", registry.sink_names().join(", "));

    println!("\n✓ Configuration is valid");
    println!(
        "✓ Would start spider '{}' with {} start URLs",
        config.spider.name,
        config.spider.start_urls.len()
    );

    Ok(())
}

/// Runs the page spider to completion
async fn handle_crawl(config: Config, json: bool) -> anyhow::Result<()> {
    let spider = PageSpider::new(config.spider.clone())?;
    let registry = PluginRegistry::with_defaults();

    let engine = EngineBuilder::new(spider)
        .config(config)
        .from_registry(&registry)
        .await?
        .build()?;

    let report = engine.run().await.context("crawl failed")?;
    tracing::info!("Crawl completed successfully");

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    }

    Ok(())
}

//! Datacollector - periodic performance counter collector
//!
//! Runs the collector in the foreground until Ctrl+C, then stops it and
//! writes out any rows still pending.
//!
//! # Usage
//! ```sh
//! COUNTER_CONFIG_FILE=counters.json cargo run -- --debug
//! ```
//!
//! # Environment Variables
//! - `SAVE_TO_FILE` / `SAVE_TO_ELASTICSEARCH` - Enable the sinks
//! - `ELASTICSEARCH_URL` / `ELASTICSEARCH_INDEX` - Search backend target
//! - `OBSERVABILITY_ENABLED` - Enable metrics reporting (default: false)
//! - `OBSERVABILITY_INTERVAL` - Interval in seconds between metric outputs (default: 60)

use anyhow::Result;
use clap::Parser;
use datacollector::application::system::Application;
use datacollector::config::Config;
use datacollector::infrastructure::observability::MetricsReporter;
use std::path::PathBuf;
use tracing::{Level, info};
use tracing_subscriber::prelude::*;

#[derive(Parser, Debug)]
#[command(author, version, about = "Periodic performance counter collector", long_about = None)]
struct Cli {
    /// Counter configuration file (overrides COUNTER_CONFIG_FILE)
    #[arg(short, long)]
    config_file: Option<PathBuf>,

    /// Log every collected row
    #[arg(short, long)]
    debug: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let level = if cli.debug { Level::DEBUG } else { Level::INFO };
    let stdout_layer = tracing_subscriber::fmt::layer().with_target(false);

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .with(stdout_layer)
        .init();

    info!("Datacollector {} starting...", env!("CARGO_PKG_VERSION"));

    let mut config = Config::from_env()?;
    if let Some(path) = cli.config_file {
        config.counter_config_file = path;
    }
    info!(
        "Configuration loaded: Counters={:?}, Policy={:?}",
        config.counter_config_file, config.error_policy
    );

    let app = Application::build(config.clone()).await?;
    app.start().await?;
    info!("Collector running.");

    if config.observability_enabled {
        let reporter = MetricsReporter::new(app.metrics.clone(), config.observability_interval);
        tokio::spawn(async move {
            reporter.run().await;
        });
        info!(
            "Metrics reporter started (interval: {}s)",
            config.observability_interval
        );
    } else {
        info!("Metrics reporting disabled.");
    }

    info!("Press Ctrl+C to stop.");
    tokio::signal::ctrl_c().await?;
    info!("Shutdown signal received. Stopping...");

    app.shutdown().await;
    Ok(())
}

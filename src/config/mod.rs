//! Configuration module for the collector.
//!
//! Top-level switches are read once at startup from environment variables,
//! organized by concern: Collector, Sinks, and Observability.

mod collector_env_config;
mod observability_config;
mod sink_config;

pub use collector_env_config::CollectorEnvConfig;
pub use observability_config::ObservabilityEnvConfig;
pub use sink_config::{ElasticsearchEnvConfig, SinkEnvConfig};

use crate::application::scheduler::CollectionErrorPolicy;
use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

/// Main application configuration.
///
/// Aggregates the sub-configs into flat fields for the rest of the
/// application.
#[derive(Debug, Clone)]
pub struct Config {
    // Collector (from CollectorEnvConfig)
    pub counter_config_file: PathBuf,
    pub error_policy: CollectionErrorPolicy,
    pub config_retry_backoff: Duration,

    // Sinks (from SinkEnvConfig)
    pub save_to_file: bool,
    pub save_to_elasticsearch: bool,
    pub elasticsearch_url: String,
    pub elasticsearch_index: String,
    pub elasticsearch_ttl: String,
    pub elasticsearch_timeout: Option<Duration>,

    // Observability (from ObservabilityEnvConfig)
    pub observability_enabled: bool,
    pub observability_interval: u64,
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        let collector = CollectorEnvConfig::from_env().context("Failed to load collector config")?;
        let sinks = SinkEnvConfig::from_env().context("Failed to load sink config")?;
        let observability = ObservabilityEnvConfig::from_env();

        Ok(Self {
            counter_config_file: collector.counter_config_file,
            error_policy: collector.error_policy,
            config_retry_backoff: collector.config_retry_backoff,

            save_to_file: sinks.save_to_file,
            save_to_elasticsearch: sinks.save_to_elasticsearch,
            elasticsearch_url: sinks.elasticsearch.url,
            elasticsearch_index: sinks.elasticsearch.index,
            elasticsearch_ttl: sinks.elasticsearch.ttl,
            elasticsearch_timeout: sinks.elasticsearch.timeout,

            observability_enabled: observability.enabled,
            observability_interval: observability.interval_seconds,
        })
    }
}

//! Output sink configuration parsing from environment variables.
//!
//! Covers the file output switch and the Elasticsearch connection settings.

use anyhow::{Context, Result};
use std::env;
use std::time::Duration;

/// Elasticsearch connection settings
#[derive(Debug, Clone)]
pub struct ElasticsearchEnvConfig {
    pub url: String,
    pub index: String,
    /// Retention setting. Accepted for compatibility, not applied.
    pub ttl: String,
    pub timeout: Option<Duration>,
}

/// Output sink environment configuration
#[derive(Debug, Clone)]
pub struct SinkEnvConfig {
    pub save_to_file: bool,
    pub save_to_elasticsearch: bool,
    pub elasticsearch: ElasticsearchEnvConfig,
}

impl SinkEnvConfig {
    pub fn from_env() -> Result<Self> {
        let timeout = match env::var("ELASTICSEARCH_TIMEOUT_SECS") {
            Ok(secs) if !secs.trim().is_empty() => Some(Duration::from_secs(
                secs.trim()
                    .parse::<u64>()
                    .context("Failed to parse ELASTICSEARCH_TIMEOUT_SECS")?,
            )),
            _ => None,
        };

        Ok(Self {
            save_to_file: Self::parse_bool("SAVE_TO_FILE", true)?,
            save_to_elasticsearch: Self::parse_bool("SAVE_TO_ELASTICSEARCH", false)?,
            elasticsearch: ElasticsearchEnvConfig {
                url: env::var("ELASTICSEARCH_URL")
                    .unwrap_or_else(|_| "http://localhost:9200".to_string()),
                index: env::var("ELASTICSEARCH_INDEX")
                    .unwrap_or_else(|_| "datacollector".to_string()),
                ttl: env::var("ELASTICSEARCH_TTL").unwrap_or_else(|_| "4w".to_string()),
                timeout,
            },
        })
    }

    fn parse_bool(key: &str, default: bool) -> Result<bool> {
        env::var(key)
            .unwrap_or_else(|_| default.to_string())
            .trim()
            .to_lowercase()
            .parse::<bool>()
            .context(format!("Failed to parse {}", key))
    }
}

//! Collector configuration parsing from environment variables.
//!
//! Location of the counter document, the per-counter error policy and the
//! reload backoff.

use crate::application::scheduler::CollectionErrorPolicy;
use anyhow::{Context, Result, anyhow};
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Collector environment configuration
#[derive(Debug, Clone)]
pub struct CollectorEnvConfig {
    pub counter_config_file: PathBuf,
    pub error_policy: CollectionErrorPolicy,
    pub config_retry_backoff: Duration,
}

impl CollectorEnvConfig {
    pub fn from_env() -> Result<Self> {
        let policy_str =
            env::var("COLLECTION_ERROR_POLICY").unwrap_or_else(|_| "abort".to_string());
        let error_policy = CollectionErrorPolicy::from_str(&policy_str)
            .map_err(|e| anyhow!(e))
            .context("Invalid COLLECTION_ERROR_POLICY. Must be 'abort' or 'continue'")?;

        let backoff_ms = env::var("CONFIG_RETRY_BACKOFF_MS")
            .unwrap_or_else(|_| "0".to_string())
            .parse::<u64>()
            .context("Failed to parse CONFIG_RETRY_BACKOFF_MS")?;

        Ok(Self {
            counter_config_file: env::var("COUNTER_CONFIG_FILE")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("counters.json")),
            error_policy,
            config_retry_backoff: Duration::from_millis(backoff_ms),
        })
    }
}

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{info, warn};

use crate::application::batcher::ResultBatcher;
use crate::application::collection_engine::CollectionEngine;
use crate::application::config_store::ConfigStore;
use crate::application::scheduler::Collector;
use crate::config::Config;
use crate::domain::ports::{Clock, CounterSource, SearchConnector};
use crate::infrastructure::clock::SystemClock;
use crate::infrastructure::elasticsearch::{ElasticsearchConnector, ElasticsearchSettings};
use crate::infrastructure::file_sink::FileSink;
use crate::infrastructure::observability::Metrics;
use crate::infrastructure::search_sink::SearchSink;
use crate::infrastructure::sysinfo_source::SysinfoSource;

/// The wired collector and what the host needs to drive it.
pub struct Application {
    pub config: Config,
    pub collector: Arc<Collector>,
    pub metrics: Metrics,
}

impl Application {
    /// Wire the collector against the local host and, when enabled,
    /// Elasticsearch.
    pub async fn build(config: Config) -> Result<Self> {
        let connector: Option<Box<dyn SearchConnector>> = if config.save_to_elasticsearch {
            let settings = ElasticsearchSettings::new(
                &config.elasticsearch_url,
                &config.elasticsearch_index,
                config.elasticsearch_timeout,
            )
            .context("Invalid Elasticsearch settings")?;
            Some(Box::new(ElasticsearchConnector::new(settings)))
        } else {
            None
        };

        Self::build_with(
            config,
            Box::new(SysinfoSource::new()),
            connector,
            Arc::new(SystemClock),
        )
    }

    /// Wire the collector from explicit collaborators. `connector` is only
    /// used when search output is enabled.
    pub fn build_with(
        config: Config,
        source: Box<dyn CounterSource>,
        connector: Option<Box<dyn SearchConnector>>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        info!(
            "Building collector (counters: {:?}, file output: {}, search output: {})",
            config.counter_config_file, config.save_to_file, config.save_to_elasticsearch
        );

        let metrics = Metrics::new().context("Failed to register metrics")?;

        let config_store = ConfigStore::new(
            config.counter_config_file.clone(),
            clock.clone(),
            config.config_retry_backoff,
            metrics.clone(),
        );
        let engine = CollectionEngine::new(source, clock.clone());

        let file_sink = config
            .save_to_file
            .then(|| FileSink::new(clock.clone(), metrics.clone()));

        let search_sink = if config.save_to_elasticsearch {
            let connector = connector
                .context("Search output enabled but no search connector was provided")?;
            warn!(
                "Elasticsearch TTL '{}' is accepted but not applied to the index",
                config.elasticsearch_ttl
            );
            info!(
                "Search output: {} (index '{}')",
                config.elasticsearch_url,
                config.elasticsearch_index.to_lowercase()
            );
            Some(SearchSink::new(connector, metrics.clone()))
        } else {
            None
        };

        let collector = Collector::new(
            config_store,
            engine,
            ResultBatcher::new(file_sink, search_sink),
            config.error_policy,
            clock,
            metrics.clone(),
        );

        Ok(Self {
            config,
            collector: Arc::new(collector),
            metrics,
        })
    }

    pub async fn start(&self) -> Result<()> {
        self.collector
            .start()
            .await
            .context("Failed to start collector")?;
        Ok(())
    }

    pub async fn stop(&self) {
        self.collector.stop().await;
    }

    /// Stop, flush pending rows and release sampling handles.
    pub async fn shutdown(&self) {
        self.collector.shutdown().await;
        info!("Collector shut down.");
    }
}

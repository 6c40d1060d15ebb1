//! Bulk dispatch of counter results to the search backend.
//!
//! The client is built lazily on first use and discarded after any failure, so
//! the next dispatch reconnects from scratch. Failed batches are dropped.

use crate::domain::counter::CounterResult;
use crate::domain::errors::SinkError;
use crate::domain::ports::{SearchClient, SearchConnector};
use crate::infrastructure::observability::Metrics;
use tracing::{debug, error, warn};

pub struct SearchSink {
    connector: Box<dyn SearchConnector>,
    client: Option<Box<dyn SearchClient>>,
    metrics: Metrics,
}

impl SearchSink {
    pub fn new(connector: Box<dyn SearchConnector>, metrics: Metrics) -> Self {
        Self {
            connector,
            client: None,
            metrics,
        }
    }

    pub fn is_connected(&self) -> bool {
        self.client.is_some()
    }

    fn client(&mut self) -> Result<&dyn SearchClient, SinkError> {
        if self.client.is_none() {
            debug!("SearchSink: Building search client");
            self.client = Some(self.connector.connect()?);
        }
        match self.client.as_deref() {
            Some(client) => Ok(client),
            None => Err(SinkError::Transport("search client unavailable".to_string())),
        }
    }

    /// Create the collection if it does not exist yet. Called once at startup.
    pub async fn ensure_collection(&mut self) -> Result<(), SinkError> {
        let result: Result<(), SinkError> = async {
            let client = self.client()?;
            if client.collection_exists().await? {
                return Ok(());
            }
            warn!(
                "SearchSink: Collection {} doesn't exist. Creating....",
                client.collection()
            );
            client.create_collection().await
        }
        .await;

        if result.is_err() {
            self.client = None;
        }
        result
    }

    /// Bulk-write one batch. Returns whether the write fully succeeded.
    pub async fn dispatch(&mut self, batch: &[CounterResult]) -> bool {
        if batch.is_empty() {
            return true;
        }

        let result = match self.client() {
            Ok(client) => client.bulk_index(batch).await,
            Err(e) => Err(e),
        };

        match result {
            Ok(()) => {
                debug!("SearchSink: Indexed {} results", batch.len());
                self.metrics.record_search_dispatch(true);
                true
            }
            Err(e) => {
                error!("SearchSink: Error accessing search backend: {}", e);
                self.client = None;
                self.metrics.record_search_dispatch(false);
                false
            }
        }
    }
}

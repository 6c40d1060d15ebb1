use crate::domain::counter::{CounterIdentity, CounterResult};
use crate::domain::errors::{SampleError, SinkError};
use async_trait::async_trait;
use chrono::{DateTime, Local};

/// Opens sampling handles for counter identities.
pub trait CounterSource: Send + Sync {
    fn open(&mut self, identity: &CounterIdentity) -> Result<Box<dyn CounterHandle>, SampleError>;
}

/// A reusable handle on one counter.
pub trait CounterHandle: Send + Sync {
    /// Instantaneous raw value.
    fn raw_value(&mut self) -> Result<i64, SampleError>;

    /// Calculated value: the current value for gauges, rate since the previous
    /// read for cumulative counters.
    fn next_value(&mut self) -> Result<f64, SampleError>;
}

/// Connection to a document-indexing backend.
#[async_trait]
pub trait SearchClient: Send + Sync {
    /// Whether the collection/index exists.
    async fn collection_exists(&self) -> Result<bool, SinkError>;

    /// Create the collection with `timestamp` as its time field.
    async fn create_collection(&self) -> Result<(), SinkError>;

    /// Bulk-write the batch; a partial write is an error.
    async fn bulk_index(&self, results: &[CounterResult]) -> Result<(), SinkError>;

    fn collection(&self) -> &str;
}

/// Builds fresh search clients. Called lazily and again after every failure.
pub trait SearchConnector: Send + Sync {
    fn connect(&self) -> Result<Box<dyn SearchClient>, SinkError>;
}

/// Wall-clock source.
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Local>;
}

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised while loading the counter configuration document
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read counter config {path:?}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Malformed counter config {path:?}: {reason}")]
    Malformed { path: PathBuf, reason: String },

    #[error("Counter config reload suppressed for {remaining:?} after failure: {last_error}")]
    Backoff {
        remaining: Duration,
        last_error: String,
    },
}

/// Errors raised by a counter source or handle
#[derive(Debug, Error)]
pub enum SampleError {
    /// The instance behind the counter cannot currently be resolved (process not
    /// running, interface down). Expected and transient.
    #[error("Counter source not currently available: {0}")]
    Unavailable(String),

    #[error("Unknown counter category: {0}")]
    UnknownCategory(String),

    #[error("Unknown counter {counter} in category {category}")]
    UnknownCounter { category: String, counter: String },

    #[error("Counter {0} requires an instance name")]
    MissingInstance(String),

    #[error("Remote host {0} cannot be sampled from this machine")]
    RemoteHost(String),
}

impl SampleError {
    pub fn is_unavailable(&self) -> bool {
        matches!(self, SampleError::Unavailable(_))
    }
}

/// Errors raised by the file and search sinks
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("Failed to write {path:?}: {source}")]
    FileWrite {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to rotate {path:?}: {source}")]
    FileRotate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Search backend request failed: {0}")]
    Transport(String),

    #[error("Search backend rejected {failed} of {total} documents: {reason}")]
    PartialWrite {
        failed: usize,
        total: usize,
        reason: String,
    },
}

/// Errors surfaced by the collector lifecycle and tick
#[derive(Debug, Error)]
pub enum CollectorError {
    #[error("Collector already running")]
    AlreadyRunning,

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Collection of {counter} failed: {source}")]
    Sample {
        counter: String,
        #[source]
        source: SampleError,
    },

    #[error("Failed to prepare search collection: {0}")]
    SearchSetup(#[source] SinkError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sample_error_unavailable_classification() {
        assert!(SampleError::Unavailable("nginx".to_string()).is_unavailable());
        assert!(!SampleError::UnknownCategory("Foo".to_string()).is_unavailable());
    }

    #[test]
    fn test_partial_write_formatting() {
        let error = SinkError::PartialWrite {
            failed: 2,
            total: 10,
            reason: "mapper_parsing_exception".to_string(),
        };

        let msg = error.to_string();
        assert!(msg.contains("2 of 10"));
        assert!(msg.contains("mapper_parsing_exception"));
    }
}

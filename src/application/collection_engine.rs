use crate::domain::counter::{CounterConfig, CounterResult, ValueKind};
use crate::domain::errors::SampleError;
use crate::domain::ports::{Clock, CounterHandle, CounterSource};
use std::collections::HashMap;
use std::collections::hash_map::Entry;
use std::sync::Arc;
use tracing::debug;

/// Resolves counters to sampling handles and reads one value per call.
///
/// Handles are created lazily, keyed by the identity string, and kept for the
/// lifetime of the engine (or until [`CollectionEngine::release_handles`]).
pub struct CollectionEngine {
    source: Box<dyn CounterSource>,
    clock: Arc<dyn Clock>,
    handles: HashMap<String, Box<dyn CounterHandle>>,
}

impl CollectionEngine {
    pub fn new(source: Box<dyn CounterSource>, clock: Arc<dyn Clock>) -> Self {
        Self {
            source,
            clock,
            handles: HashMap::new(),
        }
    }

    /// Sample one counter according to its value semantics.
    ///
    /// Returns `SampleError::Unavailable` when the underlying instance cannot
    /// currently be resolved; every other error is passed through unchanged.
    pub fn collect(&mut self, config: &Arc<CounterConfig>) -> Result<CounterResult, SampleError> {
        let identity = config.identity();
        let handle = match self.handles.entry(identity.key()) {
            Entry::Occupied(entry) => entry.into_mut(),
            Entry::Vacant(entry) => {
                debug!("CollectionEngine: Opening handle for {}", entry.key());
                entry.insert(self.source.open(&identity)?)
            }
        };

        let value = match config.value_type {
            ValueKind::Raw => handle.raw_value()?,
            ValueKind::Rate => handle.next_value()?.round() as i64,
        };

        Ok(CounterResult {
            timestamp: self.clock.now(),
            host: config.server.clone(),
            counter: config.pretty_name.clone(),
            instance: config.instance().map(str::to_string),
            value,
            config: config.clone(),
        })
    }

    pub fn handle_count(&self) -> usize {
        self.handles.len()
    }

    /// Drop every cached handle.
    pub fn release_handles(&mut self) {
        let released = self.handles.len();
        self.handles.clear();
        debug!("CollectionEngine: Released {} handles", released);
    }
}

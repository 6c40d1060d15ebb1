//! Cached, hot-reloaded counter configuration.
//!
//! The cache is replaced as a whole on every successful reload and never
//! mutated in place. A reload is due once the cache is older than
//! [`RELOAD_INTERVAL`]; after a failed attempt the next one additionally waits
//! for the configured retry backoff. A backoff of zero retries on every call.

use crate::domain::counter::CounterConfig;
use crate::domain::errors::ConfigError;
use crate::domain::ports::Clock;
use crate::infrastructure::clock::elapsed_between;
use crate::infrastructure::observability::Metrics;
use chrono::{DateTime, Local};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};

/// Age after which the cached configuration is reloaded.
pub const RELOAD_INTERVAL: Duration = Duration::from_secs(30);

/// Immutable snapshot of the configured counters, in document order.
pub type CounterSet = Arc<[Arc<CounterConfig>]>;

#[derive(Debug, Deserialize)]
struct CounterDocument {
    counters: Vec<CounterConfig>,
}

pub struct ConfigStore {
    path: PathBuf,
    clock: Arc<dyn Clock>,
    retry_backoff: Duration,
    metrics: Metrics,
    counters: CounterSet,
    last_success: Option<DateTime<Local>>,
    last_failure: Option<(DateTime<Local>, String)>,
}

impl ConfigStore {
    pub fn new(
        path: impl Into<PathBuf>,
        clock: Arc<dyn Clock>,
        retry_backoff: Duration,
        metrics: Metrics,
    ) -> Self {
        Self {
            path: path.into(),
            clock,
            retry_backoff,
            metrics,
            counters: Arc::from(Vec::new()),
            last_success: None,
            last_failure: None,
        }
    }

    /// Cached snapshot without triggering a reload.
    pub fn cached(&self) -> CounterSet {
        self.counters.clone()
    }

    /// Current snapshot, reloading first when stale.
    ///
    /// A failed reload propagates and leaves the cache and its load time
    /// untouched.
    pub fn current(&mut self) -> Result<CounterSet, ConfigError> {
        let now = self.clock.now();
        if !self.is_stale(now) {
            return Ok(self.counters.clone());
        }

        if let Some((failed_at, last_error)) = &self.last_failure {
            let since_failure = elapsed_between(*failed_at, now);
            if since_failure < self.retry_backoff {
                // Serve the previous snapshot while backing off, if there is one.
                if self.last_success.is_some() {
                    return Ok(self.counters.clone());
                }
                return Err(ConfigError::Backoff {
                    remaining: self.retry_backoff - since_failure,
                    last_error: last_error.clone(),
                });
            }
        }

        match load_counter_file(&self.path) {
            Ok(counters) => {
                info!(
                    "ConfigStore: Loaded {} counters from {:?}",
                    counters.len(),
                    self.path
                );
                self.counters = counters.into_iter().map(Arc::new).collect();
                self.last_success = Some(now);
                self.last_failure = None;
                self.metrics.record_config_reload(true);
                Ok(self.counters.clone())
            }
            Err(e) => {
                error!("ConfigStore: Reload of {:?} failed: {}", self.path, e);
                self.last_failure = Some((now, e.to_string()));
                self.metrics.record_config_reload(false);
                Err(e)
            }
        }
    }

    fn is_stale(&self, now: DateTime<Local>) -> bool {
        match self.last_success {
            Some(loaded_at) => elapsed_between(loaded_at, now) > RELOAD_INTERVAL,
            None => true,
        }
    }
}

/// Reads the counter document. `.toml` files are parsed as TOML, anything
/// else as JSON. One malformed entry fails the whole document.
pub fn load_counter_file(path: &Path) -> Result<Vec<CounterConfig>, ConfigError> {
    let body = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let is_toml = path
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("toml"))
        .unwrap_or(false);

    let document: CounterDocument = if is_toml {
        toml::from_str(&body).map_err(|e| ConfigError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    } else {
        serde_json::from_str(&body).map_err(|e| ConfigError::Malformed {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?
    };

    Ok(document.counters)
}

/// Distinct output files across a snapshot, in first-seen order.
pub fn output_files(counters: &[Arc<CounterConfig>]) -> Vec<PathBuf> {
    let mut files: Vec<PathBuf> = Vec::new();
    for config in counters {
        if !files.contains(&config.output_file) {
            files.push(config.output_file.clone());
        }
    }
    files
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::counter::ValueKind;
    use crate::infrastructure::clock::ManualClock;
    use chrono::TimeZone;

    const TWO_COUNTERS: &str = r#"{
        "counters": [
            {
                "Server": ".",
                "Category": "Processor",
                "CounterName": "% Processor Time",
                "InstanceName": "_Total",
                "PrettyName": "CPU",
                "ValueType": "NextValue",
                "CheckFrequency": "00:00:05",
                "OutputFile": "cpu.txt"
            },
            {
                "Server": ".",
                "Category": "Memory",
                "CounterName": "Available MBytes",
                "PrettyName": "Free memory",
                "CheckFrequency": "00:01:00",
                "OutputFile": "memory.txt"
            }
        ]
    }"#;

    fn temp_file(name: &str, body: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "datacollector-config-{}-{}",
            name,
            std::process::id()
        ));
        std::fs::create_dir_all(&dir).unwrap();
        let path = dir.join(name);
        std::fs::write(&path, body).unwrap();
        path
    }

    fn clock() -> ManualClock {
        ManualClock::new(Local.with_ymd_and_hms(2026, 5, 4, 9, 0, 0).unwrap())
    }

    fn store(path: &Path, clock: &ManualClock, backoff: Duration) -> ConfigStore {
        ConfigStore::new(
            path,
            Arc::new(clock.clone()),
            backoff,
            Metrics::new().unwrap(),
        )
    }

    #[test]
    fn test_load_json_document() {
        let path = temp_file("counters.json", TWO_COUNTERS);
        let counters = load_counter_file(&path).unwrap();
        assert_eq!(counters.len(), 2);
        assert_eq!(counters[0].value_type, ValueKind::Rate);
        assert_eq!(counters[1].value_type, ValueKind::Raw);
        assert_eq!(counters[1].instance(), None);
    }

    #[test]
    fn test_load_toml_document() {
        let body = r#"
[[counters]]
Server = "."
Category = "Memory"
CounterName = "Available Bytes"
PrettyName = "Available"
ValueType = "Raw"
CheckFrequency = "00:00:10"
OutputFile = "mem.txt"
"#;
        let path = temp_file("counters.toml", body);
        let counters = load_counter_file(&path).unwrap();
        assert_eq!(counters.len(), 1);
        assert_eq!(counters[0].check_frequency, Duration::from_secs(10));
    }

    #[test]
    fn test_malformed_entry_fails_whole_document() {
        let body = r#"{"counters": [
            {"Server": ".", "Category": "Memory", "CounterName": "Available Bytes",
             "CheckFrequency": "00:00:10", "OutputFile": "a.txt"},
            {"Server": ".", "CounterName": "no category",
             "CheckFrequency": "00:00:10", "OutputFile": "b.txt"}
        ]}"#;
        let path = temp_file("malformed.json", body);
        assert!(matches!(
            load_counter_file(&path),
            Err(ConfigError::Malformed { .. })
        ));
    }

    #[test]
    fn test_out_of_range_frequency_fails_reload() {
        let body = r#"{"counters": [
            {"Server": ".", "Category": "Memory", "CounterName": "Available Bytes",
             "CheckFrequency": 1e30, "OutputFile": "a.txt"},
            {"Server": ".", "Category": "Memory", "CounterName": "Free Bytes",
             "CheckFrequency": "999999999999999999", "OutputFile": "b.txt"}
        ]}"#;
        let path = temp_file("overflow.json", body);
        let clock = clock();
        let mut store = store(&path, &clock, Duration::ZERO);

        assert!(matches!(store.current(), Err(ConfigError::Malformed { .. })));
        assert!(store.cached().is_empty());

        // The failure is recorded and the next call retries
        std::fs::write(&path, TWO_COUNTERS).unwrap();
        clock.advance(Duration::from_millis(200));
        assert_eq!(store.current().unwrap().len(), 2);
    }

    #[test]
    fn test_reload_only_after_interval() {
        let path = temp_file("reload.json", TWO_COUNTERS);
        let clock = clock();
        let mut store = store(&path, &clock, Duration::ZERO);

        assert_eq!(store.current().unwrap().len(), 2);

        // Drop one counter on disk; the cache must not notice before 30s.
        let doc: serde_json::Value = serde_json::from_str(TWO_COUNTERS).unwrap();
        let trimmed = serde_json::json!({ "counters": [doc["counters"][1].clone()] });
        std::fs::write(&path, trimmed.to_string()).unwrap();

        clock.advance(Duration::from_secs(29));
        assert_eq!(store.current().unwrap().len(), 2);

        clock.advance(Duration::from_secs(2));
        assert_eq!(store.current().unwrap().len(), 1);
    }

    #[test]
    fn test_failed_reload_keeps_cache_and_retries_next_call() {
        let path = temp_file("broken.json", TWO_COUNTERS);
        let clock = clock();
        let mut store = store(&path, &clock, Duration::ZERO);
        store.current().unwrap();

        std::fs::write(&path, "{ not json").unwrap();
        clock.advance(Duration::from_secs(31));
        assert!(store.current().is_err());
        assert_eq!(store.cached().len(), 2);

        // No backoff: the very next call retries
        clock.advance(Duration::from_millis(200));
        assert!(store.current().is_err());

        std::fs::write(&path, TWO_COUNTERS).unwrap();
        clock.advance(Duration::from_millis(200));
        assert_eq!(store.current().unwrap().len(), 2);
    }

    #[test]
    fn test_backoff_suppresses_retry_storm() {
        let path = std::env::temp_dir()
            .join(format!("datacollector-absent-{}", std::process::id()))
            .join("absent.json");
        let clock = clock();
        let mut store = store(&path, &clock, Duration::from_secs(5));

        assert!(matches!(store.current(), Err(ConfigError::Io { .. })));

        clock.advance(Duration::from_millis(200));
        assert!(matches!(store.current(), Err(ConfigError::Backoff { .. })));

        clock.advance(Duration::from_secs(5));
        assert!(matches!(store.current(), Err(ConfigError::Io { .. })));
    }

    #[test]
    fn test_output_files_are_distinct() {
        let path = temp_file("files.json", TWO_COUNTERS);
        let counters: Vec<Arc<CounterConfig>> = load_counter_file(&path)
            .unwrap()
            .into_iter()
            .chain(load_counter_file(&path).unwrap())
            .map(Arc::new)
            .collect();
        let files = output_files(&counters);
        assert_eq!(files, vec![PathBuf::from("cpu.txt"), PathBuf::from("memory.txt")]);
    }
}

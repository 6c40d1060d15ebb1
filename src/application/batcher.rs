use crate::domain::counter::CounterResult;
use crate::domain::errors::SinkError;
use crate::infrastructure::file_sink::{FileSink, FlushReport, PendingRow};
use crate::infrastructure::search_sink::SearchSink;
use std::path::PathBuf;
use tracing::{debug, info};

/// Global pending-row count above which the file queue is flushed.
pub const FLUSH_THRESHOLD: usize = 50;

/// Buffers formatted rows for the file sink and forwards each batch to the
/// search sink. A sink that is `None` is disabled.
pub struct ResultBatcher {
    queue: Vec<PendingRow>,
    file_sink: Option<FileSink>,
    search_sink: Option<SearchSink>,
}

impl ResultBatcher {
    pub fn new(file_sink: Option<FileSink>, search_sink: Option<SearchSink>) -> Self {
        Self {
            queue: Vec::new(),
            file_sink,
            search_sink,
        }
    }

    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn search_enabled(&self) -> bool {
        self.search_sink.is_some()
    }

    /// Accept one tick's results. `known_files` lists every output file of the
    /// active configuration, used for rotation.
    pub async fn record(&mut self, results: Vec<CounterResult>, known_files: &[PathBuf]) {
        for result in &results {
            let row = result.display_row();
            debug!("{}", row);
            if self.file_sink.is_some() {
                self.queue.push(PendingRow {
                    file: result.config.output_file.clone(),
                    row,
                });
            }
        }

        if self.queue.len() > FLUSH_THRESHOLD {
            self.flush_files(known_files);
        }

        if results.is_empty() {
            return;
        }
        if let Some(search) = self.search_sink.as_mut() {
            search.dispatch(&results).await;
        }
    }

    /// Write out whatever is queued, regardless of the threshold.
    pub fn flush_pending(&mut self, known_files: &[PathBuf]) -> Option<FlushReport> {
        if self.queue.is_empty() {
            return None;
        }
        info!("ResultBatcher: Flushing {} pending rows", self.queue.len());
        self.flush_files(known_files)
    }

    fn flush_files(&mut self, known_files: &[PathBuf]) -> Option<FlushReport> {
        let rows = std::mem::take(&mut self.queue);
        let sink = self.file_sink.as_mut()?;
        Some(sink.flush(rows, known_files))
    }

    /// Create the search collection when search output is enabled.
    pub async fn ensure_collection(&mut self) -> Result<(), SinkError> {
        match self.search_sink.as_mut() {
            Some(search) => search.ensure_collection().await,
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::counter::{CounterConfig, ValueKind};
    use crate::domain::ports::{SearchClient, SearchConnector};
    use crate::infrastructure::clock::ManualClock;
    use crate::infrastructure::observability::Metrics;
    use async_trait::async_trait;
    use chrono::{Local, TimeZone};
    use std::path::Path;
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    struct RecordingClient {
        batches: Arc<Mutex<Vec<usize>>>,
    }

    #[async_trait]
    impl SearchClient for RecordingClient {
        async fn collection_exists(&self) -> Result<bool, SinkError> {
            Ok(true)
        }

        async fn create_collection(&self) -> Result<(), SinkError> {
            Ok(())
        }

        async fn bulk_index(&self, results: &[CounterResult]) -> Result<(), SinkError> {
            self.batches.lock().unwrap().push(results.len());
            Ok(())
        }

        fn collection(&self) -> &str {
            "counters"
        }
    }

    struct RecordingConnector {
        batches: Arc<Mutex<Vec<usize>>>,
    }

    impl SearchConnector for RecordingConnector {
        fn connect(&self) -> Result<Box<dyn SearchClient>, SinkError> {
            Ok(Box::new(RecordingClient {
                batches: self.batches.clone(),
            }))
        }
    }

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "datacollector-batcher-{}-{}",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_dir_all(&dir);
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn results(file: &Path, label: &str, count: usize) -> Vec<CounterResult> {
        let config = Arc::new(CounterConfig {
            server: "app01".to_string(),
            category: "Memory".to_string(),
            counter_name: label.to_string(),
            instance_name: None,
            pretty_name: label.to_string(),
            value_type: ValueKind::Raw,
            check_frequency: Duration::from_secs(1),
            output_file: file.to_path_buf(),
        });
        (0..count)
            .map(|i| CounterResult {
                timestamp: Local.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap(),
                host: "app01".to_string(),
                counter: label.to_string(),
                instance: None,
                value: i as i64,
                config: config.clone(),
            })
            .collect()
    }

    fn file_sink() -> FileSink {
        let clock = ManualClock::new(Local.with_ymd_and_hms(2026, 3, 3, 9, 0, 0).unwrap());
        FileSink::new(Arc::new(clock), Metrics::new().unwrap())
    }

    #[tokio::test]
    async fn test_rows_stay_queued_up_to_threshold() {
        let dir = temp_dir("threshold");
        let file = dir.join("mem.txt");
        let mut batcher = ResultBatcher::new(Some(file_sink()), None);

        batcher.record(results(&file, "a", 50), &[file.clone()]).await;
        assert_eq!(batcher.pending(), 50);
        assert!(!file.exists());

        batcher.record(results(&file, "b", 1), &[file.clone()]).await;
        assert_eq!(batcher.pending(), 0);
        let content = std::fs::read_to_string(&file).unwrap();
        assert_eq!(content.lines().count(), 51);
        assert!(content.starts_with("app01\\Memory\\a; 2026-03-03 09:00:00; 0\n"));
    }

    #[tokio::test]
    async fn test_threshold_is_global_across_files() {
        let dir = temp_dir("global");
        let cpu = dir.join("cpu.txt");
        let mem = dir.join("mem.txt");
        let known = vec![cpu.clone(), mem.clone()];
        let mut batcher = ResultBatcher::new(Some(file_sink()), None);

        let mut batch = results(&cpu, "cpu", 30);
        batch.extend(results(&mem, "mem", 21));
        batcher.record(batch, &known).await;

        assert_eq!(batcher.pending(), 0);
        assert_eq!(std::fs::read_to_string(&cpu).unwrap().lines().count(), 30);
        assert_eq!(std::fs::read_to_string(&mem).unwrap().lines().count(), 21);
    }

    #[tokio::test]
    async fn test_search_receives_every_non_empty_batch() {
        let batches = Arc::new(Mutex::new(Vec::new()));
        let search = SearchSink::new(
            Box::new(RecordingConnector {
                batches: batches.clone(),
            }),
            Metrics::new().unwrap(),
        );
        let mut batcher = ResultBatcher::new(None, Some(search));
        let file = PathBuf::from("unused.txt");

        batcher.record(results(&file, "a", 3), &[]).await;
        batcher.record(Vec::new(), &[]).await;
        batcher.record(results(&file, "a", 2), &[]).await;

        assert_eq!(*batches.lock().unwrap(), vec![3, 2]);
        // File output disabled: nothing queued
        assert_eq!(batcher.pending(), 0);
    }

    #[tokio::test]
    async fn test_flush_pending_writes_below_threshold() {
        let dir = temp_dir("pending");
        let file = dir.join("mem.txt");
        let mut batcher = ResultBatcher::new(Some(file_sink()), None);

        assert!(batcher.flush_pending(&[]).is_none());
        batcher.record(results(&file, "a", 4), &[file.clone()]).await;
        let report = batcher.flush_pending(&[file.clone()]).unwrap();
        assert_eq!(report.rows_written, 4);
        assert_eq!(batcher.pending(), 0);
    }
}

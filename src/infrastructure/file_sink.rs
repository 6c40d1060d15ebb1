//! Append-only per-destination output files with daily rotation.

use crate::domain::errors::SinkError;
use crate::domain::ports::Clock;
use crate::infrastructure::observability::Metrics;
use chrono::NaiveDate;
use std::fs::{self, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, error, info};

/// One formatted row waiting for its destination file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRow {
    pub file: PathBuf,
    pub row: String,
}

/// Outcome of a single flush.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct FlushReport {
    pub rows_written: usize,
    pub files_written: usize,
    pub files_failed: usize,
    pub files_rotated: usize,
}

pub struct FileSink {
    clock: Arc<dyn Clock>,
    metrics: Metrics,
    last_flush_day: NaiveDate,
}

impl FileSink {
    pub fn new(clock: Arc<dyn Clock>, metrics: Metrics) -> Self {
        let last_flush_day = clock.now().date_naive();
        Self {
            clock,
            metrics,
            last_flush_day,
        }
    }

    pub fn last_flush_day(&self) -> NaiveDate {
        self.last_flush_day
    }

    /// Write `rows` grouped by file, each file in enqueue order, then rotate
    /// every file in `known_files` if the calendar day changed since the last
    /// flush. Rows that fail to write are dropped.
    pub fn flush(&mut self, rows: Vec<PendingRow>, known_files: &[PathBuf]) -> FlushReport {
        let mut report = FlushReport::default();
        debug!("FileSink: Writing {} rows to file(s)", rows.len());

        for (path, lines) in group_by_file(rows) {
            match append_lines(&path, &lines) {
                Ok(()) => {
                    report.rows_written += lines.len();
                    report.files_written += 1;
                }
                Err(e) => {
                    error!("FileSink: {}", e);
                    report.files_failed += 1;
                }
            }
        }
        self.metrics.rows_flushed_total.inc_by(report.rows_written as u64);

        let today = self.clock.now().date_naive();
        if today != self.last_flush_day {
            report.files_rotated = self.rotate(today, known_files);
        }
        self.last_flush_day = today;

        report
    }

    fn rotate(&self, today: NaiveDate, known_files: &[PathBuf]) -> usize {
        let Some(yesterday) = today.pred_opt() else {
            return 0;
        };
        info!("FileSink: Day changed, rotating output files as of {}", yesterday);

        let mut rotated = 0;
        let mut seen: Vec<&PathBuf> = Vec::new();
        for path in known_files {
            if seen.contains(&path) {
                continue;
            }
            seen.push(path);

            if !path.exists() {
                continue;
            }
            match rotate_file(path, yesterday) {
                Ok(target) => {
                    info!("FileSink: Rotated {:?} -> {:?}", path, target);
                    rotated += 1;
                }
                Err(e) => error!("FileSink: {}", e),
            }
        }
        self.metrics.file_rotations_total.inc_by(rotated as u64);
        rotated
    }
}

fn group_by_file(rows: Vec<PendingRow>) -> Vec<(PathBuf, Vec<String>)> {
    let mut groups: Vec<(PathBuf, Vec<String>)> = Vec::new();
    for PendingRow { file, row } in rows {
        match groups.iter_mut().find(|(path, _)| *path == file) {
            Some((_, lines)) => lines.push(row),
            None => groups.push((file, vec![row])),
        }
    }
    groups
}

fn append_lines(path: &Path, lines: &[String]) -> Result<(), SinkError> {
    let to_sink_error = |source| SinkError::FileWrite {
        path: path.to_path_buf(),
        source,
    };

    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(to_sink_error)?;
    let mut writer = BufWriter::new(file);
    for line in lines {
        writeln!(writer, "{}", line).map_err(to_sink_error)?;
    }
    writer.flush().map_err(to_sink_error)
}

/// `name.ext` becomes `name.<yy-MM-dd>.ext`; files without an extension get
/// the date appended.
pub fn rotated_path(path: &Path, day: NaiveDate) -> PathBuf {
    let stamp = day.format("%y-%m-%d").to_string();
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match path.extension() {
        Some(ext) => format!("{}.{}.{}", stem, stamp, ext.to_string_lossy()),
        None => format!("{}.{}", stem, stamp),
    };
    path.with_file_name(name)
}

fn rotate_file(path: &Path, day: NaiveDate) -> Result<PathBuf, SinkError> {
    let target = rotated_path(path, day);
    let to_sink_error = |source| SinkError::FileRotate {
        path: path.to_path_buf(),
        source,
    };

    if target.exists() {
        return Err(to_sink_error(std::io::Error::new(
            std::io::ErrorKind::AlreadyExists,
            format!("rotation target {:?} already exists", target),
        )));
    }
    fs::rename(path, &target).map_err(to_sink_error)?;
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::infrastructure::clock::ManualClock;
    use chrono::{Local, TimeZone};
    use std::time::Duration;

    fn temp_dir(name: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "datacollector-filesink-{}-{}",
            name,
            std::process::id()
        ));
        let _ = fs::remove_dir_all(&dir);
        fs::create_dir_all(&dir).unwrap();
        dir
    }

    fn row(file: &Path, text: &str) -> PendingRow {
        PendingRow {
            file: file.to_path_buf(),
            row: text.to_string(),
        }
    }

    #[test]
    fn test_rotated_path() {
        let day = NaiveDate::from_ymd_opt(2026, 4, 9).unwrap();
        assert_eq!(
            rotated_path(Path::new("/var/log/cpu.txt"), day),
            PathBuf::from("/var/log/cpu.26-04-09.txt")
        );
        assert_eq!(
            rotated_path(Path::new("memory"), day),
            PathBuf::from("memory.26-04-09")
        );
    }

    #[test]
    fn test_flush_groups_rows_per_file_in_order() {
        let dir = temp_dir("group");
        let a = dir.join("a.txt");
        let b = dir.join("b.txt");
        let clock = ManualClock::new(Local.with_ymd_and_hms(2026, 4, 9, 10, 0, 0).unwrap());
        let mut sink = FileSink::new(Arc::new(clock), Metrics::new().unwrap());

        let rows = vec![row(&a, "a1"), row(&b, "b1"), row(&a, "a2")];
        let report = sink.flush(rows, &[a.clone(), b.clone()]);

        assert_eq!(report.rows_written, 3);
        assert_eq!(report.files_written, 2);
        assert_eq!(report.files_rotated, 0);
        assert_eq!(fs::read_to_string(&a).unwrap(), "a1\na2\n");
        assert_eq!(fs::read_to_string(&b).unwrap(), "b1\n");
    }

    #[test]
    fn test_failed_file_does_not_block_others() {
        let dir = temp_dir("partial");
        let good = dir.join("good.txt");
        let bad = dir.join("no-such-dir").join("bad.txt");
        let clock = ManualClock::new(Local.with_ymd_and_hms(2026, 4, 9, 10, 0, 0).unwrap());
        let mut sink = FileSink::new(Arc::new(clock), Metrics::new().unwrap());

        let report = sink.flush(vec![row(&bad, "x"), row(&good, "y")], &[]);
        assert_eq!(report.files_failed, 1);
        assert_eq!(report.rows_written, 1);
        assert_eq!(fs::read_to_string(&good).unwrap(), "y\n");
    }

    #[test]
    fn test_day_change_rotates_every_known_file_once() {
        let dir = temp_dir("rotate");
        let written = dir.join("cpu.txt");
        let idle = dir.join("memory.txt");
        let never_created = dir.join("disk.txt");
        let clock = ManualClock::new(Local.with_ymd_and_hms(2026, 4, 9, 23, 59, 0).unwrap());
        let mut sink = FileSink::new(Arc::new(clock.clone()), Metrics::new().unwrap());
        let known = vec![written.clone(), idle.clone(), never_created.clone(), written.clone()];

        sink.flush(vec![row(&written, "day one"), row(&idle, "idle one")], &known);

        clock.advance(Duration::from_secs(120));
        let report = sink.flush(vec![row(&written, "day two")], &known);

        assert_eq!(report.files_rotated, 2);
        let yesterday = NaiveDate::from_ymd_opt(2026, 4, 9).unwrap();
        assert_eq!(
            fs::read_to_string(rotated_path(&written, yesterday)).unwrap(),
            "day one\nday two\n"
        );
        assert!(rotated_path(&idle, yesterday).exists());
        assert!(!written.exists());
        assert!(!never_created.exists());
        assert_eq!(sink.last_flush_day(), NaiveDate::from_ymd_opt(2026, 4, 10).unwrap());

        // Same day again: nothing more to rotate
        let report = sink.flush(vec![row(&written, "later")], &known);
        assert_eq!(report.files_rotated, 0);
        assert_eq!(fs::read_to_string(&written).unwrap(), "later\n");
    }
}

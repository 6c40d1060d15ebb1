//! Push-based metrics reporter for the collector
//!
//! Periodically outputs the collector's own counters as structured JSON to stdout.
//! Never accepts requests.

use crate::infrastructure::observability::metrics::{Metrics, TickOutcome};
use serde::Serialize;
use std::time::{Duration, Instant};
use tracing::{info, warn};

/// Metrics snapshot for JSON output
#[derive(Serialize)]
pub struct MetricsSnapshot {
    pub timestamp: String,
    pub uptime_seconds: u64,
    pub version: String,
    pub ticks: TickSnapshot,
    pub pipeline: PipelineSnapshot,
}

#[derive(Serialize)]
pub struct TickSnapshot {
    pub run: u64,
    pub skipped: u64,
    pub idle: u64,
    pub aborted: u64,
}

#[derive(Serialize)]
pub struct PipelineSnapshot {
    pub samples: u64,
    pub samples_unavailable: u64,
    pub rows_flushed: u64,
    pub file_rotations: u64,
    pub search_dispatches_ok: u64,
    pub search_dispatches_failed: u64,
    pub config_reloads_ok: u64,
    pub config_reloads_failed: u64,
}

/// Push-based metrics reporter
pub struct MetricsReporter {
    metrics: Metrics,
    start_time: Instant,
    interval: Duration,
}

impl MetricsReporter {
    /// Create a new metrics reporter
    ///
    /// # Arguments
    /// * `metrics` - Collector metrics to report
    /// * `interval_seconds` - How often to output metrics
    pub fn new(metrics: Metrics, interval_seconds: u64) -> Self {
        Self {
            metrics,
            start_time: Instant::now(),
            interval: Duration::from_secs(interval_seconds.max(1)),
        }
    }

    /// Run the reporter in a loop, outputting metrics periodically
    pub async fn run(self) {
        info!(
            "MetricsReporter: Starting push-based metrics (interval: {:?})",
            self.interval
        );

        loop {
            tokio::time::sleep(self.interval).await;

            let snapshot = self.collect_snapshot();
            match serde_json::to_string(&snapshot) {
                Ok(json) => {
                    // Prefix so logs can be easily filtered
                    println!("METRICS_JSON:{}", json);
                    info!(
                        "Samples: {} | Ticks run/skipped: {}/{} | Uptime: {}s",
                        snapshot.pipeline.samples,
                        snapshot.ticks.run,
                        snapshot.ticks.skipped,
                        snapshot.uptime_seconds
                    );
                }
                Err(e) => warn!("Failed to serialize metrics: {}", e),
            }
        }
    }

    fn collect_snapshot(&self) -> MetricsSnapshot {
        let m = &self.metrics;
        let status = |vec: &prometheus::IntCounterVec, label: &str| {
            vec.with_label_values(&[label]).get()
        };

        MetricsSnapshot {
            timestamp: chrono::Utc::now().to_rfc3339(),
            uptime_seconds: self.start_time.elapsed().as_secs(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            ticks: TickSnapshot {
                run: m.tick_count(TickOutcome::Run),
                skipped: m.tick_count(TickOutcome::Skipped),
                idle: m.tick_count(TickOutcome::Idle),
                aborted: m.tick_count(TickOutcome::Aborted),
            },
            pipeline: PipelineSnapshot {
                samples: m.samples_total.get(),
                samples_unavailable: m.samples_unavailable_total.get(),
                rows_flushed: m.rows_flushed_total.get(),
                file_rotations: m.file_rotations_total.get(),
                search_dispatches_ok: status(&m.search_dispatches_total, "ok"),
                search_dispatches_failed: status(&m.search_dispatches_total, "error"),
                config_reloads_ok: status(&m.config_reloads_total, "ok"),
                config_reloads_failed: status(&m.config_reloads_total, "error"),
            },
        }
    }
}

//! Prometheus metrics definitions for the collector
//!
//! All metrics use the `datacollector_` prefix. They track the collector itself,
//! not the counters it samples.

use prometheus::{IntCounter, IntCounterVec, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Outcome of one scheduler tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Counters were checked (possibly none were due).
    Run,
    /// The gate was held by another tick or by stop/shutdown.
    Skipped,
    /// The collector is not running.
    Idle,
    /// A config or collection error ended the tick early.
    Aborted,
}

impl TickOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            TickOutcome::Run => "run",
            TickOutcome::Skipped => "skipped",
            TickOutcome::Idle => "idle",
            TickOutcome::Aborted => "aborted",
        }
    }
}

/// Internal metrics for the collection pipeline
#[derive(Clone)]
pub struct Metrics {
    registry: Arc<Registry>,
    /// Ticks by outcome
    pub ticks_total: IntCounterVec,
    /// Samples produced
    pub samples_total: IntCounter,
    /// Samples swallowed because the source was unavailable
    pub samples_unavailable_total: IntCounter,
    /// Rows written to output files
    pub rows_flushed_total: IntCounter,
    /// Output file rotations
    pub file_rotations_total: IntCounter,
    /// Search dispatches by status (ok, error)
    pub search_dispatches_total: IntCounterVec,
    /// Counter config reloads by status (ok, error)
    pub config_reloads_total: IntCounterVec,
}

impl Metrics {
    /// Create a new Metrics instance with all counters registered
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let ticks_total = IntCounterVec::new(
            Opts::new("datacollector_ticks_total", "Scheduler ticks by outcome"),
            &["outcome"],
        )?;
        registry.register(Box::new(ticks_total.clone()))?;

        let samples_total = IntCounter::with_opts(Opts::new(
            "datacollector_samples_total",
            "Counter samples produced",
        ))?;
        registry.register(Box::new(samples_total.clone()))?;

        let samples_unavailable_total = IntCounter::with_opts(Opts::new(
            "datacollector_samples_unavailable_total",
            "Samples skipped because the counter source was unavailable",
        ))?;
        registry.register(Box::new(samples_unavailable_total.clone()))?;

        let rows_flushed_total = IntCounter::with_opts(Opts::new(
            "datacollector_rows_flushed_total",
            "Rows written to output files",
        ))?;
        registry.register(Box::new(rows_flushed_total.clone()))?;

        let file_rotations_total = IntCounter::with_opts(Opts::new(
            "datacollector_file_rotations_total",
            "Output files rotated at day change",
        ))?;
        registry.register(Box::new(file_rotations_total.clone()))?;

        let search_dispatches_total = IntCounterVec::new(
            Opts::new(
                "datacollector_search_dispatches_total",
                "Bulk dispatches to the search backend by status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(search_dispatches_total.clone()))?;

        let config_reloads_total = IntCounterVec::new(
            Opts::new(
                "datacollector_config_reloads_total",
                "Counter config reloads by status",
            ),
            &["status"],
        )?;
        registry.register(Box::new(config_reloads_total.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            ticks_total,
            samples_total,
            samples_unavailable_total,
            rows_flushed_total,
            file_rotations_total,
            search_dispatches_total,
            config_reloads_total,
        })
    }

    /// Render all metrics in Prometheus text format
    pub fn render(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        encoder
            .encode_to_string(&metric_families)
            .unwrap_or_default()
    }

    pub fn record_tick(&self, outcome: TickOutcome) {
        self.ticks_total.with_label_values(&[outcome.as_str()]).inc();
    }

    pub fn tick_count(&self, outcome: TickOutcome) -> u64 {
        self.ticks_total.with_label_values(&[outcome.as_str()]).get()
    }

    pub fn record_search_dispatch(&self, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        self.search_dispatches_total
            .with_label_values(&[status])
            .inc();
    }

    pub fn record_config_reload(&self, ok: bool) {
        let status = if ok { "ok" } else { "error" };
        self.config_reloads_total.with_label_values(&[status]).inc();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_creation() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.samples_total.inc();
        assert!(metrics.render().contains("datacollector_"));
    }

    #[test]
    fn test_tick_outcomes_are_labelled() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.record_tick(TickOutcome::Run);
        metrics.record_tick(TickOutcome::Skipped);
        metrics.record_tick(TickOutcome::Skipped);

        assert_eq!(metrics.tick_count(TickOutcome::Run), 1);
        assert_eq!(metrics.tick_count(TickOutcome::Skipped), 2);
        assert_eq!(metrics.tick_count(TickOutcome::Aborted), 0);

        let output = metrics.render();
        assert!(output.contains("outcome=\"skipped\""));
    }

    #[test]
    fn test_dispatch_and_reload_counters() {
        let metrics = Metrics::new().expect("Failed to create metrics");
        metrics.record_search_dispatch(false);
        metrics.record_config_reload(true);
        let output = metrics.render();
        assert!(output.contains("datacollector_search_dispatches_total"));
        assert!(output.contains("datacollector_config_reloads_total"));
    }
}

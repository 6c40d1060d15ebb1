use crate::application::batcher::ResultBatcher;
use crate::application::collection_engine::CollectionEngine;
use crate::application::config_store::{ConfigStore, output_files};
use crate::domain::errors::CollectorError;
use crate::domain::ports::Clock;
use crate::infrastructure::clock::elapsed_between;
use crate::infrastructure::observability::{Metrics, TickOutcome};
use chrono::{DateTime, Local};
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, Weak};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Fixed scheduling period.
pub const TICK_PERIOD: Duration = Duration::from_millis(200);

/// What a tick does when a counter fails with anything other than
/// "source unavailable".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CollectionErrorPolicy {
    /// Drop the tick's results and leave the remaining counters untouched.
    #[default]
    Abort,
    /// Log the failure, mark the counter as collected and keep going.
    Continue,
}

impl FromStr for CollectionErrorPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "abort" => Ok(CollectionErrorPolicy::Abort),
            "continue" => Ok(CollectionErrorPolicy::Continue),
            other => Err(format!("unknown collection error policy '{}'", other)),
        }
    }
}

/// State touched by a tick. Guarded by the collector's gate.
struct Pipeline {
    config_store: ConfigStore,
    engine: CollectionEngine,
    batcher: ResultBatcher,
    last_collected: HashMap<String, DateTime<Local>>,
}

/// Periodic collector: fires every tick period, samples the counters that are
/// due and hands the results to the batcher.
///
/// Ticks never overlap. A tick that finds the gate held (previous tick still
/// in flight, or a stop in progress) is skipped, not queued.
pub struct Collector {
    gate: AsyncMutex<Pipeline>,
    running: AtomicBool,
    ticker: Mutex<Option<JoinHandle<()>>>,
    policy: CollectionErrorPolicy,
    tick_period: Duration,
    clock: Arc<dyn Clock>,
    metrics: Metrics,
}

impl Collector {
    pub fn new(
        config_store: ConfigStore,
        engine: CollectionEngine,
        batcher: ResultBatcher,
        policy: CollectionErrorPolicy,
        clock: Arc<dyn Clock>,
        metrics: Metrics,
    ) -> Self {
        Self {
            gate: AsyncMutex::new(Pipeline {
                config_store,
                engine,
                batcher,
                last_collected: HashMap::new(),
            }),
            running: AtomicBool::new(false),
            ticker: Mutex::new(None),
            policy,
            tick_period: TICK_PERIOD,
            clock,
            metrics,
        }
    }

    pub fn with_tick_period(mut self, period: Duration) -> Self {
        self.tick_period = period;
        self
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Begin ticking. Creates the search collection first when search output
    /// is enabled; a failure there leaves the collector stopped.
    pub async fn start(self: &Arc<Self>) -> Result<(), CollectorError> {
        let mut pipeline = self.gate.lock().await;
        if self.is_running() {
            return Err(CollectorError::AlreadyRunning);
        }

        if pipeline.batcher.search_enabled() {
            pipeline
                .batcher
                .ensure_collection()
                .await
                .map_err(CollectorError::SearchSetup)?;
        }

        self.running.store(true, Ordering::SeqCst);
        let handle = tokio::spawn(run_ticker(Arc::downgrade(self), self.tick_period));
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(previous) = ticker.replace(handle) {
                previous.abort();
            }
        }
        drop(pipeline);

        info!("Collector started. Tick period: {:?}", self.tick_period);
        Ok(())
    }

    /// Halt ticking. Waits for an in-flight tick to finish; safe to call
    /// repeatedly.
    pub async fn stop(&self) {
        let _gate = self.gate.lock().await;
        let was_running = self.running.swap(false, Ordering::SeqCst);
        if let Ok(mut ticker) = self.ticker.lock() {
            if let Some(handle) = ticker.take() {
                handle.abort();
            }
        }
        if was_running {
            info!("Collector stopped.");
        }
    }

    /// Stop, write out rows still waiting for the file threshold and release
    /// every sampling handle.
    pub async fn shutdown(&self) {
        self.stop().await;

        let mut pipeline = self.gate.lock().await;
        let pipeline = &mut *pipeline;
        let files = output_files(&pipeline.config_store.cached());
        if let Some(report) = pipeline.batcher.flush_pending(&files) {
            info!(
                "Collector: Flushed {} pending rows to {} file(s) on shutdown",
                report.rows_written, report.files_written
            );
        }
        pipeline.engine.release_handles();
    }

    /// Run one tick now.
    pub async fn tick(&self) -> TickOutcome {
        let outcome = self.run_tick().await;
        self.metrics.record_tick(outcome);
        outcome
    }

    async fn run_tick(&self) -> TickOutcome {
        let Ok(mut guard) = self.gate.try_lock() else {
            debug!("Collector: Previous tick still running, skipping");
            return TickOutcome::Skipped;
        };
        if !self.is_running() {
            return TickOutcome::Idle;
        }
        let pipeline = &mut *guard;

        let counters = match pipeline.config_store.current() {
            Ok(counters) => counters,
            Err(e) => {
                error!("Collector: {}", CollectorError::from(e));
                return TickOutcome::Aborted;
            }
        };

        let now = self.clock.now();
        let mut results = Vec::new();
        for config in counters.iter() {
            let key = config.identity().key();
            let due = match pipeline.last_collected.get(&key) {
                Some(last) => elapsed_between(*last, now) > config.check_frequency,
                None => true,
            };
            if !due {
                continue;
            }

            match pipeline.engine.collect(config) {
                Ok(result) => results.push(result),
                Err(e) if e.is_unavailable() => {
                    debug!("Collector: {} skipped: {}", key, e);
                    self.metrics.samples_unavailable_total.inc();
                }
                Err(e) => {
                    let failure = CollectorError::Sample {
                        counter: key.clone(),
                        source: e,
                    };
                    match self.policy {
                        CollectionErrorPolicy::Abort => {
                            error!(
                                "Collector: {}. Dropping {} results gathered this tick",
                                failure,
                                results.len()
                            );
                            return TickOutcome::Aborted;
                        }
                        CollectionErrorPolicy::Continue => {
                            warn!("Collector: {}", failure);
                        }
                    }
                }
            }
            pipeline.last_collected.insert(key, now);
        }

        if !results.is_empty() {
            self.metrics.samples_total.inc_by(results.len() as u64);
            let files = output_files(&counters);
            pipeline.batcher.record(results, &files).await;
        }
        TickOutcome::Run
    }
}

/// Fires a tick every `period`, first one a full period after start. Each
/// tick runs on its own task so a slow tick makes the next ones skip.
async fn run_ticker(collector: Weak<Collector>, period: Duration) {
    let mut interval = time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        let Some(collector) = collector.upgrade() else {
            break;
        };
        tokio::spawn(async move {
            collector.tick().await;
        });
    }
}

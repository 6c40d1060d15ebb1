//! Push-based observability for the collector
//!
//! Internal counters are kept in a Prometheus registry and pushed as
//! structured JSON logs to stdout. Nothing listens for incoming requests.

pub mod metrics;
pub mod reporter;

pub use metrics::{Metrics, TickOutcome};
pub use reporter::MetricsReporter;

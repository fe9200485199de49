//! Observability infrastructure
//!
//! Process logging setup and the background task that pushes local metric
//! deltas into the shared store.

pub mod logging;
pub mod metrics_flusher;

pub use logging::{init_logging, LoggingConfig};
pub use metrics_flusher::MetricsFlusher;

//! # Postgate Infrastructure
//!
//! Process-level plumbing for publishing workers.
//!
//! This crate contains:
//! - Configuration loading (environment variables, TOML/JSON files)
//! - Logging setup
//! - The background metrics flusher
//! - The queue-driven publish worker
//!
//! ## Architecture
//! - Drives the orchestrator defined in `postgate-core`
//! - Builds the resilience components from `postgate-common`
//! - Contains all process lifecycle code (spawned tasks, shutdown)

pub mod config;
pub mod errors;
pub mod observability;
pub mod worker;

// Re-export commonly used items
pub use config::PostgateConfig;
pub use errors::InfraError;
pub use observability::{init_logging, LoggingConfig, MetricsFlusher};
pub use worker::{PublishWorker, WorkerConfig, WorkerError, WorkerResult};

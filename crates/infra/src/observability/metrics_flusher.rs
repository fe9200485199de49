//! Periodic metrics flush into the shared store.
//!
//! Every `flush_interval` the flusher pushes the collector's counter deltas
//! into the shared hash so other workers see them in aggregated views. A
//! failed flush is logged and its deltas are retried on the next tick. On
//! [`MetricsFlusher::stop`] one final flush runs so a clean shutdown loses
//! nothing.
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use postgate_common::{InMemoryStore, MetricsCollector, MetricsConfig, SharedStore};
//! use postgate_infra::observability::MetricsFlusher;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store: Arc<dyn SharedStore> = Arc::new(InMemoryStore::new());
//! let collector = Arc::new(MetricsCollector::new(MetricsConfig::default())?);
//!
//! let mut flusher = MetricsFlusher::new(collector, store);
//! flusher.start()?;
//! // ... worker runs ...
//! flusher.stop().await?;
//! # Ok(())
//! # }
//! ```

use std::sync::Arc;
use std::time::Duration;

use postgate_common::{Clock, MetricsCollector, SharedStore, SystemClock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::worker::{WorkerError, WorkerResult};

const DEFAULT_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Background flush task with explicit lifecycle management
pub struct MetricsFlusher<C: Clock = SystemClock> {
    collector: Arc<MetricsCollector<C>>,
    store: Arc<dyn SharedStore>,
    join_timeout: Duration,
    cancellation: CancellationToken,
    handle: Option<JoinHandle<()>>,
}

impl<C: Clock> MetricsFlusher<C> {
    pub fn new(collector: Arc<MetricsCollector<C>>, store: Arc<dyn SharedStore>) -> Self {
        Self {
            collector,
            store,
            join_timeout: DEFAULT_JOIN_TIMEOUT,
            cancellation: CancellationToken::new(),
            handle: None,
        }
    }

    /// Bound on waiting for the task, including its final flush, in `stop`.
    pub fn with_join_timeout(mut self, timeout: Duration) -> Self {
        self.join_timeout = timeout;
        self
    }

    /// Spawn the flush loop.
    ///
    /// Returns `Ok(false)` without spawning anything when metrics are
    /// disabled.
    #[instrument(skip(self))]
    pub fn start(&mut self) -> WorkerResult<bool> {
        if self.is_running() {
            return Err(WorkerError::AlreadyRunning);
        }
        if !self.collector.is_enabled() {
            debug!("Metrics disabled, flusher not started");
            return Ok(false);
        }

        self.cancellation = CancellationToken::new();
        let cancel = self.cancellation.clone();
        let collector = Arc::clone(&self.collector);
        let store = Arc::clone(&self.store);

        self.handle = Some(tokio::spawn(async move {
            Self::flush_loop(cancel, collector, store).await;
        }));

        info!(
            interval_ms = self.collector.config().flush_interval.as_millis() as u64,
            "Metrics flusher started"
        );
        Ok(true)
    }

    /// Cancel the loop, wait for the final flush, and join the task.
    #[instrument(skip(self))]
    pub async fn stop(&mut self) -> WorkerResult<()> {
        let Some(handle) = self.handle.take() else {
            return Err(WorkerError::NotRunning);
        };

        self.cancellation.cancel();

        let join_timeout = self.join_timeout;
        tokio::time::timeout(join_timeout, handle)
            .await
            .map_err(|_| WorkerError::Timeout { duration: join_timeout })?
            .map_err(|err| WorkerError::TaskJoinFailed(err.to_string()))?;

        info!("Metrics flusher stopped");
        Ok(())
    }

    /// Returns true when the flush task is active.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|handle| !handle.is_finished())
    }

    async fn flush_loop(
        cancel: CancellationToken,
        collector: Arc<MetricsCollector<C>>,
        store: Arc<dyn SharedStore>,
    ) {
        let period = collector.config().flush_interval;
        let mut ticker = tokio::time::interval_at(tokio::time::Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    debug!("Metrics flusher cancelled");
                    break;
                }
                _ = ticker.tick() => {
                    Self::flush_once(&collector, store.as_ref()).await;
                }
            }
        }

        Self::flush_once(&collector, store.as_ref()).await;
    }

    async fn flush_once(collector: &MetricsCollector<C>, store: &dyn SharedStore) {
        match collector.flush(store).await {
            Ok(report) if report.is_empty() => {}
            Ok(report) => {
                debug!(fields = report.deltas.len(), trimmed = report.trimmed, "Metrics flushed");
            }
            Err(err) => warn!(error = %err, "Metrics flush failed, deltas kept for next tick"),
        }
    }
}

impl<C: Clock> Drop for MetricsFlusher<C> {
    fn drop(&mut self) {
        if self.is_running() {
            warn!("MetricsFlusher dropped while running; cancelling task");
            self.cancellation.cancel();
        }
    }
}

//! Capacity monitor
//!
//! A long-lived loop that periodically measures the store's
//! as-if-compressed footprint and record count, publishes a report, and
//! evicts the oldest 20% when either threshold is crossed. Ticks run on
//! the blocking pool; interval ticks that elapse meanwhile are lost, and
//! ticks that land while an eviction is still in flight are skipped
//! entirely, not queued.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::compress::compressed_len;
use crate::config::CapacityConfig;
use crate::error::LogStoreError;
use crate::store::LogStore;

/// One capacity measurement over the full record set
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CapacityReport {
    /// Sum of per-record compressed sizes, in MB
    pub size_in_mb: f64,
    /// Record count
    pub count: u64,
}

/// Records to evict for a given count: `floor(min(count * 0.2, rolling))`
pub fn delete_count_for(count: u64, rolling_delete_count: u64) -> u64 {
    (count as f64 * 0.2).min(rolling_delete_count as f64).floor() as u64
}

/// Scan and eviction state shared with in-flight ticks
struct MonitorInner {
    store: Arc<LogStore>,
    config: CapacityConfig,
    /// Set while an eviction batch is in flight; ticks landing then are
    /// skipped, and no second batch is started.
    evicting: AtomicBool,
    report_tx: watch::Sender<Option<CapacityReport>>,
}

/// The capacity monitor background task
pub struct CapacityMonitor {
    inner: Arc<MonitorInner>,
    shutdown_rx: broadcast::Receiver<()>,
}

impl CapacityMonitor {
    /// Spawn the monitor loop
    pub fn spawn(
        store: Arc<LogStore>,
        config: CapacityConfig,
        report_tx: watch::Sender<Option<CapacityReport>>,
        shutdown_rx: broadcast::Receiver<()>,
    ) -> JoinHandle<()> {
        let monitor = Self {
            inner: Arc::new(MonitorInner {
                store,
                config,
                evicting: AtomicBool::new(false),
                report_tx,
            }),
            shutdown_rx,
        };
        tokio::spawn(async move {
            monitor.run().await;
        })
    }

    /// Run the scan loop until shutdown
    async fn run(mut self) {
        info!(
            interval_secs = self.inner.config.scan_interval.as_secs(),
            max_count = self.inner.config.max_count,
            max_size_mb = self.inner.config.max_size_mb,
            "Capacity monitor started"
        );

        let mut interval = tokio::time::interval(self.inner.config.scan_interval);
        // Ticks that elapse during a slow scan are lost, not fired in a
        // burst afterwards.
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Capacity monitor shutting down");
                    break;
                }
                _ = interval.tick() => {
                    if self.inner.evicting.load(Ordering::Acquire) {
                        debug!("Eviction in flight, skipping scan tick");
                        continue;
                    }
                    // Per-record compression is CPU work; keep it off the
                    // runtime worker threads. Errors end the tick; the
                    // loop itself never terminates on error.
                    let inner = Arc::clone(&self.inner);
                    tokio::task::spawn_blocking(move || {
                        if let Err(e) = inner.tick() {
                            warn!(error = %e, "Capacity tick failed");
                        }
                    });
                }
            }
        }
    }
}

impl MonitorInner {
    /// One scan, and an eviction if either threshold is crossed
    fn tick(&self) -> Result<(), LogStoreError> {
        let report = match self.scan() {
            Ok(report) => report,
            Err(e) => {
                let _ = self.report_tx.send(None);
                return Err(e);
            }
        };
        let _ = self.report_tx.send(Some(report));

        debug!(
            size_in_mb = report.size_in_mb,
            count = report.count,
            "Capacity scan complete"
        );

        if !self.over_threshold(&report) {
            return Ok(());
        }

        let delete_count = delete_count_for(report.count, self.config.rolling_delete_count);

        // One eviction batch at a time; a scan that raced an in-flight
        // eviction leaves the batch to it.
        if self
            .evicting
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Eviction already in flight, not starting another batch");
            return Ok(());
        }

        info!(
            count = report.count,
            size_in_mb = report.size_in_mb,
            delete_count = delete_count,
            "Capacity threshold exceeded, evicting oldest records"
        );

        let result = self.store.delete_top_n(delete_count);
        self.evicting.store(false, Ordering::Release);

        let deleted = result?;
        info!(deleted = deleted, "Eviction complete");
        Ok(())
    }

    /// Cursor over all records, compressing each individually
    ///
    /// Measures the footprint as-if-compressed, matching the quota
    /// semantics of the export size limit, not the bytes actually stored.
    fn scan(&self) -> Result<CapacityReport, LogStoreError> {
        self.store.open()?;

        let mut total_compressed = 0usize;
        let mut count = 0u64;
        self.store
            .find_all_in_chunks(self.config.chunk_size, |chunk| {
                for record in chunk {
                    total_compressed += compressed_len(record.line.as_bytes())?;
                    count += 1;
                }
                Ok(())
            })?;

        Ok(CapacityReport {
            size_in_mb: total_compressed as f64 / (1024.0 * 1024.0),
            count,
        })
    }

    fn over_threshold(&self, report: &CapacityReport) -> bool {
        report.count > self.config.max_count || report.size_in_mb > self.config.max_size_mb
    }
}

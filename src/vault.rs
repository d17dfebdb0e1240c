//! The vault facade
//!
//! Single entry point owning the store configuration and the lifecycle of
//! the three background tasks. Appends are fire-and-forget and never
//! block the caller; retrieval and export reply through oneshot channels.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::config::VaultConfig;
use crate::error::LogStoreError;
use crate::export::{ExportArtifact, ExportRequest, ExportWorker};
use crate::ingest::{IngestRequest, IngestWorker};
use crate::monitor::{CapacityMonitor, CapacityReport};
use crate::store::LogStore;

const REQUEST_QUEUE_DEPTH: usize = 256;

/// Capacity-bounded persistent log store with out-of-band workers
///
/// An explicit context object: construct one per store configuration and
/// hold it for the lifetime of the logging subsystem. Dropping it without
/// [`shutdown`](LogVault::shutdown) detaches the workers; they stop when
/// their channels close.
pub struct LogVault {
    store: Arc<LogStore>,
    ingest_tx: mpsc::Sender<IngestRequest>,
    export_tx: mpsc::Sender<ExportRequest>,
    report_rx: watch::Receiver<Option<CapacityReport>>,
    shutdown_tx: broadcast::Sender<()>,
    workers: Vec<JoinHandle<()>>,
}

impl LogVault {
    /// Configure the store and spawn the ingestion, monitor and export
    /// tasks
    ///
    /// The store itself is opened lazily by the workers, so a schema
    /// version conflict on disk does not fail construction; ingestion
    /// self-heals it by recreating the database. Must be called within a
    /// tokio runtime.
    pub fn open(config: VaultConfig) -> Result<Self, LogStoreError> {
        let store = Arc::new(LogStore::new());
        store.configure(config.store)?;

        let (shutdown_tx, _) = broadcast::channel(1);
        let (ingest_tx, ingest_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let (export_tx, export_rx) = mpsc::channel(REQUEST_QUEUE_DEPTH);
        let (report_tx, report_rx) = watch::channel(None);

        let workers = vec![
            IngestWorker::spawn(
                store.clone(),
                config.capacity.chunk_size,
                shutdown_tx.subscribe(),
                ingest_rx,
            ),
            CapacityMonitor::spawn(
                store.clone(),
                config.capacity,
                report_tx,
                shutdown_tx.subscribe(),
            ),
            ExportWorker::spawn(config.export, shutdown_tx.subscribe(), export_rx),
        ];

        info!("Log vault opened");
        Ok(Self {
            store,
            ingest_tx,
            export_tx,
            report_rx,
            shutdown_tx,
            workers,
        })
    }

    /// Append one log line without blocking
    ///
    /// The line is handed to the ingestion task; if its queue is full or
    /// the worker is gone, the line is dropped with a warning. Failures
    /// are never surfaced to the caller.
    pub fn append(&self, line: impl Into<String>) {
        let request = IngestRequest::Append { line: line.into() };
        if let Err(e) = self.ingest_tx.try_send(request) {
            warn!(error = %e, "Dropped log line");
        }
    }

    /// All records as one compressed zlib stream of newline-joined lines
    pub async fn retrieve_all_compressed(&self) -> Result<Bytes, LogStoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.ingest_tx
            .send(IngestRequest::RetrieveAll { reply: reply_tx })
            .await
            .map_err(|_| LogStoreError::worker_gone("ingest"))?;
        reply_rx
            .await
            .map_err(|_| LogStoreError::worker_gone("ingest"))?
    }

    /// Delete the oldest `n` records, bypassing the monitor
    ///
    /// Caller-initiated rotation straight against the store.
    pub fn delete_top_n(&self, n: u64) -> Result<u64, LogStoreError> {
        self.store.open()?;
        self.store.delete_top_n(n)
    }

    /// Retrieve all records, compress them and materialize the artifact
    pub async fn export_to_file(&self) -> Result<ExportArtifact, LogStoreError> {
        let payload = self.retrieve_all_compressed().await?;

        let (reply_tx, reply_rx) = oneshot::channel();
        self.export_tx
            .send(ExportRequest {
                payload,
                reply: reply_tx,
            })
            .await
            .map_err(|_| LogStoreError::worker_gone("export"))?;
        reply_rx
            .await
            .map_err(|_| LogStoreError::worker_gone("export"))?
    }

    /// Watch the capacity reports published by the monitor
    ///
    /// Holds `None` until the first scan completes; a scan failure resets
    /// it to `None`.
    pub fn capacity_reports(&self) -> watch::Receiver<Option<CapacityReport>> {
        self.report_rx.clone()
    }

    /// Direct handle to the underlying store
    pub fn store(&self) -> &Arc<LogStore> {
        &self.store
    }

    /// Stop all background tasks and wait for them to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(());
        for worker in self.workers {
            let _ = worker.await;
        }
        info!("Log vault shut down");
    }
}

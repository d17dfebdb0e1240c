//! Export task
//!
//! Turns an already-compressed payload into a retrievable artifact: a
//! named file in the export directory. Compression itself happens
//! upstream, chunk by chunk, so no task ever holds more than one chunk of
//! uncompressed records.

use std::path::PathBuf;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::config::ExportConfig;
use crate::error::LogStoreError;

/// Request to materialize one artifact
#[derive(Debug)]
pub struct ExportRequest {
    /// The compressed log stream
    pub payload: Bytes,
    /// Reply channel for the artifact reference
    pub reply: oneshot::Sender<Result<ExportArtifact, LogStoreError>>,
}

/// Reference to a materialized export artifact
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExportArtifact {
    /// Path of the artifact file
    pub path: PathBuf,
    /// Size of the artifact in bytes
    pub size_bytes: u64,
}

impl ExportArtifact {
    /// Revoke the reference by removing the artifact file
    pub async fn remove(self) -> Result<(), LogStoreError> {
        tokio::fs::remove_file(&self.path)
            .await
            .map_err(|e| LogStoreError::io(e.to_string()))
    }
}

/// The export background task
pub struct ExportWorker {
    config: ExportConfig,
    shutdown_rx: broadcast::Receiver<()>,
}

impl ExportWorker {
    /// Spawn the export task
    pub fn spawn(
        config: ExportConfig,
        shutdown_rx: broadcast::Receiver<()>,
        request_rx: mpsc::Receiver<ExportRequest>,
    ) -> JoinHandle<()> {
        let worker = Self {
            config,
            shutdown_rx,
        };
        tokio::spawn(async move {
            worker.run(request_rx).await;
        })
    }

    /// Run the request loop
    async fn run(mut self, mut request_rx: mpsc::Receiver<ExportRequest>) {
        info!("Export worker started");

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Export worker shutting down");
                    break;
                }
                Some(request) = request_rx.recv() => {
                    let result = self.materialize(request.payload).await;
                    if let Err(e) = &result {
                        error!(error = %e, "Failed to materialize export artifact");
                    }
                    let _ = request.reply.send(result);
                }
            }
        }
    }

    /// Write the payload to the configured artifact path
    async fn materialize(&self, payload: Bytes) -> Result<ExportArtifact, LogStoreError> {
        tokio::fs::create_dir_all(&self.config.dir)
            .await
            .map_err(|e| LogStoreError::io(e.to_string()))?;

        let path = self.config.dir.join(&self.config.file_name);
        tokio::fs::write(&path, &payload)
            .await
            .map_err(|e| LogStoreError::io(e.to_string()))?;

        debug!(
            path = %path.display(),
            size_bytes = payload.len(),
            "Materialized export artifact"
        );
        Ok(ExportArtifact {
            path,
            size_bytes: payload.len() as u64,
        })
    }
}

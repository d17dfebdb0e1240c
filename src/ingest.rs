//! Ingestion task
//!
//! Accepts append and retrieve-all requests over a channel so the
//! producer is never blocked by store I/O. A schema-version conflict on
//! open is self-healed by destroying and recreating the database; the
//! in-flight line is dropped in that case rather than retried.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use crate::compress::ChunkCompressor;
use crate::error::LogStoreError;
use crate::store::LogStore;

/// Requests accepted by the ingestion task
#[derive(Debug)]
pub enum IngestRequest {
    /// Append one log line; fire-and-forget
    Append {
        /// The formatted log line
        line: String,
    },
    /// Read all records and reply with one compressed stream
    RetrieveAll {
        /// Reply channel for the compressed bytes
        reply: oneshot::Sender<Result<Bytes, LogStoreError>>,
    },
}

/// The ingestion background task
pub struct IngestWorker {
    store: Arc<LogStore>,
    chunk_size: usize,
    shutdown_rx: broadcast::Receiver<()>,
}

impl IngestWorker {
    /// Spawn the ingestion task
    pub fn spawn(
        store: Arc<LogStore>,
        chunk_size: usize,
        shutdown_rx: broadcast::Receiver<()>,
        request_rx: mpsc::Receiver<IngestRequest>,
    ) -> JoinHandle<()> {
        let worker = Self {
            store,
            chunk_size,
            shutdown_rx,
        };
        tokio::spawn(async move {
            worker.run(request_rx).await;
        })
    }

    /// Run the request loop
    async fn run(mut self, mut request_rx: mpsc::Receiver<IngestRequest>) {
        info!("Ingest worker started");

        loop {
            tokio::select! {
                _ = self.shutdown_rx.recv() => {
                    info!("Ingest worker shutting down");
                    break;
                }
                Some(request) = request_rx.recv() => {
                    self.handle_request(request);
                }
            }
        }
    }

    fn handle_request(&self, request: IngestRequest) {
        match request {
            IngestRequest::Append { line } => {
                // Append failures are logged and dropped; the producer
                // never observes them.
                if let Err(e) = self.append(&line) {
                    error!(error = %e, "Failed to append log record");
                }
            }
            IngestRequest::RetrieveAll { reply } => {
                let _ = reply.send(self.retrieve_all());
            }
        }
    }

    /// Open (idempotent) and append one line
    ///
    /// A version conflict destroys and recreates the database; the line
    /// itself is dropped for that call.
    fn append(&self, line: &str) -> Result<(), LogStoreError> {
        match self.store.open() {
            Ok(()) => {
                self.store.create(line)?;
                Ok(())
            }
            Err(LogStoreError::VersionConflict {
                persisted,
                declared,
            }) => {
                warn!(
                    persisted = persisted,
                    declared = declared,
                    "Schema version conflict, recreating database"
                );
                self.store.delete_database()?;
                self.store.open()?;
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Read all records and compress them chunk by chunk
    ///
    /// The compressor is carried across chunks, so the reply is a single
    /// valid zlib stream of the newline-joined records.
    fn retrieve_all(&self) -> Result<Bytes, LogStoreError> {
        self.store.open()?;

        let mut compressor = ChunkCompressor::new();
        self.store.find_all_in_chunks(self.chunk_size, |chunk| {
            let lines: Vec<&str> = chunk.iter().map(|r| r.line.as_str()).collect();
            compressor.push_chunk(&lines)
        })?;
        compressor.finish().map(Bytes::from)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compress::decompress;
    use crate::config::StoreConfig;
    use tempfile::TempDir;

    fn configured_store(dir: &TempDir, version: u32) -> Arc<LogStore> {
        let store = Arc::new(LogStore::new());
        store
            .configure(
                StoreConfig::default()
                    .with_dir(dir.path())
                    .with_schema_version(version),
            )
            .unwrap();
        store
    }

    fn worker(store: Arc<LogStore>) -> (IngestWorker, broadcast::Sender<()>) {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        (
            IngestWorker {
                store,
                chunk_size: 1000,
                shutdown_rx,
            },
            shutdown_tx,
        )
    }

    #[test]
    fn test_append_opens_lazily() {
        let temp_dir = TempDir::new().unwrap();
        let store = configured_store(&temp_dir, 1);
        let (worker, _shutdown) = worker(store.clone());

        worker.append("first").unwrap();
        worker.append("second").unwrap();

        let lines: Vec<String> = store
            .find_all()
            .unwrap()
            .into_iter()
            .map(|r| r.line)
            .collect();
        assert_eq!(lines, vec!["first", "second"]);
    }

    #[test]
    fn test_append_heals_version_conflict_dropping_line() {
        let temp_dir = TempDir::new().unwrap();

        // Persist at a newer version than the worker will declare.
        {
            let store = configured_store(&temp_dir, 2);
            store.open().unwrap();
            store.create("stale").unwrap();
        }

        let store = configured_store(&temp_dir, 1);
        let (worker, _shutdown) = worker(store.clone());

        // The conflicting append recreates the store and drops its line.
        worker.append("dropped").unwrap();
        assert_eq!(store.count().unwrap(), 0);

        // Subsequent appends land in the fresh store.
        worker.append("kept").unwrap();
        let all = store.find_all().unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].line, "kept");
    }

    #[test]
    fn test_retrieve_all_single_stream() {
        let temp_dir = TempDir::new().unwrap();
        let store = configured_store(&temp_dir, 1);
        let (worker, _shutdown) = worker(store.clone());

        for i in 0..5 {
            worker.append(&format!("line {i}")).unwrap();
        }

        let bytes = worker.retrieve_all().unwrap();
        let text = String::from_utf8(decompress(&bytes).unwrap()).unwrap();
        assert_eq!(text, "line 0\nline 1\nline 2\nline 3\nline 4");
    }

    #[test]
    fn test_retrieve_all_empty_store() {
        let temp_dir = TempDir::new().unwrap();
        let store = configured_store(&temp_dir, 1);
        let (worker, _shutdown) = worker(store);

        let bytes = worker.retrieve_all().unwrap();
        assert_eq!(decompress(&bytes).unwrap(), b"");
    }
}

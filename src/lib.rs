//! # logkeep
//!
//! Capacity-bounded, append-mostly record store for diagnostic log
//! entries.
//!
//! Writes never block the caller, and storage self-regulates to stay
//! under a compressed-size/record-count ceiling by evicting the oldest
//! 20% of records from a background task.
//!
//! ## Features
//!
//! - **LogStore**: persistent keyed record store (redb) with CRUD,
//!   chunked full scans and oldest-n bulk deletion
//! - **IngestWorker**: channel-fed ingestion task keeping store I/O off
//!   the producer, self-healing schema-version conflicts
//! - **CapacityMonitor**: periodic footprint scans with oldest-first
//!   eviction over threshold
//! - **ExportWorker**: single-stream compressed artifact materialization
//! - **LogVault**: the facade owning configuration and task lifecycles
//!
//! ## Example
//!
//! ```rust,ignore
//! use logkeep::{LogVault, VaultConfig};
//!
//! #[tokio::main]
//! async fn main() {
//!     let vault = LogVault::open(VaultConfig::default()).unwrap();
//!
//!     vault.append("[2026-08-30 12:00:00] INFO: service started");
//!
//!     // One zlib stream of the newline-joined records.
//!     let compressed = vault.retrieve_all_compressed().await.unwrap();
//!     assert!(!compressed.is_empty());
//!
//!     vault.shutdown().await;
//! }
//! ```

pub mod compress;
pub mod config;
pub mod error;
pub mod export;
pub mod ingest;
pub mod monitor;
pub mod store;
pub mod vault;

// Re-exports
pub use compress::{ChunkCompressor, compressed_len, decompress};
pub use config::{CapacityConfig, ExportConfig, StoreConfig, VaultConfig};
pub use error::LogStoreError;
pub use export::{ExportArtifact, ExportRequest, ExportWorker};
pub use ingest::{IngestRequest, IngestWorker};
pub use monitor::{CapacityMonitor, CapacityReport, delete_count_for};
pub use store::{LogRecord, LogStore};
pub use vault::LogVault;

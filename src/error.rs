//! Error types for logkeep
//!
//! This module defines the error types used throughout the crate.

use thiserror::Error;

/// Errors that can occur in log store operations
#[derive(Debug, Error)]
pub enum LogStoreError {
    /// The store was used before `configure` was called
    #[error("store is not configured")]
    NotConfigured,

    /// The store was used before `open` was called
    #[error("store is not opened")]
    NotOpened,

    /// `configure` was called again with a different configuration
    #[error("store is already configured with a different configuration")]
    AlreadyConfigured,

    /// The on-disk schema version is newer than the declared one
    ///
    /// Recovered only by destroying and recreating the database.
    #[error("schema version conflict: persisted {persisted} is newer than declared {declared}")]
    VersionConflict {
        /// Version found on disk
        persisted: u32,
        /// Version the client declared
        declared: u32,
    },

    /// One or more deletes in a bulk eviction batch failed
    ///
    /// Deletes applied before the failure are not rolled back; the
    /// transaction boundary is per key, not per batch.
    #[error("partial eviction: {deleted} of {attempted} deletes applied, first failure: {cause}")]
    PartialEviction {
        /// Number of deletes requested
        attempted: u64,
        /// Number of deletes that succeeded
        deleted: u64,
        /// First failure in key order
        cause: String,
    },

    /// Requested record was not found
    #[error("record not found: {0}")]
    NotFound(u64),

    /// Chunked scan was requested with a zero chunk size
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,

    /// I/O or database error
    #[error("I/O error: {0}")]
    Io(String),

    /// Error during serialization
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Error during deserialization
    #[error("deserialization error: {0}")]
    Deserialization(String),

    /// A background worker is no longer accepting requests
    #[error("worker is gone: {0}")]
    WorkerGone(String),
}

impl LogStoreError {
    /// Create a new I/O error
    pub fn io(message: impl Into<String>) -> Self {
        Self::Io(message.into())
    }

    /// Create a new Serialization error
    pub fn serialization(message: impl Into<String>) -> Self {
        Self::Serialization(message.into())
    }

    /// Create a new Deserialization error
    pub fn deserialization(message: impl Into<String>) -> Self {
        Self::Deserialization(message.into())
    }

    /// Create a new WorkerGone error
    pub fn worker_gone(message: impl Into<String>) -> Self {
        Self::WorkerGone(message.into())
    }
}

impl From<std::io::Error> for LogStoreError {
    fn from(err: std::io::Error) -> Self {
        LogStoreError::Io(err.to_string())
    }
}

impl From<postcard::Error> for LogStoreError {
    fn from(err: postcard::Error) -> Self {
        LogStoreError::Deserialization(err.to_string())
    }
}

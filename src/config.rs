//! Configuration for the store, the capacity monitor and the export task

use std::path::PathBuf;
use std::time::Duration;

/// Configuration binding a [`LogStore`](crate::LogStore) to its on-disk
/// collection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreConfig {
    /// Directory holding the database file
    pub dir: PathBuf,
    /// Name of the collection (database file, without extension)
    pub collection_name: String,
    /// Name of the record table inside the collection
    pub store_name: String,
    /// Declared schema version
    ///
    /// Opening against an on-disk version newer than this is a hard
    /// conflict requiring destructive recreation.
    pub schema_version: u32,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./data"),
            collection_name: "log_db".to_string(),
            store_name: "logs".to_string(),
            schema_version: 1,
        }
    }
}

impl StoreConfig {
    /// Set the directory holding the database file
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Set the collection name
    pub fn with_collection_name(mut self, name: impl Into<String>) -> Self {
        self.collection_name = name.into();
        self
    }

    /// Set the record table name
    pub fn with_store_name(mut self, name: impl Into<String>) -> Self {
        self.store_name = name.into();
        self
    }

    /// Set the declared schema version
    pub fn with_schema_version(mut self, version: u32) -> Self {
        self.schema_version = version;
        self
    }

    /// Path of the database file
    pub fn db_path(&self) -> PathBuf {
        self.dir.join(format!("{}.redb", self.collection_name))
    }
}

/// Capacity limits and scan scheduling for the monitor
#[derive(Debug, Clone)]
pub struct CapacityConfig {
    /// Maximum as-if-compressed footprint in MB
    pub max_size_mb: f64,
    /// Maximum record count
    pub max_count: u64,
    /// Upper bound on records evicted in one batch
    pub rolling_delete_count: u64,
    /// Interval between capacity scans
    pub scan_interval: Duration,
    /// Records per chunk for scans and export compression
    pub chunk_size: usize,
}

impl Default for CapacityConfig {
    fn default() -> Self {
        let max_count = 30_000;
        Self {
            max_size_mb: 50.0,
            max_count,
            // 20% of max_count
            rolling_delete_count: max_count / 5,
            scan_interval: Duration::from_secs(60),
            chunk_size: 1000,
        }
    }
}

impl CapacityConfig {
    /// Set the maximum compressed footprint in MB
    pub fn with_max_size_mb(mut self, mb: f64) -> Self {
        self.max_size_mb = mb;
        self
    }

    /// Set the maximum record count
    pub fn with_max_count(mut self, count: u64) -> Self {
        self.max_count = count;
        self
    }

    /// Set the eviction batch upper bound
    pub fn with_rolling_delete_count(mut self, count: u64) -> Self {
        self.rolling_delete_count = count;
        self
    }

    /// Set the scan interval
    pub fn with_scan_interval(mut self, interval: Duration) -> Self {
        self.scan_interval = interval;
        self
    }

    /// Set the chunk size
    pub fn with_chunk_size(mut self, size: usize) -> Self {
        self.chunk_size = size;
        self
    }
}

/// Where and under what name export artifacts are materialized
#[derive(Debug, Clone)]
pub struct ExportConfig {
    /// Directory artifacts are written into
    pub dir: PathBuf,
    /// File name of the artifact
    pub file_name: String,
}

impl Default for ExportConfig {
    fn default() -> Self {
        Self {
            dir: PathBuf::from("./export"),
            file_name: format!("log_{}.zz", chrono::Utc::now().format("%Y-%m-%d")),
        }
    }
}

impl ExportConfig {
    /// Set the export directory
    pub fn with_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.dir = dir.into();
        self
    }

    /// Set the artifact file name
    pub fn with_file_name(mut self, name: impl Into<String>) -> Self {
        self.file_name = name.into();
        self
    }
}

/// Top-level configuration for a [`LogVault`](crate::LogVault)
#[derive(Debug, Clone, Default)]
pub struct VaultConfig {
    /// Store binding
    pub store: StoreConfig,
    /// Capacity limits and scan scheduling
    pub capacity: CapacityConfig,
    /// Export artifact placement
    pub export: ExportConfig,
}

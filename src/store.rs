//! Persistent keyed record store
//!
//! One redb database file per configuration, holding a single record table
//! plus a small state table carrying the schema version and the key
//! counter. Keys are assigned from the counter on insert: unique, strictly
//! increasing in insertion order, never reused after deletion.

use std::sync::{Arc, Mutex, MutexGuard};

use redb::{Database, ReadableTable, ReadableTableMetadata, TableDefinition};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument, warn};

use crate::config::StoreConfig;
use crate::error::LogStoreError;

// Schema version and key counter, shared by every collection.
const STATE: TableDefinition<&str, u64> = TableDefinition::new("store_state");

const SCHEMA_VERSION_KEY: &str = "schema_version";
const NEXT_KEY_KEY: &str = "next_key";

/// Record table definition for a configured store name
fn records(name: &str) -> TableDefinition<'_, u64, &'static [u8]> {
    TableDefinition::new(name)
}

/// One persisted log entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogRecord {
    /// Store-assigned key
    pub key: u64,
    /// When the record was created (Unix millis)
    pub timestamp_millis: i64,
    /// The payload (formatted log line)
    pub line: String,
}

/// On-disk value encoding; the key lives in the table key
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    timestamp_millis: i64,
    line: String,
}

#[derive(Default)]
struct Inner {
    config: Option<StoreConfig>,
    db: Option<Arc<Database>>,
}

/// The persistent keyed record store
///
/// Usable only after [`configure`](LogStore::configure) and
/// [`open`](LogStore::open); every operation on an unconfigured or
/// unopened store fails fast. Concurrent opens against the same store
/// converge on one database handle.
pub struct LogStore {
    inner: Mutex<Inner>,
}

impl LogStore {
    /// Create an unconfigured store
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(Inner::default()),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, Inner>, LogStoreError> {
        self.inner
            .lock()
            .map_err(|_| LogStoreError::io("store lock poisoned"))
    }

    /// Current database handle and table name, or the fail-fast error
    fn session(&self) -> Result<(Arc<Database>, String), LogStoreError> {
        let inner = self.lock()?;
        let config = inner.config.as_ref().ok_or(LogStoreError::NotConfigured)?;
        let db = inner
            .db
            .as_ref()
            .ok_or(LogStoreError::NotOpened)?
            .clone();
        Ok((db, config.store_name.clone()))
    }

    /// Bind this store to a configuration
    ///
    /// Idempotent for an identical configuration; rebinding to a different
    /// one is rejected.
    pub fn configure(&self, config: StoreConfig) -> Result<(), LogStoreError> {
        let mut inner = self.lock()?;
        match &inner.config {
            Some(existing) if *existing == config => Ok(()),
            Some(_) => Err(LogStoreError::AlreadyConfigured),
            None => {
                inner.config = Some(config);
                Ok(())
            }
        }
    }

    /// Open the database, creating it on first open
    ///
    /// No-op if already open. Fails with
    /// [`VersionConflict`](LogStoreError::VersionConflict) when the on-disk
    /// schema version is newer than the declared one; the store stays
    /// unopened in that case. A newer declared version upgrades in place.
    #[instrument(skip_all)]
    pub fn open(&self) -> Result<(), LogStoreError> {
        let mut inner = self.lock()?;
        if inner.db.is_some() {
            return Ok(());
        }
        let config = inner.config.clone().ok_or(LogStoreError::NotConfigured)?;

        std::fs::create_dir_all(&config.dir).map_err(|e| LogStoreError::io(e.to_string()))?;
        let db = Database::create(config.db_path())
            .map_err(|e| LogStoreError::io(e.to_string()))?;

        let txn = db
            .begin_write()
            .map_err(|e| LogStoreError::io(e.to_string()))?;
        {
            let mut state = txn
                .open_table(STATE)
                .map_err(|e| LogStoreError::io(e.to_string()))?;

            let persisted = state
                .get(SCHEMA_VERSION_KEY)
                .map_err(|e| LogStoreError::io(e.to_string()))?
                .map(|g| g.value());

            if let Some(persisted) = persisted
                && u64::from(config.schema_version) < persisted
            {
                // Transaction aborts on drop; the store stays unopened.
                return Err(LogStoreError::VersionConflict {
                    persisted: persisted as u32,
                    declared: config.schema_version,
                });
            }

            state
                .insert(SCHEMA_VERSION_KEY, u64::from(config.schema_version))
                .map_err(|e| LogStoreError::io(e.to_string()))?;

            let has_counter = state
                .get(NEXT_KEY_KEY)
                .map_err(|e| LogStoreError::io(e.to_string()))?
                .is_some();
            if !has_counter {
                state
                    .insert(NEXT_KEY_KEY, 1u64)
                    .map_err(|e| LogStoreError::io(e.to_string()))?;
            }
        }
        // Ensure the record table exists so readonly scans never race
        // table creation.
        txn.open_table(records(&config.store_name))
            .map_err(|e| LogStoreError::io(e.to_string()))?;
        txn.commit().map_err(|e| LogStoreError::io(e.to_string()))?;

        info!(
            path = %config.db_path().display(),
            store = %config.store_name,
            version = config.schema_version,
            "Opened log store"
        );
        inner.db = Some(Arc::new(db));
        Ok(())
    }

    /// Append a record, returning the assigned key
    pub fn create(&self, line: &str) -> Result<u64, LogStoreError> {
        let (db, store_name) = self.session()?;
        let value = postcard::to_allocvec(&StoredRecord {
            timestamp_millis: chrono::Utc::now().timestamp_millis(),
            line: line.to_string(),
        })
        .map_err(|e| LogStoreError::serialization(e.to_string()))?;

        let txn = db
            .begin_write()
            .map_err(|e| LogStoreError::io(e.to_string()))?;
        let key = {
            let mut state = txn
                .open_table(STATE)
                .map_err(|e| LogStoreError::io(e.to_string()))?;
            let key = state
                .get(NEXT_KEY_KEY)
                .map_err(|e| LogStoreError::io(e.to_string()))?
                .map(|g| g.value())
                .unwrap_or(1);
            state
                .insert(NEXT_KEY_KEY, key + 1)
                .map_err(|e| LogStoreError::io(e.to_string()))?;

            let mut table = txn
                .open_table(records(&store_name))
                .map_err(|e| LogStoreError::io(e.to_string()))?;
            table
                .insert(key, value.as_slice())
                .map_err(|e| LogStoreError::io(e.to_string()))?;
            key
        };
        txn.commit().map_err(|e| LogStoreError::io(e.to_string()))?;

        debug!(key = key, "Appended record");
        Ok(key)
    }

    /// Look up a record by key
    pub fn find(&self, key: u64) -> Result<Option<LogRecord>, LogStoreError> {
        let (db, store_name) = self.session()?;
        let txn = db
            .begin_read()
            .map_err(|e| LogStoreError::io(e.to_string()))?;
        let table = txn
            .open_table(records(&store_name))
            .map_err(|e| LogStoreError::io(e.to_string()))?;
        match table
            .get(key)
            .map_err(|e| LogStoreError::io(e.to_string()))?
        {
            Some(guard) => Ok(Some(decode(key, guard.value())?)),
            None => Ok(None),
        }
    }

    /// All records in insertion order
    pub fn find_all(&self) -> Result<Vec<LogRecord>, LogStoreError> {
        let mut all = Vec::new();
        self.find_all_in_chunks(usize::MAX, |chunk| {
            all.extend_from_slice(chunk);
            Ok(())
        })?;
        Ok(all)
    }

    /// Forward scan delivering records in insertion-order chunks
    ///
    /// Each record is delivered to `on_chunk` exactly once; slices hold at
    /// most `chunk_size` records, the final one possibly fewer. A scan over
    /// an empty store delivers no chunks. An error from `on_chunk` aborts
    /// the scan and propagates.
    pub fn find_all_in_chunks<F>(
        &self,
        chunk_size: usize,
        mut on_chunk: F,
    ) -> Result<(), LogStoreError>
    where
        F: FnMut(&[LogRecord]) -> Result<(), LogStoreError>,
    {
        if chunk_size == 0 {
            return Err(LogStoreError::InvalidChunkSize);
        }
        let (db, store_name) = self.session()?;
        let txn = db
            .begin_read()
            .map_err(|e| LogStoreError::io(e.to_string()))?;
        let table = txn
            .open_table(records(&store_name))
            .map_err(|e| LogStoreError::io(e.to_string()))?;

        let mut buffer: Vec<LogRecord> = Vec::with_capacity(chunk_size.min(1024));
        for entry in table
            .iter()
            .map_err(|e| LogStoreError::io(e.to_string()))?
        {
            let (key, value) = entry.map_err(|e| LogStoreError::io(e.to_string()))?;
            buffer.push(decode(key.value(), value.value())?);
            if buffer.len() == chunk_size {
                on_chunk(&buffer)?;
                buffer.clear();
            }
        }
        if !buffer.is_empty() {
            on_chunk(&buffer)?;
        }
        Ok(())
    }

    /// Overwrite an existing record in place
    pub fn update(&self, record: &LogRecord) -> Result<(), LogStoreError> {
        let (db, store_name) = self.session()?;
        let value = postcard::to_allocvec(&StoredRecord {
            timestamp_millis: record.timestamp_millis,
            line: record.line.clone(),
        })
        .map_err(|e| LogStoreError::serialization(e.to_string()))?;

        let txn = db
            .begin_write()
            .map_err(|e| LogStoreError::io(e.to_string()))?;
        {
            let mut table = txn
                .open_table(records(&store_name))
                .map_err(|e| LogStoreError::io(e.to_string()))?;
            let exists = table
                .get(record.key)
                .map_err(|e| LogStoreError::io(e.to_string()))?
                .is_some();
            if !exists {
                return Err(LogStoreError::NotFound(record.key));
            }
            table
                .insert(record.key, value.as_slice())
                .map_err(|e| LogStoreError::io(e.to_string()))?;
        }
        txn.commit().map_err(|e| LogStoreError::io(e.to_string()))?;
        Ok(())
    }

    /// Remove a record by key; removing an absent key is a no-op
    pub fn remove(&self, key: u64) -> Result<(), LogStoreError> {
        let (db, store_name) = self.session()?;
        let txn = db
            .begin_write()
            .map_err(|e| LogStoreError::io(e.to_string()))?;
        {
            let mut table = txn
                .open_table(records(&store_name))
                .map_err(|e| LogStoreError::io(e.to_string()))?;
            table
                .remove(key)
                .map_err(|e| LogStoreError::io(e.to_string()))?;
        }
        txn.commit().map_err(|e| LogStoreError::io(e.to_string()))?;
        Ok(())
    }

    /// Delete the oldest `n` records by insertion order
    ///
    /// The batch is computed once, then deleted one write transaction per
    /// key. If any delete fails the whole call fails with the first error
    /// in key order, but deletes already applied are not rolled back.
    pub fn delete_top_n(&self, n: u64) -> Result<u64, LogStoreError> {
        let keys = self.oldest_keys(n)?;
        let attempted = keys.len() as u64;

        let mut deleted = 0u64;
        let mut first_error: Option<LogStoreError> = None;
        for key in keys {
            match self.remove(key) {
                Ok(()) => deleted += 1,
                Err(e) => {
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }

        match first_error {
            Some(cause) => Err(LogStoreError::PartialEviction {
                attempted,
                deleted,
                cause: cause.to_string(),
            }),
            None => {
                debug!(deleted = deleted, "Deleted oldest records");
                Ok(deleted)
            }
        }
    }

    /// First `n` keys in insertion order
    fn oldest_keys(&self, n: u64) -> Result<Vec<u64>, LogStoreError> {
        let (db, store_name) = self.session()?;
        let txn = db
            .begin_read()
            .map_err(|e| LogStoreError::io(e.to_string()))?;
        let table = txn
            .open_table(records(&store_name))
            .map_err(|e| LogStoreError::io(e.to_string()))?;

        let mut keys = Vec::new();
        for entry in table
            .iter()
            .map_err(|e| LogStoreError::io(e.to_string()))?
            .take(n as usize)
        {
            let (key, _) = entry.map_err(|e| LogStoreError::io(e.to_string()))?;
            keys.push(key.value());
        }
        Ok(keys)
    }

    /// Number of records in the store
    pub fn count(&self) -> Result<u64, LogStoreError> {
        let (db, store_name) = self.session()?;
        let txn = db
            .begin_read()
            .map_err(|e| LogStoreError::io(e.to_string()))?;
        let table = txn
            .open_table(records(&store_name))
            .map_err(|e| LogStoreError::io(e.to_string()))?;
        table.len().map_err(|e| LogStoreError::io(e.to_string()))
    }

    /// Remove all records, keeping the schema version and key counter
    pub fn clear(&self) -> Result<(), LogStoreError> {
        let (db, store_name) = self.session()?;
        let txn = db
            .begin_write()
            .map_err(|e| LogStoreError::io(e.to_string()))?;
        txn.delete_table(records(&store_name))
            .map_err(|e| LogStoreError::io(e.to_string()))?;
        txn.open_table(records(&store_name))
            .map_err(|e| LogStoreError::io(e.to_string()))?;
        txn.commit().map_err(|e| LogStoreError::io(e.to_string()))?;
        debug!("Cleared record table");
        Ok(())
    }

    /// Irreversibly destroy the whole collection
    ///
    /// Used on schema-version downgrade conflicts. The store drops back to
    /// configured-but-unopened; a subsequent open recreates it empty.
    pub fn delete_database(&self) -> Result<(), LogStoreError> {
        let mut inner = self.lock()?;
        let config = inner.config.clone().ok_or(LogStoreError::NotConfigured)?;
        inner.db = None;

        match std::fs::remove_file(config.db_path()) {
            Ok(()) => {
                warn!(path = %config.db_path().display(), "Destroyed log database");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(LogStoreError::io(e.to_string())),
        }
    }
}

impl Default for LogStore {
    fn default() -> Self {
        Self::new()
    }
}

fn decode(key: u64, value: &[u8]) -> Result<LogRecord, LogStoreError> {
    let stored: StoredRecord = postcard::from_bytes(value)
        .map_err(|e| LogStoreError::deserialization(e.to_string()))?;
    Ok(LogRecord {
        key,
        timestamp_millis: stored.timestamp_millis,
        line: stored.line,
    })
}

//! # Local Store
//!
//! Durable local state of the sync engine, kept as schema-versioned JSON blobs
//! in a [`StorageBackend`]:
//!
//! - **Progress records**: one `ProgressRecord` per item
//! - **Sync queue**: entries not yet acknowledged by the server
//! - **Conflict history**: the last few `ConflictRecord`s per item
//! - **Last sync timestamp**: server clock of the last successful cycle
//!
//! Every operation is synchronous and total. Storage failures never reach the
//! caller: unreadable blobs read as empty defaults and failed writes are
//! logged.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use watchsync::local_db::{backend::MemoryStorage, LocalStore};
//! use watchsync::shared::ProgressRecord;
//!
//! let store = LocalStore::new(Arc::new(MemoryStorage::new()));
//! store.set("m1", ProgressRecord::new("m1", 40.0, 1_000, "device-a"));
//! assert_eq!(store.get("m1").map(|r| r.progress), Some(40.0));
//! ```

pub mod backend;
pub mod device;

pub use backend::{MemoryStorage, SqliteStorage, StorageBackend};
pub use device::DeviceIdentity;

use crate::shared::error::StorageError;
use crate::shared::progress::{ConflictRecord, ProgressRecord, SyncQueueEntry};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex, MutexGuard};

/// Schema version written into every persisted blob
pub const SCHEMA_VERSION: u32 = 1;

/// Storage key of the progress records
pub const PROGRESS_KEY: &str = "watch_progress";
/// Storage key of the sync queue
pub const QUEUE_KEY: &str = "watch_progress_sync_queue";
/// Storage key of the conflict history
pub const CONFLICTS_KEY: &str = "watch_progress_conflicts";
/// Storage key of the last sync timestamp
pub const LAST_SYNC_KEY: &str = "watch_progress_last_sync";

/// Records keyed by item id
pub type ProgressMap = BTreeMap<String, ProgressRecord>;
/// Queue entries keyed by item id
pub type QueueMap = BTreeMap<String, SyncQueueEntry>;
/// Conflict history keyed by item id
pub type ConflictMap = BTreeMap<String, Vec<ConflictRecord>>;

/// Versioned wrapper around every persisted value
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Envelope<T> {
    schema_version: u32,
    data: T,
}

/// Durable progress state
#[derive(Debug, Clone)]
pub struct LocalStore {
    backend: Arc<dyn StorageBackend>,
    write_lock: Arc<Mutex<()>>,
}

impl LocalStore {
    /// Create a store over a backend
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            write_lock: Arc::new(Mutex::new(())),
        }
    }

    /// The underlying backend
    pub fn backend(&self) -> &Arc<dyn StorageBackend> {
        &self.backend
    }

    /// Hold the store's write lock across a read-modify-write sequence
    pub fn lock(&self) -> MutexGuard<'_, ()> {
        self.write_lock.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Record for an item, if any
    pub fn get(&self, item_id: &str) -> Option<ProgressRecord> {
        self.get_all().remove(item_id)
    }

    /// Insert or replace the record for an item
    pub fn set(&self, item_id: &str, record: ProgressRecord) {
        let mut records = self.get_all();
        records.insert(item_id.to_string(), record);
        self.save(PROGRESS_KEY, &records);
    }

    /// Every stored record
    pub fn get_all(&self) -> ProgressMap {
        self.load(PROGRESS_KEY)
    }

    /// Delete the record for an item
    pub fn remove(&self, item_id: &str) {
        let mut records = self.get_all();
        if records.remove(item_id).is_some() {
            self.save(PROGRESS_KEY, &records);
        }
    }

    /// Wipe records, queue, conflict history and last sync timestamp
    pub fn clear(&self) {
        for key in [PROGRESS_KEY, QUEUE_KEY, CONFLICTS_KEY, LAST_SYNC_KEY] {
            if let Err(e) = self.backend.remove_item(key) {
                tracing::error!("Failed to clear {}: {}", key, e);
            }
        }
    }

    /// Persisted sync queue
    pub fn load_queue(&self) -> QueueMap {
        self.load(QUEUE_KEY)
    }

    /// Replace the persisted sync queue
    pub fn save_queue(&self, queue: &QueueMap) {
        self.save(QUEUE_KEY, queue);
    }

    /// Conflict records logged for an item, oldest first
    pub fn conflict_history(&self, item_id: &str) -> Vec<ConflictRecord> {
        let mut conflicts: ConflictMap = self.load(CONFLICTS_KEY);
        conflicts.remove(item_id).unwrap_or_default()
    }

    /// Append a conflict record, keeping only the newest `limit` per item
    pub fn append_conflict(&self, item_id: &str, conflict: ConflictRecord, limit: usize) {
        let mut conflicts: ConflictMap = self.load(CONFLICTS_KEY);
        let history = conflicts.entry(item_id.to_string()).or_default();
        history.push(conflict);
        if history.len() > limit {
            let excess = history.len() - limit;
            history.drain(..excess);
        }
        self.save(CONFLICTS_KEY, &conflicts);
    }

    /// Total conflict records across all items
    pub fn conflict_count(&self) -> usize {
        let conflicts: ConflictMap = self.load(CONFLICTS_KEY);
        conflicts.values().map(Vec::len).sum()
    }

    /// Server timestamp of the last successful sync, 0 if never synced
    pub fn last_sync_timestamp(&self) -> i64 {
        self.load(LAST_SYNC_KEY)
    }

    /// Persist the server timestamp of a successful sync
    pub fn set_last_sync_timestamp(&self, timestamp: i64) {
        self.save(LAST_SYNC_KEY, &timestamp);
    }

    /// Read a blob, falling back to the default on any failure
    fn load<T: DeserializeOwned + Default>(&self, key: &str) -> T {
        match self.try_load(key) {
            Ok(Some(value)) => value,
            Ok(None) => T::default(),
            Err(e) => {
                tracing::warn!("Unreadable local state, using empty default: {}", e);
                T::default()
            }
        }
    }

    fn try_load<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, StorageError> {
        let Some(raw) = self.backend.get_item(key)? else {
            return Ok(None);
        };

        let envelope: Envelope<serde_json::Value> = serde_json::from_str(&raw)
            .map_err(|e| StorageError::serialization(key, e.to_string()))?;
        if envelope.schema_version != SCHEMA_VERSION {
            return Err(StorageError::SchemaMismatch {
                key: key.to_string(),
                found: envelope.schema_version,
                expected: SCHEMA_VERSION,
            });
        }

        serde_json::from_value(envelope.data)
            .map(Some)
            .map_err(|e| StorageError::serialization(key, e.to_string()))
    }

    /// Write a blob, logging on failure
    fn save<T: Serialize>(&self, key: &str, value: &T) {
        if let Err(e) = self.try_save(key, value) {
            tracing::error!("Failed to persist local state: {}", e);
        }
    }

    fn try_save<T: Serialize>(&self, key: &str, value: &T) -> Result<(), StorageError> {
        let envelope = Envelope {
            schema_version: SCHEMA_VERSION,
            data: value,
        };
        let raw = serde_json::to_string(&envelope)
            .map_err(|e| StorageError::serialization(key, e.to_string()))?;
        self.backend.set_item(key, &raw)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn store() -> (LocalStore, Arc<MemoryStorage>) {
        let backend = Arc::new(MemoryStorage::new());
        (LocalStore::new(backend.clone()), backend)
    }

    #[test]
    fn test_get_missing_is_none() {
        let (store, _) = store();
        assert_eq!(store.get("nope"), None);
        assert!(store.get_all().is_empty());
        assert_eq!(store.last_sync_timestamp(), 0);
    }

    #[test]
    fn test_set_get_remove() {
        let (store, _) = store();
        let record = ProgressRecord::new("m1", 40.0, 1_000, "dev-a");

        store.set("m1", record.clone());
        assert_eq!(store.get("m1"), Some(record));
        assert_eq!(store.get_all().len(), 1);

        store.remove("m1");
        assert_eq!(store.get("m1"), None);
        // Removing a missing key is a no-op
        store.remove("m1");
    }

    #[test]
    fn test_corrupt_blob_falls_back_to_empty() {
        let (store, backend) = store();
        backend.set_item(PROGRESS_KEY, "{ not json").unwrap();

        assert!(store.get_all().is_empty());
        assert_eq!(store.get("m1"), None);

        // The next write replaces the corrupt blob
        store.set("m1", ProgressRecord::new("m1", 1.0, 1, "dev-a"));
        assert_eq!(store.get_all().len(), 1);
    }

    #[test]
    fn test_unknown_schema_version_reads_empty() {
        let (store, backend) = store();
        backend
            .set_item(LAST_SYNC_KEY, r#"{"schemaVersion":99,"data":12345}"#)
            .unwrap();
        assert_eq!(store.last_sync_timestamp(), 0);
    }

    #[test]
    fn test_persisted_envelope_shape() {
        let (store, backend) = store();
        store.set_last_sync_timestamp(777);

        let raw = backend.get_item(LAST_SYNC_KEY).unwrap().unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(value["schemaVersion"], SCHEMA_VERSION);
        assert_eq!(value["data"], 777);
        assert_eq!(store.last_sync_timestamp(), 777);
    }

    #[test]
    fn test_conflict_history_capped() {
        let (store, _) = store();
        for i in 0..15 {
            store.append_conflict(
                "m1",
                ConflictRecord {
                    old_version: i,
                    new_version: i + 1,
                    detected_at: i as i64,
                },
                10,
            );
        }
        let history = store.conflict_history("m1");
        assert_eq!(history.len(), 10);
        assert_eq!(history[0].old_version, 5);
        assert_eq!(history[9].old_version, 14);
        assert_eq!(store.conflict_count(), 10);
        assert!(store.conflict_history("m2").is_empty());
    }

    #[test]
    fn test_clear_wipes_everything() {
        let (store, backend) = store();
        store.set("m1", ProgressRecord::new("m1", 1.0, 1, "dev-a"));
        store.set_last_sync_timestamp(5);
        store.append_conflict(
            "m1",
            ConflictRecord {
                old_version: 1,
                new_version: 2,
                detected_at: 3,
            },
            10,
        );

        store.clear();
        assert!(store.get_all().is_empty());
        assert_eq!(store.last_sync_timestamp(), 0);
        assert_eq!(store.conflict_count(), 0);
        assert!(backend.is_empty());
    }

    #[test]
    fn test_sqlite_backed_store_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        {
            let store = LocalStore::new(Arc::new(SqliteStorage::open(dir.path()).unwrap()));
            store.set("m1", ProgressRecord::new("m1", 55.0, 9, "dev-a"));
        }
        let store = LocalStore::new(Arc::new(SqliteStorage::open(dir.path()).unwrap()));
        assert_eq!(store.get("m1").map(|r| r.progress), Some(55.0));
    }
}

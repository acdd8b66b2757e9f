//! # Storage Backends
//!
//! The local store is agnostic to where its bytes live. A backend is any
//! synchronous string key-value medium that survives restarts and is ready
//! before the first call:
//!
//! - `SqliteStorage`: a single `kv` table in a SQLite database file
//! - `MemoryStorage`: a process-local map, for tests and ephemeral sessions
//!
//! ## Tables
//!
//! - `kv` - `key TEXT PRIMARY KEY, value TEXT NOT NULL`
//!
//! ## Usage
//!
//! ```rust,no_run
//! use watchsync::local_db::backend::{SqliteStorage, StorageBackend};
//!
//! let storage = SqliteStorage::open("/tmp/watchsync").unwrap();
//! storage.set_item("greeting", "\"hello\"").unwrap();
//! assert_eq!(storage.get_item("greeting").unwrap().as_deref(), Some("\"hello\""));
//! ```

use crate::shared::error::StorageError;
use rusqlite::{params, Connection, OptionalExtension};
use std::collections::HashMap;
use std::path::Path;
use std::sync::Mutex;

/// File name of the database inside the storage directory
pub const DATABASE_FILE: &str = "watchsync.db";

/// Durable synchronous key-value medium
pub trait StorageBackend: Send + Sync + std::fmt::Debug {
    /// Read a value, `None` when the key was never written
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError>;

    /// Write a value, replacing any previous one
    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError>;

    /// Delete a value; deleting a missing key is not an error
    fn remove_item(&self, key: &str) -> Result<(), StorageError>;
}

/// In-memory backend
#[derive(Debug, Default)]
pub struct MemoryStorage {
    items: Mutex<HashMap<String, String>>,
}

impl MemoryStorage {
    /// Create an empty in-memory backend
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.items.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    /// Whether nothing is stored
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StorageBackend for MemoryStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        let items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        Ok(items.get(key).cloned())
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.insert(key.to_string(), value.to_string());
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        let mut items = self.items.lock().unwrap_or_else(|e| e.into_inner());
        items.remove(key);
        Ok(())
    }
}

/// SQLite-backed key-value store
#[derive(Debug)]
pub struct SqliteStorage {
    conn: Mutex<Connection>,
}

impl SqliteStorage {
    /// Open (and create if needed) the database under a storage directory
    pub fn open(storage_dir: impl AsRef<Path>) -> Result<Self, StorageError> {
        let storage_dir = storage_dir.as_ref();
        std::fs::create_dir_all(storage_dir)
            .map_err(|e| StorageError::io(storage_dir.to_string_lossy(), e))?;

        let db_path = storage_dir.join(DATABASE_FILE);
        tracing::info!("Opening progress database at {:?}", db_path);
        let conn = Connection::open(&db_path)
            .map_err(|e| StorageError::database(db_path.to_string_lossy(), e))?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")
            .map_err(|e| StorageError::database("pragma", e))?;

        Self::with_connection(conn)
    }

    /// Open an in-memory database
    pub fn open_in_memory() -> Result<Self, StorageError> {
        tracing::debug!("Opening in-memory progress database");
        let conn =
            Connection::open_in_memory().map_err(|e| StorageError::database(":memory:", e))?;
        Self::with_connection(conn)
    }

    fn with_connection(conn: Connection) -> Result<Self, StorageError> {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS kv (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )
        .map_err(|e| StorageError::database("kv", e))?;

        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl StorageBackend for SqliteStorage {
    fn get_item(&self, key: &str) -> Result<Option<String>, StorageError> {
        self.conn()
            .query_row("SELECT value FROM kv WHERE key = ?1", [key], |row| row.get(0))
            .optional()
            .map_err(|e| StorageError::database(key, e))
    }

    fn set_item(&self, key: &str, value: &str) -> Result<(), StorageError> {
        self.conn()
            .execute(
                "INSERT OR REPLACE INTO kv (key, value) VALUES (?1, ?2)",
                params![key, value],
            )
            .map_err(|e| StorageError::database(key, e))?;
        Ok(())
    }

    fn remove_item(&self, key: &str) -> Result<(), StorageError> {
        self.conn()
            .execute("DELETE FROM kv WHERE key = ?1", [key])
            .map_err(|e| StorageError::database(key, e))?;
        Ok(())
    }
}

//! Per-installation device identifier
//!
//! The id is generated once, persisted in the storage backend and reused on
//! every later call and every later process.

use crate::local_db::backend::StorageBackend;
use std::sync::{Arc, OnceLock};
use uuid::Uuid;

/// Storage key of the device id
pub const DEVICE_ID_KEY: &str = "watch_progress_device_id";

/// Stable device identity backed by durable storage
#[derive(Debug)]
pub struct DeviceIdentity {
    backend: Arc<dyn StorageBackend>,
    cached: OnceLock<String>,
}

impl DeviceIdentity {
    /// Create an identity reader over a backend
    pub fn new(backend: Arc<dyn StorageBackend>) -> Self {
        Self {
            backend,
            cached: OnceLock::new(),
        }
    }

    /// Return the persisted device id, generating and saving one on first use.
    ///
    /// If the backend cannot be written the generated id is still kept for the
    /// lifetime of this value, so repeated calls agree.
    pub fn get_or_create_device_id(&self) -> String {
        self.cached.get_or_init(|| self.load_or_generate()).clone()
    }

    fn load_or_generate(&self) -> String {
        match self.backend.get_item(DEVICE_ID_KEY) {
            Ok(Some(id)) if !id.trim().is_empty() => return id.trim().to_string(),
            Ok(_) => {}
            Err(e) => tracing::warn!("Could not read device id, generating a new one: {}", e),
        }

        let id = format!("device_{}", Uuid::new_v4().simple());
        match self.backend.set_item(DEVICE_ID_KEY, &id) {
            Ok(()) => tracing::info!("Generated device id {}", id),
            Err(e) => tracing::error!("Failed to persist device id {}: {}", id, e),
        }
        id
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_db::backend::{MemoryStorage, SqliteStorage};

    #[test]
    fn test_device_id_is_stable() {
        let identity = DeviceIdentity::new(Arc::new(MemoryStorage::new()));
        let first = identity.get_or_create_device_id();
        let second = identity.get_or_create_device_id();
        assert_eq!(first, second);
        assert!(first.starts_with("device_"));
    }

    #[test]
    fn test_device_id_survives_restart() {
        let dir = tempfile::tempdir().unwrap();
        let first = DeviceIdentity::new(Arc::new(SqliteStorage::open(dir.path()).unwrap()))
            .get_or_create_device_id();
        let second = DeviceIdentity::new(Arc::new(SqliteStorage::open(dir.path()).unwrap()))
            .get_or_create_device_id();
        assert_eq!(first, second);
    }

    #[test]
    fn test_existing_id_is_reused() {
        let backend = Arc::new(MemoryStorage::new());
        backend.set_item(DEVICE_ID_KEY, "device_fixed").unwrap();
        let identity = DeviceIdentity::new(backend);
        assert_eq!(identity.get_or_create_device_id(), "device_fixed");
    }
}

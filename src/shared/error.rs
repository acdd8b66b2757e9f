//! Shared Error Types
//!
//! Error types used across the sync engine. Only a few of these ever reach a
//! caller of the public API:
//!
//! - `StorageError` - durable storage failures; swallowed by `LocalStore`, which
//!   falls back to empty defaults and logs
//! - `TransportError` - network or HTTP failures during a sync round trip; fed to
//!   the backoff logic and surfaced as a `sync_failed` event
//! - `SyncError` - the public API error, returned for programmer errors and from
//!   the manual recovery path
//!
//! # Usage
//!
//! ```rust
//! use watchsync::shared::error::SyncError;
//!
//! let error = SyncError::validation("item_id", "item id must not be empty");
//! assert!(error.to_string().contains("item_id"));
//! ```
use thiserror::Error;

/// Errors raised by a storage backend or while decoding persisted state
#[derive(Debug, Error)]
pub enum StorageError {
    /// Reading or writing the backing medium failed
    #[error("Storage I/O error on key '{key}': {source}")]
    Io {
        /// Storage key being accessed
        key: String,
        #[source]
        source: std::io::Error,
    },

    /// The SQLite database rejected an operation
    #[error("Storage database error on key '{key}': {source}")]
    Database {
        /// Storage key being accessed
        key: String,
        #[source]
        source: rusqlite::Error,
    },

    /// Persisted JSON could not be encoded or decoded
    #[error("Storage serialization error on key '{key}': {message}")]
    Serialization {
        /// Storage key being accessed
        key: String,
        /// Human-readable error message
        message: String,
    },

    /// Persisted envelope carries a schema version this build does not read
    #[error("Unsupported schema version {found} on key '{key}' (expected {expected})")]
    SchemaMismatch {
        /// Storage key being accessed
        key: String,
        /// Version found on disk
        found: u32,
        /// Version this build writes
        expected: u32,
    },
}

impl StorageError {
    /// Create a new serialization error
    pub fn serialization(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Serialization {
            key: key.into(),
            message: message.into(),
        }
    }

    /// Create a new I/O error
    pub fn io(key: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            key: key.into(),
            source,
        }
    }

    /// Create a new database error
    pub fn database(key: impl Into<String>, source: rusqlite::Error) -> Self {
        Self::Database {
            key: key.into(),
            source,
        }
    }
}

/// Errors raised by a sync transport
#[derive(Debug, Error, Clone, PartialEq)]
pub enum TransportError {
    /// The request never produced a response (connection refused, timeout, DNS)
    #[error("Network error: {message}")]
    Network {
        /// Human-readable error message
        message: String,
    },

    /// The server answered with a non-2xx status
    #[error("HTTP {status}: {body}")]
    Http {
        /// Response status code
        status: u16,
        /// Response body, if readable
        body: String,
    },

    /// The response body was not a valid protocol message
    #[error("Decode error: {message}")]
    Decode {
        /// Human-readable error message
        message: String,
    },

    /// The server answered 2xx but declared `success: false`
    #[error("Server rejected sync request")]
    Rejected,
}

impl TransportError {
    /// Create a new network error
    pub fn network(message: impl Into<String>) -> Self {
        Self::Network {
            message: message.into(),
        }
    }

    /// Create a new decode error
    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode {
            message: message.into(),
        }
    }
}

/// Errors returned across the public engine API
#[derive(Debug, Error, Clone, PartialEq)]
pub enum SyncError {
    /// A required argument was missing or malformed
    #[error("Validation error in field '{field}': {message}")]
    Validation {
        /// The field that failed validation
        field: String,
        /// Human-readable error message
        message: String,
    },

    /// A network round trip failed
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The device is offline and the operation needs the network
    #[error("Device is offline")]
    Offline,

    /// The storage backend could not be opened
    #[error("Local storage unavailable: {message}")]
    StorageUnavailable {
        /// Description of the failure
        message: String,
    },
}

impl From<StorageError> for SyncError {
    fn from(err: StorageError) -> Self {
        Self::StorageUnavailable {
            message: err.to_string(),
        }
    }
}

impl SyncError {
    /// Create a new validation error
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            message: message.into(),
        }
    }
}

impl From<serde_json::Error> for TransportError {
    fn from(err: serde_json::Error) -> Self {
        Self::decode(format!("JSON error: {}", err))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validation_error() {
        let error = SyncError::validation("item_id", "must not be empty");
        match error {
            SyncError::Validation { field, message } => {
                assert_eq!(field, "item_id");
                assert_eq!(message, "must not be empty");
            }
            _ => panic!("Expected Validation"),
        }
    }

    #[test]
    fn test_transport_error_display() {
        let error = TransportError::Http {
            status: 503,
            body: "unavailable".to_string(),
        };
        let display = format!("{}", error);
        assert!(display.contains("503"));
        assert!(display.contains("unavailable"));
    }

    #[test]
    fn test_transport_into_sync_error() {
        let error: SyncError = TransportError::network("connection refused").into();
        assert!(matches!(error, SyncError::Transport(TransportError::Network { .. })));
        assert!(error.to_string().contains("connection refused"));
    }

    #[test]
    fn test_from_serde_error() {
        let result: Result<serde_json::Value, _> = serde_json::from_str("{ invalid json }");
        let transport_error: TransportError = result.unwrap_err().into();
        assert!(matches!(transport_error, TransportError::Decode { .. }));
    }

    #[test]
    fn test_storage_error_display() {
        let error = StorageError::SchemaMismatch {
            key: "watch_progress".to_string(),
            found: 9,
            expected: 1,
        };
        let display = error.to_string();
        assert!(display.contains("watch_progress"));
        assert!(display.contains('9'));
    }
}

//! Shared Module
//!
//! Types shared by every layer of the engine: the progress data model, the
//! sync protocol messages, lifecycle events, errors and configuration. All of
//! them serialize to the camelCase JSON used on the wire and on disk.

/// Progress records, queue entries and conflict records
pub mod progress;

/// Sync protocol request/response bodies
pub mod protocol;

/// Lifecycle events
pub mod event;

/// Shared error types
pub mod error;

/// Engine configuration
pub mod config;

/// Re-export commonly used types for convenience
pub use config::{ConfigError, SyncConfig, SyncConfigBuilder};
pub use error::{StorageError, SyncError, TransportError};
pub use event::{EventType, ResolvedConflict, SyncEvent, UpdateSource};
pub use progress::{
    clamp_progress, ConflictRecord, ProgressMetadata, ProgressRecord, ProgressUpdate,
    SyncQueueEntry,
};
pub use protocol::{ServerConflict, SyncRequest, SyncResponse};

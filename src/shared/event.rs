//! Sync lifecycle events
//!
//! Every state transition inside the engine is announced as a [`SyncEvent`].
//! The wire name of each event (`progress_updated`, `sync_failed`, ...) is
//! available through [`EventType`], which is what logs and the serialized
//! form use.

use crate::shared::progress::{ConflictRecord, ProgressRecord};
use serde::{Deserialize, Serialize};

/// Kind of a sync event
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    /// A local write was stored and queued
    ProgressUpdated,
    /// A record from another device was accepted
    ProgressSynced,
    /// Two same-timestamp records were merged
    ProgressMerged,
    /// A sync cycle finished successfully
    SyncCompleted,
    /// A sync cycle ran out of retries
    SyncFailed,
    /// Server-reported conflicts were resolved
    ConflictsResolved,
    /// An item was restored from the server copy
    StateRecovered,
    /// All local state was wiped
    DataCleared,
    /// A conflict was noticed and logged
    ConflictDetected,
}

impl EventType {
    /// Wire name of the event
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::ProgressUpdated => "progress_updated",
            EventType::ProgressSynced => "progress_synced",
            EventType::ProgressMerged => "progress_merged",
            EventType::SyncCompleted => "sync_completed",
            EventType::SyncFailed => "sync_failed",
            EventType::ConflictsResolved => "conflicts_resolved",
            EventType::StateRecovered => "state_recovered",
            EventType::DataCleared => "data_cleared",
            EventType::ConflictDetected => "conflict_detected",
        }
    }
}

impl std::fmt::Display for EventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Where an accepted record came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum UpdateSource {
    /// Written on this device
    Local,
    /// Received from the server
    Remote,
}

/// How one server-reported conflict was settled
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResolvedConflict {
    /// Item in conflict
    pub item_id: String,
    /// Record written to the local store
    pub winner: ProgressRecord,
    /// Whether the server copy won
    pub remote_won: bool,
}

/// Event payloads, one variant per [`EventType`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SyncEvent {
    ProgressUpdated {
        record: ProgressRecord,
    },
    ProgressSynced {
        record: ProgressRecord,
        source: UpdateSource,
    },
    ProgressMerged {
        record: ProgressRecord,
    },
    SyncCompleted {
        synced: Vec<String>,
        server_timestamp: i64,
    },
    SyncFailed {
        error: String,
        attempts: u32,
    },
    ConflictsResolved {
        resolved: Vec<ResolvedConflict>,
    },
    StateRecovered {
        record: ProgressRecord,
    },
    DataCleared,
    ConflictDetected {
        item_id: String,
        conflict: ConflictRecord,
    },
}

impl SyncEvent {
    /// Kind of this event
    pub fn event_type(&self) -> EventType {
        match self {
            SyncEvent::ProgressUpdated { .. } => EventType::ProgressUpdated,
            SyncEvent::ProgressSynced { .. } => EventType::ProgressSynced,
            SyncEvent::ProgressMerged { .. } => EventType::ProgressMerged,
            SyncEvent::SyncCompleted { .. } => EventType::SyncCompleted,
            SyncEvent::SyncFailed { .. } => EventType::SyncFailed,
            SyncEvent::ConflictsResolved { .. } => EventType::ConflictsResolved,
            SyncEvent::StateRecovered { .. } => EventType::StateRecovered,
            SyncEvent::DataCleared => EventType::DataCleared,
            SyncEvent::ConflictDetected { .. } => EventType::ConflictDetected,
        }
    }

    /// Item this event concerns, if it is about a single item
    pub fn item_id(&self) -> Option<&str> {
        match self {
            SyncEvent::ProgressUpdated { record }
            | SyncEvent::ProgressSynced { record, .. }
            | SyncEvent::ProgressMerged { record }
            | SyncEvent::StateRecovered { record } => Some(&record.item_id),
            SyncEvent::ConflictDetected { item_id, .. } => Some(item_id),
            _ => None,
        }
    }
}

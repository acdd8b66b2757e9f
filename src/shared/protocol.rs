//! Sync protocol messages
//!
//! Request and response bodies of `POST /watch-progress/sync`. The recovery
//! endpoint `GET /watch-progress/:itemId` returns a bare [`ProgressRecord`].

use crate::shared::progress::ProgressRecord;
use serde::{Deserialize, Serialize};

/// Path of the batch sync endpoint
pub const SYNC_PATH: &str = "/watch-progress/sync";

/// Path prefix of the single-item endpoint
pub const ITEM_PATH: &str = "/watch-progress";

/// Batched push of every queued update
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncRequest {
    /// Sending device
    pub device_id: String,
    /// Send time (ms)
    pub timestamp: i64,
    /// Records not yet acknowledged
    pub updates: Vec<ProgressRecord>,
    /// Server timestamp of the last successful cycle, 0 if never synced
    pub last_sync_timestamp: i64,
}

/// A server-side conflict between what we sent and what it holds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerConflict {
    /// Item in conflict
    pub item_id: String,
    /// The record as this device sent it
    pub local_version: ProgressRecord,
    /// The record as the server holds it
    pub remote_version: ProgressRecord,
}

/// Server answer to a [`SyncRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncResponse {
    /// Whether the server processed the batch
    pub success: bool,
    /// Item ids the server accepted
    #[serde(default)]
    pub synced: Vec<String>,
    /// Items the server refused to overwrite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub conflicts: Option<Vec<ServerConflict>>,
    /// Records written by other devices since `last_sync_timestamp`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_updates: Option<Vec<ProgressRecord>>,
    /// Server clock at response time (ms)
    pub server_timestamp: i64,
}

impl SyncResponse {
    /// Successful response acknowledging `synced`
    pub fn success(synced: Vec<String>, server_timestamp: i64) -> Self {
        Self {
            success: true,
            synced,
            conflicts: None,
            remote_updates: None,
            server_timestamp,
        }
    }

    /// Attach remote updates
    pub fn with_remote_updates(mut self, updates: Vec<ProgressRecord>) -> Self {
        self.remote_updates = Some(updates);
        self
    }

    /// Attach conflicts
    pub fn with_conflicts(mut self, conflicts: Vec<ServerConflict>) -> Self {
        self.conflicts = Some(conflicts);
        self
    }

    /// Conflicts, treating an absent list as empty
    pub fn conflicts(&self) -> &[ServerConflict] {
        self.conflicts.as_deref().unwrap_or(&[])
    }

    /// Remote updates, treating an absent list as empty
    pub fn remote_updates(&self) -> &[ProgressRecord] {
        self.remote_updates.as_deref().unwrap_or(&[])
    }
}

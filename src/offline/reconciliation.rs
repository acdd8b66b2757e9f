//! # Remote Update Reconciliation
//!
//! Folds records written by other devices into local state. This is the only
//! path by which foreign data enters the local store, and it never regresses a
//! newer local edit.
//!
//! ## Rules
//!
//! For a remote update `u` and the local record `l` of the same item:
//!
//! - **Accept**: `l` is absent or `u.timestamp > l.timestamp`. `u` is stored as
//!   synced and any queued local entry for the item is dropped
//! - **Merge**: equal timestamps, different progress. The merge policy builds a
//!   new record, which is stored unsynced and queued so the server learns it
//! - **Skip**: local is newer or identical, including an echo of this
//!   device's own write that is not newer than local
//!
//! Applying the same batch twice ends in the same state as applying it once.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use watchsync::local_db::{backend::MemoryStorage, LocalStore};
//! use watchsync::offline::{MergeOutcome, RemoteUpdateMerger, SyncQueue};
//! use watchsync::shared::ProgressRecord;
//!
//! let store = LocalStore::new(Arc::new(MemoryStorage::new()));
//! let merger = RemoteUpdateMerger::new(store.clone(), SyncQueue::new(store.clone()), "dev-a", 10);
//!
//! let outcome = merger.apply(&ProgressRecord::new("m1", 80.0, 2_000, "dev-b"), 2_500);
//! assert!(matches!(outcome, MergeOutcome::Accepted(_)));
//! assert_eq!(store.get("m1").map(|r| r.synced), Some(true));
//! ```

use crate::local_db::LocalStore;
use crate::offline::queue::SyncQueue;
use crate::shared::progress::{clamp_progress, ConflictRecord, ProgressRecord};
use crate::sync::conflict_resolver::{self, ConflictKind};

/// What happened to one remote update
#[derive(Debug, Clone, PartialEq)]
pub enum MergeOutcome {
    /// Stored as the new synced local record
    Accepted(ProgressRecord),
    /// Combined with the local record; the merged record is queued
    Merged {
        /// The stored merged record
        record: ProgressRecord,
        /// Conflict logged for the same-timestamp edit
        conflict: ConflictRecord,
    },
    /// Nothing changed
    Skipped,
}

/// Applies `remoteUpdates` from a sync response to local state
#[derive(Debug, Clone)]
pub struct RemoteUpdateMerger {
    store: LocalStore,
    queue: SyncQueue,
    device_id: String,
    conflict_history_limit: usize,
}

impl RemoteUpdateMerger {
    /// Create a merger for this device
    pub fn new(
        store: LocalStore,
        queue: SyncQueue,
        device_id: impl Into<String>,
        conflict_history_limit: usize,
    ) -> Self {
        Self {
            store,
            queue,
            device_id: device_id.into(),
            conflict_history_limit,
        }
    }

    /// Apply every update in order
    pub fn apply_all(&self, updates: &[ProgressRecord], now: i64) -> Vec<MergeOutcome> {
        updates
            .iter()
            .map(|update| self.apply(update, now))
            .collect()
    }

    /// Apply one remote update
    pub fn apply(&self, update: &ProgressRecord, now: i64) -> MergeOutcome {
        if update.item_id.is_empty() {
            tracing::warn!("Ignoring remote update without item id");
            return MergeOutcome::Skipped;
        }

        let remote = normalize_remote(update);
        let _guard = self.store.lock();
        let local = self.store.get(&remote.item_id);

        let Some(local) = local else {
            return self.accept(remote);
        };

        if remote.device_id == self.device_id && remote.timestamp <= local.timestamp {
            tracing::trace!("Skipping echo of own update for {}", remote.item_id);
            return MergeOutcome::Skipped;
        }

        if remote.timestamp > local.timestamp {
            return self.accept(remote);
        }

        match conflict_resolver::detect_conflict(&local, &remote) {
            Some(ConflictKind::ConcurrentEdit) => self.merge(&local, &remote, now),
            _ => {
                tracing::trace!(
                    "Local record for {} is newer or identical, skipping remote",
                    remote.item_id
                );
                MergeOutcome::Skipped
            }
        }
    }

    fn accept(&self, remote: ProgressRecord) -> MergeOutcome {
        let record = remote.with_synced(true);
        self.store.set(&record.item_id, record.clone());
        if self.queue.remove_acked(std::slice::from_ref(&record.item_id)) > 0 {
            tracing::debug!("Remote update for {} superseded a queued local edit", record.item_id);
        }
        tracing::debug!(
            "Accepted remote update for {} ({}% from {})",
            record.item_id,
            record.progress,
            record.device_id
        );
        MergeOutcome::Accepted(record)
    }

    fn merge(&self, local: &ProgressRecord, remote: &ProgressRecord, now: i64) -> MergeOutcome {
        let mut merged = conflict_resolver::merge(local, remote);
        merged.device_id = self.device_id.clone();
        if merged.same_content(local) {
            tracing::trace!("Merge of {} changes nothing locally", local.item_id);
            return MergeOutcome::Skipped;
        }

        let conflict = conflict_resolver::conflict_record(local, merged.version, now);
        self.store
            .append_conflict(&merged.item_id, conflict, self.conflict_history_limit);
        self.store.set(&merged.item_id, merged.clone());
        self.queue.enqueue(merged.clone(), now);

        tracing::info!(
            "Merged same-timestamp edits for {} ({} vs {}) into {}%",
            merged.item_id,
            local.progress,
            remote.progress,
            merged.progress
        );
        MergeOutcome::Merged {
            record: merged,
            conflict,
        }
    }
}

/// Bring a server record into the same shape local writes have
pub(crate) fn normalize_remote(update: &ProgressRecord) -> ProgressRecord {
    let mut record = update.clone();
    record.progress = clamp_progress(record.progress);
    record.metadata = record.metadata.sanitized();
    record
}

//! # Sync Queue
//!
//! Not-yet-acknowledged progress updates, persisted through the local store.
//!
//! ## Features
//!
//! - **Upsert by item**: at most one entry per item id; a newer update replaces
//!   the queued record but keeps `queued_at` and `attempts`
//! - **Snapshot drain**: `drain` copies the queue without clearing it
//! - **Selective ack**: `remove_acked` drops only what the server confirmed
//!
//! Order carries no meaning: the protocol is latest-wins per item, so the queue
//! is a set keyed by item id.
//!
//! ## Usage
//!
//! ```rust
//! use std::sync::Arc;
//! use watchsync::local_db::{backend::MemoryStorage, LocalStore};
//! use watchsync::offline::SyncQueue;
//! use watchsync::shared::ProgressRecord;
//!
//! let queue = SyncQueue::new(LocalStore::new(Arc::new(MemoryStorage::new())));
//! queue.enqueue(ProgressRecord::new("m1", 30.0, 1, "dev-a"), 1);
//! queue.enqueue(ProgressRecord::new("m1", 70.0, 2, "dev-a"), 2);
//!
//! let pending = queue.drain();
//! assert_eq!(pending.len(), 1);
//! assert_eq!(pending[0].record.progress, 70.0);
//!
//! queue.remove_acked(&["m1".to_string()]);
//! assert!(queue.is_empty());
//! ```

use crate::local_db::LocalStore;
use crate::shared::progress::{ProgressRecord, SyncQueueEntry};

/// Deduplicated queue of pending updates
#[derive(Debug, Clone)]
pub struct SyncQueue {
    store: LocalStore,
}

impl SyncQueue {
    /// Create a queue persisted in `store`
    pub fn new(store: LocalStore) -> Self {
        Self { store }
    }

    /// Insert or replace the entry for `record.item_id`
    pub fn enqueue(&self, record: ProgressRecord, now: i64) {
        let mut queue = self.store.load_queue();
        match queue.get_mut(&record.item_id) {
            Some(entry) => entry.record = record,
            None => {
                queue.insert(record.item_id.clone(), SyncQueueEntry::new(record, now));
            }
        }
        self.store.save_queue(&queue);
    }

    /// Snapshot of every entry; the queue is left untouched
    pub fn drain(&self) -> Vec<SyncQueueEntry> {
        self.store.load_queue().into_values().collect()
    }

    /// Entry for an item, if queued
    pub fn get(&self, item_id: &str) -> Option<SyncQueueEntry> {
        self.store.load_queue().remove(item_id)
    }

    /// Remove the entries the server confirmed; returns how many were removed
    pub fn remove_acked(&self, item_ids: &[String]) -> usize {
        let mut queue = self.store.load_queue();
        let before = queue.len();
        for item_id in item_ids {
            queue.remove(item_id);
        }
        let removed = before - queue.len();
        if removed > 0 {
            self.store.save_queue(&queue);
        }
        removed
    }

    /// Bump `attempts` on the given entries after a failed send
    pub fn record_failed_attempt(&self, item_ids: &[String]) {
        let mut queue = self.store.load_queue();
        let mut touched = false;
        for item_id in item_ids {
            if let Some(entry) = queue.get_mut(item_id) {
                entry.attempts += 1;
                touched = true;
            }
        }
        if touched {
            self.store.save_queue(&queue);
        }
    }

    /// Number of queued items
    pub fn len(&self) -> usize {
        self.store.load_queue().len()
    }

    /// Whether nothing is queued
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every entry
    pub fn clear(&self) {
        self.store.save_queue(&Default::default());
    }
}

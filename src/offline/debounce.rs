//! # Progress Debouncer
//!
//! Players report progress many times a second. The debouncer holds the latest
//! update per item and forwards it once no newer update has arrived for the
//! debounce window (300 ms by default), so only settled values reach the sync
//! queue.
//!
//! Updates for different items are debounced independently. `push` must be
//! called from within a tokio runtime.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::time::Duration;
//! use watchsync::offline::ProgressDebouncer;
//! use watchsync::shared::ProgressUpdate;
//!
//! # async fn example() {
//! let debouncer = ProgressDebouncer::new(Duration::from_millis(300), |update| {
//!     println!("settled at {}%", update.progress);
//! });
//! debouncer.push(ProgressUpdate::new("m1", 10.0));
//! debouncer.push(ProgressUpdate::new("m1", 11.0)); // only 11% is forwarded
//! # }
//! ```

use crate::shared::progress::ProgressUpdate;
use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

type Sink = Arc<dyn Fn(ProgressUpdate) + Send + Sync>;

struct Pending {
    update: ProgressUpdate,
    generation: u64,
}

/// Trailing-edge debouncer keyed by item id
#[derive(Clone)]
pub struct ProgressDebouncer {
    window: Duration,
    sink: Sink,
    pending: Arc<Mutex<HashMap<String, Pending>>>,
    generation: Arc<AtomicU64>,
}

impl fmt::Debug for ProgressDebouncer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProgressDebouncer")
            .field("window", &self.window)
            .field("pending", &self.pending_len())
            .finish()
    }
}

impl ProgressDebouncer {
    /// Create a debouncer forwarding settled updates to `sink`
    pub fn new<F>(window: Duration, sink: F) -> Self
    where
        F: Fn(ProgressUpdate) + Send + Sync + 'static,
    {
        Self {
            window,
            sink: Arc::new(sink),
            pending: Arc::new(Mutex::new(HashMap::new())),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Coalescing window
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record an update; it is forwarded after `window` unless superseded
    pub fn push(&self, update: ProgressUpdate) {
        let generation = self.generation.fetch_add(1, Ordering::Relaxed) + 1;
        let item_id = update.item_id.clone();
        self.lock().insert(item_id.clone(), Pending { update, generation });

        let this = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(this.window).await;
            let settled = {
                let mut pending = this.lock();
                match pending.get(&item_id) {
                    Some(entry) if entry.generation == generation => pending.remove(&item_id),
                    _ => None,
                }
            };
            if let Some(entry) = settled {
                tracing::trace!("Debounced update for {} settled", item_id);
                (this.sink)(entry.update);
            }
        });
    }

    /// Forward every pending update now
    pub fn flush(&self) {
        let drained: Vec<Pending> = self.lock().drain().map(|(_, entry)| entry).collect();
        for entry in drained {
            (self.sink)(entry.update);
        }
    }

    /// Number of items waiting for their window to close
    pub fn pending_len(&self) -> usize {
        self.lock().len()
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, Pending>> {
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn collecting() -> (ProgressDebouncer, Arc<Mutex<Vec<ProgressUpdate>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        let debouncer = ProgressDebouncer::new(Duration::from_millis(300), move |update| {
            sink.lock().unwrap().push(update);
        });
        (debouncer, seen)
    }

    #[tokio::test(start_paused = true)]
    async fn test_rapid_updates_coalesce() {
        let (debouncer, seen) = collecting();
        for progress in [10.0, 20.0, 30.0] {
            debouncer.push(ProgressUpdate::new("m1", progress));
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
        assert!(seen.lock().unwrap().is_empty());

        tokio::time::sleep(Duration::from_millis(300)).await;
        let seen = seen.lock().unwrap();
        assert_eq!(seen.len(), 1);
        assert_eq!(seen[0].progress, 30.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_items_debounce_independently() {
        let (debouncer, seen) = collecting();
        debouncer.push(ProgressUpdate::new("m1", 10.0));
        debouncer.push(ProgressUpdate::new("m2", 20.0));

        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(seen.lock().unwrap().len(), 2);
        assert_eq!(debouncer.pending_len(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_flush_forwards_immediately() {
        let (debouncer, seen) = collecting();
        debouncer.push(ProgressUpdate::new("m1", 42.0));
        debouncer.flush();
        assert_eq!(seen.lock().unwrap().len(), 1);

        // The timer firing later finds nothing left to forward
        tokio::time::sleep(Duration::from_millis(350)).await;
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}

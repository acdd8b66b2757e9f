//! # Event Bus
//!
//! Publishes [`SyncEvent`]s to two kinds of consumers:
//!
//! - **Listeners**: synchronous callbacks registered with
//!   [`EventBus::add_listener`], run in registration order on the notifying
//!   task. Each listener runs inside its own error boundary: an `Err` or a
//!   panic is logged and the remaining listeners still run.
//! - **Subscribers**: `tokio::sync::broadcast` receivers from
//!   [`EventBus::subscribe`], for async consumers. Slow subscribers lag and
//!   lose old events rather than blocking the engine.
//!
//! ## Usage
//!
//! ```rust
//! use watchsync::shared::SyncEvent;
//! use watchsync::sync::events::EventBus;
//!
//! let bus = EventBus::new();
//! let handle = bus.add_listener(|event: &SyncEvent| {
//!     println!("{}", event.event_type());
//!     Ok(())
//! });
//! bus.notify(SyncEvent::DataCleared);
//! handle.unsubscribe();
//! ```

use crate::shared::event::SyncEvent;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::broadcast;

/// Error a listener may return
pub type ListenerError = Box<dyn std::error::Error + Send + Sync>;

type Listener = Arc<dyn Fn(&SyncEvent) -> Result<(), ListenerError> + Send + Sync>;

/// Capacity of the broadcast channel
const BROADCAST_CAPACITY: usize = 256;

struct BusInner {
    listeners: RwLock<Vec<(u64, Listener)>>,
    next_id: AtomicU64,
    broadcast: broadcast::Sender<SyncEvent>,
}

/// Publish/subscribe hub for engine events
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("listeners", &self.listener_count())
            .field("subscribers", &self.inner.broadcast.receiver_count())
            .finish()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    /// Create an empty bus
    pub fn new() -> Self {
        let (broadcast, _) = broadcast::channel(BROADCAST_CAPACITY);
        Self {
            inner: Arc::new(BusInner {
                listeners: RwLock::new(Vec::new()),
                next_id: AtomicU64::new(1),
                broadcast,
            }),
        }
    }

    /// Register a callback; it stays registered until the returned handle's
    /// [`Unsubscribe::unsubscribe`] is called
    pub fn add_listener<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&SyncEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);
        self.inner
            .listeners
            .write()
            .unwrap_or_else(|e| e.into_inner())
            .push((id, Arc::new(listener)));
        Unsubscribe {
            bus: Arc::downgrade(&self.inner),
            id,
        }
    }

    /// New broadcast receiver; sees events sent after this call
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.broadcast.subscribe()
    }

    /// Number of registered callbacks
    pub fn listener_count(&self) -> usize {
        self.inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }

    /// Deliver an event to every listener and subscriber
    pub fn notify(&self, event: SyncEvent) {
        let listeners: Vec<(u64, Listener)> = self
            .inner
            .listeners
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone();

        tracing::debug!(
            "Dispatching {} to {} listener(s)",
            event.event_type(),
            listeners.len()
        );

        for (id, listener) in listeners {
            match catch_unwind(AssertUnwindSafe(|| listener(&event))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    tracing::warn!("Listener {} failed on {}: {}", id, event.event_type(), e)
                }
                Err(_) => {
                    tracing::error!("Listener {} panicked on {}", id, event.event_type())
                }
            }
        }

        // No subscribers is not an error
        let _ = self.inner.broadcast.send(event);
    }
}

/// Handle removing one listener from its bus
#[derive(Debug)]
pub struct Unsubscribe {
    bus: Weak<BusInner>,
    id: u64,
}

impl Unsubscribe {
    /// Remove the listener; returns whether it was still registered
    pub fn unsubscribe(self) -> bool {
        let Some(bus) = self.bus.upgrade() else {
            return false;
        };
        let mut listeners = bus.listeners.write().unwrap_or_else(|e| e.into_inner());
        let before = listeners.len();
        listeners.retain(|(id, _)| *id != self.id);
        listeners.len() != before
    }
}

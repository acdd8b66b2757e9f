//! # Sync Scheduler
//!
//! Background task deciding when the engine syncs on its own.
//!
//! ## Triggers
//!
//! - **Timer**: every `sync_interval` while online; ticks while offline are
//!   dropped, which suspends the timer
//! - **Reconnect**: every offline to online transition starts a catch-up cycle
//!   at once and restarts the timer period from that moment
//!
//! Cycles are spawned, so a slow request never delays the reaction to a
//! connectivity change.

use crate::sync::network_monitor::NetworkStatus;
use crate::sync::{SyncEngine, SyncTrigger};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};

/// Handle to a running scheduler
#[derive(Debug)]
pub struct SchedulerHandle {
    shutdown: Arc<Notify>,
    task: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Stop the loop and wait for it to exit. Cycles already running finish
    /// on their own.
    pub async fn shutdown(self) {
        self.shutdown.notify_one();
        if let Err(e) = self.task.await {
            tracing::error!("Sync scheduler task failed: {}", e);
        }
    }

    /// Whether the loop has exited
    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

pub(crate) fn spawn(engine: SyncEngine, period: Duration) -> SchedulerHandle {
    let shutdown = Arc::new(Notify::new());
    let connectivity = engine.connectivity().subscribe();
    let task = tokio::spawn(run(engine, period, connectivity, shutdown.clone()));
    SchedulerHandle { shutdown, task }
}

async fn run(
    engine: SyncEngine,
    period: Duration,
    mut connectivity: watch::Receiver<NetworkStatus>,
    shutdown: Arc<Notify>,
) {
    tracing::info!("Sync scheduler started (every {:?})", period);

    let mut timer = interval_at(Instant::now() + period, period);
    timer.set_missed_tick_behavior(MissedTickBehavior::Delay);
    connectivity.borrow_and_update();

    loop {
        tokio::select! {
            _ = shutdown.notified() => break,
            changed = connectivity.changed() => {
                if changed.is_err() {
                    tracing::warn!("Connectivity source closed, stopping scheduler");
                    break;
                }
                let status = *connectivity.borrow_and_update();
                if status.is_online() {
                    engine.handle_reconnect();
                    timer.reset();
                } else {
                    tracing::info!("Offline, periodic sync suspended");
                }
            }
            _ = timer.tick() => {
                if engine.is_online() {
                    engine.spawn_cycle(SyncTrigger::Timer);
                }
            }
        }
    }

    tracing::info!("Sync scheduler stopped");
}

//! # Sync State Management
//!
//! Process-wide, non-persisted state of the orchestrator and the state machine
//! each sync cycle walks through.
//!
//! ## Cycle state machine
//!
//! | from               | event      | to                 |
//! |--------------------|------------|--------------------|
//! | `Idle`             | `Start`    | `Sending`          |
//! | `Sending`          | `Respond`  | `ApplyingResponse` |
//! | `Sending`          | `Fail`     | `BackingOff`       |
//! | `ApplyingResponse` | `Finish`   | `Idle`             |
//! | `BackingOff`       | `Finish`   | `Idle`             |
//!
//! Any other pair is rejected. Entering `Sending` is only possible through
//! [`SyncState::try_begin`], which also takes the `sync_in_progress` flag; the
//! returned [`CycleGuard`] hands both back when dropped, on every exit path.

use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Phase of the current sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncPhase {
    /// No cycle running
    #[default]
    Idle,
    /// Request in flight
    Sending,
    /// Writing the server's answer into local state
    ApplyingResponse,
    /// Send failed; deciding on a retry
    BackingOff,
}

/// Inputs driving [`SyncPhase`] transitions
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhaseEvent {
    /// A cycle begins sending
    Start,
    /// A successful response arrived
    Respond,
    /// The send failed
    Fail,
    /// The cycle is over
    Finish,
}

impl SyncPhase {
    /// Next phase, or `None` if `event` is not allowed in this phase
    pub fn next(self, event: PhaseEvent) -> Option<SyncPhase> {
        use PhaseEvent::*;
        use SyncPhase::*;

        match (self, event) {
            (Idle, Start) => Some(Sending),
            (Sending, Respond) => Some(ApplyingResponse),
            (Sending, Fail) => Some(BackingOff),
            (ApplyingResponse, Finish) | (BackingOff, Finish) => Some(Idle),
            _ => None,
        }
    }
}

/// Orchestrator state shared between the engine, retries and the scheduler
#[derive(Debug, Default)]
pub struct SyncState {
    in_progress: AtomicBool,
    phase: Mutex<SyncPhase>,
    retry_count: AtomicU32,
    last_sync_timestamp: AtomicI64,
    follow_up: AtomicBool,
}

/// Point-in-time copy of [`SyncState`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStateSnapshot {
    pub phase: SyncPhase,
    pub sync_in_progress: bool,
    pub retry_count: u32,
    pub last_sync_timestamp: i64,
}

impl SyncState {
    /// Initial state with the persisted last sync timestamp
    pub fn new(last_sync_timestamp: i64) -> Self {
        Self {
            last_sync_timestamp: AtomicI64::new(last_sync_timestamp),
            ..Self::default()
        }
    }

    /// Take the cycle mutex, or `None` if a cycle is already running
    pub fn try_begin(&self) -> Option<CycleGuard<'_>> {
        self.in_progress
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()?;
        Some(CycleGuard { state: self })
    }

    /// Whether a cycle holds the mutex
    pub fn is_in_progress(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    /// Current cycle phase
    pub fn phase(&self) -> SyncPhase {
        *self.lock_phase()
    }

    /// Consecutive failed attempts of the current cycle
    pub fn retry_count(&self) -> u32 {
        self.retry_count.load(Ordering::Acquire)
    }

    /// Count one more failed attempt; returns the new count
    pub fn increment_retry(&self) -> u32 {
        self.retry_count.fetch_add(1, Ordering::AcqRel) + 1
    }

    /// Forget previous failures
    pub fn reset_retry(&self) {
        self.retry_count.store(0, Ordering::Release);
    }

    /// Server timestamp of the last successful cycle
    pub fn last_sync_timestamp(&self) -> i64 {
        self.last_sync_timestamp.load(Ordering::Acquire)
    }

    /// Record the server timestamp of a successful cycle
    pub fn set_last_sync_timestamp(&self, timestamp: i64) {
        self.last_sync_timestamp.store(timestamp, Ordering::Release);
    }

    /// Ask the running cycle to run one more pass before releasing the mutex
    pub fn request_follow_up(&self) {
        self.follow_up.store(true, Ordering::Release);
    }

    /// Consume a pending follow-up request
    pub fn take_follow_up(&self) -> bool {
        self.follow_up.swap(false, Ordering::AcqRel)
    }

    /// Copy of every field
    pub fn snapshot(&self) -> SyncStateSnapshot {
        SyncStateSnapshot {
            phase: self.phase(),
            sync_in_progress: self.is_in_progress(),
            retry_count: self.retry_count(),
            last_sync_timestamp: self.last_sync_timestamp(),
        }
    }

    fn lock_phase(&self) -> MutexGuard<'_, SyncPhase> {
        self.phase.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Proof of holding the cycle mutex
#[derive(Debug)]
pub struct CycleGuard<'a> {
    state: &'a SyncState,
}

impl CycleGuard<'_> {
    /// Apply a state machine transition; illegal transitions are logged and
    /// leave the phase unchanged
    pub fn transition(&self, event: PhaseEvent) -> SyncPhase {
        let mut phase = self.state.lock_phase();
        match phase.next(event) {
            Some(next) => {
                tracing::trace!("Sync phase {:?} -> {:?}", *phase, next);
                *phase = next;
            }
            None => tracing::warn!("Ignoring {:?} in sync phase {:?}", event, *phase),
        }
        *phase
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        *self.state.lock_phase() = SyncPhase::Idle;
        self.state.in_progress.store(false, Ordering::Release);
    }
}

//! # Watch Progress Sync Engine
//!
//! Keeps per-item playback progress consistent across the devices of one
//! account while tolerating offline periods, concurrent edits and server
//! failures.
//!
//! ## Architecture
//!
//! [`SyncEngine`] owns every component and is built with its dependencies
//! injected:
//! - **Local Store**: durable records, queue, conflict log (`local_db`)
//! - **Sync Queue**: unacknowledged updates, one per item (`offline::queue`)
//! - **Transport**: the server round trip (`transport`)
//! - **Conflict Resolver**: pure resolution policies (`conflict_resolver`)
//! - **Remote Merger**: other devices' updates into local state (`offline::reconciliation`)
//! - **Connectivity**: online/offline signal (`network_monitor`)
//! - **Event Bus**: lifecycle notifications (`events`)
//! - **Scheduler**: periodic and reconnect triggers (`scheduler`)
//!
//! ## Sync cycle
//!
//! A cycle snapshots the queue, sends it as one batch and applies the answer:
//! acknowledged items are marked synced and dequeued, remote updates are merged,
//! server-reported conflicts are settled with the default policy (after which
//! the cycle runs once more). A failed send is retried with exponential backoff
//! while online; once retries are used up `sync_failed` is emitted and the
//! engine waits for the next natural trigger.
//!
//! Only one cycle runs at a time. Writes made while a batch is in flight stay
//! queued for the next cycle.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use watchsync::shared::SyncConfig;
//! use watchsync::sync::SyncEngine;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SyncEngine::builder(SyncConfig::load(None)?).build()?;
//!
//! engine.add_listener(|event| {
//!     println!("{}", event.event_type());
//!     Ok(())
//! });
//!
//! engine.update_progress("movie-42", 37.5)?;
//! let scheduler = engine.start();
//!
//! // ...
//! scheduler.shutdown().await;
//! # Ok(())
//! # }
//! ```

pub mod clock;
pub mod conflict_resolver;
pub mod events;
pub mod metrics;
pub mod network_monitor;
pub mod scheduler;
pub mod sync_state;
pub mod transport;

pub use clock::{Clock, ManualClock, SystemClock};
pub use conflict_resolver::{ConflictResolver, ResolutionPolicy};
pub use events::{EventBus, ListenerError, Unsubscribe};
pub use metrics::{MetricsSnapshot, SyncMetrics};
pub use network_monitor::{ConnectivityMonitor, NetworkStatus};
pub use scheduler::SchedulerHandle;
pub use sync_state::{SyncPhase, SyncState};
pub use transport::{HttpTransport, SyncTransport};

use crate::local_db::{DeviceIdentity, LocalStore, SqliteStorage, StorageBackend};
use crate::offline::reconciliation::normalize_remote;
use crate::offline::{
    MergeOutcome, ProgressDebouncer, RemoteUpdateMerger, RetryDecision, RetryPolicy, SyncQueue,
};
use crate::shared::config::SyncConfig;
use crate::shared::error::{SyncError, TransportError};
use crate::shared::event::{ResolvedConflict, SyncEvent, UpdateSource};
use crate::shared::progress::{
    clamp_progress, ConflictRecord, ProgressRecord, ProgressUpdate, SyncQueueEntry,
};
use crate::shared::protocol::{SyncRequest, SyncResponse};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use sync_state::{CycleGuard, PhaseEvent};
use tokio::sync::broadcast;

/// What started a sync cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncTrigger {
    /// Explicit `sync_now`
    Manual,
    /// Periodic timer
    Timer,
    /// Connectivity came back
    Reconnect,
    /// Backoff timer after a failed attempt
    Retry,
}

/// Why a cycle did not start
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    Offline,
    InProgress,
}

/// Result of a successful round trip
#[derive(Debug, Clone, PartialEq, Default)]
pub struct CycleSummary {
    /// Items removed from the queue
    pub acked: Vec<String>,
    /// Remote updates that changed local state
    pub remote_applied: usize,
    /// Server-reported conflicts settled
    pub conflicts_resolved: usize,
    /// Server clock of the response
    pub server_timestamp: i64,
}

/// What a call to the orchestrator did
#[derive(Debug, Clone, PartialEq)]
pub enum CycleOutcome {
    /// No cycle ran
    Skipped(SkipReason),
    /// The queue was empty
    NothingToSend,
    /// The server answered successfully
    Completed(CycleSummary),
    /// The send failed and another attempt is scheduled
    RetryScheduled {
        attempt: u32,
        delay: Duration,
    },
    /// The send failed and retries are used up
    Failed {
        attempts: u32,
        error: TransportError,
    },
}

impl CycleOutcome {
    fn is_failure(&self) -> bool {
        matches!(
            self,
            CycleOutcome::RetryScheduled { .. } | CycleOutcome::Failed { .. }
        )
    }
}

/// Health snapshot for displays and tests
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsistencyStatus {
    pub total_items: usize,
    pub queue_length: usize,
    pub last_sync_timestamp: i64,
    pub is_online: bool,
    pub conflict_count: usize,
    pub sync_in_progress: bool,
    pub phase: SyncPhase,
    pub retry_count: u32,
    pub device_id: String,
    pub metrics: MetricsSnapshot,
}

#[derive(Debug)]
struct EngineInner {
    config: SyncConfig,
    device_id: String,
    store: LocalStore,
    queue: SyncQueue,
    merger: RemoteUpdateMerger,
    resolver: ConflictResolver,
    retry_policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    transport: Arc<dyn SyncTransport>,
    connectivity: ConnectivityMonitor,
    state: SyncState,
    events: EventBus,
    metrics: SyncMetrics,
    /// Bumped to invalidate backoff timers that are already sleeping
    retry_epoch: AtomicU64,
}

/// Offline-first progress sync engine
#[derive(Debug, Clone)]
pub struct SyncEngine {
    inner: Arc<EngineInner>,
}

/// Builder wiring a [`SyncEngine`] to its collaborators
pub struct SyncEngineBuilder {
    config: SyncConfig,
    backend: Option<Arc<dyn StorageBackend>>,
    clock: Option<Arc<dyn Clock>>,
    transport: Option<Arc<dyn SyncTransport>>,
    connectivity: Option<ConnectivityMonitor>,
}

impl SyncEngineBuilder {
    /// Storage backend; defaults to a SQLite database under `config.storage_dir`
    pub fn backend(mut self, backend: Arc<dyn StorageBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    /// Wall clock; defaults to [`SystemClock`]
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Network client; defaults to [`HttpTransport`]
    pub fn transport(mut self, transport: Arc<dyn SyncTransport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Connectivity signal; defaults to online
    pub fn connectivity(mut self, connectivity: ConnectivityMonitor) -> Self {
        self.connectivity = Some(connectivity);
        self
    }

    /// Open storage, load persisted state and assemble the engine
    pub fn build(self) -> Result<SyncEngine, SyncError> {
        let config = self.config;
        let backend = match self.backend {
            Some(backend) => backend,
            None => Arc::new(SqliteStorage::open(&config.storage_dir)?) as Arc<dyn StorageBackend>,
        };
        let transport = match self.transport {
            Some(transport) => transport,
            None => Arc::new(HttpTransport::new(&config)?) as Arc<dyn SyncTransport>,
        };
        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock));
        let connectivity = self.connectivity.unwrap_or_default();

        let device_id = DeviceIdentity::new(backend.clone()).get_or_create_device_id();
        let store = LocalStore::new(backend);
        let queue = SyncQueue::new(store.clone());
        let merger = RemoteUpdateMerger::new(
            store.clone(),
            queue.clone(),
            device_id.clone(),
            config.conflict_history_limit,
        );
        let state = SyncState::new(store.last_sync_timestamp());

        tracing::info!(
            "Sync engine ready for device {} ({} queued update(s))",
            device_id,
            queue.len()
        );

        Ok(SyncEngine {
            inner: Arc::new(EngineInner {
                resolver: ConflictResolver::new(config.default_policy),
                retry_policy: RetryPolicy::from_config(&config),
                config,
                device_id,
                store,
                queue,
                merger,
                clock,
                transport,
                connectivity,
                state,
                events: EventBus::new(),
                metrics: SyncMetrics::new(),
                retry_epoch: AtomicU64::new(0),
            }),
        })
    }
}

impl SyncEngine {
    /// Start building an engine
    pub fn builder(config: SyncConfig) -> SyncEngineBuilder {
        SyncEngineBuilder {
            config,
            backend: None,
            clock: None,
            transport: None,
            connectivity: None,
        }
    }

    pub fn config(&self) -> &SyncConfig {
        &self.inner.config
    }

    /// Stable id of this installation
    pub fn device_id(&self) -> &str {
        &self.inner.device_id
    }

    pub fn connectivity(&self) -> &ConnectivityMonitor {
        &self.inner.connectivity
    }

    pub fn is_online(&self) -> bool {
        self.inner.connectivity.is_online()
    }

    /// Report connectivity; returns whether it changed. A running scheduler
    /// reacts to the transition.
    pub fn set_online(&self, online: bool) -> bool {
        self.inner.connectivity.set_online(online)
    }

    // ---- local writes -------------------------------------------------------

    /// Record progress for an item. Out-of-range values are clamped.
    pub fn update_progress(&self, item_id: &str, progress: f64) -> Result<ProgressRecord, SyncError> {
        self.update_progress_with(ProgressUpdate::new(item_id, progress))
    }

    /// Record progress with metadata and, optionally, the timestamp of the
    /// record the caller based the edit on.
    ///
    /// The write always happens. Overwriting a synced record the writer had
    /// not observed is logged as a conflict and announced with
    /// `conflict_detected`.
    pub fn update_progress_with(&self, update: ProgressUpdate) -> Result<ProgressRecord, SyncError> {
        let item_id = update.item_id.trim();
        if item_id.is_empty() {
            return Err(SyncError::validation("item_id", "item id must not be empty"));
        }

        let inner = &self.inner;
        let now = inner.clock.now_millis();
        let mut events = Vec::with_capacity(2);

        let record = {
            let _guard = inner.store.lock();
            let existing = inner.store.get(item_id);

            let (version, timestamp) = match &existing {
                // Keep timestamps strictly increasing per item even if the clock lags
                Some(existing) => (existing.version + 1, now.max(existing.timestamp + 1)),
                None => (1, now),
            };

            if let Some(existing) = &existing {
                if conflict_resolver::detect_stale_write(existing, update.base_timestamp).is_some() {
                    let conflict = conflict_resolver::conflict_record(existing, version, now);
                    tracing::warn!(
                        "Stale-base write on {}: replacing synced v{} from {}",
                        item_id,
                        existing.version,
                        existing.device_id
                    );
                    inner
                        .store
                        .append_conflict(item_id, conflict, inner.config.conflict_history_limit);
                    events.push(SyncEvent::ConflictDetected {
                        item_id: item_id.to_string(),
                        conflict,
                    });
                }
            }

            let record = ProgressRecord {
                item_id: item_id.to_string(),
                progress: clamp_progress(update.progress),
                timestamp,
                device_id: inner.device_id.clone(),
                metadata: update.metadata.sanitized(),
                version,
                synced: false,
            };
            inner.store.set(item_id, record.clone());
            inner.queue.enqueue(record.clone(), now);
            record
        };

        tracing::debug!(
            "Progress for {} set to {}% (v{})",
            record.item_id,
            record.progress,
            record.version
        );
        events.push(SyncEvent::ProgressUpdated {
            record: record.clone(),
        });
        self.emit_all(events);
        Ok(record)
    }

    /// Debouncer forwarding settled updates into this engine
    pub fn debouncer(&self) -> ProgressDebouncer {
        let engine = self.clone();
        ProgressDebouncer::new(self.inner.config.debounce_window, move |update| {
            if let Err(e) = engine.update_progress_with(update) {
                tracing::warn!("Dropping debounced update: {}", e);
            }
        })
    }

    // ---- queries ------------------------------------------------------------

    pub fn get_progress(&self, item_id: &str) -> Option<ProgressRecord> {
        self.inner.store.get(item_id)
    }

    pub fn get_all_progress(&self) -> HashMap<String, ProgressRecord> {
        self.inner.store.get_all().into_iter().collect()
    }

    /// Updates waiting for acknowledgement
    pub fn pending_updates(&self) -> Vec<SyncQueueEntry> {
        self.inner.queue.drain()
    }

    /// Conflicts logged for an item, oldest first
    pub fn conflict_history(&self, item_id: &str) -> Vec<ConflictRecord> {
        self.inner.store.conflict_history(item_id)
    }

    /// Point-in-time health snapshot
    pub fn get_consistency_status(&self) -> ConsistencyStatus {
        let inner = &self.inner;
        let state = inner.state.snapshot();
        ConsistencyStatus {
            total_items: inner.store.get_all().len(),
            queue_length: inner.queue.len(),
            last_sync_timestamp: state.last_sync_timestamp,
            is_online: inner.connectivity.is_online(),
            conflict_count: inner.store.conflict_count(),
            sync_in_progress: state.sync_in_progress,
            phase: state.phase,
            retry_count: state.retry_count,
            device_id: inner.device_id.clone(),
            metrics: inner.metrics.snapshot(),
        }
    }

    // ---- events -------------------------------------------------------------

    pub fn events(&self) -> &EventBus {
        &self.inner.events
    }

    /// Register a callback for every event
    pub fn add_listener<F>(&self, listener: F) -> Unsubscribe
    where
        F: Fn(&SyncEvent) -> Result<(), ListenerError> + Send + Sync + 'static,
    {
        self.inner.events.add_listener(listener)
    }

    /// Async receiver of every event
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.inner.events.subscribe()
    }

    fn emit(&self, event: SyncEvent) {
        self.inner.events.notify(event);
    }

    fn emit_all(&self, events: Vec<SyncEvent>) {
        for event in events {
            self.emit(event);
        }
    }

    // ---- sync cycle ---------------------------------------------------------

    /// Run a cycle now. Honors the cycle mutex and the offline gate.
    pub async fn sync_now(&self) -> CycleOutcome {
        self.run_cycle(SyncTrigger::Manual).await
    }

    /// Spawn a cycle on the runtime
    pub(crate) fn spawn_cycle(&self, trigger: SyncTrigger) {
        let engine = self.clone();
        tokio::spawn(async move {
            engine.run_cycle(trigger).await;
        });
    }

    /// Connectivity came back: forget old failures and catch up immediately
    pub(crate) fn handle_reconnect(&self) {
        tracing::info!("Back online, starting catch-up sync");
        self.inner.state.reset_retry();
        self.inner.retry_epoch.fetch_add(1, Ordering::AcqRel);
        self.spawn_cycle(SyncTrigger::Reconnect);
    }

    async fn run_cycle(&self, trigger: SyncTrigger) -> CycleOutcome {
        let inner = &self.inner;
        loop {
            if !inner.connectivity.is_online() {
                tracing::debug!("{:?} sync skipped: offline", trigger);
                inner.metrics.record_cycle_skipped();
                return CycleOutcome::Skipped(SkipReason::Offline);
            }

            let Some(guard) = inner.state.try_begin() else {
                tracing::debug!("{:?} sync skipped: cycle already running", trigger);
                inner.metrics.record_cycle_skipped();
                if trigger == SyncTrigger::Reconnect {
                    inner.state.request_follow_up();
                }
                return CycleOutcome::Skipped(SkipReason::InProgress);
            };

            tracing::debug!("{:?} sync cycle starting", trigger);
            let mut outcome = self.cycle_pass(&guard).await;

            if let CycleOutcome::Completed(summary) = &outcome {
                if summary.conflicts_resolved > 0 && inner.connectivity.is_online() {
                    tracing::debug!("Re-running cycle to flush conflict resolutions");
                    let rerun = self.cycle_pass(&guard).await;
                    if rerun != CycleOutcome::NothingToSend {
                        outcome = rerun;
                    }
                }
            }
            drop(guard);

            // A reconnect that arrived mid-cycle gets one more pass
            if inner.state.take_follow_up() && !outcome.is_failure() {
                tracing::debug!("Running follow-up cycle requested during send");
                continue;
            }
            return outcome;
        }
    }

    async fn cycle_pass(&self, guard: &CycleGuard<'_>) -> CycleOutcome {
        let inner = &self.inner;
        let entries = inner.queue.drain();
        if entries.is_empty() {
            tracing::trace!("Sync queue empty");
            return CycleOutcome::NothingToSend;
        }

        inner.metrics.record_cycle_start();
        guard.transition(PhaseEvent::Start);
        let started = Instant::now();

        let request = SyncRequest {
            device_id: inner.device_id.clone(),
            timestamp: inner.clock.now_millis(),
            updates: entries.into_iter().map(|entry| entry.record).collect(),
            last_sync_timestamp: inner.state.last_sync_timestamp(),
        };
        tracing::info!("Syncing {} update(s)", request.updates.len());

        let result = inner
            .transport
            .sync(&request)
            .await
            .and_then(|response| {
                if response.success {
                    Ok(response)
                } else {
                    Err(TransportError::Rejected)
                }
            });

        let outcome = match result {
            Ok(response) => {
                guard.transition(PhaseEvent::Respond);
                self.apply_response(&request, response, started)
            }
            Err(error) => {
                guard.transition(PhaseEvent::Fail);
                self.handle_failure(&request, error)
            }
        };
        guard.transition(PhaseEvent::Finish);
        outcome
    }

    fn apply_response(
        &self,
        request: &SyncRequest,
        response: SyncResponse,
        started: Instant,
    ) -> CycleOutcome {
        let inner = &self.inner;
        let now = inner.clock.now_millis();
        let mut events = Vec::new();

        let acked = self.apply_acks(&request.updates, &response.synced, &mut events);

        let mut resolved = Vec::new();
        for conflict in response.conflicts() {
            let (settled, record) =
                self.settle_conflict(&conflict.local_version, &conflict.remote_version, None, now);
            events.push(SyncEvent::ConflictDetected {
                item_id: settled.item_id.clone(),
                conflict: record,
            });
            resolved.push(settled);
        }

        let mut remote_applied = 0;
        for outcome in inner.merger.apply_all(response.remote_updates(), now) {
            match outcome {
                MergeOutcome::Accepted(record) => {
                    remote_applied += 1;
                    events.push(SyncEvent::ProgressSynced {
                        record,
                        source: UpdateSource::Remote,
                    });
                }
                MergeOutcome::Merged { record, conflict } => {
                    remote_applied += 1;
                    events.push(SyncEvent::ConflictDetected {
                        item_id: record.item_id.clone(),
                        conflict,
                    });
                    events.push(SyncEvent::ProgressMerged { record });
                }
                MergeOutcome::Skipped => {}
            }
        }

        inner.store.set_last_sync_timestamp(response.server_timestamp);
        inner.state.set_last_sync_timestamp(response.server_timestamp);
        inner.state.reset_retry();
        inner.retry_epoch.fetch_add(1, Ordering::AcqRel);
        inner
            .metrics
            .record_cycle_success(acked.len(), remote_applied, started.elapsed());

        let conflicts_resolved = resolved.len();
        if conflicts_resolved > 0 {
            inner.metrics.record_conflicts_resolved(conflicts_resolved);
            tracing::info!("Resolved {} server-reported conflict(s)", conflicts_resolved);
            events.push(SyncEvent::ConflictsResolved { resolved });
        }

        tracing::info!(
            "Sync completed: {} acked, {} remote update(s) applied",
            acked.len(),
            remote_applied
        );
        events.push(SyncEvent::SyncCompleted {
            synced: acked.clone(),
            server_timestamp: response.server_timestamp,
        });
        self.emit_all(events);

        CycleOutcome::Completed(CycleSummary {
            acked,
            remote_applied,
            conflicts_resolved,
            server_timestamp: response.server_timestamp,
        })
    }

    /// Mark acknowledged records synced and dequeue them, unless they were
    /// rewritten while the batch was in flight
    fn apply_acks(
        &self,
        sent: &[ProgressRecord],
        synced: &[String],
        events: &mut Vec<SyncEvent>,
    ) -> Vec<String> {
        let inner = &self.inner;
        let sent: HashMap<&str, &ProgressRecord> =
            sent.iter().map(|r| (r.item_id.as_str(), r)).collect();

        let _guard = inner.store.lock();
        let mut acked = Vec::with_capacity(synced.len());
        for item_id in synced {
            let Some(sent_record) = sent.get(item_id.as_str()) else {
                tracing::warn!("Server acknowledged {} which was not in the batch", item_id);
                continue;
            };

            match inner.queue.get(item_id) {
                Some(entry) if entry.record.version != sent_record.version => {
                    tracing::debug!("{} changed during send, keeping it queued", item_id);
                    continue;
                }
                _ => acked.push(item_id.clone()),
            }

            if let Some(mut record) = inner.store.get(item_id) {
                if record.version == sent_record.version && !record.synced {
                    record.synced = true;
                    inner.store.set(item_id, record.clone());
                    events.push(SyncEvent::ProgressSynced {
                        record,
                        source: UpdateSource::Local,
                    });
                }
            }
        }
        inner.queue.remove_acked(&acked);
        acked
    }

    /// Write the winner of `local` vs `remote` and log the conflict.
    ///
    /// The current local record takes precedence over `reported_local` when
    /// one exists. A remote winner is stored synced and dequeued; any other
    /// winner gets a version past the remote one and is queued. A merged
    /// winner is attributed to this device.
    fn settle_conflict(
        &self,
        reported_local: &ProgressRecord,
        remote: &ProgressRecord,
        policy: Option<ResolutionPolicy>,
        now: i64,
    ) -> (ResolvedConflict, ConflictRecord) {
        let inner = &self.inner;
        let remote = normalize_remote(remote);
        let item_id = remote.item_id.clone();

        let _guard = inner.store.lock();
        let local = inner
            .store
            .get(&item_id)
            .unwrap_or_else(|| normalize_remote(reported_local));

        let policy = policy.unwrap_or(inner.resolver.default_policy());
        let mut winner = inner.resolver.resolve(&local, &remote, Some(policy));
        let remote_won = winner == remote;
        if remote_won {
            winner.synced = true;
            inner.queue.remove_acked(std::slice::from_ref(&item_id));
        } else {
            if winner != local {
                winner.device_id = inner.device_id.clone();
            }
            winner.version = winner.version.max(remote.version + 1);
            winner.synced = false;
            inner.queue.enqueue(winner.clone(), now);
        }
        inner.store.set(&item_id, winner.clone());

        let conflict = conflict_resolver::conflict_record(&local, winner.version, now);
        inner
            .store
            .append_conflict(&item_id, conflict, inner.config.conflict_history_limit);

        tracing::info!(
            "Conflict on {} settled with {:?}: {} won at {}%",
            item_id,
            policy,
            if remote_won { "remote" } else { "local" },
            winner.progress
        );
        (
            ResolvedConflict {
                item_id,
                winner,
                remote_won,
            },
            conflict,
        )
    }

    fn handle_failure(&self, request: &SyncRequest, error: TransportError) -> CycleOutcome {
        let inner = &self.inner;
        inner.metrics.record_cycle_failure();

        let item_ids: Vec<String> = request.updates.iter().map(|r| r.item_id.clone()).collect();
        {
            let _guard = inner.store.lock();
            inner.queue.record_failed_attempt(&item_ids);
        }

        let attempt = inner.state.increment_retry();
        match inner.retry_policy.decide(attempt) {
            RetryDecision::RetryAfter(delay) => {
                tracing::warn!(
                    "Sync attempt {} failed: {}; retrying in {:?}",
                    attempt,
                    error,
                    delay
                );
                self.schedule_retry(delay);
                CycleOutcome::RetryScheduled { attempt, delay }
            }
            RetryDecision::Exhausted => {
                tracing::error!("Sync failed after {} attempt(s): {}", attempt, error);
                inner.state.reset_retry();
                // Terminal until the next timer, reconnect or manual trigger
                inner.retry_epoch.fetch_add(1, Ordering::AcqRel);
                self.emit(SyncEvent::SyncFailed {
                    error: error.to_string(),
                    attempts: attempt,
                });
                CycleOutcome::Failed {
                    attempts: attempt,
                    error,
                }
            }
        }
    }

    /// Arm the backoff timer, superseding any timer armed earlier
    fn schedule_retry(&self, delay: Duration) {
        let engine = self.clone();
        let epoch = self.inner.retry_epoch.fetch_add(1, Ordering::AcqRel) + 1;
        tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if engine.inner.retry_epoch.load(Ordering::Acquire) != epoch {
                tracing::debug!("Backoff retry superseded");
                return;
            }
            if !engine.is_online() {
                tracing::debug!("Still offline, dropping backoff retry");
                return;
            }
            engine.run_cycle(SyncTrigger::Retry).await;
        });
    }

    // ---- conflicts ----------------------------------------------------------

    /// Resolve the local record of `remote.item_id` against `remote` and
    /// store the result. Uses the configured default policy when `policy` is
    /// `None`.
    pub fn resolve_conflict(
        &self,
        remote: &ProgressRecord,
        policy: Option<ResolutionPolicy>,
    ) -> Result<ResolvedConflict, SyncError> {
        if remote.item_id.trim().is_empty() {
            return Err(SyncError::validation("item_id", "item id must not be empty"));
        }
        let now = self.inner.clock.now_millis();
        let (resolved, conflict) = self.settle_conflict(remote, remote, policy, now);

        self.emit(SyncEvent::ConflictDetected {
            item_id: resolved.item_id.clone(),
            conflict,
        });
        self.emit(SyncEvent::ConflictsResolved {
            resolved: vec![resolved.clone()],
        });
        Ok(resolved)
    }

    // ---- recovery -----------------------------------------------------------

    /// Replace the local record of an item with the server's copy.
    ///
    /// Skips conflict resolution entirely; the server copy is stored as synced
    /// and any queued local edit of the item is dropped.
    pub async fn recover_state(&self, item_id: &str) -> Result<ProgressRecord, SyncError> {
        let item_id = item_id.trim();
        if item_id.is_empty() {
            return Err(SyncError::validation("item_id", "item id must not be empty"));
        }
        if !self.is_online() {
            return Err(SyncError::Offline);
        }

        let inner = &self.inner;
        let fetched = inner.transport.fetch_item(item_id).await?;
        if fetched.item_id != item_id {
            return Err(TransportError::decode(format!(
                "requested {} but server returned {}",
                item_id, fetched.item_id
            ))
            .into());
        }

        let record = normalize_remote(&fetched).with_synced(true);
        {
            let _guard = inner.store.lock();
            inner.store.set(item_id, record.clone());
            inner.queue.remove_acked(&[item_id.to_string()]);
        }

        tracing::warn!("Recovered {} from server at {}%", item_id, record.progress);
        self.emit(SyncEvent::StateRecovered {
            record: record.clone(),
        });
        Ok(record)
    }

    /// Wipe records, queue, conflict log and sync bookkeeping.
    ///
    /// The device id is kept.
    pub fn reset(&self) {
        let inner = &self.inner;
        {
            let _guard = inner.store.lock();
            inner.store.clear();
        }
        inner.state.reset_retry();
        inner.state.set_last_sync_timestamp(0);
        inner.retry_epoch.fetch_add(1, Ordering::AcqRel);
        inner.metrics.reset();

        tracing::info!("Local progress state cleared");
        self.emit(SyncEvent::DataCleared);
    }

    // ---- scheduling ---------------------------------------------------------

    /// Spawn the background trigger loop: the periodic timer while online and
    /// a catch-up cycle on every offline to online transition
    pub fn start(&self) -> SchedulerHandle {
        scheduler::spawn(self.clone(), self.inner.config.sync_interval)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::local_db::MemoryStorage;
    use crate::shared::progress::ProgressMetadata;
    use futures_util::future::BoxFuture;
    use futures_util::FutureExt;
    use std::sync::Mutex;

    /// Transport answering every request with the same response
    #[derive(Debug)]
    struct FixedTransport {
        response: Result<SyncResponse, TransportError>,
        requests: Mutex<Vec<SyncRequest>>,
    }

    impl FixedTransport {
        fn new(response: Result<SyncResponse, TransportError>) -> Arc<Self> {
            Arc::new(Self {
                response,
                requests: Mutex::new(Vec::new()),
            })
        }
    }

    impl SyncTransport for FixedTransport {
        fn sync<'a>(
            &'a self,
            request: &'a SyncRequest,
        ) -> BoxFuture<'a, Result<SyncResponse, TransportError>> {
            self.requests.lock().unwrap().push(request.clone());
            let response = self.response.clone();
            async move { response }.boxed()
        }

        fn fetch_item<'a>(
            &'a self,
            item_id: &'a str,
        ) -> BoxFuture<'a, Result<ProgressRecord, TransportError>> {
            let record = ProgressRecord::new(item_id, 12.0, 500, "server");
            async move { Ok(record) }.boxed()
        }
    }

    fn test_engine(transport: Arc<dyn SyncTransport>) -> (SyncEngine, Arc<ManualClock>) {
        let clock = Arc::new(ManualClock::new(1_000));
        let engine = SyncEngine::builder(SyncConfig::default())
            .backend(Arc::new(MemoryStorage::new()))
            .clock(clock.clone())
            .transport(transport)
            .build()
            .unwrap();
        (engine, clock)
    }

    #[tokio::test]
    async fn test_update_clamps_and_queues() {
        let (engine, _) = test_engine(FixedTransport::new(Err(TransportError::Rejected)));

        let record = engine.update_progress("m1", 150.0).unwrap();
        assert_eq!(record.progress, 100.0);
        assert_eq!(record.version, 1);
        assert_eq!(engine.pending_updates().len(), 1);
    }

    #[tokio::test]
    async fn test_empty_item_id_is_rejected() {
        let (engine, _) = test_engine(FixedTransport::new(Err(TransportError::Rejected)));
        let err = engine.update_progress("  ", 10.0).unwrap_err();
        assert!(matches!(err, SyncError::Validation { .. }));
    }

    #[tokio::test]
    async fn test_versions_and_timestamps_increase() {
        let (engine, _) = test_engine(FixedTransport::new(Err(TransportError::Rejected)));
        let first = engine.update_progress("m1", 10.0).unwrap();
        let second = engine.update_progress("m1", 20.0).unwrap();
        assert_eq!(second.version, first.version + 1);
        assert!(second.timestamp > first.timestamp);
    }

    #[tokio::test]
    async fn test_successful_cycle_marks_synced() {
        let transport = FixedTransport::new(Ok(SyncResponse::success(vec!["m1".into()], 9_999)));
        let (engine, _) = test_engine(transport.clone());
        engine
            .update_progress_with(
                ProgressUpdate::new("m1", 40.0)
                    .with_metadata(ProgressMetadata::default().with_quality("HD")),
            )
            .unwrap();

        let outcome = engine.sync_now().await;
        assert!(matches!(outcome, CycleOutcome::Completed(ref s) if s.acked == vec!["m1".to_string()]));
        assert!(engine.get_progress("m1").unwrap().synced);
        assert!(engine.pending_updates().is_empty());

        let status = engine.get_consistency_status();
        assert_eq!(status.last_sync_timestamp, 9_999);
        assert_eq!(status.retry_count, 0);
        assert!(!status.sync_in_progress);

        let requests = transport.requests.lock().unwrap();
        assert_eq!(requests[0].device_id, engine.device_id());
        assert_eq!(requests[0].updates[0].metadata.quality.as_deref(), Some("HD"));
    }

    #[tokio::test]
    async fn test_empty_queue_sends_nothing() {
        let transport = FixedTransport::new(Ok(SyncResponse::success(vec![], 1)));
        let (engine, _) = test_engine(transport.clone());
        assert_eq!(engine.sync_now().await, CycleOutcome::NothingToSend);
        assert!(transport.requests.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_skips_cycle() {
        let (engine, _) = test_engine(FixedTransport::new(Ok(SyncResponse::success(vec![], 1))));
        engine.update_progress("m1", 5.0).unwrap();
        engine.set_online(false);
        assert_eq!(
            engine.sync_now().await,
            CycleOutcome::Skipped(SkipReason::Offline)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_rejected_response_backs_off() {
        let mut response = SyncResponse::success(vec!["m1".into()], 1);
        response.success = false;
        let (engine, _) = test_engine(FixedTransport::new(Ok(response)));
        engine.update_progress("m1", 5.0).unwrap();

        let outcome = engine.sync_now().await;
        assert_eq!(
            outcome,
            CycleOutcome::RetryScheduled {
                attempt: 1,
                delay: Duration::from_secs(5)
            }
        );
        assert_eq!(engine.pending_updates()[0].attempts, 1);
        assert!(!engine.get_progress("m1").unwrap().synced);
    }

    #[tokio::test]
    async fn test_stale_base_write_is_logged_not_blocked() {
        let (engine, _) = test_engine(FixedTransport::new(Err(TransportError::Rejected)));
        engine.inner.store.set(
            "m1",
            ProgressRecord::new("m1", 80.0, 900, "other-device")
                .with_version(4)
                .with_synced(true),
        );

        // Edited without a base: the writer worked from the stored copy
        engine.update_progress("m1", 85.0).unwrap();
        assert!(engine.conflict_history("m1").is_empty());
        engine.inner.store.set(
            "m1",
            ProgressRecord::new("m1", 80.0, 900, "other-device")
                .with_version(4)
                .with_synced(true),
        );

        let record = engine
            .update_progress_with(ProgressUpdate::new("m1", 20.0).based_on(800))
            .unwrap();
        assert_eq!(record.progress, 20.0);
        assert_eq!(record.version, 5);

        let history = engine.conflict_history("m1");
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].old_version, 4);
        assert_eq!(history[0].new_version, 5);
        assert_eq!(engine.get_consistency_status().conflict_count, 1);
    }

    #[tokio::test]
    async fn test_recover_state_overwrites_local() {
        let (engine, _) = test_engine(FixedTransport::new(Err(TransportError::Rejected)));
        engine.update_progress("m1", 90.0).unwrap();

        let record = engine.recover_state("m1").await.unwrap();
        assert_eq!(record.progress, 12.0);
        assert!(record.synced);
        assert_eq!(engine.get_progress("m1"), Some(record));
        assert!(engine.pending_updates().is_empty());
    }

    #[tokio::test]
    async fn test_reset_clears_state() {
        let (engine, _) = test_engine(FixedTransport::new(Err(TransportError::Rejected)));
        engine.update_progress("m1", 90.0).unwrap();
        let device_id = engine.device_id().to_string();

        engine.reset();
        let status = engine.get_consistency_status();
        assert_eq!(status.total_items, 0);
        assert_eq!(status.queue_length, 0);
        assert_eq!(status.device_id, device_id);
    }
}

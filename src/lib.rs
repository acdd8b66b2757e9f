//! Watchsync - Main Library
//!
//! Watchsync is an offline-first engine that keeps per-item watch progress
//! consistent across the devices of one account. Writes land locally first,
//! are queued, and reach the server in batches whenever the device is online.
//!
//! # Overview
//!
//! This library provides:
//! - Durable local progress state behind a pluggable key-value backend
//! - A deduplicated sync queue with bounded exponential-backoff retries
//! - Deterministic conflict resolution (latest, local, remote, merge)
//! - Folding of other devices' updates into local state
//! - Lifecycle events and a consistency snapshot for health displays
//!
//! # Module Structure
//!
//! - **`shared`** - Types used by every layer
//!   - Progress records, sync protocol bodies, events
//!   - Error types and configuration
//!
//! - **`local_db`** - Durable local state
//!   - Storage backends (memory, files)
//!   - Schema-versioned records, queue, conflict log
//!   - Device identity
//!
//! - **`offline`** - Working without the network
//!   - Sync queue, retry policy, remote update merging, debouncing
//!
//! - **`sync`** - The orchestrator
//!   - `SyncEngine`, transport, scheduler, event bus, metrics
//!
//! # Usage
//!
//! ```rust,no_run
//! use watchsync::shared::SyncConfig;
//! use watchsync::sync::SyncEngine;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let engine = SyncEngine::builder(SyncConfig::load(None)?).build()?;
//! engine.update_progress("episode-7", 64.0)?;
//! engine.sync_now().await;
//! println!("{:?}", engine.get_consistency_status());
//! # Ok(())
//! # }
//! ```
//!
//! # Thread Safety
//!
//! `SyncEngine` is cheap to clone and every clone shares one state. Local
//! store operations are synchronous and serialized by the store's write lock;
//! the only suspension points are network calls and timers.
//!
//! # Error Handling
//!
//! - Storage failures never reach callers; reads fall back to empty state
//! - Network failures drive the backoff and surface as `sync_failed` events
//! - `SyncError` is returned for invalid arguments and failed recovery

/// Shared types and data structures
pub mod shared;

/// Durable local state
pub mod local_db;

/// Offline queueing, retry and reconciliation
pub mod offline;

/// Sync orchestration
pub mod sync;

pub use shared::{ProgressRecord, ProgressUpdate, SyncConfig, SyncError, SyncEvent};
pub use sync::SyncEngine;

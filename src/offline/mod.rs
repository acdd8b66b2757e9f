//! # Offline Support
//!
//! Everything that lets progress writes survive while the device is offline
//! and converge once it reconnects.
//!
//! ## Key Components
//!
//! - `queue.rs`: deduplicated queue of unacknowledged updates
//! - `retry.rs`: retry ceiling and backoff schedule of failed sync cycles
//! - `reconciliation.rs`: folding other devices' updates into local state
//! - `debounce.rs`: coalescing bursts of progress reports per item

pub mod debounce;
pub mod queue;
pub mod reconciliation;
pub mod retry;

pub use debounce::ProgressDebouncer;
pub use queue::SyncQueue;
pub use reconciliation::{MergeOutcome, RemoteUpdateMerger};
pub use retry::{exponential_delay, RetryDecision, RetryPolicy};

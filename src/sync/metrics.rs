//! # Sync Metrics
//!
//! Counters describing what the orchestrator has done since startup. They are
//! surfaced in the consistency snapshot and never drive control flow.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Live counters, updated lock-free
#[derive(Debug, Default)]
pub struct SyncMetrics {
    cycles_started: AtomicU64,
    cycles_succeeded: AtomicU64,
    cycles_failed: AtomicU64,
    cycles_skipped: AtomicU64,
    items_acked: AtomicU64,
    remote_updates_applied: AtomicU64,
    conflicts_resolved: AtomicU64,
    last_cycle_millis: AtomicU64,
}

/// Copy of the counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MetricsSnapshot {
    pub cycles_started: u64,
    pub cycles_succeeded: u64,
    pub cycles_failed: u64,
    pub cycles_skipped: u64,
    pub items_acked: u64,
    pub remote_updates_applied: u64,
    pub conflicts_resolved: u64,
    pub last_cycle_millis: u64,
}

impl MetricsSnapshot {
    /// Succeeded cycles over finished cycles, 0 before any cycle finishes
    pub fn success_rate(&self) -> f64 {
        let finished = self.cycles_succeeded + self.cycles_failed;
        if finished == 0 {
            0.0
        } else {
            self.cycles_succeeded as f64 / finished as f64
        }
    }
}

impl SyncMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn record_cycle_start(&self) {
        self.cycles_started.fetch_add(1, Ordering::Relaxed);
    }

    /// A cycle did not start (busy, offline or nothing queued)
    pub fn record_cycle_skipped(&self) {
        self.cycles_skipped.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_cycle_success(&self, acked: usize, remote_applied: usize, elapsed: Duration) {
        self.cycles_succeeded.fetch_add(1, Ordering::Relaxed);
        self.items_acked.fetch_add(acked as u64, Ordering::Relaxed);
        self.remote_updates_applied
            .fetch_add(remote_applied as u64, Ordering::Relaxed);
        self.last_cycle_millis
            .store(elapsed.as_millis() as u64, Ordering::Relaxed);
    }

    /// A send attempt failed
    pub fn record_cycle_failure(&self) {
        self.cycles_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_conflicts_resolved(&self, count: usize) {
        self.conflicts_resolved
            .fetch_add(count as u64, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles_started: self.cycles_started.load(Ordering::Relaxed),
            cycles_succeeded: self.cycles_succeeded.load(Ordering::Relaxed),
            cycles_failed: self.cycles_failed.load(Ordering::Relaxed),
            cycles_skipped: self.cycles_skipped.load(Ordering::Relaxed),
            items_acked: self.items_acked.load(Ordering::Relaxed),
            remote_updates_applied: self.remote_updates_applied.load(Ordering::Relaxed),
            conflicts_resolved: self.conflicts_resolved.load(Ordering::Relaxed),
            last_cycle_millis: self.last_cycle_millis.load(Ordering::Relaxed),
        }
    }

    /// Zero every counter
    pub fn reset(&self) {
        for counter in [
            &self.cycles_started,
            &self.cycles_succeeded,
            &self.cycles_failed,
            &self.cycles_skipped,
            &self.items_acked,
            &self.remote_updates_applied,
            &self.conflicts_resolved,
            &self.last_cycle_millis,
        ] {
            counter.store(0, Ordering::Relaxed);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_success_rate() {
        let metrics = SyncMetrics::new();
        assert_eq!(metrics.snapshot().success_rate(), 0.0);

        metrics.record_cycle_start();
        metrics.record_cycle_failure();
        metrics.record_cycle_start();
        metrics.record_cycle_success(3, 2, Duration::from_millis(40));

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.cycles_started, 2);
        assert_eq!(snapshot.items_acked, 3);
        assert_eq!(snapshot.remote_updates_applied, 2);
        assert_eq!(snapshot.last_cycle_millis, 40);
        assert_eq!(snapshot.success_rate(), 0.5);

        metrics.reset();
        assert_eq!(metrics.snapshot(), MetricsSnapshot::default());
    }
}

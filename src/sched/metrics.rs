//! Scheduler instrumentation counters.
//!
//! Relaxed atomic counters updated on the scheduler's hot paths. They feed
//! tests that assert on queue traffic (for example, that reentrant posts on
//! a single-thread scheduler bypass the global queue) and give operators a
//! cheap view of scheduler activity.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters maintained by a scheduler.
#[derive(Debug, Default)]
pub(crate) struct SchedulerMetrics {
    global_pushes: AtomicU64,
    private_pushes: AtomicU64,
    notifies: AtomicU64,
    ops_completed: AtomicU64,
}

impl SchedulerMetrics {
    pub(crate) fn record_global_push(&self) {
        self.global_pushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_private_push(&self) {
        self.private_pushes.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_notify(&self) {
        self.notifies.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn record_completed(&self) {
        self.ops_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub(crate) fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            global_pushes: self.global_pushes.load(Ordering::Relaxed),
            private_pushes: self.private_pushes.load(Ordering::Relaxed),
            notifies: self.notifies.load(Ordering::Relaxed),
            ops_completed: self.ops_completed.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of a scheduler's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MetricsSnapshot {
    /// Operations pushed onto the global queue.
    pub global_pushes: u64,
    /// Operations pushed onto a run's thread-private queue (single-thread
    /// reentrant fast path).
    pub private_pushes: u64,
    /// Condition-variable wake-ups issued.
    pub notifies: u64,
    /// Operations completed (user callable ran).
    pub ops_completed: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate() {
        let metrics = SchedulerMetrics::default();
        metrics.record_global_push();
        metrics.record_global_push();
        metrics.record_private_push();
        metrics.record_notify();
        metrics.record_completed();

        let snap = metrics.snapshot();
        assert_eq!(snap.global_pushes, 2);
        assert_eq!(snap.private_pushes, 1);
        assert_eq!(snap.notifies, 1);
        assert_eq!(snap.ops_completed, 1);
    }

    #[test]
    fn snapshot_is_a_copy() {
        let metrics = SchedulerMetrics::default();
        let before = metrics.snapshot();
        metrics.record_global_push();
        let after = metrics.snapshot();

        assert_eq!(before.global_pushes, 0);
        assert_eq!(after.global_pushes, 1);
    }
}

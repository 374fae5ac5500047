//! Scheduler statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use serde::{Deserialize, Serialize};

/// Point-in-time snapshot of scheduler activity.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Total tasks accepted by `submit`.
    pub submitted_tasks: u64,
    /// Tasks registered but not yet dispatched (pending or ready).
    pub pending_tasks: u64,
    /// Tasks currently running on a worker.
    pub active_tasks: u64,
    /// Total tasks completed successfully.
    pub completed_tasks: u64,
    /// Total tasks that failed.
    pub failed_tasks: u64,
    /// Total tasks cancelled without running.
    pub cancelled_tasks: u64,
}

/// Internal counters for scheduler statistics (thread-safe).
#[derive(Debug, Default)]
pub(crate) struct SchedulerCounters {
    pub submitted: AtomicU64,
    pub pending: AtomicU64,
    pub active: AtomicU64,
    pub completed: AtomicU64,
    pub failed: AtomicU64,
    pub cancelled: AtomicU64,
}

impl SchedulerCounters {
    /// Get a snapshot of current statistics.
    pub fn snapshot(&self, worker_count: usize) -> SchedulerStats {
        SchedulerStats {
            worker_count,
            submitted_tasks: self.submitted.load(Ordering::Relaxed),
            pending_tasks: self.pending.load(Ordering::Relaxed),
            active_tasks: self.active.load(Ordering::Relaxed),
            completed_tasks: self.completed.load(Ordering::Relaxed),
            failed_tasks: self.failed.load(Ordering::Relaxed),
            cancelled_tasks: self.cancelled.load(Ordering::Relaxed),
        }
    }

    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn decr(counter: &AtomicU64) {
        counter.fetch_sub(1, Ordering::Relaxed);
    }
}

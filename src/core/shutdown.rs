//! Shutdown coordination: `Running -> Draining -> Stopped`, reported once.

use std::sync::atomic::{AtomicU8, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};

/// Scheduler lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum Lifecycle {
    /// Accepting submissions and dispatching.
    Running = 0,
    /// Rejecting submissions; dispatching queued work until the deadline.
    Draining = 1,
    /// Terminal. Every task has an outcome.
    Stopped = 2,
}

impl Lifecycle {
    const fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Summary of a shutdown. Counts of completed, failed and cancelled tasks are
/// lifetime totals for the scheduler instance.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShutdownReport {
    /// Tasks that completed successfully.
    pub completed: u64,
    /// Tasks that failed, including those abandoned at the deadline.
    pub failed: u64,
    /// Tasks cancelled without running, including those cancelled at stop.
    pub cancelled: u64,
    /// In-flight tasks abandoned with `ForcedShutdown` at the deadline.
    pub forced: u64,
    /// Pending tasks cancelled with `SchedulerStopped` at stop.
    pub cancelled_on_shutdown: u64,
    /// Whether the deadline passed before all work drained.
    pub timed_out: bool,
    /// Time from the shutdown request to `Stopped`.
    pub elapsed: Duration,
}

impl ShutdownReport {
    /// Total tasks that reached a terminal state.
    #[must_use]
    pub const fn total(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }
}

/// Drives the lifecycle and hands the single report to every caller.
#[derive(Debug)]
pub(crate) struct ShutdownController {
    lifecycle: AtomicU8,
    report: Mutex<Option<ShutdownReport>>,
    stopped: Condvar,
}

impl ShutdownController {
    pub(crate) fn new() -> Self {
        Self {
            lifecycle: AtomicU8::new(Lifecycle::Running as u8),
            report: Mutex::new(None),
            stopped: Condvar::new(),
        }
    }

    pub(crate) fn lifecycle(&self) -> Lifecycle {
        Lifecycle::from_u8(self.lifecycle.load(Ordering::Acquire))
    }

    pub(crate) fn is_running(&self) -> bool {
        self.lifecycle() == Lifecycle::Running
    }

    /// Flip `Running -> Draining`. Returns `true` only for the caller that
    /// performed the transition.
    pub(crate) fn begin_drain(&self) -> bool {
        self.lifecycle
            .compare_exchange(
                Lifecycle::Running as u8,
                Lifecycle::Draining as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            )
            .is_ok()
    }

    /// Store the report, flip to `Stopped`, and wake all waiters. Only the
    /// first report is kept.
    pub(crate) fn publish(&self, report: ShutdownReport) {
        let mut slot = self.report.lock();
        if slot.is_none() {
            *slot = Some(report);
        }
        self.lifecycle.store(Lifecycle::Stopped as u8, Ordering::Release);
        drop(slot);
        self.stopped.notify_all();
    }

    /// Block until a report is published and return a copy of it.
    pub(crate) fn wait_report(&self) -> ShutdownReport {
        let mut slot = self.report.lock();
        loop {
            if let Some(report) = slot.as_ref() {
                return report.clone();
            }
            self.stopped.wait(&mut slot);
        }
    }

    pub(crate) fn report(&self) -> Option<ShutdownReport> {
        self.report.lock().clone()
    }
}

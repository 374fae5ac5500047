//! Result handles: one outcome slot per task, waited on by the submitter.
//!
//! # Design
//!
//! - Per-slot `Mutex` + `Condvar` for blocking waits (no polling)
//! - Per-slot `Notify` for async waits, so no blocking thread is parked
//! - The coordinator fulfils each slot exactly once; the caller takes the
//!   outcome exactly once

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};
use tokio::sync::Notify;

use super::error::SchedulerError;
use super::task::{Outcome, TaskId};

/// Slot state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum SlotState {
    /// Waiting for the task to finish.
    Pending,
    /// Outcome stored, not yet taken.
    Ready,
    /// Outcome handed to the caller.
    Taken,
}

struct SlotEntry<T> {
    outcome: Option<Outcome<T>>,
    state: SlotState,
}

/// Shared storage between the coordinator and a [`ResultHandle`].
pub(crate) struct ResultSlot<T> {
    entry: Mutex<SlotEntry<T>>,
    ready: Condvar,
    notify: Notify,
}

impl<T> ResultSlot<T> {
    pub(crate) fn new() -> Self {
        Self {
            entry: Mutex::new(SlotEntry {
                outcome: None,
                state: SlotState::Pending,
            }),
            ready: Condvar::new(),
            notify: Notify::new(),
        }
    }

    /// Store the outcome and wake waiters. Returns `false` if the slot was
    /// already fulfilled, in which case `outcome` is dropped.
    pub(crate) fn fulfil(&self, outcome: Outcome<T>) -> bool {
        let mut entry = self.entry.lock();
        if entry.state != SlotState::Pending {
            return false;
        }
        entry.outcome = Some(outcome);
        entry.state = SlotState::Ready;
        drop(entry);
        self.ready.notify_all();
        self.notify.notify_waiters();
        true
    }

    fn take(entry: &mut SlotEntry<T>) -> Result<Option<Outcome<T>>, SchedulerError> {
        match entry.state {
            SlotState::Pending => Ok(None),
            SlotState::Taken => Err(SchedulerError::OutcomeTaken),
            SlotState::Ready => {
                entry.state = SlotState::Taken;
                entry.outcome.take().map(Some).ok_or(SchedulerError::OutcomeTaken)
            }
        }
    }
}

/// Caller-side handle to a submitted task's terminal outcome.
pub struct ResultHandle<T> {
    id: TaskId,
    slot: Arc<ResultSlot<T>>,
}

impl<T> std::fmt::Debug for ResultHandle<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResultHandle")
            .field("id", &self.id)
            .field("done", &self.is_done())
            .finish()
    }
}

impl<T> ResultHandle<T> {
    pub(crate) const fn new(id: TaskId, slot: Arc<ResultSlot<T>>) -> Self {
        Self { id, slot }
    }

    /// Id of the task this handle tracks.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Whether the task has reached a terminal state.
    #[must_use]
    pub fn is_done(&self) -> bool {
        self.slot.entry.lock().state != SlotState::Pending
    }

    /// Take the outcome if it is available, without waiting.
    ///
    /// # Errors
    ///
    /// `OutcomeTaken` if a previous call already took it.
    pub fn try_outcome(&self) -> Result<Option<Outcome<T>>, SchedulerError> {
        let mut entry = self.slot.entry.lock();
        ResultSlot::take(&mut entry)
    }

    /// Block until the task reaches a terminal state, up to `timeout`.
    ///
    /// A `timeout` too large to represent as an instant waits indefinitely.
    ///
    /// # Errors
    ///
    /// `Timeout` if no outcome arrives in time, `OutcomeTaken` if it was
    /// already taken.
    pub fn wait(&self, timeout: Duration) -> Result<Outcome<T>, SchedulerError> {
        let deadline = Instant::now().checked_add(timeout);
        let mut entry = self.slot.entry.lock();
        loop {
            if let Some(outcome) = ResultSlot::take(&mut entry)? {
                return Ok(outcome);
            }
            match deadline {
                Some(deadline) => {
                    if self.slot.ready.wait_until(&mut entry, deadline).timed_out() {
                        return ResultSlot::take(&mut entry)?.ok_or(SchedulerError::Timeout);
                    }
                }
                None => self.slot.ready.wait(&mut entry),
            }
        }
    }

    /// Await the task's terminal outcome, up to `timeout`.
    ///
    /// Must be called from within a tokio runtime. An unrepresentable
    /// deadline waits indefinitely.
    ///
    /// # Errors
    ///
    /// `Timeout` if no outcome arrives in time, `OutcomeTaken` if it was
    /// already taken.
    pub async fn wait_async(&self, timeout: Duration) -> Result<Outcome<T>, SchedulerError> {
        let deadline = tokio::time::Instant::now().checked_add(timeout);
        loop {
            let notified = self.slot.notify.notified();
            if let Some(outcome) = self.try_outcome()? {
                return Ok(outcome);
            }
            match deadline {
                Some(deadline) => {
                    if tokio::time::timeout_at(deadline, notified).await.is_err() {
                        return self.try_outcome()?.ok_or(SchedulerError::Timeout);
                    }
                }
                None => notified.await,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::task::CancelReason;

    fn pair() -> (Arc<ResultSlot<u32>>, ResultHandle<u32>) {
        let slot = Arc::new(ResultSlot::new());
        let handle = ResultHandle::new(3, Arc::clone(&slot));
        (slot, handle)
    }

    #[test]
    fn test_wait_times_out_when_pending() {
        let (_slot, handle) = pair();
        let start = Instant::now();
        assert!(matches!(
            handle.wait(Duration::from_millis(30)),
            Err(SchedulerError::Timeout)
        ));
        assert!(start.elapsed() >= Duration::from_millis(30));
        assert!(!handle.is_done());
    }

    #[test]
    fn test_wait_wakes_on_fulfil() {
        let (slot, handle) = pair();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            slot.fulfil(Outcome::Completed(11))
        });
        let outcome = handle.wait(Duration::from_secs(5)).unwrap();
        assert_eq!(outcome.completed(), Some(11));
        assert!(writer.join().unwrap());
    }

    #[test]
    fn test_outcome_taken_once_and_fulfilled_once() {
        let (slot, handle) = pair();
        assert!(handle.try_outcome().unwrap().is_none());
        assert!(slot.fulfil(Outcome::Cancelled(CancelReason::Requested)));
        assert!(!slot.fulfil(Outcome::Completed(1)));
        assert!(handle.is_done());
        let outcome = handle.try_outcome().unwrap().unwrap();
        assert_eq!(outcome.cancel_reason(), Some(CancelReason::Requested));
        assert!(matches!(handle.try_outcome(), Err(SchedulerError::OutcomeTaken)));
        assert!(matches!(
            handle.wait(Duration::from_millis(1)),
            Err(SchedulerError::OutcomeTaken)
        ));
    }

    #[tokio::test]
    async fn test_wait_async_wakes_on_fulfil() {
        let (slot, handle) = pair();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            slot.fulfil(Outcome::Completed(5));
        });
        let outcome = handle.wait_async(Duration::from_secs(5)).await.unwrap();
        assert_eq!(outcome.completed(), Some(5));
    }

    #[test]
    fn test_wait_without_representable_deadline() {
        let (slot, handle) = pair();
        let writer = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(20));
            slot.fulfil(Outcome::Completed(8))
        });
        let outcome = handle.wait(Duration::MAX).unwrap();
        assert_eq!(outcome.completed(), Some(8));
        assert!(writer.join().unwrap());
    }

    #[tokio::test]
    async fn test_wait_async_without_representable_deadline() {
        let (slot, handle) = pair();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            slot.fulfil(Outcome::Completed(6));
        });
        let outcome = handle.wait_async(Duration::MAX).await.unwrap();
        assert_eq!(outcome.completed(), Some(6));
    }

    #[tokio::test]
    async fn test_wait_async_times_out() {
        let (_slot, handle) = pair();
        assert!(matches!(
            handle.wait_async(Duration::from_millis(20)).await,
            Err(SchedulerError::Timeout)
        ));
    }
}

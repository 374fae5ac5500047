//! Audit sink implementations.
//!
//! The coordinator records one event per lifecycle transition (submit,
//! dispatch, complete, fail, cancel), in the order it performs them.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::task::TaskId;
use crate::util::clock::now_ms;

/// Lifecycle transition recorded by an audit event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Task accepted by the coordinator.
    Submit,
    /// Task handed to a worker.
    Dispatch,
    /// Task completed successfully.
    Complete,
    /// Task failed (error, panic, or forced shutdown).
    Fail,
    /// Task cancelled without running.
    Cancel,
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Submit => "submit",
            Self::Dispatch => "dispatch",
            Self::Complete => "complete",
            Self::Fail => "fail",
            Self::Cancel => "cancel",
        };
        f.write_str(s)
    }
}

/// Audit event structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Related task identifier.
    pub task_id: TaskId,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context (failure message, cancel reason).
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// In-memory audit sink for testing and dev.
///
/// Clones share one buffer, so a caller can keep a clone to inspect events
/// recorded by the scheduler.
#[derive(Clone)]
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events.min(1024)))),
            max_events,
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Task ids recorded with `action`, in recording order.
    #[must_use]
    pub fn tasks_with(&self, action: AuditAction) -> Vec<TaskId> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.action == action)
            .map(|e| e.task_id)
            .collect()
    }

    /// Actions recorded for one task, in recording order.
    #[must_use]
    pub fn actions_for(&self, task_id: TaskId) -> Vec<AuditAction> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.task_id == task_id)
            .map(|e| e.action)
            .collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Audit sink that emits each event as a structured `tracing` record.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingAuditSink;

impl AuditSink for TracingAuditSink {
    fn record(&mut self, event: AuditEvent) {
        tracing::info!(
            target: "deferred_scheduler::audit",
            event_id = %event.event_id,
            task_id = event.task_id,
            action = %event.action,
            detail = event.detail.as_deref().unwrap_or(""),
            "audit"
        );
    }
}

/// Helper to build an audit event stamped with a fresh id and the current time.
pub fn build_audit_event(task_id: TaskId, action: AuditAction, detail: Option<String>) -> AuditEvent {
    AuditEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        task_id,
        action,
        created_at_ms: now_ms(),
        detail,
    }
}

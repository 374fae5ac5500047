//! Authoritative dependency tracking with cascading cancellation.
//!
//! The tracker keeps one state record per task id ever registered. Readiness
//! is answered from those records, never from queue membership, so a
//! dependency that already finished (or failed) is told apart from one that
//! has not started.

use std::collections::{BTreeSet, HashMap, HashSet, VecDeque};

use super::error::SchedulerError;
use super::task::{TaskId, TaskState};

/// Result of registering a task with its dependencies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Registration {
    /// All dependencies completed (or there were none).
    Ready,
    /// At least one dependency has not completed yet.
    Blocked,
    /// A dependency (named) already failed or was cancelled.
    Cancelled(TaskId),
}

/// Effects of a task reaching a terminal state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Resolution {
    /// Dependents whose last unresolved dependency just completed, in
    /// registration order.
    pub unblocked: Vec<TaskId>,
    /// Transitive dependents cancelled by the cascade, each paired with the
    /// dependency that caused it.
    pub cancelled: Vec<(TaskId, TaskId)>,
}

/// Dependency graph and per-task state records.
#[derive(Debug, Default)]
pub struct DependencyTracker {
    states: HashMap<TaskId, TaskState>,
    /// Declared dependencies of non-terminal tasks.
    declared: HashMap<TaskId, BTreeSet<TaskId>>,
    /// Dependencies of blocked tasks that have not completed yet.
    unresolved: HashMap<TaskId, HashSet<TaskId>>,
    /// Reverse edges: task -> tasks waiting on it.
    dependents: HashMap<TaskId, Vec<TaskId>>,
}

impl DependencyTracker {
    /// Create an empty tracker.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `id` is blocked on `depends_on`.
    ///
    /// # Errors
    ///
    /// `InvalidDependency` if any dependency was never registered, `Internal`
    /// if `id` itself is already known. Nothing is recorded on error.
    pub fn register(
        &mut self,
        id: TaskId,
        depends_on: &BTreeSet<TaskId>,
    ) -> Result<Registration, SchedulerError> {
        if self.states.contains_key(&id) {
            return Err(SchedulerError::Internal(format!("task {id} registered twice")));
        }

        let mut failed_cause = None;
        let mut pending = HashSet::new();
        for &dep in depends_on {
            match self.states.get(&dep) {
                None => return Err(SchedulerError::InvalidDependency(dep)),
                Some(TaskState::Completed) => {}
                Some(TaskState::Failed | TaskState::Cancelled) => {
                    failed_cause.get_or_insert(dep);
                }
                Some(_) => {
                    pending.insert(dep);
                }
            }
        }

        if let Some(cause) = failed_cause {
            self.states.insert(id, TaskState::Cancelled);
            return Ok(Registration::Cancelled(cause));
        }

        self.declared.insert(id, depends_on.clone());
        if pending.is_empty() {
            self.states.insert(id, TaskState::Ready);
            return Ok(Registration::Ready);
        }

        for &dep in &pending {
            self.dependents.entry(dep).or_default().push(id);
        }
        self.unresolved.insert(id, pending);
        self.states.insert(id, TaskState::Pending);
        Ok(Registration::Blocked)
    }

    /// True iff every dependency of `id` is `Completed`.
    #[must_use]
    pub fn is_ready(&self, id: TaskId) -> bool {
        self.declared.get(&id).is_some_and(|deps| {
            deps.iter()
                .all(|dep| self.states.get(dep) == Some(&TaskState::Completed))
        })
    }

    /// Current state of `id`, if it was ever registered.
    #[must_use]
    pub fn state(&self, id: TaskId) -> Option<TaskState> {
        self.states.get(&id).copied()
    }

    /// Whether `id` was ever registered.
    #[must_use]
    pub fn is_known(&self, id: TaskId) -> bool {
        self.states.contains_key(&id)
    }

    /// Number of tasks not yet in a terminal state.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.states.values().filter(|s| !s.is_terminal()).count()
    }

    /// Transition a ready task to `Dispatched`.
    ///
    /// # Errors
    ///
    /// `Internal` if the task is unknown or not `Ready`.
    pub fn mark_dispatched(&mut self, id: TaskId) -> Result<(), SchedulerError> {
        match self.states.get_mut(&id) {
            Some(state @ TaskState::Ready) => {
                *state = TaskState::Dispatched;
                Ok(())
            }
            Some(other) => Err(SchedulerError::Internal(format!(
                "task {id} cannot be dispatched from state {other}"
            ))),
            None => Err(SchedulerError::TaskNotFound(id)),
        }
    }

    /// Record the terminal state of `id` and propagate it to dependents.
    ///
    /// # Errors
    ///
    /// `TaskNotFound` for unknown ids, `Internal` if `outcome` is not terminal
    /// or the task is already terminal.
    pub fn mark_terminal(
        &mut self,
        id: TaskId,
        outcome: TaskState,
    ) -> Result<Resolution, SchedulerError> {
        if !outcome.is_terminal() {
            return Err(SchedulerError::Internal(format!(
                "{outcome} is not a terminal state"
            )));
        }
        match self.states.get(&id) {
            None => return Err(SchedulerError::TaskNotFound(id)),
            Some(current) if current.is_terminal() => {
                return Err(SchedulerError::Internal(format!(
                    "task {id} is already {current}"
                )))
            }
            Some(_) => {}
        }

        self.settle(id, outcome);
        let mut resolution = Resolution::default();
        let dependents = self.dependents.remove(&id).unwrap_or_default();

        if outcome == TaskState::Completed {
            for dependent in dependents {
                let Some(waiting) = self.unresolved.get_mut(&dependent) else {
                    continue;
                };
                waiting.remove(&id);
                if waiting.is_empty() {
                    self.unresolved.remove(&dependent);
                    self.states.insert(dependent, TaskState::Ready);
                    resolution.unblocked.push(dependent);
                }
            }
            return Ok(resolution);
        }

        let mut frontier: VecDeque<(TaskId, TaskId)> =
            dependents.into_iter().map(|d| (d, id)).collect();
        while let Some((dependent, cause)) = frontier.pop_front() {
            if self.states.get(&dependent).is_none_or(|s| s.is_terminal()) {
                continue;
            }
            self.settle(dependent, TaskState::Cancelled);
            resolution.cancelled.push((dependent, cause));
            if let Some(next) = self.dependents.remove(&dependent) {
                frontier.extend(next.into_iter().map(|d| (d, dependent)));
            }
        }
        Ok(resolution)
    }

    /// Store a terminal state and drop edge bookkeeping for `id`.
    fn settle(&mut self, id: TaskId, state: TaskState) {
        self.states.insert(id, state);
        self.declared.remove(&id);
        if let Some(waiting) = self.unresolved.remove(&id) {
            for dep in waiting {
                if let Some(list) = self.dependents.get_mut(&dep) {
                    list.retain(|&d| d != id);
                }
            }
        }
    }
}

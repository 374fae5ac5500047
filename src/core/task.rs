//! Task model: identifiers, lifecycle states, outcomes, and the work abstraction.

use std::collections::BTreeSet;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

use super::error::TaskError;
use crate::util::clock::after;

/// Unique task identifier, allocated by the scheduler at submission.
pub type TaskId = u64;

/// Lifecycle state of a task.
///
/// Transitions run `Pending -> Ready -> Dispatched -> Completed | Failed`, with
/// `Cancelled` reachable from any non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    /// Submitted; waiting on dependencies.
    Pending,
    /// Dependencies satisfied; waiting for its time, a token, and a worker.
    Ready,
    /// Handed to a worker.
    Dispatched,
    /// Work finished successfully.
    Completed,
    /// Work returned an error, panicked, or was abandoned.
    Failed,
    /// Never ran: cancelled by the caller, a failed dependency, or shutdown.
    Cancelled,
}

impl TaskState {
    /// Whether no further transitions can occur.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

impl fmt::Display for TaskState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Pending => "pending",
            Self::Ready => "ready",
            Self::Dispatched => "dispatched",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        };
        f.write_str(s)
    }
}

/// Reason a task was cancelled without running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelReason {
    /// The caller cancelled it.
    Requested,
    /// A dependency (named) failed or was cancelled.
    DependencyFailed(TaskId),
    /// The scheduler stopped before it could be dispatched.
    SchedulerStopped,
}

impl fmt::Display for CancelReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requested => f.write_str("cancelled by caller"),
            Self::DependencyFailed(id) => write!(f, "dependency {id} did not complete"),
            Self::SchedulerStopped => f.write_str("scheduler stopped"),
        }
    }
}

/// Terminal outcome of a task, delivered through its result handle.
#[derive(Debug)]
pub enum Outcome<T> {
    /// Work finished and produced a value.
    Completed(T),
    /// Work was dispatched but did not succeed.
    Failed(TaskError),
    /// Work never ran.
    Cancelled(CancelReason),
}

impl<T> Outcome<T> {
    /// Terminal state matching this outcome.
    #[must_use]
    pub const fn state(&self) -> TaskState {
        match self {
            Self::Completed(_) => TaskState::Completed,
            Self::Failed(_) => TaskState::Failed,
            Self::Cancelled(_) => TaskState::Cancelled,
        }
    }

    /// Whether the task completed successfully.
    #[must_use]
    pub const fn is_completed(&self) -> bool {
        matches!(self, Self::Completed(_))
    }

    /// The completed value, if any.
    pub fn completed(self) -> Option<T> {
        match self {
            Self::Completed(v) => Some(v),
            _ => None,
        }
    }

    /// The failure, if any.
    #[must_use]
    pub const fn failure(&self) -> Option<&TaskError> {
        match self {
            Self::Failed(e) => Some(e),
            _ => None,
        }
    }

    /// The cancellation reason, if any.
    #[must_use]
    pub const fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            Self::Cancelled(r) => Some(*r),
            _ => None,
        }
    }
}

/// Submission options: when, how urgently, and after what.
#[derive(Debug, Clone)]
pub struct TaskOptions {
    /// Instant before which the task must not run.
    pub scheduled_at: Instant,
    /// Higher values are served first among equally due tasks.
    pub priority: i32,
    /// Tasks that must complete successfully first.
    pub dependencies: BTreeSet<TaskId>,
}

impl Default for TaskOptions {
    fn default() -> Self {
        Self {
            scheduled_at: Instant::now(),
            priority: 0,
            dependencies: BTreeSet::new(),
        }
    }
}

impl TaskOptions {
    /// Run as soon as possible with priority 0 and no dependencies.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Run no earlier than `at`.
    #[must_use]
    pub const fn at(mut self, at: Instant) -> Self {
        self.scheduled_at = at;
        self
    }

    /// Run no earlier than `delay` from now.
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.scheduled_at = after(delay);
        self
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Add dependencies.
    #[must_use]
    pub fn with_dependencies(mut self, deps: impl IntoIterator<Item = TaskId>) -> Self {
        self.dependencies.extend(deps);
        self
    }
}

#[derive(Debug, Default)]
struct SignalInner {
    cancelled: AtomicBool,
    notify: Notify,
}

/// Cooperative cancellation signal shared between the coordinator and a worker.
#[derive(Debug, Clone, Default)]
pub struct CancelSignal {
    inner: Arc<SignalInner>,
}

impl CancelSignal {
    /// Create an unsignalled instance.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Raise the signal and wake every waiter.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::Release);
        self.inner.notify.notify_waiters();
    }

    /// Whether the signal has been raised.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolve once the signal is raised.
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }
}

/// Context handed to running work.
#[derive(Debug, Clone)]
pub struct TaskContext {
    id: TaskId,
    signal: CancelSignal,
}

impl TaskContext {
    pub(crate) const fn new(id: TaskId, signal: CancelSignal) -> Self {
        Self { id, signal }
    }

    /// Id of the running task.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Whether the scheduler asked this task to stop.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.signal.is_cancelled()
    }

    /// Resolve once the scheduler asks this task to stop.
    pub async fn cancelled(&self) {
        self.signal.cancelled().await;
    }
}

/// A caller-supplied unit of execution.
///
/// Any `FnOnce(TaskContext) -> impl Future<Output = anyhow::Result<T>>` is
/// `Work`, so most callers submit an async closure:
///
/// ```rust,ignore
/// scheduler.submit(|_ctx| async move { anyhow::Ok(compute()) }, TaskOptions::new())?;
/// ```
///
/// On a worker, the future runs on that worker's single-threaded tokio
/// runtime. Retries, if wanted, belong inside the work itself.
#[async_trait]
pub trait Work<T>: Send + 'static {
    /// Run the work to completion.
    async fn run(self: Box<Self>, ctx: TaskContext) -> anyhow::Result<T>;
}

#[async_trait]
impl<T, F, Fut> Work<T> for F
where
    T: Send + 'static,
    F: FnOnce(TaskContext) -> Fut + Send + 'static,
    Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
{
    async fn run(self: Box<Self>, ctx: TaskContext) -> anyhow::Result<T> {
        (*self)(ctx).await
    }
}

/// A submitted task as owned by the coordinator.
pub struct Task<T> {
    /// Unique identifier.
    pub id: TaskId,
    /// Work to execute.
    pub work: Box<dyn Work<T>>,
    /// Instant before which the task must not run.
    pub scheduled_at: Instant,
    /// Priority; higher first among equally due tasks.
    pub priority: i32,
    /// Tasks that must complete first.
    pub dependencies: BTreeSet<TaskId>,
}

impl<T> fmt::Debug for Task<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("id", &self.id)
            .field("scheduled_at", &self.scheduled_at)
            .field("priority", &self.priority)
            .field("dependencies", &self.dependencies)
            .finish_non_exhaustive()
    }
}

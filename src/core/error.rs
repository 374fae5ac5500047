//! Error types for scheduler operations and task outcomes.

use thiserror::Error;

use super::task::TaskId;

/// Errors produced by the scheduler API.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Submission referenced a task id that was never submitted.
    #[error("invalid dependency: task {0} is unknown")]
    InvalidDependency(TaskId),
    /// Submission attempted after shutdown began.
    #[error("scheduler is closed to new submissions")]
    Closed,
    /// Operation attempted after the scheduler stopped.
    #[error("scheduler has stopped")]
    Stopped,
    /// Cancellation requested for a task that already started running.
    #[error("task {0} was already dispatched")]
    AlreadyDispatched(TaskId),
    /// No task with this id exists.
    #[error("task {0} not found")]
    TaskNotFound(TaskId),
    /// Configuration validation failed.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Waiting for an outcome timed out.
    #[error("operation timed out")]
    Timeout,
    /// The outcome was already taken from this handle.
    #[error("outcome already taken")]
    OutcomeTaken,
    /// Internal failure (thread spawn, runtime construction, channel closed).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Why a dispatched task ended in the `Failed` state.
#[derive(Debug, Error)]
pub enum TaskError {
    /// The work returned an error.
    #[error("work execution failed: {0:#}")]
    WorkExecution(anyhow::Error),
    /// The work panicked; the panic was contained at the worker boundary.
    #[error("work panicked: {0}")]
    Panicked(String),
    /// The task was abandoned because the shutdown timeout elapsed.
    #[error("task abandoned by forced shutdown")]
    ForcedShutdown,
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

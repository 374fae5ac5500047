//! Tests for error types

use anyhow::Context;
use deferred_scheduler::core::{SchedulerError, TaskError};

#[test]
fn test_invalid_dependency_error() {
    let err = SchedulerError::InvalidDependency(999);
    assert_eq!(format!("{}", err), "invalid dependency: task 999 is unknown");
}

#[test]
fn test_lifecycle_errors() {
    assert_eq!(
        format!("{}", SchedulerError::Closed),
        "scheduler is closed to new submissions"
    );
    assert_eq!(format!("{}", SchedulerError::Stopped), "scheduler has stopped");
}

#[test]
fn test_cancel_errors() {
    assert_eq!(
        format!("{}", SchedulerError::AlreadyDispatched(3)),
        "task 3 was already dispatched"
    );
    assert_eq!(format!("{}", SchedulerError::TaskNotFound(4)), "task 4 not found");
}

#[test]
fn test_config_error() {
    let err = SchedulerError::InvalidConfig("worker_count must be greater than 0".to_string());
    assert_eq!(
        format!("{}", err),
        "invalid configuration: worker_count must be greater than 0"
    );
}

#[test]
fn test_task_errors() {
    let source: anyhow::Result<()> = Err(anyhow::anyhow!("connection refused"));
    let err = TaskError::WorkExecution(source.context("fetching page").unwrap_err());
    assert_eq!(
        format!("{}", err),
        "work execution failed: fetching page: connection refused"
    );

    assert_eq!(
        format!("{}", TaskError::Panicked("index out of bounds".into())),
        "work panicked: index out of bounds"
    );
    assert_eq!(
        format!("{}", TaskError::ForcedShutdown),
        "task abandoned by forced shutdown"
    );
}

#[test]
fn test_errors_convert_to_anyhow() {
    fn submit() -> deferred_scheduler::core::AppResult<u64> {
        let id: Result<u64, SchedulerError> = Err(SchedulerError::Closed);
        Ok(id?)
    }
    let err = submit().unwrap_err();
    assert!(err.downcast_ref::<SchedulerError>().is_some());
}

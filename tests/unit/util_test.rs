//! Tests for utility functions and the task model

use deferred_scheduler::core::{CancelReason, Outcome, TaskError, TaskOptions, TaskState};
use deferred_scheduler::util::{after, now_ms};
use std::time::{Duration, Instant};

#[test]
fn test_clock_helpers() {
    assert!(now_ms() > 1_600_000_000_000);
    let before = Instant::now();
    assert!(after(Duration::from_millis(50)) >= before + Duration::from_millis(50));
}

#[test]
fn test_task_options_defaults() {
    let before = Instant::now();
    let options = TaskOptions::new();
    assert!(options.scheduled_at >= before);
    assert!(options.scheduled_at <= Instant::now());
    assert_eq!(options.priority, 0);
    assert!(options.dependencies.is_empty());
}

#[test]
fn test_task_options_builders() {
    let at = Instant::now() + Duration::from_secs(3);
    let options = TaskOptions::new()
        .at(at)
        .with_priority(-2)
        .with_dependencies([4, 2, 4]);
    assert_eq!(options.scheduled_at, at);
    assert_eq!(options.priority, -2);
    assert_eq!(options.dependencies.into_iter().collect::<Vec<_>>(), vec![2, 4]);

    let delayed = TaskOptions::new().with_delay(Duration::from_secs(1));
    assert!(delayed.scheduled_at > Instant::now());
}

#[test]
fn test_task_state_terminality() {
    for state in [TaskState::Pending, TaskState::Ready, TaskState::Dispatched] {
        assert!(!state.is_terminal(), "{state} should not be terminal");
    }
    for state in [TaskState::Completed, TaskState::Failed, TaskState::Cancelled] {
        assert!(state.is_terminal(), "{state} should be terminal");
    }
    assert_eq!(TaskState::Dispatched.to_string(), "dispatched");
}

#[test]
fn test_outcome_accessors() {
    let done: Outcome<u8> = Outcome::Completed(3);
    assert_eq!(done.state(), TaskState::Completed);
    assert!(done.is_completed());
    assert_eq!(done.completed(), Some(3));

    let failed: Outcome<u8> = Outcome::Failed(TaskError::ForcedShutdown);
    assert_eq!(failed.state(), TaskState::Failed);
    assert!(matches!(failed.failure(), Some(TaskError::ForcedShutdown)));
    assert_eq!(failed.cancel_reason(), None);

    let cancelled: Outcome<u8> = Outcome::Cancelled(CancelReason::DependencyFailed(4));
    assert_eq!(cancelled.state(), TaskState::Cancelled);
    assert_eq!(cancelled.cancel_reason(), Some(CancelReason::DependencyFailed(4)));
    assert_eq!(
        CancelReason::DependencyFailed(4).to_string(),
        "dependency 4 did not complete"
    );
}

#[test]
fn test_state_serializes_snake_case() {
    assert_eq!(
        serde_json::to_string(&TaskState::Dispatched).expect("serialize"),
        "\"dispatched\""
    );
    assert_eq!(
        serde_json::to_string(&CancelReason::SchedulerStopped).expect("serialize"),
        "\"scheduler_stopped\""
    );
}

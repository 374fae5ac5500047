//! Tests for audit sinks

use deferred_scheduler::core::{build_audit_event, AuditAction, AuditSink, InMemoryAuditSink, TracingAuditSink};

#[test]
fn test_in_memory_audit_sink() {
    let mut sink = InMemoryAuditSink::new(10);

    let event = build_audit_event(1, AuditAction::Submit, Some("priority 5".to_string()));
    sink.record(event.clone());
    assert_eq!(sink.events().len(), 1);

    let events = sink.events();
    assert_eq!(events[0].event_id, event.event_id);
    assert_eq!(events[0].task_id, 1);
    assert_eq!(events[0].action, AuditAction::Submit);
}

#[test]
fn test_audit_sink_overflow() {
    let mut sink = InMemoryAuditSink::new(2);

    sink.record(build_audit_event(1, AuditAction::Submit, None));
    sink.record(build_audit_event(2, AuditAction::Submit, None));
    sink.record(build_audit_event(3, AuditAction::Submit, None));

    let events = sink.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].task_id, 2); // First one popped
    assert_eq!(events[1].task_id, 3);
}

#[test]
fn test_audit_queries() {
    let mut sink = InMemoryAuditSink::new(16);
    sink.record(build_audit_event(1, AuditAction::Submit, None));
    sink.record(build_audit_event(2, AuditAction::Submit, None));
    sink.record(build_audit_event(2, AuditAction::Dispatch, None));
    sink.record(build_audit_event(1, AuditAction::Cancel, Some("requested".into())));
    sink.record(build_audit_event(2, AuditAction::Complete, None));

    assert_eq!(sink.tasks_with(AuditAction::Submit), vec![1, 2]);
    assert_eq!(sink.tasks_with(AuditAction::Dispatch), vec![2]);
    assert_eq!(
        sink.actions_for(2),
        vec![AuditAction::Submit, AuditAction::Dispatch, AuditAction::Complete]
    );
    assert_eq!(sink.actions_for(1), vec![AuditAction::Submit, AuditAction::Cancel]);
}

#[test]
fn test_build_audit_event() {
    let event = build_audit_event(42, AuditAction::Fail, Some("boom".to_string()));

    assert_eq!(event.task_id, 42);
    assert_eq!(event.action, AuditAction::Fail);
    assert_eq!(event.detail, Some("boom".to_string()));
    assert!(event.created_at_ms > 0);
    assert!(uuid::Uuid::parse_str(&event.event_id).is_ok());

    let other = build_audit_event(42, AuditAction::Fail, None);
    assert_ne!(event.event_id, other.event_id);
}

#[test]
fn test_audit_event_serializes() {
    let event = build_audit_event(7, AuditAction::Dispatch, None);
    let json = serde_json::to_value(&event).expect("serialize");
    assert_eq!(json["task_id"], 7);
    assert_eq!(json["action"], "dispatch");
}

#[test]
fn test_tracing_sink_accepts_events() {
    let mut sink = TracingAuditSink;
    sink.record(build_audit_event(1, AuditAction::Complete, None));
}

//! Tests for the ready queue, dependency tracker, and token bucket

use deferred_scheduler::core::{
    DependencyTracker, Peek, ReadyQueue, Registration, SchedulerError, TaskState, TokenBucket,
};
use std::collections::BTreeSet;
use std::time::{Duration, Instant};

fn deps(ids: &[u64]) -> BTreeSet<u64> {
    ids.iter().copied().collect()
}

#[test]
fn test_ready_queue_orders_by_time_priority_then_sequence() {
    let base = Instant::now();
    let mut queue = ReadyQueue::new();
    queue.insert(1, base + Duration::from_millis(10), 0, 1, "late");
    queue.insert(2, base, 1, 2, "low");
    queue.insert(3, base, 9, 3, "high");
    queue.insert(4, base, 9, 4, "high-second");

    let later = base + Duration::from_secs(1);
    let order: Vec<_> = std::iter::from_fn(|| queue.pop_due(later)).collect();
    assert_eq!(
        order,
        vec![(3, "high"), (4, "high-second"), (2, "low"), (1, "late")]
    );
    assert!(queue.is_empty());
}

#[test]
fn test_ready_queue_reports_next_due_instant() {
    let base = Instant::now();
    let at = base + Duration::from_secs(5);
    let mut queue = ReadyQueue::new();
    assert!(matches!(queue.peek_due(base), Peek::Empty));

    queue.insert(7, at, 0, 7, ());
    assert!(matches!(queue.peek_due(base), Peek::NotYet(t) if t == at));
    assert!(queue.pop_due(base).is_none());
    assert!(matches!(queue.peek_due(at), Peek::Due(7)));
    assert_eq!(queue.next_due(), Some(at));
}

#[test]
fn test_ready_queue_remove_and_drain() {
    let now = Instant::now();
    let mut queue = ReadyQueue::new();
    assert!(queue.insert(1, now, 0, 1, 'a'));
    assert!(!queue.insert(1, now, 5, 9, 'z'), "duplicate ids are rejected");
    queue.insert(2, now, 0, 2, 'b');
    queue.insert(3, now, 0, 3, 'c');

    assert_eq!(queue.remove(2), Some('b'));
    assert_eq!(queue.remove(2), None);
    assert!(queue.contains(1));
    assert!(!queue.contains(2));
    assert_eq!(queue.len(), 2);

    assert_eq!(queue.drain(), vec![(1, 'a'), (3, 'c')]);
    assert!(queue.is_empty());
}

#[test]
fn test_dependency_tracker_diamond() {
    let mut tracker = DependencyTracker::new();
    assert!(matches!(tracker.register(1, &deps(&[])), Ok(Registration::Ready)));
    assert!(matches!(tracker.register(2, &deps(&[1])), Ok(Registration::Blocked)));
    assert!(matches!(tracker.register(3, &deps(&[1])), Ok(Registration::Blocked)));
    assert!(matches!(tracker.register(4, &deps(&[2, 3])), Ok(Registration::Blocked)));
    assert_eq!(tracker.live_count(), 4);

    tracker.mark_dispatched(1).expect("dispatch 1");
    let resolution = tracker.mark_terminal(1, TaskState::Completed).expect("complete 1");
    let mut unblocked = resolution.unblocked;
    unblocked.sort_unstable();
    assert_eq!(unblocked, vec![2, 3]);

    for id in [2, 3] {
        tracker.mark_dispatched(id).expect("dispatch");
    }
    let first = tracker.mark_terminal(2, TaskState::Completed).expect("complete 2");
    assert!(first.unblocked.is_empty(), "4 still waits on 3");
    let second = tracker.mark_terminal(3, TaskState::Completed).expect("complete 3");
    assert_eq!(second.unblocked, vec![4]);
    assert!(tracker.is_ready(4));
}

#[test]
fn test_dependency_tracker_rejects_misuse() {
    let mut tracker = DependencyTracker::new();
    assert!(matches!(
        tracker.register(1, &deps(&[5])),
        Err(SchedulerError::InvalidDependency(5))
    ));
    assert!(!tracker.is_known(1));

    tracker.register(1, &deps(&[])).expect("register");
    assert!(tracker.register(1, &deps(&[])).is_err());
    assert!(tracker.mark_terminal(1, TaskState::Ready).is_err());
    assert!(tracker.mark_terminal(9, TaskState::Completed).is_err());

    tracker.mark_terminal(1, TaskState::Cancelled).expect("cancel");
    assert!(tracker.mark_dispatched(1).is_err());
    assert_eq!(tracker.state(1), Some(TaskState::Cancelled));
    assert_eq!(tracker.live_count(), 0);
}

#[test]
fn test_token_bucket_burst_then_refill() {
    let bucket = TokenBucket::new(10.0, 3).expect("bucket");
    let start = Instant::now();

    for _ in 0..3 {
        assert!(bucket.try_acquire_at(start).is_ok());
    }
    let wait = bucket.try_acquire_at(start).expect_err("bucket should be empty");
    assert!(wait <= Duration::from_millis(100));
    assert!(wait > Duration::from_millis(50));

    assert!(bucket.try_acquire_at(start + Duration::from_millis(100)).is_ok());
    assert!(bucket.try_acquire_at(start + Duration::from_millis(100)).is_err());
}

#[test]
fn test_token_bucket_update_rate() {
    let bucket = TokenBucket::new(1.0, 1).expect("bucket");
    assert!(bucket.try_acquire().is_ok());
    assert!(bucket.try_acquire().is_err());

    bucket.update_rate(1000.0, 5).expect("update");
    assert!((bucket.rate() - 1000.0).abs() < f64::EPSILON);
    assert!((bucket.capacity() - 5.0).abs() < f64::EPSILON);

    std::thread::sleep(Duration::from_millis(20));
    assert!(bucket.available() <= 5.0);
    assert!(bucket.try_acquire().is_ok());

    assert!(bucket.update_rate(f64::NAN, 5).is_err());
    assert!(bucket.update_rate(1.0, 0).is_err());
}

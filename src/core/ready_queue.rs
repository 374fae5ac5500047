//! Time- and priority-ordered queue of dependency-ready tasks.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::time::Instant;

use super::task::TaskId;

/// Ordering key: earliest `scheduled_at` first, then highest priority, then
/// submission order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct QueueKey {
    scheduled_at: Instant,
    priority: i32,
    seq: u64,
}

impl PartialOrd for QueueKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for QueueKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.scheduled_at
            .cmp(&other.scheduled_at)
            // Higher priority first
            .then_with(|| other.priority.cmp(&self.priority))
            // FIFO within equal time and priority
            .then_with(|| self.seq.cmp(&other.seq))
    }
}

/// Result of inspecting the head of the queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Peek {
    /// The head task is due now.
    Due(TaskId),
    /// Nothing is due yet; the head becomes due at this instant.
    NotYet(Instant),
    /// The queue is empty.
    Empty,
}

/// Ordered queue of tasks waiting for their scheduled time.
///
/// A `scheduled_at` in the past is accepted as-is and is due immediately;
/// the stored key is never rewritten, so overdue tasks keep their relative
/// order. Insert, pop and remove are all O(log n).
#[derive(Debug)]
pub struct ReadyQueue<E> {
    entries: BTreeMap<QueueKey, (TaskId, E)>,
    index: HashMap<TaskId, QueueKey>,
}

impl<E> Default for ReadyQueue<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> ReadyQueue<E> {
    /// Create an empty queue.
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            index: HashMap::new(),
        }
    }

    /// Insert a task. Returns `false` (and drops nothing) if `id` is already queued.
    pub fn insert(
        &mut self,
        id: TaskId,
        scheduled_at: Instant,
        priority: i32,
        seq: u64,
        entry: E,
    ) -> bool {
        if self.index.contains_key(&id) {
            return false;
        }
        let key = QueueKey {
            scheduled_at,
            priority,
            seq,
        };
        self.index.insert(id, key);
        self.entries.insert(key, (id, entry));
        true
    }

    /// Inspect the head without removing it.
    #[must_use]
    pub fn peek_due(&self, now: Instant) -> Peek {
        match self.entries.first_key_value() {
            None => Peek::Empty,
            Some((key, (id, _))) if key.scheduled_at <= now => Peek::Due(*id),
            Some((key, _)) => Peek::NotYet(key.scheduled_at),
        }
    }

    /// Remove and return the head if it is due.
    pub fn pop_due(&mut self, now: Instant) -> Option<(TaskId, E)> {
        let (key, _) = self.entries.first_key_value()?;
        if key.scheduled_at > now {
            return None;
        }
        let (_, (id, entry)) = self.entries.pop_first()?;
        self.index.remove(&id);
        Some((id, entry))
    }

    /// Remove a queued task by id.
    pub fn remove(&mut self, id: TaskId) -> Option<E> {
        let key = self.index.remove(&id)?;
        self.entries.remove(&key).map(|(_, entry)| entry)
    }

    /// Whether `id` is queued.
    #[must_use]
    pub fn contains(&self, id: TaskId) -> bool {
        self.index.contains_key(&id)
    }

    /// Instant at which the head becomes due.
    #[must_use]
    pub fn next_due(&self) -> Option<Instant> {
        self.entries.first_key_value().map(|(key, _)| key.scheduled_at)
    }

    /// Number of queued tasks.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the queue is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove every task, in queue order.
    pub fn drain(&mut self) -> Vec<(TaskId, E)> {
        self.index.clear();
        std::mem::take(&mut self.entries).into_values().collect()
    }
}

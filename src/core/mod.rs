//! Core scheduling: tasks, ordering, dependencies, rate limiting, and the
//! coordinator that ties them to the worker pool.

pub mod audit;
pub mod dependency;
pub mod error;
pub mod handle;
pub mod rate_limiter;
pub mod ready_queue;
pub mod scheduler;
pub mod shutdown;
pub mod stats;
pub mod task;
mod worker_pool;

pub use audit::{
    build_audit_event, AuditAction, AuditEvent, AuditSink, InMemoryAuditSink, TracingAuditSink,
};
pub use dependency::{DependencyTracker, Registration, Resolution};
pub use error::{AppResult, SchedulerError, TaskError};
pub use handle::ResultHandle;
pub use rate_limiter::TokenBucket;
pub use ready_queue::{Peek, ReadyQueue};
pub use scheduler::Scheduler;
pub use shutdown::{Lifecycle, ShutdownReport};
pub use stats::SchedulerStats;
pub use task::{
    CancelReason, CancelSignal, Outcome, Task, TaskContext, TaskId, TaskOptions, TaskState, Work,
};

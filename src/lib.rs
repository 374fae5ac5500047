//! # Deferred Scheduler
//!
//! A concurrent scheduler for deferred work with priorities, inter-task
//! dependencies, and a global token-bucket rate limit.
//!
//! Callers submit units of async work, each with an earliest start time, an
//! integer priority, and a set of prerequisite task ids. A task runs on the
//! worker pool once:
//!
//! - its `scheduled_at` instant has passed,
//! - every dependency has completed successfully,
//! - the rate limiter grants a token, and
//! - a worker is free.
//!
//! If a dependency fails or is cancelled, every transitive dependent is
//! cancelled without running. Each submission returns a [`ResultHandle`]
//! that resolves to exactly one [`Outcome`].
//!
//! ## Architecture
//!
//! - **`ReadyQueue`**: ordered by `(scheduled_at, -priority, submission order)`
//! - **`DependencyTracker`**: per-task state machine and the dependency graph
//! - **`TokenBucket`**: continuous refill, burst up to capacity
//! - **Coordinator**: a single thread owning the queue and tracker, woken by
//!   submissions, completions, and timers
//! - **Workers**: dedicated OS threads, each driving a single-threaded tokio
//!   runtime, with panics and errors contained per task
//!
//! ## Example
//!
//! ```rust,ignore
//! use deferred_scheduler::{Outcome, Scheduler, SchedulerConfig, TaskOptions};
//! use std::time::Duration;
//!
//! let scheduler: Scheduler<u64> = Scheduler::new(SchedulerConfig::from_env()?)?;
//!
//! let (a, _) = scheduler.submit(|_ctx| async { anyhow::Ok(1) }, TaskOptions::new())?;
//! let (_, b) = scheduler.submit(
//!     |_ctx| async { anyhow::Ok(2) },
//!     TaskOptions::new()
//!         .with_delay(Duration::from_millis(100))
//!         .with_dependencies([a]),
//! )?;
//!
//! assert!(matches!(b.wait(Duration::from_secs(5))?, Outcome::Completed(2)));
//! let report = scheduler.shutdown(Duration::from_secs(1));
//! ```

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Configuration models for the scheduler, its workers, and its rate limit.
pub mod config;
/// Core scheduling: tasks, ordering, dependencies, limiter, coordinator.
pub mod core;
/// Shared utilities.
pub mod util;

pub use crate::config::SchedulerConfig;
pub use crate::core::{
    CancelReason, Lifecycle, Outcome, ResultHandle, Scheduler, SchedulerError, SchedulerStats,
    ShutdownReport, TaskContext, TaskError, TaskId, TaskOptions, TaskState, Work,
};

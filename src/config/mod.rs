//! Configuration models for the scheduler, its workers, and its rate limit.

pub mod scheduler;

pub use scheduler::SchedulerConfig;

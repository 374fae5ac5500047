//! Scheduler configuration structures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Environment variable overriding [`SchedulerConfig::worker_count`].
pub const ENV_WORKER_COUNT: &str = "SCHEDULER_WORKER_COUNT";
/// Environment variable overriding [`SchedulerConfig::rate_limit`].
pub const ENV_RATE_LIMIT: &str = "SCHEDULER_RATE_LIMIT";
/// Environment variable overriding [`SchedulerConfig::burst_capacity`].
pub const ENV_BURST_CAPACITY: &str = "SCHEDULER_BURST_CAPACITY";
/// Environment variable overriding [`SchedulerConfig::shutdown_grace_period_ms`].
pub const ENV_SHUTDOWN_GRACE_MS: &str = "SCHEDULER_SHUTDOWN_GRACE_MS";

const DEFAULT_RATE_LIMIT: f64 = 100.0;
const DEFAULT_BURST_CAPACITY: u32 = 100;
const DEFAULT_SHUTDOWN_GRACE_MS: u64 = 5_000;
const DEFAULT_THREAD_STACK_SIZE: usize = 2 * 1024 * 1024;

/// Root scheduler configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Number of concurrent worker threads.
    pub worker_count: usize,
    /// Sustained dispatch rate in tasks per second.
    pub rate_limit: f64,
    /// Maximum token bucket size (burst of dispatches allowed at once).
    pub burst_capacity: u32,
    /// Default drain timeout in milliseconds used by `shutdown_default`.
    pub shutdown_grace_period_ms: u64,
    /// Stack size for each worker thread, in bytes.
    pub thread_stack_size: usize,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            worker_count: num_cpus::get(),
            rate_limit: DEFAULT_RATE_LIMIT,
            burst_capacity: DEFAULT_BURST_CAPACITY,
            shutdown_grace_period_ms: DEFAULT_SHUTDOWN_GRACE_MS,
            thread_stack_size: DEFAULT_THREAD_STACK_SIZE,
        }
    }
}

impl SchedulerConfig {
    /// Create a configuration with defaults (one worker per CPU).
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the number of worker threads.
    #[must_use]
    pub const fn with_worker_count(mut self, worker_count: usize) -> Self {
        self.worker_count = worker_count;
        self
    }

    /// Set the sustained dispatch rate (tasks per second).
    #[must_use]
    pub fn with_rate_limit(mut self, tasks_per_second: f64) -> Self {
        self.rate_limit = tasks_per_second;
        self
    }

    /// Set the token bucket capacity.
    #[must_use]
    pub const fn with_burst_capacity(mut self, burst: u32) -> Self {
        self.burst_capacity = burst;
        self
    }

    /// Set the default drain timeout.
    #[must_use]
    #[allow(clippy::cast_possible_truncation)]
    pub const fn with_shutdown_grace_period(mut self, grace: Duration) -> Self {
        self.shutdown_grace_period_ms = grace.as_millis() as u64;
        self
    }

    /// Set the worker thread stack size.
    #[must_use]
    pub const fn with_thread_stack_size(mut self, bytes: usize) -> Self {
        self.thread_stack_size = bytes;
        self
    }

    /// Default drain timeout as a [`Duration`].
    #[must_use]
    pub const fn shutdown_grace_period(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_period_ms)
    }

    /// Validate configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.worker_count == 0 {
            return Err("worker_count must be greater than 0".into());
        }
        if !self.rate_limit.is_finite() || self.rate_limit <= 0.0 {
            return Err(format!(
                "rate_limit must be a positive finite number, got {}",
                self.rate_limit
            ));
        }
        if self.burst_capacity == 0 {
            return Err("burst_capacity must be greater than 0".into());
        }
        if self.thread_stack_size == 0 {
            return Err("thread_stack_size must be greater than 0".into());
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// Missing fields take their default values.
    ///
    /// # Errors
    ///
    /// Returns a parse or validation error message.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }

    /// Build configuration from the process environment.
    ///
    /// A `.env` file in the working directory is loaded first if present.
    /// Unset variables keep their default values.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is set but cannot be parsed, or if the
    /// resulting configuration is invalid.
    pub fn from_env() -> Result<Self, String> {
        let _ = dotenvy::dotenv();
        let mut cfg = Self::default();
        if let Some(v) = read_env(ENV_WORKER_COUNT)? {
            cfg.worker_count = v;
        }
        if let Some(v) = read_env(ENV_RATE_LIMIT)? {
            cfg.rate_limit = v;
        }
        if let Some(v) = read_env(ENV_BURST_CAPACITY)? {
            cfg.burst_capacity = v;
        }
        if let Some(v) = read_env(ENV_SHUTDOWN_GRACE_MS)? {
            cfg.shutdown_grace_period_ms = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

fn read_env<V>(name: &str) -> Result<Option<V>, String>
where
    V: std::str::FromStr,
    V::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| format!("{name}: invalid value `{raw}`: {e}")),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(e) => Err(format!("{name}: {e}")),
    }
}

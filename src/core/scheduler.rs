//! Scheduler core: submission, the coordinator loop, and outcome delivery.
//!
//! One coordinator thread exclusively owns the [`ReadyQueue`] and the
//! [`DependencyTracker`]. Callers and workers talk to it over channels:
//!
//! ```text
//! submit/cancel/state ──► command channel ──┐
//!                                            ├──► coordinator ──► worker pool
//! worker completions ──► completion channel ┘         │
//!                                                      └──► result handles
//! ```
//!
//! The coordinator suspends only inside `select!` on those channels, with a
//! timer for the next due task, the next limiter token, or the drain
//! deadline. `submit` never waits on it.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{at, bounded, never, select, unbounded, Receiver, RecvTimeoutError, Sender};
use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use super::audit::{build_audit_event, AuditAction, AuditSink};
use super::dependency::{DependencyTracker, Registration, Resolution};
use super::error::{SchedulerError, TaskError};
use super::handle::{ResultHandle, ResultSlot};
use super::rate_limiter::TokenBucket;
use super::ready_queue::{Peek, ReadyQueue};
use super::shutdown::{Lifecycle, ShutdownController, ShutdownReport};
use super::stats::{SchedulerCounters, SchedulerStats};
use super::task::{
    CancelReason, CancelSignal, Outcome, Task, TaskContext, TaskId, TaskOptions, TaskState, Work,
};
use super::worker_pool::{Completion, Dispatch, WorkerPool};
use crate::config::SchedulerConfig;
use crate::util::clock::after;

/// How long a stopping coordinator waits for worker threads to exit before
/// detaching them.
const WORKER_JOIN_GRACE: Duration = Duration::from_millis(250);

/// How often a caller waiting on a coordinator reply re-checks for `Stopped`.
const REPLY_POLL: Duration = Duration::from_millis(50);

type SharedAudit = Arc<Mutex<Option<Box<dyn AuditSink>>>>;

/// Messages from the API surface to the coordinator.
enum Command<T> {
    Submit {
        task: Task<T>,
        slot: Arc<ResultSlot<T>>,
    },
    Cancel {
        id: TaskId,
        reply: Sender<Result<(), SchedulerError>>,
    },
    State {
        id: TaskId,
        reply: Sender<Option<TaskState>>,
    },
    RateChanged,
    Drain {
        requested_at: Instant,
        deadline: Option<Instant>,
    },
}

/// Id allocation, serialized with the lifecycle check and the channel send
/// so ids reach the coordinator in allocation order.
struct SubmitGate {
    next_id: TaskId,
}

/// Concurrent deferred-task scheduler.
///
/// Tasks run once their `scheduled_at` has passed, every dependency has
/// completed, the token bucket grants a token, and a worker is free. Among
/// tasks that are due and ready at the same time, dispatch follows
/// `(scheduled_at, -priority, submission order)`.
///
/// # Example
///
/// ```rust,ignore
/// use deferred_scheduler::{Scheduler, SchedulerConfig, TaskOptions};
/// use std::time::Duration;
///
/// let scheduler: Scheduler<String> = Scheduler::new(
///     SchedulerConfig::new().with_worker_count(4).with_rate_limit(50.0),
/// )?;
///
/// let (fetch, _) = scheduler.submit(|_ctx| async { anyhow::Ok("raw".to_string()) }, TaskOptions::new())?;
/// let (_, parsed) = scheduler.submit(
///     |_ctx| async { anyhow::Ok("parsed".to_string()) },
///     TaskOptions::new().with_dependencies([fetch]).with_priority(5),
/// )?;
///
/// let outcome = parsed.wait(Duration::from_secs(10))?;
/// let report = scheduler.shutdown(Duration::from_secs(1));
/// ```
pub struct Scheduler<T: Send + 'static> {
    config: SchedulerConfig,
    cmd_tx: Sender<Command<T>>,
    gate: Mutex<SubmitGate>,
    limiter: Arc<TokenBucket>,
    counters: Arc<SchedulerCounters>,
    controller: Arc<ShutdownController>,
    audit: SharedAudit,
    coordinator: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Send + 'static> Scheduler<T> {
    /// Create a scheduler and start its coordinator and workers.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if the configuration is invalid, `Internal` if a
    /// thread or worker runtime cannot be created.
    pub fn new(config: SchedulerConfig) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let limiter = Arc::new(TokenBucket::new(config.rate_limit, config.burst_capacity)?);
        let counters = Arc::new(SchedulerCounters::default());
        let controller = Arc::new(ShutdownController::new());
        let audit: SharedAudit = Arc::new(Mutex::new(None));

        let (cmd_tx, cmd_rx) = unbounded();
        let (done_tx, done_rx) = unbounded();
        let pool = WorkerPool::new(config.worker_count, config.thread_stack_size, &done_tx)?;
        drop(done_tx);

        let coordinator = Coordinator {
            cmd_rx,
            done_rx,
            commands_open: true,
            completions_open: true,
            pool,
            worker_count: config.worker_count,
            queue: ReadyQueue::new(),
            parked: HashMap::new(),
            running: HashMap::new(),
            tracker: DependencyTracker::new(),
            limiter: Arc::clone(&limiter),
            counters: Arc::clone(&counters),
            controller: Arc::clone(&controller),
            audit: Arc::clone(&audit),
            drain: None,
        };

        let fallback_counters = Arc::clone(&counters);
        let fallback_controller = Arc::clone(&controller);
        let handle = thread::Builder::new()
            .name("sched-coordinator".into())
            .spawn(move || {
                let run = std::panic::catch_unwind(std::panic::AssertUnwindSafe(|| {
                    coordinator.run();
                }));
                if run.is_err() {
                    error!("Coordinator panicked; publishing partial shutdown report");
                    let report = report_from(&fallback_counters, 0, 0, true, Duration::ZERO);
                    fallback_controller.publish(report);
                }
            })
            .map_err(|e| SchedulerError::Internal(format!("failed to spawn coordinator: {e}")))?;

        info!(
            worker_count = config.worker_count,
            rate_limit = config.rate_limit,
            burst_capacity = config.burst_capacity,
            "Scheduler started"
        );

        Ok(Self {
            config,
            cmd_tx,
            gate: Mutex::new(SubmitGate { next_id: 1 }),
            limiter,
            counters,
            controller,
            audit,
            coordinator: Mutex::new(Some(handle)),
        })
    }

    /// Attach an audit sink receiving every lifecycle transition.
    #[must_use]
    pub fn with_audit(self, sink: Box<dyn AuditSink>) -> Self {
        *self.audit.lock() = Some(sink);
        self
    }

    /// Submit async work.
    ///
    /// The returned handle resolves to exactly one [`Outcome`].
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidDependency` if a dependency id was never issued
    /// - `SchedulerError::Closed` if shutdown has begun
    pub fn submit<F, Fut>(
        &self,
        work: F,
        options: TaskOptions,
    ) -> Result<(TaskId, ResultHandle<T>), SchedulerError>
    where
        F: FnOnce(TaskContext) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        self.submit_work(Box::new(work), options)
    }

    /// Submit a boxed [`Work`] implementation.
    ///
    /// # Errors
    ///
    /// Same as [`submit`](Self::submit).
    pub fn submit_work(
        &self,
        work: Box<dyn Work<T>>,
        options: TaskOptions,
    ) -> Result<(TaskId, ResultHandle<T>), SchedulerError> {
        let TaskOptions {
            scheduled_at,
            priority,
            dependencies,
        } = options;

        let mut gate = self.gate.lock();
        if !self.controller.is_running() {
            return Err(SchedulerError::Closed);
        }
        let unknown = dependencies
            .iter()
            .find(|&&dep| dep == 0 || dep >= gate.next_id);
        if let Some(&unknown) = unknown {
            warn!(dependency = unknown, "Rejected submission with unknown dependency");
            return Err(SchedulerError::InvalidDependency(unknown));
        }

        let id = gate.next_id;
        SchedulerCounters::incr(&self.counters.submitted);
        let slot = Arc::new(ResultSlot::new());
        let task = Task {
            id,
            work,
            scheduled_at,
            priority,
            dependencies,
        };
        let sent = self.cmd_tx.send(Command::Submit {
            task,
            slot: Arc::clone(&slot),
        });
        if sent.is_err() {
            SchedulerCounters::decr(&self.counters.submitted);
            return Err(SchedulerError::Stopped);
        }
        gate.next_id += 1;
        drop(gate);

        debug!(task_id = id, priority = priority, "Task submitted");
        Ok((id, ResultHandle::new(id, slot)))
    }

    /// Cancel a task that has not been dispatched yet. Its dependents are
    /// cancelled too.
    ///
    /// # Errors
    ///
    /// - `AlreadyDispatched` if the task started (or finished) running
    /// - `TaskNotFound` for ids never issued
    /// - `Stopped` once the scheduler has stopped
    ///
    /// Cancelling an already-cancelled task is a no-op.
    pub fn cancel(&self, id: TaskId) -> Result<(), SchedulerError> {
        self.request(|reply| Command::Cancel { id, reply })?
    }

    /// Current state of a task.
    ///
    /// # Errors
    ///
    /// `Stopped` once the scheduler has stopped.
    pub fn state(&self, id: TaskId) -> Result<Option<TaskState>, SchedulerError> {
        self.request(|reply| Command::State { id, reply })
    }

    /// Change the dispatch rate and burst capacity without resetting
    /// accumulated tokens.
    ///
    /// # Errors
    ///
    /// `InvalidConfig` if `tasks_per_second` is not a positive finite number
    /// or `burst` is zero.
    pub fn set_rate_limit(&self, tasks_per_second: f64, burst: u32) -> Result<(), SchedulerError> {
        self.limiter.update_rate(tasks_per_second, burst)?;
        info!(rate_limit = tasks_per_second, burst_capacity = burst, "Rate limit updated");
        // Wake the coordinator so a pending limiter wait is recomputed.
        let _ = self.cmd_tx.send(Command::RateChanged);
        Ok(())
    }

    /// Get current scheduler statistics.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        self.counters.snapshot(self.config.worker_count)
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn lifecycle(&self) -> Lifecycle {
        self.controller.lifecycle()
    }

    /// Configuration this scheduler was built with.
    #[must_use]
    pub const fn config(&self) -> &SchedulerConfig {
        &self.config
    }

    /// Drain and stop, waiting at most `timeout` for work to finish.
    ///
    /// New submissions are rejected immediately. Queued, dependency-ready
    /// tasks keep being dispatched until everything is terminal or the
    /// deadline passes. At the deadline, running tasks are abandoned with
    /// [`TaskError::ForcedShutdown`] and every task not yet dispatched is
    /// cancelled with [`CancelReason::SchedulerStopped`].
    ///
    /// A `timeout` too large to represent as an instant means no deadline.
    /// Returning also joins the coordinator, which gives workers stuck in
    /// blocking code a further 250ms before detaching them, so a forced
    /// shutdown returns somewhat after the deadline even though every
    /// outcome is delivered at it.
    ///
    /// Idempotent: later calls wait for and return the first report.
    pub fn shutdown(&self, timeout: Duration) -> ShutdownReport {
        self.request_drain(timeout);
        let report = self.controller.wait_report();
        if let Some(handle) = self.coordinator.lock().take() {
            if handle.join().is_err() {
                error!("Coordinator thread panicked");
            }
        }
        report
    }

    /// The shutdown report, once the scheduler has stopped.
    #[must_use]
    pub fn shutdown_report(&self) -> Option<ShutdownReport> {
        self.controller.report()
    }

    /// [`shutdown`](Self::shutdown) with the configured grace period.
    pub fn shutdown_default(&self) -> ShutdownReport {
        self.shutdown(self.config.shutdown_grace_period())
    }

    fn request_drain(&self, timeout: Duration) {
        let _gate = self.gate.lock();
        let requested_at = Instant::now();
        let deadline = requested_at.checked_add(timeout);
        if !self.controller.begin_drain() {
            return;
        }
        info!(
            timeout_ms = timeout.as_millis(),
            bounded = deadline.is_some(),
            "Shutdown requested, draining"
        );
        let drain = Command::Drain {
            requested_at,
            deadline,
        };
        if self.cmd_tx.send(drain).is_err() {
            // Coordinator already gone; nothing left to drain.
            self.controller
                .publish(report_from(&self.counters, 0, 0, false, Duration::ZERO));
        }
    }

    /// Send a request and wait for the coordinator's reply.
    fn request<R>(
        &self,
        make: impl FnOnce(Sender<R>) -> Command<T>,
    ) -> Result<R, SchedulerError> {
        if self.controller.lifecycle() == Lifecycle::Stopped {
            return Err(SchedulerError::Stopped);
        }
        let (reply_tx, reply_rx) = bounded(1);
        self.cmd_tx
            .send(make(reply_tx))
            .map_err(|_| SchedulerError::Stopped)?;
        loop {
            match reply_rx.recv_timeout(REPLY_POLL) {
                Ok(reply) => return Ok(reply),
                Err(RecvTimeoutError::Disconnected) => {
                    return Err(SchedulerError::Stopped)
                }
                Err(RecvTimeoutError::Timeout) => {
                    // A request that slipped in after the final command drain is never answered.
                    if self.controller.lifecycle() == Lifecycle::Stopped {
                        return Err(SchedulerError::Stopped);
                    }
                }
            }
        }
    }
}

impl<T: Send + 'static> Drop for Scheduler<T> {
    fn drop(&mut self) {
        // Begin an immediate drain but DON'T join: explicit shutdown() is
        // required for a graceful, reported stop.
        if self.controller.lifecycle() == Lifecycle::Running {
            debug!("Scheduler dropped without explicit shutdown - stopping immediately");
            self.request_drain(Duration::ZERO);
        }
    }
}

fn report_from(
    counters: &SchedulerCounters,
    forced: u64,
    cancelled_on_shutdown: u64,
    timed_out: bool,
    elapsed: Duration,
) -> ShutdownReport {
    let stats = counters.snapshot(0);
    ShutdownReport {
        completed: stats.completed_tasks,
        failed: stats.failed_tasks,
        cancelled: stats.cancelled_tasks,
        forced,
        cancelled_on_shutdown,
        timed_out,
        elapsed,
    }
}

/// A task waiting on its time or its dependencies.
struct Queued<T> {
    work: Box<dyn Work<T>>,
    scheduled_at: Instant,
    priority: i32,
    slot: Arc<ResultSlot<T>>,
}

/// A task on a worker.
struct Running<T> {
    slot: Arc<ResultSlot<T>>,
    signal: CancelSignal,
}

enum Event<T> {
    Command(Option<Command<T>>),
    Completion(Option<Completion<T>>),
    Tick,
}

#[derive(Debug, Clone, Copy)]
struct DrainState {
    requested_at: Instant,
    /// `None` waits for the work to finish however long it takes.
    deadline: Option<Instant>,
}

/// The single owner of the ready queue and dependency tracker.
struct Coordinator<T: Send + 'static> {
    cmd_rx: Receiver<Command<T>>,
    done_rx: Receiver<Completion<T>>,
    commands_open: bool,
    completions_open: bool,
    pool: WorkerPool<T>,
    worker_count: usize,
    /// Dependency-ready tasks waiting for their time, a token, or a worker.
    queue: ReadyQueue<Queued<T>>,
    /// Tasks blocked on dependencies.
    parked: HashMap<TaskId, Queued<T>>,
    running: HashMap<TaskId, Running<T>>,
    tracker: DependencyTracker,
    limiter: Arc<TokenBucket>,
    counters: Arc<SchedulerCounters>,
    controller: Arc<ShutdownController>,
    audit: SharedAudit,
    drain: Option<DrainState>,
}

impl<T: Send + 'static> Coordinator<T> {
    fn run(mut self) {
        debug!("Coordinator loop started");
        let closed_cmds = never::<Command<T>>();
        let closed_done = never::<Completion<T>>();

        loop {
            let wake = self.dispatch_ready();
            if self.drain_complete() {
                break;
            }

            let deadline = match (wake, self.drain.and_then(|d| d.deadline)) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            let timer = deadline.map_or_else(never, at);
            let cmd_rx = if self.commands_open { &self.cmd_rx } else { &closed_cmds };
            let done_rx = if self.completions_open { &self.done_rx } else { &closed_done };

            let event = select! {
                recv(cmd_rx) -> msg => Event::Command(msg.ok()),
                recv(done_rx) -> msg => Event::Completion(msg.ok()),
                recv(timer) -> _ => Event::Tick,
            };

            match event {
                Event::Command(Some(cmd)) => self.handle_command(cmd),
                Event::Command(None) => {
                    // Every Scheduler handle is gone.
                    self.commands_open = false;
                    let now = Instant::now();
                    self.begin_drain(now, Some(now));
                }
                Event::Completion(Some(done)) => self.handle_completion(done),
                Event::Completion(None) => {
                    error!("All workers exited unexpectedly");
                    self.completions_open = false;
                    let now = Instant::now();
                    self.begin_drain(now, Some(now));
                }
                Event::Tick => {}
            }
        }

        self.stop();
    }

    /// Dispatch every task that is due, ready, permitted by the limiter, and
    /// has a free worker. Returns when the coordinator should next wake on
    /// its own, or `None` to wait only for messages.
    fn dispatch_ready(&mut self) -> Option<Instant> {
        loop {
            if self.running.len() >= self.worker_count {
                return None;
            }
            let now = Instant::now();
            match self.queue.peek_due(now) {
                Peek::Empty => return None,
                Peek::NotYet(at) => return Some(at),
                Peek::Due(id) => {
                    debug_assert!(self.tracker.is_ready(id), "queued task {id} is not ready");
                    if let Err(wait) = self.limiter.try_acquire_at(now) {
                        return Some(after(wait));
                    }
                    if let Some((id, queued)) = self.queue.pop_due(now) {
                        self.dispatch(id, queued);
                    }
                }
            }
        }
    }

    fn dispatch(&mut self, id: TaskId, queued: Queued<T>) {
        SchedulerCounters::decr(&self.counters.pending);
        if let Err(e) = self.tracker.mark_dispatched(id) {
            error!(task_id = id, error = %e, "Tracker rejected dispatch");
        }
        self.record(id, AuditAction::Dispatch, None);

        let signal = CancelSignal::new();
        let dispatch = Dispatch {
            id,
            work: queued.work,
            signal: signal.clone(),
        };
        match self.pool.dispatch(dispatch) {
            Ok(()) => {
                SchedulerCounters::incr(&self.counters.active);
                debug!(task_id = id, "Task dispatched");
                self.running.insert(
                    id,
                    Running {
                        slot: queued.slot,
                        signal,
                    },
                );
            }
            Err(_) => {
                error!(task_id = id, "Worker pool refused task");
                self.settle(id, &queued.slot, Outcome::Cancelled(CancelReason::SchedulerStopped));
            }
        }
    }

    fn handle_command(&mut self, cmd: Command<T>) {
        match cmd {
            Command::Submit { task, slot } => self.accept(task, slot),
            Command::Cancel { id, reply } => {
                let result = self.cancel(id);
                let _ = reply.send(result);
            }
            Command::State { id, reply } => {
                let _ = reply.send(self.tracker.state(id));
            }
            Command::RateChanged => {}
            Command::Drain {
                requested_at,
                deadline,
            } => self.begin_drain(requested_at, deadline),
        }
    }

    fn accept(&mut self, task: Task<T>, slot: Arc<ResultSlot<T>>) {
        let Task {
            id,
            work,
            scheduled_at,
            priority,
            dependencies,
        } = task;
        let queued = Queued {
            work,
            scheduled_at,
            priority,
            slot,
        };

        debug_assert!(!self.tracker.is_known(id), "task {id} submitted twice");
        match self.tracker.register(id, &dependencies) {
            Ok(Registration::Ready) => {
                self.record(id, AuditAction::Submit, None);
                SchedulerCounters::incr(&self.counters.pending);
                self.queue.insert(id, scheduled_at, priority, id, queued);
            }
            Ok(Registration::Blocked) => {
                self.record(id, AuditAction::Submit, None);
                SchedulerCounters::incr(&self.counters.pending);
                debug!(task_id = id, "Task waiting on dependencies");
                self.parked.insert(id, queued);
            }
            Ok(Registration::Cancelled(cause)) => {
                self.record(id, AuditAction::Submit, None);
                self.resolve_cancelled(id, &queued.slot, CancelReason::DependencyFailed(cause));
            }
            Err(e) => {
                // Submission validates ids up front, so this means a
                // bookkeeping bug rather than bad input.
                error!(task_id = id, error = %e, "Tracker rejected submitted task");
                let cause = match e {
                    SchedulerError::InvalidDependency(dep) => dep,
                    _ => id,
                };
                queued.slot.fulfil(Outcome::Cancelled(CancelReason::DependencyFailed(cause)));
                SchedulerCounters::incr(&self.counters.cancelled);
            }
        }
    }

    fn cancel(&mut self, id: TaskId) -> Result<(), SchedulerError> {
        match self.tracker.state(id) {
            None => Err(SchedulerError::TaskNotFound(id)),
            Some(TaskState::Cancelled) => Ok(()),
            Some(TaskState::Dispatched | TaskState::Completed | TaskState::Failed) => {
                Err(SchedulerError::AlreadyDispatched(id))
            }
            Some(state @ (TaskState::Pending | TaskState::Ready)) => {
                debug_assert_eq!(state == TaskState::Ready, self.queue.contains(id));
                let queued = self.parked.remove(&id).or_else(|| self.queue.remove(id));
                let Some(queued) = queued else {
                    return Err(SchedulerError::Internal(format!("task {id} is not queued")));
                };
                SchedulerCounters::decr(&self.counters.pending);
                debug!(task_id = id, "Task cancelled by caller");
                self.settle(id, &queued.slot, Outcome::Cancelled(CancelReason::Requested));
                Ok(())
            }
        }
    }

    fn handle_completion(&mut self, done: Completion<T>) {
        let Completion {
            id,
            worker_id,
            result,
        } = done;
        let Some(running) = self.running.remove(&id) else {
            // Abandoned at the shutdown deadline; its outcome is already recorded.
            debug!(task_id = id, worker_id = worker_id, "Ignoring late completion");
            return;
        };
        SchedulerCounters::decr(&self.counters.active);
        let outcome = match result {
            Ok(value) => Outcome::Completed(value),
            Err(e) => {
                warn!(task_id = id, worker_id = worker_id, error = %e, "Task failed");
                Outcome::Failed(e)
            }
        };
        self.settle(id, &running.slot, outcome);
    }

    /// Record a terminal outcome, deliver it, and apply its effects on
    /// dependents.
    fn settle(&mut self, id: TaskId, slot: &ResultSlot<T>, outcome: Outcome<T>) {
        let state = outcome.state();
        match &outcome {
            Outcome::Completed(_) => {
                SchedulerCounters::incr(&self.counters.completed);
                self.record(id, AuditAction::Complete, None);
            }
            Outcome::Failed(e) => {
                SchedulerCounters::incr(&self.counters.failed);
                self.record(id, AuditAction::Fail, Some(e.to_string()));
            }
            Outcome::Cancelled(reason) => {
                SchedulerCounters::incr(&self.counters.cancelled);
                self.record(id, AuditAction::Cancel, Some(reason.to_string()));
            }
        }

        let resolution = self.tracker.mark_terminal(id, state).unwrap_or_else(|e| {
            error!(task_id = id, error = %e, "Tracker rejected terminal state");
            Resolution::default()
        });
        slot.fulfil(outcome);
        debug!(task_id = id, state = %state, "Task settled");

        for (dependent, cause) in resolution.cancelled {
            let queued = self
                .parked
                .remove(&dependent)
                .or_else(|| self.queue.remove(dependent));
            if let Some(queued) = queued {
                SchedulerCounters::decr(&self.counters.pending);
                debug!(task_id = dependent, dependency = cause, "Cancelling dependent");
                self.resolve_cancelled(dependent, &queued.slot, CancelReason::DependencyFailed(cause));
            }
        }

        for ready in resolution.unblocked {
            if let Some(queued) = self.parked.remove(&ready) {
                debug!(task_id = ready, "Dependencies satisfied");
                self.queue
                    .insert(ready, queued.scheduled_at, queued.priority, ready, queued);
            }
        }
    }

    /// Deliver a cancellation the tracker has already recorded.
    fn resolve_cancelled(&self, id: TaskId, slot: &ResultSlot<T>, reason: CancelReason) {
        SchedulerCounters::incr(&self.counters.cancelled);
        self.record(id, AuditAction::Cancel, Some(reason.to_string()));
        slot.fulfil(Outcome::Cancelled(reason));
    }

    fn begin_drain(&mut self, requested_at: Instant, deadline: Option<Instant>) {
        if let Some(existing) = self.drain.as_mut() {
            existing.deadline = match (existing.deadline, deadline) {
                (Some(a), Some(b)) => Some(a.min(b)),
                (a, b) => a.or(b),
            };
            return;
        }
        info!(
            queued = self.queue.len(),
            parked = self.parked.len(),
            live = self.tracker.live_count(),
            next_due = ?self.queue.next_due(),
            running = self.running.len(),
            "Draining"
        );
        self.drain = Some(DrainState {
            requested_at,
            deadline,
        });
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.parked.is_empty() && self.running.is_empty()
    }

    fn drain_complete(&self) -> bool {
        self.drain
            .is_some_and(|d| self.is_idle() || d.deadline.is_some_and(|deadline| Instant::now() >= deadline))
    }

    /// Resolve everything still outstanding and publish the report.
    fn stop(mut self) {
        let drain = self.drain.unwrap_or(DrainState {
            requested_at: Instant::now(),
            deadline: None,
        });
        let timed_out = !self.is_idle();

        // Everything not yet dispatched is cancelled.
        let mut pending: Vec<(TaskId, Queued<T>)> = self.queue.drain();
        pending.extend(self.parked.drain());
        let cancelled_on_shutdown = pending.len() as u64;
        for (id, queued) in pending {
            if self.tracker.state(id).is_some_and(|s| !s.is_terminal()) {
                if let Err(e) = self.tracker.mark_terminal(id, TaskState::Cancelled) {
                    error!(task_id = id, error = %e, "Tracker rejected cancellation");
                }
            }
            SchedulerCounters::decr(&self.counters.pending);
            self.resolve_cancelled(id, &queued.slot, CancelReason::SchedulerStopped);
        }

        // Everything still running is abandoned.
        let running: Vec<(TaskId, Running<T>)> = self.running.drain().collect();
        let forced = running.len() as u64;
        for (id, task) in running {
            warn!(task_id = id, "Abandoning task at shutdown deadline");
            task.signal.cancel();
            SchedulerCounters::decr(&self.counters.active);
            self.settle(id, &task.slot, Outcome::Failed(TaskError::ForcedShutdown));
        }

        let report = report_from(
            &self.counters,
            forced,
            cancelled_on_shutdown,
            timed_out,
            drain.requested_at.elapsed(),
        );
        info!(
            completed = report.completed,
            failed = report.failed,
            cancelled = report.cancelled,
            forced = report.forced,
            timed_out = report.timed_out,
            "Scheduler stopped"
        );
        self.controller.publish(report);

        // Answer anything that raced the stop.
        while let Ok(cmd) = self.cmd_rx.try_recv() {
            match cmd {
                Command::Cancel { reply, .. } => {
                    let _ = reply.send(Err(SchedulerError::Stopped));
                }
                Command::State { id, reply } => {
                    let _ = reply.send(self.tracker.state(id));
                }
                Command::Submit { slot, .. } => {
                    slot.fulfil(Outcome::Cancelled(CancelReason::SchedulerStopped));
                }
                Command::RateChanged | Command::Drain { .. } => {}
            }
        }

        let joined = self.pool.close(WORKER_JOIN_GRACE);
        debug!(joined = joined, workers = self.worker_count, "Worker pool closed");
    }

    fn record(&self, id: TaskId, action: AuditAction, detail: Option<String>) {
        if let Some(sink) = self.audit.lock().as_mut() {
            sink.record(build_audit_event(id, action, detail));
        }
    }
}

impl<T: Send + 'static> std::fmt::Debug for Scheduler<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Scheduler")
            .field("lifecycle", &self.lifecycle())
            .field("stats", &self.stats())
            .finish_non_exhaustive()
    }
}

//! Fixed-size pool of dedicated worker threads.
//!
//! Each worker is an OS thread with its own single-threaded tokio runtime,
//! so CPU-heavy work never blocks the coordinator and async work still has a
//! reactor to run on.
//!
//! # Design Principles
//!
//! - **No polling**: workers block on channel recv
//! - **Contained failures**: errors and panics in work become `TaskError`s
//! - **Clean shutdown**: dropping the sender unblocks idle workers; a raised
//!   cancel signal aborts a running task at its next await point

use std::any::Any;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, unbounded, Receiver, RecvTimeoutError, Sender};
use tracing::{debug, warn};

use super::error::{SchedulerError, TaskError};
use super::task::{CancelSignal, TaskContext, TaskId, Work};

/// A task handed to a worker.
pub(crate) struct Dispatch<T> {
    pub id: TaskId,
    pub work: Box<dyn Work<T>>,
    pub signal: CancelSignal,
}

/// A worker's report that a task finished.
#[derive(Debug)]
pub(crate) struct Completion<T> {
    pub id: TaskId,
    pub worker_id: usize,
    pub result: Result<T, TaskError>,
}

/// Worker thread pool. Owned by the coordinator.
pub(crate) struct WorkerPool<T> {
    /// Task sender. `None` once closed.
    task_tx: Option<Sender<Dispatch<T>>>,
    workers: Vec<Option<JoinHandle<()>>>,
    exit_rx: Receiver<usize>,
}

impl<T: Send + 'static> WorkerPool<T> {
    /// Spawn `worker_count` workers reporting completions on `done_tx`.
    pub(crate) fn new(
        worker_count: usize,
        stack_size: usize,
        done_tx: &Sender<Completion<T>>,
    ) -> Result<Self, SchedulerError> {
        // Never blocks: the coordinator dispatches only into a free slot.
        let (task_tx, task_rx) = bounded::<Dispatch<T>>(worker_count);
        let (exit_tx, exit_rx) = unbounded();

        let mut workers = Vec::with_capacity(worker_count);
        for worker_id in 0..worker_count {
            let rt = tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
                .map_err(|e| SchedulerError::Internal(format!("worker runtime: {e}")))?;
            let handle = spawn_worker(
                worker_id,
                rt,
                task_rx.clone(),
                done_tx.clone(),
                exit_tx.clone(),
                stack_size,
            )?;
            workers.push(Some(handle));
        }

        Ok(Self {
            task_tx: Some(task_tx),
            workers,
            exit_rx,
        })
    }

    /// Hand a task to the next idle worker.
    ///
    /// Returns the task back if the pool is closed or unexpectedly full.
    pub(crate) fn dispatch(&self, task: Dispatch<T>) -> Result<(), Dispatch<T>> {
        let Some(tx) = self.task_tx.as_ref() else {
            return Err(task);
        };
        tx.try_send(task).map_err(crossbeam_channel::TrySendError::into_inner)
    }

    /// Stop accepting tasks and join workers that exit within `grace`.
    ///
    /// Workers still stuck in non-yielding work after `grace` are detached.
    /// Returns the number of workers joined.
    pub(crate) fn close(&mut self, grace: Duration) -> usize {
        // Dropping the sender unblocks all idle workers.
        self.task_tx = None;

        let deadline = Instant::now() + grace;
        let mut joined = 0;
        let mut remaining = self.workers.iter().filter(|w| w.is_some()).count();
        while remaining > 0 {
            match self.exit_rx.recv_deadline(deadline) {
                Ok(worker_id) => {
                    remaining -= 1;
                    if let Some(handle) = self.workers.get_mut(worker_id).and_then(Option::take) {
                        if handle.join().is_ok() {
                            joined += 1;
                        } else {
                            warn!(worker_id = worker_id, "Worker panicked");
                        }
                    }
                }
                Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => {
                    warn!(
                        remaining = remaining,
                        "Workers did not exit within grace period - detaching"
                    );
                    break;
                }
            }
        }
        joined
    }
}

/// Spawn a worker thread.
fn spawn_worker<T: Send + 'static>(
    worker_id: usize,
    rt: tokio::runtime::Runtime,
    task_rx: Receiver<Dispatch<T>>,
    done_tx: Sender<Completion<T>>,
    exit_tx: Sender<usize>,
    stack_size: usize,
) -> Result<JoinHandle<()>, SchedulerError> {
    thread::Builder::new()
        .name(format!("sched-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id = worker_id, "Worker thread started");

            // When the sender is dropped, recv() returns Err and the worker exits.
            while let Ok(Dispatch { id, work, signal }) = task_rx.recv() {
                debug!(worker_id = worker_id, task_id = id, "Worker executing task");
                let result = rt.block_on(run_work(id, work, signal));
                debug!(
                    worker_id = worker_id,
                    task_id = id,
                    ok = result.is_ok(),
                    "Worker finished task"
                );
                if done_tx.send(Completion { id, worker_id, result }).is_err() {
                    debug!(worker_id = worker_id, "Coordinator gone, exiting");
                    break;
                }
            }

            debug!(worker_id = worker_id, "Worker thread exiting");
            let _ = exit_tx.send(worker_id);
        })
        .map_err(|e| SchedulerError::Internal(format!("failed to spawn worker thread: {e}")))
}

/// Run one task on the worker's runtime, racing it against the cancel signal.
async fn run_work<T: Send + 'static>(
    id: TaskId,
    work: Box<dyn Work<T>>,
    signal: CancelSignal,
) -> Result<T, TaskError> {
    let ctx = TaskContext::new(id, signal.clone());
    let mut handle = tokio::spawn(work.run(ctx));
    tokio::select! {
        joined = &mut handle => match joined {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(e)) => Err(TaskError::WorkExecution(e)),
            Err(e) if e.is_panic() => Err(TaskError::Panicked(panic_message(&*e.into_panic()))),
            Err(_) => Err(TaskError::ForcedShutdown),
        },
        () = signal.cancelled() => {
            handle.abort();
            Err(TaskError::ForcedShutdown)
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

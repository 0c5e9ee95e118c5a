//! Bounded pool of execution threads.
//!
//! Task execution never runs on the scheduler's control thread. Each worker
//! is a dedicated OS thread with its own single-threaded tokio runtime, so a
//! slow or blocking agent only ties up its own worker.
//!
//! # Design
//!
//! - **No polling**: workers block on channel `recv`
//! - **Per-task deadline**: `tokio::time::timeout_at` around each execution,
//!   counted from when the job was dispatched rather than when a worker
//!   picked it up
//! - **Cancellation**: a per-job `Notify` raced against the execution
//! - **Clean shutdown**: dropping the sender drains queued jobs, then
//!   unblocks workers

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{bounded, Receiver, Sender, TrySendError};
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::WorkerPoolConfig;
use crate::core::agent::Agent;
use crate::core::task::{TaskRecord, TaskResult};
use crate::core::{ExecutionError, SchedulerError};

/// How an execution attempt ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// The agent returned a result.
    Succeeded(TaskResult),
    /// The agent reported an error or panicked.
    Failed(ExecutionError),
    /// The deadline elapsed first.
    TimedOut,
    /// A cancellation signal arrived first.
    Aborted,
}

/// Outcome plus the time the attempt took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExecutionReport {
    /// How the attempt ended.
    pub outcome: ExecutionOutcome,
    /// Wall time of the attempt.
    pub elapsed_ms: u64,
}

/// Callback invoked on the worker thread once the attempt ends.
pub type CompletionFn = Box<dyn FnOnce(ExecutionReport) + Send + 'static>;

/// One unit of work for the pool.
pub struct ExecutionJob {
    /// Snapshot of the record handed to the agent.
    pub task: TaskRecord,
    /// Agent that executes it.
    pub agent: Arc<dyn Agent>,
    /// When the attempt began. Time spent waiting for a worker counts
    /// against the deadline.
    pub started_at: Instant,
    /// Deadline measured from `started_at`.
    pub timeout: Duration,
    /// Signalled to abandon the execution.
    pub cancel: Arc<Notify>,
    /// Completion bookkeeping.
    pub on_complete: CompletionFn,
}

/// Statistics about pool utilization.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    /// Number of worker threads.
    pub worker_count: usize,
    /// Jobs executing now.
    pub active_jobs: u64,
    /// Jobs waiting for a worker.
    pub queued_jobs: u64,
    /// Jobs whose agent returned a result.
    pub succeeded_jobs: u64,
    /// Jobs that failed, panicked, timed out or were aborted.
    pub unsuccessful_jobs: u64,
    /// Jobs accepted by `submit`.
    pub submitted_jobs: u64,
}

#[derive(Debug, Default)]
struct PoolCounters {
    active_jobs: AtomicU64,
    queued_jobs: AtomicU64,
    succeeded_jobs: AtomicU64,
    unsuccessful_jobs: AtomicU64,
    submitted_jobs: AtomicU64,
}

impl PoolCounters {
    fn snapshot(&self, worker_count: usize) -> PoolStats {
        PoolStats {
            worker_count,
            active_jobs: self.active_jobs.load(Ordering::Relaxed),
            queued_jobs: self.queued_jobs.load(Ordering::Relaxed),
            succeeded_jobs: self.succeeded_jobs.load(Ordering::Relaxed),
            unsuccessful_jobs: self.unsuccessful_jobs.load(Ordering::Relaxed),
            submitted_jobs: self.submitted_jobs.load(Ordering::Relaxed),
        }
    }
}

/// Pool of dedicated execution threads.
pub struct WorkerPool {
    config: WorkerPoolConfig,
    job_tx: Mutex<Option<Sender<ExecutionJob>>>,
    counters: Arc<PoolCounters>,
    shutdown: AtomicBool,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl WorkerPool {
    /// Spawn `config.worker_count` worker threads.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` if the configuration is invalid
    /// - `SchedulerError::Internal` if a thread cannot be spawned
    pub fn new(config: WorkerPoolConfig) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;

        let (job_tx, job_rx) = bounded::<ExecutionJob>(config.max_queue_depth);
        let counters = Arc::new(PoolCounters::default());

        let mut workers = Vec::with_capacity(config.worker_count);
        for worker_id in 0..config.worker_count {
            let worker = spawn_worker(
                worker_id,
                job_rx.clone(),
                Arc::clone(&counters),
                config.thread_stack_size,
            )?;
            workers.push(worker);
        }

        info!(
            worker_count = config.worker_count,
            max_queue_depth = config.max_queue_depth,
            "worker pool initialized"
        );

        Ok(Self {
            config,
            job_tx: Mutex::new(Some(job_tx)),
            counters,
            shutdown: AtomicBool::new(false),
            workers: Mutex::new(workers),
        })
    }

    /// Hand a job to the workers without blocking.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::QueueFull` if every queue slot is taken
    /// - `SchedulerError::Shutdown` if the pool has been shut down
    pub fn submit(&self, job: ExecutionJob) -> Result<(), SchedulerError> {
        if self.shutdown.load(Ordering::Acquire) {
            return Err(SchedulerError::Shutdown);
        }
        let guard = self.job_tx.lock();
        let Some(job_tx) = guard.as_ref() else {
            return Err(SchedulerError::Shutdown);
        };
        let task_id = job.task.id().to_string();
        match job_tx.try_send(job) {
            Ok(()) => {
                self.counters.submitted_jobs.fetch_add(1, Ordering::Relaxed);
                self.counters.queued_jobs.fetch_add(1, Ordering::Relaxed);
                debug!(task_id = %task_id, "job submitted to worker pool");
                Ok(())
            }
            Err(TrySendError::Full(_)) => {
                warn!(task_id = %task_id, "worker pool queue is full");
                Err(SchedulerError::QueueFull("worker pool queue".into()))
            }
            Err(TrySendError::Disconnected(_)) => Err(SchedulerError::Shutdown),
        }
    }

    /// Current utilization.
    #[must_use]
    pub fn stats(&self) -> PoolStats {
        self.counters.snapshot(self.config.worker_count)
    }

    /// Whether `shutdown` has been called.
    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.shutdown.load(Ordering::Acquire)
    }

    /// Stop accepting jobs, let queued jobs finish, and join workers.
    ///
    /// Workers that do not exit within `join_timeout` are detached. Calling
    /// this more than once is a no-op.
    pub fn shutdown(&self, join_timeout: Duration) {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return;
        }
        info!("shutting down worker pool");

        // Dropping the sender lets workers drain the channel, then exit.
        self.job_tx.lock().take();

        let mut workers = self.workers.lock();
        let worker_count = workers.len();
        for (idx, worker) in workers.drain(..).enumerate() {
            let (tx, rx) = std::sync::mpsc::channel();
            let join_thread = thread::spawn(move || {
                let result = worker.join();
                let _ = tx.send(result.is_ok());
            });
            match rx.recv_timeout(join_timeout) {
                Ok(true) => debug!(worker_id = idx, "worker joined"),
                Ok(false) => warn!(worker_id = idx, "worker panicked"),
                Err(_) => {
                    warn!(worker_id = idx, "worker did not exit within timeout - detaching");
                    continue;
                }
            }
            let _ = join_thread.join();
        }
        info!(worker_count, "worker pool shut down");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Signal only; joining here could hang on a stuck agent.
        if !self.shutdown.swap(true, Ordering::AcqRel) {
            self.job_tx.lock().take();
            debug!("worker pool dropped without explicit shutdown - workers detached");
        }
    }
}

async fn run_job(
    agent: Arc<dyn Agent>,
    task: TaskRecord,
    deadline: Instant,
    cancel: Arc<Notify>,
) -> ExecutionOutcome {
    let task_id = task.id().to_string();
    let deadline = tokio::time::Instant::from_std(deadline);
    tokio::select! {
        res = tokio::time::timeout_at(deadline, agent.execute_task(task)) => match res {
            Ok(Ok(result)) => ExecutionOutcome::Succeeded(result),
            Ok(Err(ExecutionError::Aborted)) => ExecutionOutcome::Aborted,
            Ok(Err(e)) => ExecutionOutcome::Failed(e),
            Err(_) => ExecutionOutcome::TimedOut,
        },
        () = cancel.notified() => {
            let honored = agent.abort(&task_id);
            debug!(task_id = %task_id, honored, "execution abandoned on cancel");
            ExecutionOutcome::Aborted
        }
    }
}

fn spawn_worker(
    worker_id: usize,
    job_rx: Receiver<ExecutionJob>,
    counters: Arc<PoolCounters>,
    stack_size: usize,
) -> Result<JoinHandle<()>, SchedulerError> {
    thread::Builder::new()
        .name(format!("agent-worker-{worker_id}"))
        .stack_size(stack_size)
        .spawn(move || {
            debug!(worker_id, "worker thread started");

            let rt = match tokio::runtime::Builder::new_current_thread()
                .enable_all()
                .build()
            {
                Ok(rt) => rt,
                Err(e) => {
                    error!(worker_id, error = %e, "failed to create worker runtime");
                    return;
                }
            };

            // Blocking recv; returns Err once the sender is dropped and the
            // channel is drained.
            while let Ok(job) = job_rx.recv() {
                counters.queued_jobs.fetch_sub(1, Ordering::Relaxed);
                counters.active_jobs.fetch_add(1, Ordering::Relaxed);

                let ExecutionJob {
                    task,
                    agent,
                    started_at,
                    timeout,
                    cancel,
                    on_complete,
                } = job;
                let task_id = task.id().to_string();
                let deadline = started_at.checked_add(timeout).unwrap_or(started_at);

                let outcome = if Instant::now() >= deadline {
                    debug!(worker_id, task_id = %task_id, ?timeout, "deadline passed while queued");
                    ExecutionOutcome::TimedOut
                } else {
                    debug!(worker_id, task_id = %task_id, agent_id = agent.id(), "executing task");
                    catch_unwind(AssertUnwindSafe(|| {
                        rt.block_on(run_job(agent, task, deadline, cancel))
                    }))
                    .unwrap_or_else(|panic| {
                        let message = panic
                            .downcast_ref::<&str>()
                            .map(ToString::to_string)
                            .or_else(|| panic.downcast_ref::<String>().cloned())
                            .unwrap_or_else(|| "unknown panic".into());
                        error!(worker_id, task_id = %task_id, %message, "agent panicked");
                        ExecutionOutcome::Failed(ExecutionError::Panicked(message))
                    })
                };
                let elapsed_ms =
                    u64::try_from(started_at.elapsed().as_millis()).unwrap_or(u64::MAX);

                if matches!(outcome, ExecutionOutcome::Succeeded(_)) {
                    counters.succeeded_jobs.fetch_add(1, Ordering::Relaxed);
                } else {
                    counters.unsuccessful_jobs.fetch_add(1, Ordering::Relaxed);
                }
                counters.active_jobs.fetch_sub(1, Ordering::Relaxed);

                let report = ExecutionReport {
                    outcome,
                    elapsed_ms,
                };
                if catch_unwind(AssertUnwindSafe(|| on_complete(report))).is_err() {
                    error!(worker_id, task_id = %task_id, "completion handler panicked");
                }
                debug!(worker_id, task_id = %task_id, elapsed_ms, "worker finished task");
            }

            debug!(worker_id, "worker thread exiting");
        })
        .map_err(|e| SchedulerError::Internal(format!("failed to spawn worker thread: {e}")))
}

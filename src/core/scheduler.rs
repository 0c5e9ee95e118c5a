//! The scheduling engine.
//!
//! One dedicated control thread makes dispatch decisions; execution runs on
//! a bounded [`WorkerPool`]. The control thread sleeps on a `Condvar` and
//! wakes on its tick or immediately when a task is submitted, cancelled or
//! finishes.
//!
//! # Locking
//!
//! The task registry, the running set, the queue and the stats each have
//! their own lock. Each task record has its own mutex that serializes its
//! transitions between the dispatch round, the completion path and
//! cancellation. Lock order is registry, then record, then queue; the queue
//! lock is never held while the strategy runs or while a job is submitted.
//!
//! ```rust,ignore
//! let scheduler = Scheduler::new(SchedulerConfig::default(), registry, bus)?;
//! scheduler.start()?;
//! let id = scheduler.schedule_task(
//!     TaskConfig::new("t1", "compile", TaskType::Development).with_priority(Priority::High),
//! )?;
//! ```

use std::collections::{HashMap, HashSet};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{unbounded, Sender};
use parking_lot::{Condvar, Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

use crate::config::{SchedulerConfig, StrategyKind};
use crate::core::agent::Agent;
use crate::core::events::{EventBus, SchedulerEvent};
use crate::core::monitor::{AgentMonitor, MonitorStats};
use crate::core::registry::{AgentFilter, AgentRegistry};
use crate::core::stats::{SchedulerStats, StatsAccumulator};
use crate::core::strategy::{strategy_for, AssignmentStrategy};
use crate::core::task::{
    FailureKind, RetryDisposition, TaskConfig, TaskId, TaskRecord, TaskStatus,
};
use crate::core::task_queue::TaskQueue;
use crate::core::worker_pool::{ExecutionJob, ExecutionOutcome, ExecutionReport, WorkerPool};
use crate::core::SchedulerError;
use crate::util::clock::now_ms;

/// How long `shutdown` waits for each worker thread.
pub const SHUTDOWN_JOIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Observer of task lifecycle milestones. Runs on the callback thread.
pub type TaskCallback = Arc<dyn Fn(&TaskRecord) + Send + Sync>;

/// A queued task that cannot run yet.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockedTask {
    /// The blocked task.
    pub task_id: TaskId,
    /// Dependencies not yet `Completed`, in declaration order.
    pub waiting_on: Vec<TaskId>,
    /// Dependencies that name no known task.
    pub missing: Vec<TaskId>,
    /// Whether a dependency ended in a terminal state other than
    /// `Completed`, so the task can never become ready.
    pub unsatisfiable: bool,
    /// Whether no registered agent's resource limits cover the task's
    /// requirements.
    pub no_capable_agent: bool,
}

type Job = Box<dyn FnOnce() + Send>;

/// Dedicated thread running observer callbacks off the completion path.
struct CallbackRunner {
    tx: Mutex<Option<Sender<Job>>>,
}

impl CallbackRunner {
    fn spawn() -> Result<Self, SchedulerError> {
        let (tx, rx) = unbounded::<Job>();
        thread::Builder::new()
            .name("agent-scheduler-callbacks".into())
            .spawn(move || {
                while let Ok(job) = rx.recv() {
                    if catch_unwind(AssertUnwindSafe(job)).is_err() {
                        error!("task callback panicked");
                    }
                }
            })
            .map_err(|e| SchedulerError::Internal(format!("failed to spawn callback thread: {e}")))?;
        Ok(Self {
            tx: Mutex::new(Some(tx)),
        })
    }

    fn run(&self, job: Job) {
        if let Some(tx) = self.tx.lock().as_ref() {
            let _ = tx.send(job);
        }
    }
}

#[derive(Default)]
struct Callbacks {
    started: RwLock<Option<TaskCallback>>,
    completed: RwLock<Option<TaskCallback>>,
    failed: RwLock<Option<TaskCallback>>,
}

struct RunningTask {
    agent_id: String,
    cancel: Arc<Notify>,
}

struct WakeState {
    wake_pending: bool,
    shutdown: bool,
}

type TaskEntry = Arc<Mutex<TaskRecord>>;

struct SchedulerInner {
    registry: Arc<AgentRegistry>,
    event_bus: Arc<dyn EventBus>,
    strategy: RwLock<Arc<dyn AssignmentStrategy>>,
    max_concurrent: AtomicUsize,
    default_timeout: Duration,
    tick: Duration,
    queue: TaskQueue,
    tasks: RwLock<HashMap<TaskId, TaskEntry>>,
    running: Mutex<HashMap<TaskId, RunningTask>>,
    stats: Mutex<StatsAccumulator>,
    pool: WorkerPool,
    wake: (Mutex<WakeState>, Condvar),
    is_running: AtomicBool,
    paused: AtomicBool,
    callbacks: Callbacks,
    callback_runner: CallbackRunner,
}

/// Priority scheduler dispatching tasks to agents.
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
    control: Mutex<Option<JoinHandle<()>>>,
    monitor: AgentMonitor,
    monitor_interval: Duration,
}

impl Scheduler {
    /// Build a stopped scheduler. The worker pool starts immediately and
    /// lives until [`Scheduler::shutdown`] or drop.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::InvalidConfig` if `config` is invalid
    /// - `SchedulerError::Internal` if a thread cannot be spawned
    pub fn new(
        config: SchedulerConfig,
        registry: Arc<AgentRegistry>,
        event_bus: Arc<dyn EventBus>,
    ) -> Result<Self, SchedulerError> {
        config.validate().map_err(SchedulerError::InvalidConfig)?;
        let pool = WorkerPool::new(config.worker_pool.clone())?;
        let monitor = AgentMonitor::new(Arc::clone(&registry));
        let inner = SchedulerInner {
            registry,
            event_bus,
            strategy: RwLock::new(strategy_for(config.strategy)),
            max_concurrent: AtomicUsize::new(config.max_concurrent_tasks),
            default_timeout: config.default_timeout(),
            tick: config.tick_interval(),
            queue: TaskQueue::new(config.max_queue_size),
            tasks: RwLock::new(HashMap::new()),
            running: Mutex::new(HashMap::new()),
            stats: Mutex::new(StatsAccumulator::default()),
            pool,
            wake: (
                Mutex::new(WakeState {
                    wake_pending: false,
                    shutdown: false,
                }),
                Condvar::new(),
            ),
            is_running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            callbacks: Callbacks::default(),
            callback_runner: CallbackRunner::spawn()?,
        };
        info!(
            max_concurrent_tasks = config.max_concurrent_tasks,
            max_queue_size = config.max_queue_size,
            strategy = ?config.strategy,
            "scheduler created"
        );
        Ok(Self {
            inner: Arc::new(inner),
            control: Mutex::new(None),
            monitor,
            monitor_interval: Duration::from_secs(config.monitor_interval_secs),
        })
    }

    /// Registry agents are drawn from.
    #[must_use]
    pub fn registry(&self) -> &Arc<AgentRegistry> {
        &self.inner.registry
    }

    // ------------------------------------------------------------------
    // Submission and queries
    // ------------------------------------------------------------------

    /// Validate and enqueue a task.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::Validation` for an invalid config
    /// - `SchedulerError::Duplicate` if the id is already known
    /// - `SchedulerError::QueueFull` at queue capacity
    pub fn schedule_task(&self, config: TaskConfig) -> Result<TaskId, SchedulerError> {
        config.validate()?;
        let record = TaskRecord::new(config);
        let id = record.id().to_string();
        {
            let mut tasks = self.inner.tasks.write();
            if tasks.contains_key(&id) {
                return Err(SchedulerError::Duplicate(id));
            }
            if let Err(e) = self.inner.queue.push(record.clone()) {
                warn!(task_id = %id, error = %e, "task rejected");
                return Err(e);
            }
            tasks.insert(id.clone(), Arc::new(Mutex::new(record.clone())));
        }
        self.inner.stats.lock().record_scheduled();
        info!(task_id = %id, priority = ?record.priority(), "task scheduled");
        self.inner.event_bus.publish(SchedulerEvent::TaskScheduled {
            task_id: id.clone(),
            name: record.name().to_string(),
            priority: record.priority(),
        });
        self.inner.wake();
        Ok(id)
    }

    /// Snapshot of a task.
    #[must_use]
    pub fn get_task(&self, id: &str) -> Option<TaskRecord> {
        self.inner.entry(id).map(|entry| entry.lock().clone())
    }

    /// Current status of a task.
    #[must_use]
    pub fn task_status(&self, id: &str) -> Option<TaskStatus> {
        self.inner.entry(id).map(|entry| entry.lock().status())
    }

    /// Snapshots of every task, or of those in `status`, sorted by id.
    #[must_use]
    pub fn list_tasks(&self, status: Option<TaskStatus>) -> Vec<TaskRecord> {
        self.inner
            .snapshot_where(|record| status.is_none_or(|s| record.status() == s))
    }

    /// Snapshots of tasks last assigned to `agent_id`, sorted by id.
    #[must_use]
    pub fn list_tasks_by_agent(&self, agent_id: &str) -> Vec<TaskRecord> {
        self.inner
            .snapshot_where(|record| record.assigned_agent_id() == Some(agent_id))
    }

    /// Queued tasks whose dependencies are not all `Completed`, or that no
    /// registered agent has the resources to run.
    #[must_use]
    pub fn blocked_tasks(&self) -> Vec<BlockedTask> {
        let statuses = self.inner.status_snapshot();
        let agents = self.inner.registry.list(&AgentFilter::default());
        self.inner
            .queue
            .pending_in_order()
            .into_iter()
            .filter_map(|record| {
                let no_capable_agent = !agents
                    .iter()
                    .any(|agent| agent.config().limits.satisfies(&record.config().resources));
                if !no_capable_agent && record.dependencies_met(&statuses) {
                    return None;
                }
                let mut waiting_on = Vec::new();
                let mut missing = Vec::new();
                let mut unsatisfiable = false;
                for dep in record.dependencies() {
                    match statuses.get(dep) {
                        Some(TaskStatus::Completed) => {}
                        Some(status) => {
                            unsatisfiable |= matches!(
                                status,
                                TaskStatus::Cancelled | TaskStatus::Failed | TaskStatus::Timeout
                            );
                            waiting_on.push(dep.clone());
                        }
                        None => {
                            waiting_on.push(dep.clone());
                            missing.push(dep.clone());
                        }
                    }
                }
                Some(BlockedTask {
                    task_id: record.id().to_string(),
                    waiting_on,
                    missing,
                    unsatisfiable,
                    no_capable_agent,
                })
            })
            .collect()
    }

    /// Latest agent health sample, refreshed every `monitor_interval_secs`
    /// while the scheduler runs.
    #[must_use]
    pub fn agent_stats(&self) -> MonitorStats {
        self.monitor.stats()
    }

    /// Aggregate statistics.
    #[must_use]
    pub fn stats(&self) -> SchedulerStats {
        let pending = self.inner.queue.len();
        let running = self.inner.running.lock().len();
        self.inner.stats.lock().snapshot(pending, running)
    }

    // ------------------------------------------------------------------
    // Task control
    // ------------------------------------------------------------------

    /// Cancel a pending, scheduled or running task. Running tasks get a
    /// best-effort abort signal. Returns `false` for terminal tasks.
    ///
    /// # Errors
    ///
    /// `SchedulerError::NotFound` for an unknown id.
    pub fn cancel_task(&self, id: &str) -> Result<bool, SchedulerError> {
        let entry = self
            .inner
            .entry(id)
            .ok_or_else(|| SchedulerError::NotFound(format!("task `{id}`")))?;
        {
            let mut record = entry.lock();
            if record.is_terminal() {
                return Ok(false);
            }
            let was = record.status();
            record.mark_cancelled(now_ms())?;
            if was == TaskStatus::Pending {
                self.inner.queue.remove(id);
            }
        }
        if let Some(run) = self.inner.running.lock().get(id) {
            run.cancel.notify_one();
            debug!(task_id = id, agent_id = %run.agent_id, "abort signalled");
        }
        self.inner.stats.lock().record_cancelled();
        info!(task_id = id, "task cancelled");
        self.inner.event_bus.publish(SchedulerEvent::TaskCancelled {
            task_id: id.to_string(),
        });
        self.inner.wake();
        Ok(true)
    }

    /// Report progress for a task. `progress` is clamped to `0..=100`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::NotFound` for an unknown id.
    pub fn update_progress(
        &self,
        id: &str,
        progress: f64,
        phase: Option<&str>,
    ) -> Result<(), SchedulerError> {
        let entry = self
            .inner
            .entry(id)
            .ok_or_else(|| SchedulerError::NotFound(format!("task `{id}`")))?;
        let mut record = entry.lock();
        record.set_progress(progress);
        if let Some(phase) = phase {
            record.set_phase(phase);
        }
        Ok(())
    }

    /// Forget terminal tasks. A terminal task that an unfinished task still
    /// depends on is kept. Returns how many were removed.
    pub fn cleanup_terminal_tasks(&self) -> usize {
        let mut tasks = self.inner.tasks.write();
        let before = tasks.len();
        let mut needed: HashSet<TaskId> = HashSet::new();
        for entry in tasks.values() {
            let record = entry.lock();
            if !record.is_terminal() {
                needed.extend(record.dependencies().iter().cloned());
            }
        }
        tasks.retain(|id, entry| needed.contains(id) || !entry.lock().is_terminal());
        let removed = before - tasks.len();
        if removed > 0 {
            debug!(removed, "terminal tasks cleaned up");
        }
        removed
    }

    // ------------------------------------------------------------------
    // Scheduler control
    // ------------------------------------------------------------------

    /// Start the control thread. A no-op if already running.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::Shutdown` after [`Scheduler::shutdown`]
    /// - `SchedulerError::Internal` if the thread cannot be spawned
    pub fn start(&self) -> Result<(), SchedulerError> {
        if self.inner.pool.is_shut_down() {
            return Err(SchedulerError::Shutdown);
        }
        let mut control = self.control.lock();
        if self.inner.is_running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        self.inner.wake.0.lock().shutdown = false;
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name("agent-scheduler".into())
            .spawn(move || inner.run_loop())
            .map_err(|e| {
                self.inner.is_running.store(false, Ordering::Release);
                SchedulerError::Internal(format!("failed to spawn scheduler thread: {e}"))
            })?;
        *control = Some(handle);
        if let Err(e) = self.monitor.start_monitoring(self.monitor_interval) {
            warn!(error = %e, "agent monitor not started");
        }
        info!("scheduler started");
        Ok(())
    }

    /// Stop the control thread and join it. Executions already dispatched
    /// finish and record their outcome. Safe to call repeatedly.
    pub fn stop(&self) {
        let mut control = self.control.lock();
        if !self.inner.is_running.swap(false, Ordering::AcqRel) {
            return;
        }
        {
            let (lock, cvar) = &self.inner.wake;
            lock.lock().shutdown = true;
            cvar.notify_all();
        }
        if let Some(handle) = control.take() {
            if handle.join().is_err() {
                error!("scheduler control thread panicked");
            }
        }
        self.monitor.stop_monitoring();
        info!("scheduler stopped");
    }

    /// Stop and release the worker pool, letting queued executions finish.
    /// The scheduler cannot be restarted afterwards.
    pub fn shutdown(&self) {
        self.stop();
        self.inner.pool.shutdown(SHUTDOWN_JOIN_TIMEOUT);
    }

    /// Suspend dispatch. Running tasks continue.
    pub fn pause(&self) {
        if !self.inner.paused.swap(true, Ordering::AcqRel) {
            info!("scheduler paused");
        }
    }

    /// Resume dispatch.
    pub fn resume(&self) {
        if self.inner.paused.swap(false, Ordering::AcqRel) {
            info!("scheduler resumed");
            self.inner.wake();
        }
    }

    /// Whether the control thread is running.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.is_running.load(Ordering::Acquire)
    }

    /// Whether dispatch is suspended.
    #[must_use]
    pub fn is_paused(&self) -> bool {
        self.inner.paused.load(Ordering::Acquire)
    }

    /// Select a built-in strategy and the concurrency bound.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidConfig` if `max_concurrent_tasks` is zero.
    pub fn configure(
        &self,
        strategy: StrategyKind,
        max_concurrent_tasks: usize,
    ) -> Result<(), SchedulerError> {
        if max_concurrent_tasks == 0 {
            return Err(SchedulerError::InvalidConfig(
                "max_concurrent_tasks must be greater than 0".into(),
            ));
        }
        self.set_execution_strategy(strategy_for(strategy));
        self.inner
            .max_concurrent
            .store(max_concurrent_tasks, Ordering::Release);
        info!(?strategy, max_concurrent_tasks, "scheduler configured");
        self.inner.wake();
        Ok(())
    }

    /// Install a custom assignment strategy.
    pub fn set_execution_strategy(&self, strategy: Arc<dyn AssignmentStrategy>) {
        debug!(strategy = strategy.name(), "assignment strategy set");
        *self.inner.strategy.write() = strategy;
    }

    /// Change the queue bound. Tasks already queued are kept.
    pub fn set_queue_max_size(&self, max_size: usize) {
        self.inner.queue.set_max_size(max_size);
    }

    /// Called when a task starts running.
    pub fn on_task_started<F>(&self, callback: F)
    where
        F: Fn(&TaskRecord) + Send + Sync + 'static,
    {
        *self.inner.callbacks.started.write() = Some(Arc::new(callback));
    }

    /// Called when a task completes successfully.
    pub fn on_task_completed<F>(&self, callback: F)
    where
        F: Fn(&TaskRecord) + Send + Sync + 'static,
    {
        *self.inner.callbacks.completed.write() = Some(Arc::new(callback));
    }

    /// Called when a task fails with retries exhausted.
    pub fn on_task_failed<F>(&self, callback: F)
    where
        F: Fn(&TaskRecord) + Send + Sync + 'static,
    {
        *self.inner.callbacks.failed.write() = Some(Arc::new(callback));
    }
}

impl Drop for Scheduler {
    fn drop(&mut self) {
        self.shutdown();
        self.inner.callback_runner.tx.lock().take();
    }
}

impl SchedulerInner {
    fn entry(&self, id: &str) -> Option<TaskEntry> {
        self.tasks.read().get(id).cloned()
    }

    fn snapshot_where(&self, keep: impl Fn(&TaskRecord) -> bool) -> Vec<TaskRecord> {
        let entries: Vec<TaskEntry> = self.tasks.read().values().cloned().collect();
        let mut records: Vec<TaskRecord> = entries
            .iter()
            .map(|entry| entry.lock().clone())
            .filter(|record| keep(record))
            .collect();
        records.sort_by(|a, b| a.id().cmp(b.id()));
        records
    }

    /// Status of every known task, taken before any queue operation.
    fn status_snapshot(&self) -> HashMap<TaskId, TaskStatus> {
        let entries: Vec<(TaskId, TaskEntry)> = self
            .tasks
            .read()
            .iter()
            .map(|(id, entry)| (id.clone(), Arc::clone(entry)))
            .collect();
        entries
            .into_iter()
            .map(|(id, entry)| {
                let status = entry.lock().status();
                (id, status)
            })
            .collect()
    }

    fn wake(&self) {
        let (lock, cvar) = &self.wake;
        lock.lock().wake_pending = true;
        cvar.notify_one();
    }

    fn run_loop(self: Arc<Self>) {
        debug!(tick = ?self.tick, "scheduler loop started");
        loop {
            {
                let (lock, cvar) = &self.wake;
                let mut state = lock.lock();
                if !state.shutdown && !state.wake_pending {
                    cvar.wait_for(&mut state, self.tick);
                }
                if state.shutdown {
                    break;
                }
                state.wake_pending = false;
            }
            self.dispatch_round();
        }
        debug!("scheduler loop exiting");
    }

    /// One scheduling round.
    fn dispatch_round(self: &Arc<Self>) {
        if self.paused.load(Ordering::Acquire) {
            return;
        }
        let max = self.max_concurrent.load(Ordering::Acquire);
        let (remaining, busy) = {
            let running = self.running.lock();
            if running.len() >= max {
                return;
            }
            let busy: HashSet<String> = running.values().map(|run| run.agent_id.clone()).collect();
            (max - running.len(), busy)
        };
        let mut available: Vec<Arc<dyn Agent>> = self
            .registry
            .running_agents()
            .into_iter()
            .filter(|agent| !busy.contains(agent.id()))
            .collect();
        if available.is_empty() || self.queue.is_empty() {
            return;
        }

        let statuses = self.status_snapshot();
        let strategy = Arc::clone(&*self.strategy.read());
        let candidates = strategy.select_ready_tasks(&self.queue, &statuses, &available, remaining);

        for candidate in candidates {
            let eligible: Vec<Arc<dyn Agent>> = available
                .iter()
                .filter(|agent| agent.config().limits.satisfies(&candidate.config().resources))
                .cloned()
                .collect();
            if eligible.is_empty() {
                // No agent still free this round fits the task.
                continue;
            }
            let Some(agent) = strategy.select_agent(&candidate, &eligible) else {
                debug!(task_id = candidate.id(), "strategy deferred dispatch");
                break;
            };
            // Cancelled or re-queued since selection.
            if self.queue.take(candidate.id()).is_none() {
                continue;
            }
            match self.dispatch(candidate.id(), &agent) {
                Dispatch::Started => available.retain(|a| a.id() != agent.id()),
                Dispatch::Stale => {}
                Dispatch::Rejected => break,
            }
        }
    }

    /// Hand one task to `agent`.
    fn dispatch(self: &Arc<Self>, id: &str, agent: &Arc<dyn Agent>) -> Dispatch {
        let Some(entry) = self.entry(id) else {
            return Dispatch::Stale;
        };
        let mut record = entry.lock();
        if let Err(e) = record.mark_scheduled(agent.id()) {
            debug!(task_id = id, error = %e, "stale queue entry discarded");
            return Dispatch::Stale;
        }

        let started_at = now_ms();
        let mut snapshot = record.clone();
        if let Err(e) = snapshot.mark_running(started_at) {
            error!(task_id = id, error = %e, "unexpected transition failure");
            return Dispatch::Stale;
        }
        let timeout = match record.config().timeout_secs {
            0 => self.default_timeout,
            secs => Duration::from_secs(secs),
        };
        let cancel = Arc::new(Notify::new());
        self.running.lock().insert(
            id.to_string(),
            RunningTask {
                agent_id: agent.id().to_string(),
                cancel: Arc::clone(&cancel),
            },
        );

        let inner = Arc::clone(self);
        let task_id = id.to_string();
        let agent_id = agent.id().to_string();
        let job = ExecutionJob {
            task: snapshot,
            agent: Arc::clone(agent),
            started_at: Instant::now(),
            timeout,
            cancel,
            on_complete: Box::new(move |report| inner.complete(&task_id, &agent_id, report)),
        };

        // The record lock is held across submit so completion cannot
        // observe the task before it is marked running.
        if let Err(e) = self.pool.submit(job) {
            warn!(task_id = id, error = %e, "worker pool rejected task; re-queued");
            self.running.lock().remove(id);
            if record.defer().is_ok() {
                if let Err(e) = self.queue.requeue(record.clone()) {
                    error!(task_id = id, error = %e, "failed to re-queue task");
                }
            }
            return Dispatch::Rejected;
        }
        if let Err(e) = record.mark_running(started_at) {
            error!(task_id = id, error = %e, "unexpected transition failure");
        }
        let started = record.clone();
        drop(record);

        info!(task_id = id, agent_id = agent.id(), ?timeout, "task dispatched");
        self.event_bus.publish(SchedulerEvent::TaskAssigned {
            task_id: id.to_string(),
            agent_id: agent.id().to_string(),
            task_type: started.task_type().clone(),
        });
        self.fire(&self.callbacks.started, started);
        Dispatch::Started
    }

    /// Apply an execution outcome. Runs on a worker thread.
    fn complete(&self, id: &str, agent_id: &str, report: ExecutionReport) {
        let Some(entry) = self.entry(id) else {
            self.running.lock().remove(id);
            self.wake();
            return;
        };
        let ExecutionReport {
            outcome,
            elapsed_ms,
        } = report;
        let now = now_ms();

        let (applied, record) = {
            let mut record = entry.lock();
            if record.status() != TaskStatus::Running {
                // Cancelled while running.
                debug!(task_id = id, status = %record.status(), "late outcome ignored");
                (None, record.clone())
            } else {
                let applied = match outcome {
                    ExecutionOutcome::Succeeded(result) => record
                        .mark_completed(result, elapsed_ms, now)
                        .map(|()| Applied::Completed),
                    ExecutionOutcome::Failed(err) => record
                        .mark_failed(FailureKind::Failed, err.to_string(), elapsed_ms, now)
                        .map(|d| Applied::Failed(d, false)),
                    ExecutionOutcome::TimedOut => record
                        .mark_failed(
                            FailureKind::Timeout,
                            format!("timed out after {elapsed_ms} ms"),
                            elapsed_ms,
                            now,
                        )
                        .map(|d| Applied::Failed(d, true)),
                    ExecutionOutcome::Aborted => record
                        .mark_failed(FailureKind::Failed, "execution aborted", elapsed_ms, now)
                        .map(|d| Applied::Failed(d, false)),
                };
                match applied {
                    Ok(applied) => (Some(applied), record.clone()),
                    Err(e) => {
                        error!(task_id = id, error = %e, "failed to apply outcome");
                        (None, record.clone())
                    }
                }
            }
        };
        // Released only after the record left `Running`, so the next round
        // never sees more running records than the bound allows.
        self.running.lock().remove(id);

        match applied {
            None => {}
            Some(Applied::Completed) => {
                self.stats.lock().record_completed(elapsed_ms);
                info!(task_id = id, agent_id, elapsed_ms, "task completed");
                self.event_bus.publish(SchedulerEvent::TaskCompleted {
                    task_id: id.to_string(),
                    agent_id: agent_id.to_string(),
                    elapsed_ms,
                    success: true,
                });
                self.fire(&self.callbacks.completed, record);
            }
            Some(Applied::Failed(disposition, timed_out)) => {
                if timed_out {
                    self.stats.lock().record_timed_out();
                }
                let reason = record.last_error().unwrap_or_default().to_string();
                match disposition {
                    RetryDisposition::Requeued { attempt } => {
                        self.stats.lock().record_retried();
                        warn!(task_id = id, attempt, %reason, "task attempt failed; retrying");
                        self.event_bus.publish(SchedulerEvent::TaskRetried {
                            task_id: id.to_string(),
                            attempt,
                            reason,
                        });
                        // A cancel since the transition leaves nothing to queue.
                        let current = entry.lock();
                        if current.status() == TaskStatus::Pending {
                            if let Err(e) = self.queue.requeue(current.clone()) {
                                error!(task_id = id, error = %e, "failed to re-queue task");
                            }
                        }
                    }
                    RetryDisposition::Exhausted => {
                        self.stats.lock().record_failed();
                        warn!(
                            task_id = id,
                            retry_count = record.retry_count(),
                            %reason,
                            "task failed; retries exhausted"
                        );
                        self.event_bus.publish(SchedulerEvent::TaskCompleted {
                            task_id: id.to_string(),
                            agent_id: agent_id.to_string(),
                            elapsed_ms,
                            success: false,
                        });
                        self.event_bus.publish(SchedulerEvent::TaskFailed {
                            task_id: id.to_string(),
                            agent_id: Some(agent_id.to_string()),
                            reason,
                            retry_count: record.retry_count(),
                        });
                        self.fire(&self.callbacks.failed, record);
                    }
                }
            }
        }
        self.wake();
    }

    fn fire(&self, slot: &RwLock<Option<TaskCallback>>, record: TaskRecord) {
        let Some(callback) = slot.read().clone() else {
            return;
        };
        self.callback_runner.run(Box::new(move || callback(&record)));
    }
}

enum Applied {
    Completed,
    Failed(RetryDisposition, bool),
}

/// Result of handing one queued task to an agent.
enum Dispatch {
    /// The job reached the worker pool; the agent is busy.
    Started,
    /// The queue entry no longer matched a dispatchable record.
    Stale,
    /// The worker pool refused the job; the round should end.
    Rejected,
}

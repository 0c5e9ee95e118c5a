//! Task configuration, execution record and the task state machine.

use std::collections::HashMap;
use std::fmt;
use std::hash::BuildHasher;

use serde::{Deserialize, Serialize};

use crate::core::agent::AgentType;
use crate::core::SchedulerError;

/// Task identifier supplied by the caller.
pub type TaskId = String;

/// Priority levels for queue ordering.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    /// Lowest priority.
    Low,
    /// Default priority.
    #[default]
    Medium,
    /// Elevated priority.
    High,
    /// Highest priority.
    Critical,
}

/// Kind of work a task represents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskType {
    /// Unset; rejected at submission.
    #[default]
    Unknown,
    /// Implementation work.
    Development,
    /// Test authoring or execution.
    Testing,
    /// Design and review.
    Architecture,
    /// Planning and coordination.
    ProjectManagement,
    /// Caller-defined task kind.
    Custom(String),
}

impl TaskType {
    /// The agent type best suited to this kind of task, if any.
    #[must_use]
    pub fn preferred_agent_type(&self) -> Option<AgentType> {
        match self {
            Self::Unknown => None,
            Self::Development => Some(AgentType::Developer),
            Self::Testing => Some(AgentType::Tester),
            Self::Architecture => Some(AgentType::Architect),
            Self::ProjectManagement => Some(AgentType::ProjectManager),
            Self::Custom(name) => Some(AgentType::Custom(name.clone())),
        }
    }
}

impl fmt::Display for TaskType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unknown => f.write_str("unknown"),
            Self::Development => f.write_str("development"),
            Self::Testing => f.write_str("testing"),
            Self::Architecture => f.write_str("architecture"),
            Self::ProjectManagement => f.write_str("project_management"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// Lifecycle status of a task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Waiting in the queue.
    Pending,
    /// Taken from the queue and paired with an agent.
    Scheduled,
    /// Executing on an agent.
    Running,
    /// Finished successfully.
    Completed,
    /// Agent reported failure.
    Failed,
    /// Cancelled by a caller.
    Cancelled,
    /// Execution exceeded its deadline.
    Timeout,
}

impl TaskStatus {
    /// Whether the state machine allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use TaskStatus::{Cancelled, Completed, Failed, Pending, Running, Scheduled, Timeout};
        matches!(
            (self, next),
            (Pending, Scheduled | Cancelled)
                | (Scheduled, Running | Pending | Cancelled)
                | (Running, Completed | Failed | Timeout | Cancelled)
                | (Failed | Timeout, Pending)
        )
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Scheduled => "scheduled",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resources a task needs from the agent that runs it.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceRequirements {
    /// Memory in megabytes.
    pub memory_mb: u64,
    /// CPU cores.
    pub cpu_cores: u32,
    /// CPU usage in percent.
    pub cpu_percent: f64,
}

impl Default for ResourceRequirements {
    fn default() -> Self {
        Self {
            memory_mb: 0,
            cpu_cores: 1,
            cpu_percent: 50.0,
        }
    }
}

impl ResourceRequirements {
    /// Reject structurally invalid requirements.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Validation` when no cores are requested or
    /// the CPU percentage is not within `(0, 100]`.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.cpu_cores == 0 {
            return Err(SchedulerError::Validation(
                "resources.cpu_cores must be at least 1".into(),
            ));
        }
        if !self.cpu_percent.is_finite() || self.cpu_percent <= 0.0 || self.cpu_percent > 100.0 {
            return Err(SchedulerError::Validation(format!(
                "resources.cpu_percent must be in (0, 100], got {}",
                self.cpu_percent
            )));
        }
        Ok(())
    }
}

/// Caller-supplied, immutable task definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Unique task identifier.
    pub id: TaskId,
    /// Human readable name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Kind of work.
    pub task_type: TaskType,
    /// Queue priority.
    #[serde(default)]
    pub priority: Priority,
    /// Opaque parameters passed to the agent.
    #[serde(default)]
    pub parameters: HashMap<String, String>,
    /// Tasks that must be `Completed` before this one is eligible.
    #[serde(default)]
    pub dependencies: Vec<TaskId>,
    /// Resources needed from the executing agent.
    #[serde(default)]
    pub resources: ResourceRequirements,
    /// Execution deadline in seconds; zero means the scheduler default.
    #[serde(default)]
    pub timeout_secs: u64,
    /// How many times a failed or timed out execution is re-queued.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

const fn default_max_retries() -> u32 {
    3
}

impl TaskConfig {
    /// Create a config with default priority, resources and retry budget.
    pub fn new(id: impl Into<TaskId>, name: impl Into<String>, task_type: TaskType) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            task_type,
            priority: Priority::default(),
            parameters: HashMap::new(),
            dependencies: Vec::new(),
            resources: ResourceRequirements::default(),
            timeout_secs: 0,
            max_retries: default_max_retries(),
        }
    }

    /// Set the description.
    #[must_use]
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    /// Set the priority.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = priority;
        self
    }

    /// Add a parameter.
    #[must_use]
    pub fn with_parameter(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.parameters.insert(key.into(), value.into());
        self
    }

    /// Add a dependency; repeated ids are ignored.
    #[must_use]
    pub fn with_dependency(mut self, id: impl Into<TaskId>) -> Self {
        let id = id.into();
        if !self.dependencies.contains(&id) {
            self.dependencies.push(id);
        }
        self
    }

    /// Set resource requirements.
    #[must_use]
    pub const fn with_resources(mut self, resources: ResourceRequirements) -> Self {
        self.resources = resources;
        self
    }

    /// Set the execution deadline in seconds.
    #[must_use]
    pub const fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    /// Set the retry budget.
    #[must_use]
    pub const fn with_max_retries(mut self, retries: u32) -> Self {
        self.max_retries = retries;
        self
    }

    /// Validate the config before it is admitted.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::Validation` for an empty id or name, an
    /// unknown or unnamed task type, a self or repeated dependency, or
    /// invalid resource requirements.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.id.trim().is_empty() {
            return Err(SchedulerError::Validation("task id must not be empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(SchedulerError::Validation(format!(
                "task `{}` has an empty name",
                self.id
            )));
        }
        match &self.task_type {
            TaskType::Unknown => {
                return Err(SchedulerError::Validation(format!(
                    "task `{}` has unknown type",
                    self.id
                )));
            }
            TaskType::Custom(name) if name.trim().is_empty() => {
                return Err(SchedulerError::Validation(format!(
                    "task `{}` has an unnamed custom type",
                    self.id
                )));
            }
            _ => {}
        }
        for (idx, dep) in self.dependencies.iter().enumerate() {
            if dep == &self.id {
                return Err(SchedulerError::Validation(format!(
                    "task `{}` depends on itself",
                    self.id
                )));
            }
            if self.dependencies[..idx].contains(dep) {
                return Err(SchedulerError::Validation(format!(
                    "task `{}` lists dependency `{dep}` twice",
                    self.id
                )));
            }
        }
        self.resources.validate()
    }
}

/// Output reported by an agent for a successful execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskResult {
    /// Named outputs.
    pub output: HashMap<String, String>,
    /// Optional human readable summary.
    pub summary: Option<String>,
}

impl TaskResult {
    /// Result with a summary line.
    pub fn with_summary(summary: impl Into<String>) -> Self {
        Self {
            output: HashMap::new(),
            summary: Some(summary.into()),
        }
    }
}

/// Why an execution attempt did not succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// Agent reported an error.
    Failed,
    /// Deadline elapsed.
    Timeout,
}

/// What the retry policy decided after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    /// Reset to `Pending`; the caller must push it back onto the queue.
    Requeued {
        /// Attempts consumed so far.
        attempt: u32,
    },
    /// Retries exhausted; the record is terminal.
    Exhausted,
}

/// Status lookup used to evaluate dependency readiness.
pub trait DependencyResolver {
    /// Current status of `id`, or `None` if no such task is known.
    fn status_of(&self, id: &str) -> Option<TaskStatus>;
}

impl<S: BuildHasher> DependencyResolver for HashMap<TaskId, TaskStatus, S> {
    fn status_of(&self, id: &str) -> Option<TaskStatus> {
        self.get(id).copied()
    }
}

/// Mutable execution state wrapped around an immutable [`TaskConfig`].
///
/// Only the scheduler mutates records, and only through the `mark_*`
/// methods, which enforce the transition graph of [`TaskStatus`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TaskRecord {
    config: TaskConfig,
    status: TaskStatus,
    assigned_agent_id: Option<String>,
    started_at_ms: Option<u128>,
    finished_at_ms: Option<u128>,
    elapsed_ms: u64,
    retry_count: u32,
    progress: f64,
    current_phase: String,
    result: Option<TaskResult>,
    last_error: Option<String>,
}

impl TaskRecord {
    /// Wrap a config in a fresh `Pending` record.
    #[must_use]
    pub fn new(config: TaskConfig) -> Self {
        Self {
            config,
            status: TaskStatus::Pending,
            assigned_agent_id: None,
            started_at_ms: None,
            finished_at_ms: None,
            elapsed_ms: 0,
            retry_count: 0,
            progress: 0.0,
            current_phase: String::new(),
            result: None,
            last_error: None,
        }
    }

    /// Task identifier.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.config.id
    }

    /// Task name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// Immutable configuration.
    #[must_use]
    pub const fn config(&self) -> &TaskConfig {
        &self.config
    }

    /// Queue priority.
    #[must_use]
    pub const fn priority(&self) -> Priority {
        self.config.priority
    }

    /// Kind of work.
    #[must_use]
    pub const fn task_type(&self) -> &TaskType {
        &self.config.task_type
    }

    /// Declared dependencies.
    #[must_use]
    pub fn dependencies(&self) -> &[TaskId] {
        &self.config.dependencies
    }

    /// Current status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Agent the task was last assigned to.
    #[must_use]
    pub fn assigned_agent_id(&self) -> Option<&str> {
        self.assigned_agent_id.as_deref()
    }

    /// Start of the latest attempt, in ms since epoch.
    #[must_use]
    pub const fn started_at_ms(&self) -> Option<u128> {
        self.started_at_ms
    }

    /// End of the latest attempt, in ms since epoch.
    #[must_use]
    pub const fn finished_at_ms(&self) -> Option<u128> {
        self.finished_at_ms
    }

    /// Duration of the latest attempt.
    #[must_use]
    pub const fn elapsed_ms(&self) -> u64 {
        self.elapsed_ms
    }

    /// Number of failed or timed out attempts.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Progress in percent.
    #[must_use]
    pub const fn progress(&self) -> f64 {
        self.progress
    }

    /// Phase label reported during execution.
    #[must_use]
    pub fn current_phase(&self) -> &str {
        &self.current_phase
    }

    /// Result of a successful execution.
    #[must_use]
    pub const fn result(&self) -> Option<&TaskResult> {
        self.result.as_ref()
    }

    /// Error message of the latest failed attempt.
    #[must_use]
    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_deref()
    }

    /// Whether the record can never change again.
    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        match self.status {
            TaskStatus::Completed | TaskStatus::Cancelled => true,
            TaskStatus::Failed | TaskStatus::Timeout => self.retry_count > self.config.max_retries,
            TaskStatus::Pending | TaskStatus::Scheduled | TaskStatus::Running => false,
        }
    }

    /// Whether every dependency is `Completed` according to `resolver`.
    /// Unknown dependency ids count as unmet.
    pub fn dependencies_met(&self, resolver: &(impl DependencyResolver + ?Sized)) -> bool {
        self.config
            .dependencies
            .iter()
            .all(|dep| resolver.status_of(dep) == Some(TaskStatus::Completed))
    }

    /// A `Pending` task whose dependencies are all met.
    pub fn is_ready(&self, resolver: &(impl DependencyResolver + ?Sized)) -> bool {
        self.status == TaskStatus::Pending && self.dependencies_met(resolver)
    }

    fn transition(&mut self, next: TaskStatus) -> Result<(), SchedulerError> {
        if !self.status.can_transition_to(next) {
            return Err(SchedulerError::InvalidTransition {
                id: self.config.id.clone(),
                from: self.status.to_string(),
                to: next.to_string(),
            });
        }
        self.status = next;
        Ok(())
    }

    /// `Pending -> Scheduled`, pairing the task with an agent.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` if the task is not `Pending`.
    pub fn mark_scheduled(&mut self, agent_id: impl Into<String>) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Scheduled)?;
        self.assigned_agent_id = Some(agent_id.into());
        Ok(())
    }

    /// `Scheduled -> Pending` when dispatch could not go ahead.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` if the task is not `Scheduled`.
    pub fn defer(&mut self) -> Result<(), SchedulerError> {
        if self.status != TaskStatus::Scheduled {
            return Err(SchedulerError::InvalidTransition {
                id: self.config.id.clone(),
                from: self.status.to_string(),
                to: TaskStatus::Pending.to_string(),
            });
        }
        self.transition(TaskStatus::Pending)?;
        self.assigned_agent_id = None;
        Ok(())
    }

    /// `Scheduled -> Running`, recording the start time.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` if the task is not `Scheduled`.
    pub fn mark_running(&mut self, now_ms: u128) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Running)?;
        self.started_at_ms = Some(now_ms);
        self.finished_at_ms = None;
        self.elapsed_ms = 0;
        self.progress = 0.0;
        "running".clone_into(&mut self.current_phase);
        Ok(())
    }

    /// `Running -> Completed`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` if the task is not `Running`.
    pub fn mark_completed(
        &mut self,
        result: TaskResult,
        elapsed_ms: u64,
        now_ms: u128,
    ) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Completed)?;
        self.finished_at_ms = Some(now_ms);
        self.elapsed_ms = elapsed_ms;
        self.progress = 100.0;
        "completed".clone_into(&mut self.current_phase);
        self.result = Some(result);
        self.last_error = None;
        Ok(())
    }

    /// `Running -> Failed | Timeout`, then back to `Pending` if the retry
    /// budget allows. Every failed attempt increments `retry_count`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` if the task is not `Running`.
    pub fn mark_failed(
        &mut self,
        kind: FailureKind,
        error: impl Into<String>,
        elapsed_ms: u64,
        now_ms: u128,
    ) -> Result<RetryDisposition, SchedulerError> {
        let failed = match kind {
            FailureKind::Failed => TaskStatus::Failed,
            FailureKind::Timeout => TaskStatus::Timeout,
        };
        self.transition(failed)?;
        let retry = self.retry_count < self.config.max_retries;
        self.retry_count += 1;
        self.finished_at_ms = Some(now_ms);
        self.elapsed_ms = elapsed_ms;
        self.last_error = Some(error.into());
        if retry {
            self.transition(TaskStatus::Pending)?;
            "retry_pending".clone_into(&mut self.current_phase);
            return Ok(RetryDisposition::Requeued {
                attempt: self.retry_count,
            });
        }
        failed.as_str().clone_into(&mut self.current_phase);
        Ok(RetryDisposition::Exhausted)
    }

    /// `Pending | Scheduled | Running -> Cancelled`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` for any other status.
    pub fn mark_cancelled(&mut self, now_ms: u128) -> Result<(), SchedulerError> {
        self.transition(TaskStatus::Cancelled)?;
        self.finished_at_ms = Some(now_ms);
        "cancelled".clone_into(&mut self.current_phase);
        Ok(())
    }

    /// Record progress, clamped to `0..=100`. Ignored once terminal.
    pub fn set_progress(&mut self, progress: f64) {
        if self.is_terminal() {
            return;
        }
        self.progress = if progress.is_nan() {
            0.0
        } else {
            progress.clamp(0.0, 100.0)
        };
    }

    /// Record the current phase label. Ignored once terminal.
    pub fn set_phase(&mut self, phase: impl Into<String>) {
        if self.is_terminal() {
            return;
        }
        self.current_phase = phase.into();
    }
}

//! Agent capability trait, lifecycle state machine and factory.
//!
//! An agent is a stateful worker that executes one task at a time. Concrete
//! agents differ only in what executing a task means; the scheduler sees
//! them through the [`Agent`] trait and creates them through an
//! [`AgentFactory`] keyed by [`AgentType`].
//!
//! ```rust,ignore
//! use prometheus_agent_scheduler::core::{AgentConfig, AgentFactory, AgentType};
//!
//! let mut factory = AgentFactory::new();
//! factory.register_handler(AgentType::Developer, my_handler);
//! let agent = factory.create(&AgentConfig::new("dev-1", "Dev", AgentType::Developer))?;
//! agent.start()?;
//! ```

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::task::{ResourceRequirements, TaskRecord, TaskResult};
use crate::core::{ExecutionError, SchedulerError};

/// Kind of agent. New kinds are added with [`AgentType::Custom`] and a
/// matching factory registration.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    /// Writes code.
    Developer,
    /// Writes and runs tests.
    Tester,
    /// Designs and reviews.
    Architect,
    /// Plans and coordinates.
    ProjectManager,
    /// Caller-defined agent kind.
    Custom(String),
}

impl fmt::Display for AgentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Developer => f.write_str("developer"),
            Self::Tester => f.write_str("tester"),
            Self::Architect => f.write_str("architect"),
            Self::ProjectManager => f.write_str("project_manager"),
            Self::Custom(name) => write!(f, "custom:{name}"),
        }
    }
}

/// Lifecycle status of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AgentStatus {
    /// Not running.
    Stopped = 0,
    /// Start in progress.
    Starting = 1,
    /// Accepting work.
    Running = 2,
    /// Temporarily not accepting work.
    Paused = 3,
    /// Stop in progress.
    Stopping = 4,
    /// Failed; requires operator attention.
    Error = 5,
}

impl AgentStatus {
    /// Every status, in declaration order.
    pub const ALL: [Self; 6] = [
        Self::Stopped,
        Self::Starting,
        Self::Running,
        Self::Paused,
        Self::Stopping,
        Self::Error,
    ];

    const fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Stopped,
            1 => Self::Starting,
            2 => Self::Running,
            3 => Self::Paused,
            4 => Self::Stopping,
            _ => Self::Error,
        }
    }

    /// Whether the lifecycle allows moving from `self` to `next`.
    #[must_use]
    pub const fn can_transition_to(self, next: Self) -> bool {
        use AgentStatus::{Error, Paused, Running, Starting, Stopped, Stopping};
        matches!(
            (self, next),
            (Stopped, Starting)
                | (Starting, Running)
                | (Running, Paused | Stopping)
                | (Paused, Running | Stopping)
                | (Stopping, Stopped)
                | (_, Error)
        )
    }

    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Stopped => "stopped",
            Self::Starting => "starting",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Stopping => "stopping",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Resource ceiling of an agent.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ResourceLimits {
    /// Maximum memory in megabytes.
    pub max_memory_mb: u64,
    /// Maximum worker threads.
    pub max_threads: u32,
    /// Maximum CPU usage in percent.
    pub max_cpu_percent: f64,
}

impl Default for ResourceLimits {
    fn default() -> Self {
        Self {
            max_memory_mb: 512,
            max_threads: 4,
            max_cpu_percent: 80.0,
        }
    }
}

impl ResourceLimits {
    /// Whether a task with `req` fits within these limits.
    #[must_use]
    pub fn satisfies(&self, req: &ResourceRequirements) -> bool {
        req.memory_mb <= self.max_memory_mb
            && req.cpu_cores <= self.max_threads
            && req.cpu_percent <= self.max_cpu_percent
    }
}

/// Agent configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Unique agent identifier.
    pub id: String,
    /// Kind of agent; selects the factory.
    pub agent_type: AgentType,
    /// Human readable name.
    pub name: String,
    /// Free-form description.
    #[serde(default)]
    pub description: String,
    /// Opaque properties for the agent implementation.
    #[serde(default)]
    pub properties: HashMap<String, String>,
    /// Resource ceiling.
    #[serde(default)]
    pub limits: ResourceLimits,
}

impl AgentConfig {
    /// Config with default limits.
    pub fn new(id: impl Into<String>, name: impl Into<String>, agent_type: AgentType) -> Self {
        Self {
            id: id.into(),
            agent_type,
            name: name.into(),
            description: String::new(),
            properties: HashMap::new(),
            limits: ResourceLimits::default(),
        }
    }

    /// Set resource limits.
    #[must_use]
    pub const fn with_limits(mut self, limits: ResourceLimits) -> Self {
        self.limits = limits;
        self
    }

    /// Add a property.
    #[must_use]
    pub fn with_property(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    /// Validate identifiers and limits.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Validation` for an empty id or name, an unnamed
    /// custom type, or zero threads / non-positive CPU ceiling.
    pub fn validate(&self) -> Result<(), SchedulerError> {
        if self.id.trim().is_empty() {
            return Err(SchedulerError::Validation("agent id must not be empty".into()));
        }
        if self.name.trim().is_empty() {
            return Err(SchedulerError::Validation(format!(
                "agent `{}` has an empty name",
                self.id
            )));
        }
        if matches!(&self.agent_type, AgentType::Custom(n) if n.trim().is_empty()) {
            return Err(SchedulerError::Validation(format!(
                "agent `{}` has an unnamed custom type",
                self.id
            )));
        }
        if self.limits.max_threads == 0 {
            return Err(SchedulerError::Validation(format!(
                "agent `{}` must allow at least one thread",
                self.id
            )));
        }
        if !self.limits.max_cpu_percent.is_finite() || self.limits.max_cpu_percent <= 0.0 {
            return Err(SchedulerError::Validation(format!(
                "agent `{}` has an invalid cpu ceiling",
                self.id
            )));
        }
        Ok(())
    }
}

/// Lock-free lifecycle state shared by agent implementations.
///
/// Status lives in an `AtomicU8` so the scheduler can poll availability
/// without touching the registry lock. Transitions use compare-and-swap so
/// two callers never both win the same edge.
#[derive(Debug)]
pub struct AgentLifecycle {
    id: String,
    status: AtomicU8,
    healthy: AtomicBool,
}

impl AgentLifecycle {
    /// New lifecycle in `Stopped`, healthy.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: AtomicU8::new(AgentStatus::Stopped as u8),
            healthy: AtomicBool::new(true),
        }
    }

    /// Current status.
    #[must_use]
    pub fn status(&self) -> AgentStatus {
        AgentStatus::from_u8(self.status.load(Ordering::Acquire))
    }

    /// Move from exactly `from` to `to`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` if the edge is not allowed or the
    /// status changed concurrently.
    pub fn transition(&self, from: AgentStatus, to: AgentStatus) -> Result<(), SchedulerError> {
        let invalid = |actual: AgentStatus| SchedulerError::InvalidTransition {
            id: self.id.clone(),
            from: actual.to_string(),
            to: to.to_string(),
        };
        if !from.can_transition_to(to) {
            return Err(invalid(from));
        }
        self.status
            .compare_exchange(from as u8, to as u8, Ordering::AcqRel, Ordering::Acquire)
            .map(|_| ())
            .map_err(|actual| invalid(AgentStatus::from_u8(actual)))
    }

    /// `Stopped -> Starting -> Running`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` unless currently `Stopped`.
    pub fn start(&self) -> Result<(), SchedulerError> {
        self.transition(AgentStatus::Stopped, AgentStatus::Starting)?;
        self.transition(AgentStatus::Starting, AgentStatus::Running)
    }

    /// `Running | Paused -> Stopping -> Stopped`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` unless currently `Running` or
    /// `Paused`.
    pub fn stop(&self) -> Result<(), SchedulerError> {
        self.transition(AgentStatus::Running, AgentStatus::Stopping)
            .or_else(|_| self.transition(AgentStatus::Paused, AgentStatus::Stopping))?;
        self.transition(AgentStatus::Stopping, AgentStatus::Stopped)
    }

    /// `Running -> Paused`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` unless currently `Running`.
    pub fn pause(&self) -> Result<(), SchedulerError> {
        self.transition(AgentStatus::Running, AgentStatus::Paused)
    }

    /// `Paused -> Running`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` unless currently `Paused`.
    pub fn resume(&self) -> Result<(), SchedulerError> {
        self.transition(AgentStatus::Paused, AgentStatus::Running)
    }

    /// Any status -> `Error`.
    pub fn fail(&self) {
        self.status.store(AgentStatus::Error as u8, Ordering::Release);
    }

    /// Liveness flag.
    #[must_use]
    pub fn is_live(&self) -> bool {
        self.healthy.load(Ordering::Acquire)
    }

    /// Set the liveness flag.
    pub fn set_live(&self, live: bool) {
        self.healthy.store(live, Ordering::Release);
    }
}

/// Capability set of a worker agent.
///
/// Only the agent itself, or the registry on a forced stop, changes its
/// status. `execute_task` is called from a worker-pool thread, never from
/// the scheduler's control thread.
#[async_trait]
pub trait Agent: Send + Sync {
    /// Unique identifier.
    fn id(&self) -> &str;
    /// Configuration the agent was created with.
    fn config(&self) -> &AgentConfig;
    /// Current lifecycle status.
    fn status(&self) -> AgentStatus;
    /// Begin accepting work.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` when not `Stopped`.
    fn start(&self) -> Result<(), SchedulerError>;
    /// Stop accepting work.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` when not `Running` or `Paused`.
    fn stop(&self) -> Result<(), SchedulerError>;
    /// Temporarily stop accepting work.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` when not `Running`.
    fn pause(&self) -> Result<(), SchedulerError>;
    /// Resume after a pause.
    ///
    /// # Errors
    ///
    /// `SchedulerError::InvalidTransition` when not `Paused`.
    fn resume(&self) -> Result<(), SchedulerError>;
    /// Running and live.
    fn is_healthy(&self) -> bool;
    /// Execute one task.
    async fn execute_task(&self, task: TaskRecord) -> Result<TaskResult, ExecutionError>;
    /// Best-effort request to abandon `task_id`. Returns whether the agent
    /// honored it.
    fn abort(&self, _task_id: &str) -> bool {
        false
    }

    /// Agent kind.
    fn agent_type(&self) -> &AgentType {
        &self.config().agent_type
    }
}

/// What executing a task means for a [`WorkerAgent`].
///
/// # Example
///
/// ```rust,ignore
/// #[derive(Clone)]
/// struct Echo;
///
/// #[async_trait]
/// impl TaskHandler for Echo {
///     async fn handle(&self, task: TaskRecord) -> Result<TaskResult, ExecutionError> {
///         Ok(TaskResult::with_summary(task.name()))
///     }
/// }
/// ```
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// Perform the work described by `task`.
    async fn handle(&self, task: TaskRecord) -> Result<TaskResult, ExecutionError>;
}

/// Agent that delegates execution to a [`TaskHandler`] and tracks its
/// lifecycle with an [`AgentLifecycle`].
pub struct WorkerAgent {
    config: AgentConfig,
    lifecycle: AgentLifecycle,
    handler: Arc<dyn TaskHandler>,
}

impl WorkerAgent {
    /// Create a stopped agent.
    pub fn new(config: AgentConfig, handler: Arc<dyn TaskHandler>) -> Self {
        let lifecycle = AgentLifecycle::new(config.id.clone());
        Self {
            config,
            lifecycle,
            handler,
        }
    }

    /// Lifecycle state, for marking the agent failed or not live.
    #[must_use]
    pub const fn lifecycle(&self) -> &AgentLifecycle {
        &self.lifecycle
    }
}

#[async_trait]
impl Agent for WorkerAgent {
    fn id(&self) -> &str {
        &self.config.id
    }

    fn config(&self) -> &AgentConfig {
        &self.config
    }

    fn status(&self) -> AgentStatus {
        self.lifecycle.status()
    }

    fn start(&self) -> Result<(), SchedulerError> {
        self.lifecycle.start()
    }

    fn stop(&self) -> Result<(), SchedulerError> {
        self.lifecycle.stop()
    }

    fn pause(&self) -> Result<(), SchedulerError> {
        self.lifecycle.pause()
    }

    fn resume(&self) -> Result<(), SchedulerError> {
        self.lifecycle.resume()
    }

    fn is_healthy(&self) -> bool {
        self.lifecycle.is_live() && self.lifecycle.status() == AgentStatus::Running
    }

    async fn execute_task(&self, task: TaskRecord) -> Result<TaskResult, ExecutionError> {
        if self.lifecycle.status() != AgentStatus::Running {
            return Err(ExecutionError::AgentUnavailable(format!(
                "agent `{}` is {}",
                self.config.id,
                self.lifecycle.status()
            )));
        }
        self.handler.handle(task).await
    }
}

/// Constructor registered for an agent type.
pub type AgentCreator = Arc<dyn Fn(&AgentConfig) -> Arc<dyn Agent> + Send + Sync>;

/// Factory mapping agent types to constructors.
///
/// Constructed explicitly and handed to the registry.
#[derive(Default)]
pub struct AgentFactory {
    creators: Mutex<HashMap<AgentType, AgentCreator>>,
}

impl AgentFactory {
    /// Empty factory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a constructor, replacing any previous one for `agent_type`.
    pub fn register(&self, agent_type: AgentType, creator: AgentCreator) {
        self.creators.lock().insert(agent_type, creator);
    }

    /// Register a [`WorkerAgent`] constructor backed by `handler`.
    pub fn register_handler(&self, agent_type: AgentType, handler: Arc<dyn TaskHandler>) {
        self.register(
            agent_type,
            Arc::new(move |config: &AgentConfig| {
                Arc::new(WorkerAgent::new(config.clone(), Arc::clone(&handler))) as Arc<dyn Agent>
            }),
        );
    }

    /// Whether a constructor exists for `agent_type`.
    #[must_use]
    pub fn is_registered(&self, agent_type: &AgentType) -> bool {
        self.creators.lock().contains_key(agent_type)
    }

    /// Build an agent for `config`.
    ///
    /// # Errors
    ///
    /// `SchedulerError::FactoryNotRegistered` if no constructor exists.
    pub fn create(&self, config: &AgentConfig) -> Result<Arc<dyn Agent>, SchedulerError> {
        let creator = self
            .creators
            .lock()
            .get(&config.agent_type)
            .cloned()
            .ok_or_else(|| SchedulerError::FactoryNotRegistered(config.agent_type.to_string()))?;
        Ok(creator(config))
    }
}

//! Core scheduling abstractions: tasks, agents, queue, strategy, scheduler.

pub mod agent;
pub mod dispatcher;
pub mod error;
pub mod events;
pub mod monitor;
pub mod registry;
pub mod scheduler;
pub mod stats;
pub mod strategy;
pub mod task;
pub mod task_queue;
pub mod worker_pool;

pub use agent::{
    Agent, AgentConfig, AgentCreator, AgentFactory, AgentLifecycle, AgentStatus, AgentType,
    ResourceLimits, TaskHandler, WorkerAgent,
};
pub use dispatcher::{EventDispatcher, EventHandler, HandlerError, HandlerId};
pub use error::{AppResult, ExecutionError, SchedulerError};
pub use events::{EventBus, EventEnvelope, EventKind, InMemoryEventLog, NoopEventBus, SchedulerEvent};
pub use monitor::{AgentMonitor, MonitorStats};
pub use registry::{AgentFilter, AgentRegistry, StatusCallback};
pub use scheduler::{BlockedTask, Scheduler, TaskCallback, SHUTDOWN_JOIN_TIMEOUT};
pub use stats::SchedulerStats;
pub use strategy::{strategy_for, AssignmentStrategy, RoundRobinStrategy, TypeAffinityStrategy};
pub use task::{
    DependencyResolver, FailureKind, Priority, ResourceRequirements, RetryDisposition, TaskConfig,
    TaskId, TaskRecord, TaskResult, TaskStatus, TaskType,
};
pub use task_queue::{TaskQueue, REBUILD_THRESHOLD};
pub use worker_pool::{
    CompletionFn, ExecutionJob, ExecutionOutcome, ExecutionReport, PoolStats, WorkerPool,
};

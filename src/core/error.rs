//! Error types for scheduler operations.

use thiserror::Error;

/// Errors produced by scheduler components.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SchedulerError {
    /// A task or agent configuration was rejected at the boundary.
    #[error("validation failed: {0}")]
    Validation(String),
    /// Queue is at its configured maximum size.
    #[error("queue full: {0}")]
    QueueFull(String),
    /// Identifier already present.
    #[error("duplicate id: {0}")]
    Duplicate(String),
    /// Unknown task or agent identifier.
    #[error("not found: {0}")]
    NotFound(String),
    /// No agent factory registered for the requested agent type.
    #[error("no factory registered for agent type `{0}`")]
    FactoryNotRegistered(String),
    /// A lifecycle transition that the state machine does not allow.
    #[error("invalid transition for `{id}`: {from} -> {to}")]
    InvalidTransition {
        /// Task or agent identifier.
        id: String,
        /// Current state.
        from: String,
        /// Requested state.
        to: String,
    },
    /// Scheduler or worker pool has been shut down.
    #[error("shut down")]
    Shutdown,
    /// Configuration values are out of range.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    /// Internal failure with context (thread spawn, channel closed).
    #[error("internal error: {0}")]
    Internal(String),
}

/// Failure reported from the agent boundary while executing a task.
///
/// These never reach callers of the submission API; they drive the retry
/// state machine instead.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ExecutionError {
    /// The agent reported that the task failed.
    #[error("execution failed: {0}")]
    Failed(String),
    /// The agent is not in a state where it can execute work.
    #[error("agent unavailable: {0}")]
    AgentUnavailable(String),
    /// The agent honored an abort request.
    #[error("execution aborted")]
    Aborted,
    /// The agent panicked while executing.
    #[error("agent panicked: {0}")]
    Panicked(String),
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;

//! # Prometheus Agent Scheduler
//!
//! A priority task scheduler that assigns work to a pool of stateful agents
//! under concurrency, dependency, timeout and retry constraints.
//!
//! Agents are long-lived workers with a lifecycle (`Stopped`, `Running`,
//! `Paused`, ...). Tasks wait in a priority queue until their dependencies
//! have completed and an agent is free, then run on a dedicated worker
//! thread pool so a slow agent never stalls scheduling.
//!
//! ## Key Features
//!
//! - **Readiness-Aware Queue**: Blocked tasks never hold back ready ones behind them
//! - **Pluggable Assignment**: Round-robin by default, type affinity by configuration,
//!   or any [`core::AssignmentStrategy`]
//! - **Retry and Timeout**: Per-task deadline; failed and timed out attempts are
//!   re-queued until `max_retries` is exhausted
//! - **Wake on Event**: The control loop sleeps on a `Condvar` and wakes on
//!   submission or completion instead of polling
//! - **Lifecycle Events**: Every task and agent transition is published to an
//!   [`core::EventBus`]
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use prometheus_agent_scheduler::builders::SchedulerBuilder;
//! use prometheus_agent_scheduler::core::{AgentConfig, AgentType, Priority, TaskConfig, TaskType};
//!
//! let scheduler = SchedulerBuilder::new()
//!     .with_handler(AgentType::Developer, Arc::new(my_handler))
//!     .build()?;
//!
//! scheduler.registry().create(AgentConfig::new("dev-1", "Dev", AgentType::Developer))?;
//! scheduler.registry().start_agent("dev-1")?;
//! scheduler.start()?;
//!
//! scheduler.schedule_task(
//!     TaskConfig::new("build", "Build", TaskType::Development).with_priority(Priority::High),
//! )?;
//! scheduler.schedule_task(
//!     TaskConfig::new("test", "Test", TaskType::Testing).with_dependency("build"),
//! )?;
//! ```
//!
//! For complete scenarios, see `tests/scheduler_test.rs`.

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Builders to assemble a scheduler from configuration.
pub mod builders;
/// Configuration models and key/value sources.
pub mod config;
/// Core scheduling abstractions.
pub mod core;
/// Shared utilities.
pub mod util;

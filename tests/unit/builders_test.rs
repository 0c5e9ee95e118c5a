//! Tests for builder modules

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use prometheus_agent_scheduler::builders::SchedulerBuilder;
use prometheus_agent_scheduler::config::{SchedulerConfig, StrategyKind};
use prometheus_agent_scheduler::core::{
    AgentConfig, AgentStatus, AgentType, ExecutionError, RoundRobinStrategy, SchedulerError,
    TaskHandler, TaskRecord, TaskResult,
};

struct Echo;

#[async_trait]
impl TaskHandler for Echo {
    async fn handle(&self, task: TaskRecord) -> Result<TaskResult, ExecutionError> {
        Ok(TaskResult::with_summary(task.name()))
    }
}

#[test]
fn test_builder_creates_and_starts_agents() {
    let scheduler = SchedulerBuilder::new()
        .with_handler(AgentType::Tester, Arc::new(Echo))
        .with_agent(AgentConfig::new("t1", "Tester 1", AgentType::Tester))
        .with_agent(AgentConfig::new("t2", "Tester 2", AgentType::Tester))
        .build()
        .unwrap();

    assert!(!scheduler.is_running());
    assert_eq!(scheduler.registry().count(), 2);
    assert_eq!(scheduler.registry().count_by_status(AgentStatus::Running), 2);
}

#[test]
fn test_builder_can_leave_agents_stopped() {
    let scheduler = SchedulerBuilder::new()
        .with_config(SchedulerConfig::new().with_strategy(StrategyKind::TypeAffinity))
        .with_strategy(Arc::new(RoundRobinStrategy::new()))
        .with_handler(AgentType::Tester, Arc::new(Echo))
        .with_agent(AgentConfig::new("t1", "Tester 1", AgentType::Tester))
        .start_agents(false)
        .build()
        .unwrap();

    assert_eq!(scheduler.registry().count_by_status(AgentStatus::Stopped), 1);
}

#[test]
fn test_builder_reports_missing_factory() {
    let result = SchedulerBuilder::new()
        .with_agent(AgentConfig::new("a1", "Architect", AgentType::Architect))
        .build();
    assert!(matches!(result, Err(SchedulerError::FactoryNotRegistered(_))));
}

#[test]
fn test_builder_rejects_invalid_config() {
    let result = SchedulerBuilder::new()
        .with_config(SchedulerConfig::new().with_max_concurrent_tasks(0))
        .build();
    assert!(matches!(result, Err(SchedulerError::InvalidConfig(_))));
}

#[test]
fn test_builder_from_json_and_source() {
    assert!(SchedulerBuilder::from_json_str(r#"{"max_queue_size": 5}"#).is_ok());
    let err = SchedulerBuilder::from_json_str("{").err().unwrap();
    assert!(format!("{err:#}").contains("parsing scheduler config"));

    let mut source = HashMap::new();
    source.insert("strategy".to_string(), "bogus".to_string());
    assert!(SchedulerBuilder::from_source(&source).is_err());
}

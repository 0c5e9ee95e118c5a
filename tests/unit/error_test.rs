//! Tests for error types

use prometheus_agent_scheduler::core::{ExecutionError, SchedulerError};

#[test]
fn test_scheduler_error_display() {
    let err = SchedulerError::QueueFull("max queue size 1 reached".into());
    assert_eq!(format!("{err}"), "queue full: max queue size 1 reached");

    let err = SchedulerError::Duplicate("t1".into());
    assert_eq!(format!("{err}"), "duplicate id: t1");

    let err = SchedulerError::NotFound("task `t1`".into());
    assert_eq!(format!("{err}"), "not found: task `t1`");

    assert_eq!(format!("{}", SchedulerError::Shutdown), "shut down");
}

#[test]
fn test_transition_error_display() {
    let err = SchedulerError::InvalidTransition {
        id: "t".into(),
        from: "pending".into(),
        to: "running".into(),
    };
    assert_eq!(format!("{err}"), "invalid transition for `t`: pending -> running");
}

#[test]
fn test_factory_error_display() {
    let err = SchedulerError::FactoryNotRegistered("tester".into());
    assert_eq!(format!("{err}"), "no factory registered for agent type `tester`");
}

#[test]
fn test_execution_error_display() {
    assert_eq!(
        format!("{}", ExecutionError::Failed("boom".into())),
        "execution failed: boom"
    );
    assert_eq!(format!("{}", ExecutionError::Aborted), "execution aborted");
    assert_eq!(
        format!("{}", ExecutionError::Panicked("oops".into())),
        "agent panicked: oops"
    );
}

#[test]
fn test_errors_into_anyhow() {
    let err: anyhow::Error = SchedulerError::Validation("task id must not be empty".into()).into();
    assert_eq!(
        err.to_string(),
        "validation failed: task id must not be empty"
    );
}

//! Tests for the readiness-aware task queue

use std::collections::HashMap;

use prometheus_agent_scheduler::core::{
    Priority, TaskConfig, TaskId, TaskQueue, TaskRecord, TaskStatus, TaskType,
};

fn record(id: &str, priority: Priority) -> TaskRecord {
    TaskRecord::new(TaskConfig::new(id, id, TaskType::Testing).with_priority(priority))
}

#[test]
fn test_dependency_gates_extraction() {
    let queue = TaskQueue::new(10);
    queue.push(record("T1", Priority::Critical)).unwrap();
    queue
        .push(TaskRecord::new(
            TaskConfig::new("T2", "T2", TaskType::Testing)
                .with_priority(Priority::Critical)
                .with_dependency("T1"),
        ))
        .unwrap();

    let mut statuses: HashMap<TaskId, TaskStatus> = HashMap::new();
    statuses.insert("T1".into(), TaskStatus::Pending);
    statuses.insert("T2".into(), TaskStatus::Pending);

    assert_eq!(queue.pop(&statuses).unwrap().id(), "T1");
    statuses.insert("T1".into(), TaskStatus::Running);
    assert!(queue.pop(&statuses).is_none());
    assert_eq!(queue.blocked(&statuses).len(), 1);

    statuses.insert("T1".into(), TaskStatus::Completed);
    assert_eq!(queue.pop(&statuses).unwrap().id(), "T2");
    assert!(queue.is_empty());
}

#[test]
fn test_peek_take_and_pending_order() {
    let queue = TaskQueue::new(10);
    queue.push(record("low", Priority::Low)).unwrap();
    queue.push(record("high", Priority::High)).unwrap();
    queue.push(record("medium", Priority::Medium)).unwrap();

    assert_eq!(queue.peek_highest_pending().unwrap().id(), "high");
    let order: Vec<String> = queue
        .pending_in_order()
        .iter()
        .map(|r| r.id().to_string())
        .collect();
    assert_eq!(order, vec!["high", "medium", "low"]);

    assert_eq!(queue.take("high").unwrap().id(), "high");
    assert!(!queue.contains("high"));
    assert!(queue.take("high").is_none());
    assert_eq!(queue.peek_highest_pending().unwrap().id(), "medium");
}

#[test]
fn test_max_size_can_change() {
    let queue = TaskQueue::new(1);
    queue.push(record("a", Priority::Medium)).unwrap();
    assert!(queue.push(record("b", Priority::Medium)).is_err());
    queue.set_max_size(2);
    assert_eq!(queue.max_size(), 2);
    queue.push(record("b", Priority::Medium)).unwrap();
    assert_eq!(queue.len(), 2);
}

//! Tests for configuration structures

use std::collections::HashMap;

use prometheus_agent_scheduler::config::{
    ConfigSource, SchedulerConfig, StrategyKind, WorkerPoolConfig,
};

fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
    pairs
        .iter()
        .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
        .collect()
}

#[test]
fn test_scheduler_config_defaults() {
    let cfg = SchedulerConfig::default();
    assert_eq!(cfg.max_concurrent_tasks, 10);
    assert_eq!(cfg.max_queue_size, 1000);
    assert_eq!(cfg.tick_interval_ms, 100);
    assert_eq!(cfg.default_timeout_secs, 300);
    assert_eq!(cfg.monitor_interval_secs, 60);
    assert_eq!(cfg.strategy, StrategyKind::RoundRobin);
}

#[test]
fn test_worker_pool_config_validation() {
    assert!(WorkerPoolConfig::new().validate().is_ok());
    assert!(WorkerPoolConfig::new().with_worker_count(0).validate().is_err());
    assert!(WorkerPoolConfig::new().with_max_queue_depth(0).validate().is_err());
    let err = WorkerPoolConfig::new()
        .with_thread_stack_size(1024)
        .validate()
        .unwrap_err();
    assert!(err.contains("thread_stack_size"));
}

#[test]
fn test_nested_pool_error_is_prefixed() {
    let cfg = SchedulerConfig::new().with_worker_pool(WorkerPoolConfig::new().with_worker_count(0));
    let err = cfg.validate().unwrap_err();
    assert!(err.starts_with("worker_pool invalid"));
}

#[test]
fn test_config_json_round_trip() {
    let cfg = SchedulerConfig::new()
        .with_max_concurrent_tasks(3)
        .with_strategy(StrategyKind::TypeAffinity);
    let json = serde_json::to_string(&cfg).unwrap();
    assert!(json.contains("\"type_affinity\""));
    assert_eq!(SchedulerConfig::from_json_str(&json).unwrap(), cfg);
}

#[test]
fn test_json_rejects_invalid_values() {
    let err = SchedulerConfig::from_json_str(r#"{"tick_interval_ms": 0}"#).unwrap_err();
    assert!(err.contains("tick_interval_ms"));
    let err = SchedulerConfig::from_json_str("not json").unwrap_err();
    assert!(err.starts_with("parse error"));
}

#[test]
fn test_from_source_overlays_and_rejects() {
    let cfg = SchedulerConfig::from_source(&source(&[
        ("max_queue_size", "25"),
        ("strategy", "Round-Robin"),
        ("default_timeout_secs", " 30 "),
    ]))
    .unwrap();
    assert_eq!(cfg.max_queue_size, 25);
    assert_eq!(cfg.strategy, StrategyKind::RoundRobin);
    assert_eq!(cfg.default_timeout_secs, 30);

    let err = SchedulerConfig::from_source(&source(&[("worker_count", "many")])).unwrap_err();
    assert!(err.contains("worker_count"));
    assert!(SchedulerConfig::from_source(&source(&[("max_concurrent_tasks", "0")])).is_err());
}

#[test]
fn test_custom_config_source() {
    struct Fixed;
    impl ConfigSource for Fixed {
        fn get(&self, key: &str) -> Option<String> {
            (key == "monitor_interval_secs").then(|| "5".to_string())
        }
    }
    let cfg = SchedulerConfig::from_source(&Fixed).unwrap();
    assert_eq!(cfg.monitor_interval_secs, 5);
}

//! Tests for utility functions

use prometheus_agent_scheduler::util::{init_tracing, now_ms, DEFAULT_LOG_FILTER};

#[test]
fn test_now_ms_is_monotonic_enough() {
    let a = now_ms();
    std::thread::sleep(std::time::Duration::from_millis(2));
    let b = now_ms();
    assert!(b >= a);
    // 2020-01-01 in milliseconds.
    assert!(a > 1_577_836_800_000);
}

#[test]
fn test_init_tracing_is_idempotent() {
    init_tracing();
    init_tracing();
    tracing::info!("tracing initialized twice");
    assert!(DEFAULT_LOG_FILTER.starts_with("prometheus_agent_scheduler"));
}

//! Tests for lifecycle events and the event dispatcher

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use prometheus_agent_scheduler::core::{
    EventBus, EventDispatcher, EventEnvelope, EventKind, HandlerError, InMemoryEventLog,
    Priority, SchedulerEvent,
};

fn scheduled(id: &str) -> SchedulerEvent {
    SchedulerEvent::TaskScheduled {
        task_id: id.into(),
        name: format!("task {id}"),
        priority: Priority::Medium,
    }
}

#[test]
fn test_event_kind_and_task_id() {
    let event = scheduled("t1");
    assert_eq!(event.kind(), EventKind::TaskScheduled);
    assert_eq!(event.topic(), "task.scheduled");
    assert_eq!(event.task_id(), Some("t1"));

    let agent = SchedulerEvent::AgentStarted {
        agent_id: "a1".into(),
    };
    assert_eq!(agent.task_id(), None);
    assert_eq!(format!("{}", agent.kind()), "agent.started");
}

#[test]
fn test_envelope_round_trips_through_json() {
    let envelope = EventEnvelope::new(scheduled("t1"));
    let json = envelope.to_json().unwrap();
    let parsed: EventEnvelope = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, envelope);
}

#[test]
fn test_in_memory_log_filters_by_kind() {
    let log = InMemoryEventLog::new(10);
    assert!(log.is_empty());
    log.publish(scheduled("t1"));
    log.publish(SchedulerEvent::TaskCancelled {
        task_id: "t1".into(),
    });
    log.publish(scheduled("t2"));

    assert_eq!(log.len(), 3);
    assert_eq!(log.events_of(EventKind::TaskScheduled).len(), 2);
    assert_eq!(log.envelopes()[1].event.kind(), EventKind::TaskCancelled);
}

#[test]
fn test_dispatcher_as_event_bus() {
    let dispatcher = Arc::new(EventDispatcher::new());
    let bus: Arc<dyn EventBus> = dispatcher.clone();
    let all = dispatcher.subscribe(None);
    let cancelled = dispatcher.subscribe(Some(EventKind::TaskCancelled));
    let hits = Arc::new(AtomicUsize::new(0));
    let hits_clone = Arc::clone(&hits);
    dispatcher.register(EventKind::TaskScheduled, move |_| {
        hits_clone.fetch_add(1, Ordering::SeqCst);
        Ok(())
    });

    bus.publish(scheduled("t1"));
    bus.publish(SchedulerEvent::TaskCancelled {
        task_id: "t1".into(),
    });

    assert_eq!(hits.load(Ordering::SeqCst), 1);
    assert_eq!(all.try_iter().count(), 2);
    assert_eq!(cancelled.try_iter().count(), 1);
    assert_eq!(dispatcher.statistics()[&EventKind::TaskScheduled], 1);
}

#[test]
fn test_panicking_handler_is_isolated() {
    let dispatcher = EventDispatcher::new();
    let errors = dispatcher.subscribe(Some(EventKind::ErrorOccurred));
    dispatcher.register(EventKind::TaskScheduled, |_| panic!("handler bug"));
    let after = Arc::new(AtomicUsize::new(0));
    let after_clone = Arc::clone(&after);
    dispatcher.register(EventKind::TaskScheduled, move |_| {
        after_clone.fetch_add(1, Ordering::SeqCst);
        Err(HandlerError("second".into()))
    });

    dispatcher.dispatch(&scheduled("t1"));

    assert_eq!(after.load(Ordering::SeqCst), 1);
    assert_eq!(errors.try_iter().count(), 2);
    assert_eq!(dispatcher.handler_count(), 2);
    assert_eq!(dispatcher.in_flight(), 0);
}

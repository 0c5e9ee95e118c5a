//! Lifecycle events and the event bus abstraction.
//!
//! The scheduler and the agent registry publish fire-and-forget
//! notifications to an [`EventBus`]. Transport is the bus implementation's
//! concern; events serialize to JSON for that purpose.

use std::collections::VecDeque;
use std::fmt;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::core::agent::{AgentStatus, AgentType};
use crate::core::task::{Priority, TaskId, TaskType};
use crate::util::clock::now_ms;

/// Notification published by the scheduler or the agent registry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SchedulerEvent {
    /// A task was admitted to the queue.
    TaskScheduled {
        /// Task identifier.
        task_id: TaskId,
        /// Task name.
        name: String,
        /// Queue priority.
        priority: Priority,
    },
    /// A task was handed to an agent.
    TaskAssigned {
        /// Task identifier.
        task_id: TaskId,
        /// Agent identifier.
        agent_id: String,
        /// Kind of work.
        task_type: TaskType,
    },
    /// An execution attempt ended and its outcome is final.
    TaskCompleted {
        /// Task identifier.
        task_id: TaskId,
        /// Agent identifier.
        agent_id: String,
        /// Attempt duration.
        elapsed_ms: u64,
        /// Whether the task completed successfully.
        success: bool,
    },
    /// A failed attempt was re-queued.
    TaskRetried {
        /// Task identifier.
        task_id: TaskId,
        /// Attempts consumed so far.
        attempt: u32,
        /// Failure reason of the attempt.
        reason: String,
    },
    /// Retries are exhausted; the task is terminal.
    TaskFailed {
        /// Task identifier.
        task_id: TaskId,
        /// Agent of the last attempt.
        agent_id: Option<String>,
        /// Failure reason of the last attempt.
        reason: String,
        /// Attempts consumed.
        retry_count: u32,
    },
    /// A task was cancelled.
    TaskCancelled {
        /// Task identifier.
        task_id: TaskId,
    },
    /// An agent was created.
    AgentCreated {
        /// Agent identifier.
        agent_id: String,
        /// Agent kind.
        agent_type: AgentType,
    },
    /// An agent started.
    AgentStarted {
        /// Agent identifier.
        agent_id: String,
    },
    /// An agent stopped.
    AgentStopped {
        /// Agent identifier.
        agent_id: String,
        /// Why it stopped.
        reason: String,
    },
    /// An agent moved between lifecycle states.
    AgentStatusChanged {
        /// Agent identifier.
        agent_id: String,
        /// Previous status.
        old_status: AgentStatus,
        /// New status.
        new_status: AgentStatus,
    },
    /// An agent was removed from the registry.
    AgentRemoved {
        /// Agent identifier.
        agent_id: String,
    },
    /// An internal failure, such as an event handler error.
    ErrorOccurred {
        /// Component that failed.
        source: String,
        /// Description.
        message: String,
    },
}

/// Discriminant of [`SchedulerEvent`], used for handler registration and
/// statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    /// See [`SchedulerEvent::TaskScheduled`].
    TaskScheduled,
    /// See [`SchedulerEvent::TaskAssigned`].
    TaskAssigned,
    /// See [`SchedulerEvent::TaskCompleted`].
    TaskCompleted,
    /// See [`SchedulerEvent::TaskRetried`].
    TaskRetried,
    /// See [`SchedulerEvent::TaskFailed`].
    TaskFailed,
    /// See [`SchedulerEvent::TaskCancelled`].
    TaskCancelled,
    /// See [`SchedulerEvent::AgentCreated`].
    AgentCreated,
    /// See [`SchedulerEvent::AgentStarted`].
    AgentStarted,
    /// See [`SchedulerEvent::AgentStopped`].
    AgentStopped,
    /// See [`SchedulerEvent::AgentStatusChanged`].
    AgentStatusChanged,
    /// See [`SchedulerEvent::AgentRemoved`].
    AgentRemoved,
    /// See [`SchedulerEvent::ErrorOccurred`].
    ErrorOccurred,
}

impl EventKind {
    /// Topic name used on the message bus.
    #[must_use]
    pub const fn topic(self) -> &'static str {
        match self {
            Self::TaskScheduled => "task.scheduled",
            Self::TaskAssigned => "task.assigned",
            Self::TaskCompleted => "task.completed",
            Self::TaskRetried => "task.retried",
            Self::TaskFailed => "task.failed",
            Self::TaskCancelled => "task.cancelled",
            Self::AgentCreated => "agent.created",
            Self::AgentStarted => "agent.started",
            Self::AgentStopped => "agent.stopped",
            Self::AgentStatusChanged => "agent.status_changed",
            Self::AgentRemoved => "agent.removed",
            Self::ErrorOccurred => "system.error",
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.topic())
    }
}

impl SchedulerEvent {
    /// Discriminant.
    #[must_use]
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::TaskScheduled { .. } => EventKind::TaskScheduled,
            Self::TaskAssigned { .. } => EventKind::TaskAssigned,
            Self::TaskCompleted { .. } => EventKind::TaskCompleted,
            Self::TaskRetried { .. } => EventKind::TaskRetried,
            Self::TaskFailed { .. } => EventKind::TaskFailed,
            Self::TaskCancelled { .. } => EventKind::TaskCancelled,
            Self::AgentCreated { .. } => EventKind::AgentCreated,
            Self::AgentStarted { .. } => EventKind::AgentStarted,
            Self::AgentStopped { .. } => EventKind::AgentStopped,
            Self::AgentStatusChanged { .. } => EventKind::AgentStatusChanged,
            Self::AgentRemoved { .. } => EventKind::AgentRemoved,
            Self::ErrorOccurred { .. } => EventKind::ErrorOccurred,
        }
    }

    /// Topic name used on the message bus.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        self.kind().topic()
    }

    /// Task the event refers to, if any.
    #[must_use]
    pub fn task_id(&self) -> Option<&str> {
        match self {
            Self::TaskScheduled { task_id, .. }
            | Self::TaskAssigned { task_id, .. }
            | Self::TaskCompleted { task_id, .. }
            | Self::TaskRetried { task_id, .. }
            | Self::TaskFailed { task_id, .. }
            | Self::TaskCancelled { task_id } => Some(task_id),
            _ => None,
        }
    }
}

/// Event plus delivery metadata.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EventEnvelope {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// Timestamp in milliseconds since epoch.
    pub created_at_ms: u128,
    /// The event.
    pub event: SchedulerEvent,
}

impl EventEnvelope {
    /// Wrap `event` with a fresh id and the current time.
    #[must_use]
    pub fn new(event: SchedulerEvent) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            created_at_ms: now_ms(),
            event,
        }
    }

    /// JSON payload for transports that carry text.
    ///
    /// # Errors
    ///
    /// Returns the serializer error, which only occurs for non-string map
    /// keys and is not expected for these types.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

/// Publish target for lifecycle notifications.
///
/// Publishing is fire-and-forget: implementations must not block the caller
/// for long and must not fail it.
pub trait EventBus: Send + Sync {
    /// Publish one event.
    fn publish(&self, event: SchedulerEvent);
}

/// Bus that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventBus;

impl EventBus for NoopEventBus {
    fn publish(&self, _event: SchedulerEvent) {}
}

/// Bounded in-memory event log for tests and development.
pub struct InMemoryEventLog {
    events: Mutex<VecDeque<EventEnvelope>>,
    max_events: usize,
}

impl InMemoryEventLog {
    /// Create a log retaining at most `max_events` entries.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Mutex::new(VecDeque::with_capacity(max_events.min(1024))),
            max_events,
        }
    }

    /// Snapshot of retained envelopes, oldest first.
    #[must_use]
    pub fn envelopes(&self) -> Vec<EventEnvelope> {
        self.events.lock().iter().cloned().collect()
    }

    /// Snapshot of retained events, oldest first.
    #[must_use]
    pub fn events(&self) -> Vec<SchedulerEvent> {
        self.events.lock().iter().map(|e| e.event.clone()).collect()
    }

    /// Retained events of one kind, oldest first.
    #[must_use]
    pub fn events_of(&self, kind: EventKind) -> Vec<SchedulerEvent> {
        self.events
            .lock()
            .iter()
            .filter(|e| e.event.kind() == kind)
            .map(|e| e.event.clone())
            .collect()
    }

    /// Number of retained events.
    #[must_use]
    pub fn len(&self) -> usize {
        self.events.lock().len()
    }

    /// Whether nothing is retained.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.events.lock().is_empty()
    }
}

impl EventBus for InMemoryEventLog {
    fn publish(&self, event: SchedulerEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(EventEnvelope::new(event));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cancelled(id: &str) -> SchedulerEvent {
        SchedulerEvent::TaskCancelled { task_id: id.into() }
    }

    #[test]
    fn test_log_overflow_drops_oldest() {
        let log = InMemoryEventLog::new(2);
        log.publish(cancelled("a"));
        log.publish(cancelled("b"));
        log.publish(cancelled("c"));

        let events = log.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].task_id(), Some("b"));
        assert_eq!(events[1].task_id(), Some("c"));
    }

    #[test]
    fn test_envelope_json_is_tagged() {
        let envelope = EventEnvelope::new(SchedulerEvent::TaskScheduled {
            task_id: "t1".into(),
            name: "build".into(),
            priority: Priority::High,
        });
        let json = envelope.to_json().unwrap();
        assert!(json.contains("\"type\":\"task_scheduled\""));
        assert!(json.contains("\"priority\":\"high\""));
        assert!(envelope.created_at_ms > 0);
    }

    #[test]
    fn test_topics() {
        assert_eq!(cancelled("x").topic(), "task.cancelled");
        assert_eq!(EventKind::ErrorOccurred.topic(), "system.error");
    }
}

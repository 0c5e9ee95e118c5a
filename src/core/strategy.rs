//! Pluggable task-to-agent assignment policies.
//!
//! The scheduler asks a strategy two questions per round: which ready tasks
//! to consider, and which agent should run a given task. Strategies never
//! mutate the queue; the scheduler takes the selected records itself.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use crate::config::StrategyKind;
use crate::core::agent::Agent;
use crate::core::task::{DependencyResolver, TaskRecord};
use crate::core::task_queue::TaskQueue;

/// Policy mapping ready tasks to available agents.
pub trait AssignmentStrategy: Send + Sync {
    /// Name used in logs.
    fn name(&self) -> &'static str;

    /// Ready tasks to dispatch this round, in dispatch order. At most
    /// `min(available.len(), limit)` records. Tasks whose resource
    /// requirements no available agent satisfies are passed over so they
    /// cannot hold back the tasks behind them.
    fn select_ready_tasks(
        &self,
        queue: &TaskQueue,
        resolver: &dyn DependencyResolver,
        available: &[Arc<dyn Agent>],
        limit: usize,
    ) -> Vec<TaskRecord> {
        let bound = available.len().min(limit);
        if bound == 0 {
            return Vec::new();
        }
        queue.ready_in_order_where(resolver, bound, |task| {
            available
                .iter()
                .any(|agent| agent.config().limits.satisfies(&task.config().resources))
        })
    }

    /// Agent for `task` among `available`, or `None` to defer the task.
    fn select_agent(&self, task: &TaskRecord, available: &[Arc<dyn Agent>])
        -> Option<Arc<dyn Agent>>;
}

/// Default strategy: ready tasks in queue order, agents round-robin without
/// regard to type. A placeholder; substitute a smarter strategy through
/// [`crate::core::Scheduler::set_execution_strategy`].
#[derive(Debug, Default)]
pub struct RoundRobinStrategy {
    next: AtomicUsize,
}

impl RoundRobinStrategy {
    /// New strategy starting at the first agent.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn pick(&self, available: &[Arc<dyn Agent>]) -> Option<Arc<dyn Agent>> {
        if available.is_empty() {
            return None;
        }
        let idx = self.next.fetch_add(1, Ordering::Relaxed) % available.len();
        Some(Arc::clone(&available[idx]))
    }
}

impl AssignmentStrategy for RoundRobinStrategy {
    fn name(&self) -> &'static str {
        "round_robin"
    }

    fn select_agent(
        &self,
        _task: &TaskRecord,
        available: &[Arc<dyn Agent>],
    ) -> Option<Arc<dyn Agent>> {
        self.pick(available)
    }
}

/// Prefers agents whose type matches the task's declared type, falling back
/// to round-robin over every available agent.
#[derive(Debug, Default)]
pub struct TypeAffinityStrategy {
    fallback: RoundRobinStrategy,
}

impl TypeAffinityStrategy {
    /// New strategy.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl AssignmentStrategy for TypeAffinityStrategy {
    fn name(&self) -> &'static str {
        "type_affinity"
    }

    fn select_agent(
        &self,
        task: &TaskRecord,
        available: &[Arc<dyn Agent>],
    ) -> Option<Arc<dyn Agent>> {
        if let Some(preferred) = task.task_type().preferred_agent_type() {
            let matching: Vec<Arc<dyn Agent>> = available
                .iter()
                .filter(|agent| agent.agent_type() == &preferred)
                .cloned()
                .collect();
            if let Some(agent) = self.fallback.pick(&matching) {
                return Some(agent);
            }
        }
        self.fallback.pick(available)
    }
}

/// Build the strategy selected by configuration.
#[must_use]
pub fn strategy_for(kind: StrategyKind) -> Arc<dyn AssignmentStrategy> {
    match kind {
        StrategyKind::RoundRobin => Arc::new(RoundRobinStrategy::new()),
        StrategyKind::TypeAffinity => Arc::new(TypeAffinityStrategy::new()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::agent::{AgentConfig, AgentType, TaskHandler, WorkerAgent};
    use crate::core::task::{
        Priority, ResourceRequirements, TaskConfig, TaskResult, TaskStatus, TaskType,
    };
    use crate::core::ExecutionError;
    use async_trait::async_trait;
    use std::collections::HashMap;

    struct Idle;

    #[async_trait]
    impl TaskHandler for Idle {
        async fn handle(&self, _task: TaskRecord) -> Result<TaskResult, ExecutionError> {
            Ok(TaskResult::default())
        }
    }

    fn agent(id: &str, agent_type: AgentType) -> Arc<dyn Agent> {
        Arc::new(WorkerAgent::new(AgentConfig::new(id, id, agent_type), Arc::new(Idle)))
    }

    fn task(id: &str, task_type: TaskType) -> TaskRecord {
        TaskRecord::new(TaskConfig::new(id, id, task_type))
    }

    #[test]
    fn test_round_robin_cycles_agents() {
        let strategy = RoundRobinStrategy::new();
        let agents = vec![agent("a", AgentType::Developer), agent("b", AgentType::Tester)];
        let t = task("t", TaskType::Development);
        let picks: Vec<String> = (0..4)
            .filter_map(|_| strategy.select_agent(&t, &agents))
            .map(|a| a.id().to_string())
            .collect();
        assert_eq!(picks, vec!["a", "b", "a", "b"]);
        assert!(strategy.select_agent(&t, &[]).is_none());
    }

    #[test]
    fn test_type_affinity_prefers_matching_type() {
        let strategy = TypeAffinityStrategy::new();
        let agents = vec![agent("dev", AgentType::Developer), agent("qa", AgentType::Tester)];

        let testing = task("t1", TaskType::Testing);
        for _ in 0..3 {
            assert_eq!(strategy.select_agent(&testing, &agents).unwrap().id(), "qa");
        }

        let design = task("t2", TaskType::Architecture);
        assert!(strategy.select_agent(&design, &agents).is_some());
    }

    #[test]
    fn test_selection_bounded_by_agents_and_limit() {
        let queue = TaskQueue::new(16);
        for (i, priority) in [Priority::Low, Priority::High, Priority::Medium].iter().enumerate() {
            let cfg = TaskConfig::new(format!("t{i}"), "work", TaskType::Development)
                .with_priority(*priority);
            queue.push(TaskRecord::new(cfg)).unwrap();
        }
        let statuses: HashMap<String, TaskStatus> = HashMap::new();
        let strategy = RoundRobinStrategy::new();
        let agents = vec![agent("a", AgentType::Developer), agent("b", AgentType::Developer)];

        let picked = strategy.select_ready_tasks(&queue, &statuses, &agents, 5);
        let ids: Vec<&str> = picked.iter().map(TaskRecord::id).collect();
        assert_eq!(ids, vec!["t1", "t2"]);

        assert_eq!(strategy.select_ready_tasks(&queue, &statuses, &agents, 1).len(), 1);
        assert!(strategy.select_ready_tasks(&queue, &statuses, &[], 5).is_empty());
        assert_eq!(queue.len(), 3);
    }

    #[test]
    fn test_selection_skips_tasks_no_agent_can_hold() {
        let queue = TaskQueue::new(16);
        let heavy = TaskConfig::new("heavy", "heavy", TaskType::Development)
            .with_priority(Priority::Critical)
            .with_resources(ResourceRequirements {
                memory_mb: 4_096,
                ..ResourceRequirements::default()
            });
        queue.push(TaskRecord::new(heavy)).unwrap();
        queue.push(task("small", TaskType::Development)).unwrap();
        let statuses: HashMap<String, TaskStatus> = HashMap::new();
        let agents = vec![agent("a", AgentType::Developer)];

        let picked = RoundRobinStrategy::new().select_ready_tasks(&queue, &statuses, &agents, 1);
        let ids: Vec<&str> = picked.iter().map(TaskRecord::id).collect();
        assert_eq!(ids, vec!["small"]);
    }
}

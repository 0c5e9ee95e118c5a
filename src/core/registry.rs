//! Thread-safe registry of live agents.
//!
//! A single `parking_lot::Mutex` guards the id -> agent map. Agent status
//! lives on the agent itself as an atomic, so callers that only need
//! availability clone the `Arc`s out and release the lock before looking at
//! status. Every create, delete and status change is published to the
//! [`EventBus`].

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tracing::{debug, info, warn};

use crate::core::agent::{Agent, AgentConfig, AgentFactory, AgentStatus, AgentType};
use crate::core::events::{EventBus, SchedulerEvent};
use crate::core::SchedulerError;

/// Observer invoked with `(agent_id, old_status, new_status)`.
pub type StatusCallback = Arc<dyn Fn(&str, AgentStatus, AgentStatus) + Send + Sync>;

/// Criteria for [`AgentRegistry::list`]. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentFilter {
    /// Only agents of this type.
    pub agent_type: Option<AgentType>,
    /// Only agents in this status.
    pub status: Option<AgentStatus>,
}

impl AgentFilter {
    /// Match agents of `agent_type`.
    #[must_use]
    pub fn by_type(agent_type: AgentType) -> Self {
        Self {
            agent_type: Some(agent_type),
            status: None,
        }
    }

    /// Match agents in `status`.
    #[must_use]
    pub const fn by_status(status: AgentStatus) -> Self {
        Self {
            agent_type: None,
            status: Some(status),
        }
    }

    fn matches(&self, agent: &dyn Agent) -> bool {
        self.agent_type
            .as_ref()
            .is_none_or(|t| agent.agent_type() == t)
            && self.status.is_none_or(|s| agent.status() == s)
    }
}

/// Owner of every agent instance.
pub struct AgentRegistry {
    factory: Arc<AgentFactory>,
    event_bus: Arc<dyn EventBus>,
    agents: Mutex<HashMap<String, Arc<dyn Agent>>>,
    status_callback: RwLock<Option<StatusCallback>>,
}

impl AgentRegistry {
    /// Empty registry creating agents through `factory`.
    pub fn new(factory: Arc<AgentFactory>, event_bus: Arc<dyn EventBus>) -> Self {
        Self {
            factory,
            event_bus,
            agents: Mutex::new(HashMap::new()),
            status_callback: RwLock::new(None),
        }
    }

    /// Factory used by [`AgentRegistry::create`].
    #[must_use]
    pub fn factory(&self) -> &Arc<AgentFactory> {
        &self.factory
    }

    /// Validate `config`, build the agent and register it. The agent starts
    /// out `Stopped`.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::Validation` for an invalid config
    /// - `SchedulerError::Duplicate` if the id is taken
    /// - `SchedulerError::FactoryNotRegistered` for an unknown agent type
    pub fn create(&self, config: AgentConfig) -> Result<Arc<dyn Agent>, SchedulerError> {
        config.validate()?;
        if self.agents.lock().contains_key(&config.id) {
            return Err(SchedulerError::Duplicate(config.id));
        }

        // Constructors are caller code; run them outside the map lock.
        let agent = self.factory.create(&config)?;
        {
            let mut agents = self.agents.lock();
            if agents.contains_key(&config.id) {
                return Err(SchedulerError::Duplicate(config.id));
            }
            agents.insert(config.id.clone(), Arc::clone(&agent));
        }

        info!(agent_id = %config.id, agent_type = %config.agent_type, "agent created");
        self.event_bus.publish(SchedulerEvent::AgentCreated {
            agent_id: config.id,
            agent_type: config.agent_type,
        });
        Ok(agent)
    }

    /// Stop the agent if it is running or paused, then remove it. Returns
    /// whether it existed.
    pub fn delete(&self, id: &str) -> bool {
        let Some(agent) = self.get(id) else {
            return false;
        };
        if matches!(agent.status(), AgentStatus::Running | AgentStatus::Paused) {
            if let Err(e) = self.stop_with_reason(&agent, "deleted") {
                warn!(agent_id = id, error = %e, "failed to stop agent before removal");
            }
        }
        if self.agents.lock().remove(id).is_none() {
            return false;
        }
        info!(agent_id = id, "agent removed");
        self.event_bus.publish(SchedulerEvent::AgentRemoved {
            agent_id: id.to_string(),
        });
        true
    }

    /// Agent by id.
    #[must_use]
    pub fn get(&self, id: &str) -> Option<Arc<dyn Agent>> {
        self.agents.lock().get(id).cloned()
    }

    /// Agents matching `filter`, sorted by id.
    #[must_use]
    pub fn list(&self, filter: &AgentFilter) -> Vec<Arc<dyn Agent>> {
        let mut agents: Vec<Arc<dyn Agent>> = self
            .snapshot()
            .into_iter()
            .filter(|agent| filter.matches(agent.as_ref()))
            .collect();
        agents.sort_by(|a, b| a.id().cmp(b.id()));
        agents
    }

    /// Agents that are `Running` and report healthy.
    #[must_use]
    pub fn running_agents(&self) -> Vec<Arc<dyn Agent>> {
        self.list(&AgentFilter::by_status(AgentStatus::Running))
            .into_iter()
            .filter(|agent| agent.is_healthy())
            .collect()
    }

    /// Agent count per status; every status is present.
    #[must_use]
    pub fn status_distribution(&self) -> HashMap<AgentStatus, usize> {
        let mut distribution: HashMap<AgentStatus, usize> =
            AgentStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for agent in self.snapshot() {
            *distribution.entry(agent.status()).or_insert(0) += 1;
        }
        distribution
    }

    /// Ids of agents that are not `Running` or report unhealthy, sorted.
    #[must_use]
    pub fn unhealthy(&self) -> Vec<String> {
        let mut ids: Vec<String> = self
            .snapshot()
            .into_iter()
            .filter(|agent| agent.status() != AgentStatus::Running || !agent.is_healthy())
            .map(|agent| agent.id().to_string())
            .collect();
        ids.sort();
        ids
    }

    /// Number of registered agents.
    #[must_use]
    pub fn count(&self) -> usize {
        self.agents.lock().len()
    }

    /// Number of agents in `status`.
    #[must_use]
    pub fn count_by_status(&self, status: AgentStatus) -> usize {
        self.snapshot()
            .iter()
            .filter(|agent| agent.status() == status)
            .count()
    }

    /// Install the status-change observer, replacing any previous one.
    pub fn set_status_callback<F>(&self, callback: F)
    where
        F: Fn(&str, AgentStatus, AgentStatus) + Send + Sync + 'static,
    {
        *self.status_callback.write() = Some(Arc::new(callback));
    }

    /// Start one agent.
    ///
    /// # Errors
    ///
    /// `SchedulerError::NotFound` for an unknown id, or the agent's
    /// transition error.
    pub fn start_agent(&self, id: &str) -> Result<(), SchedulerError> {
        let agent = self.require(id)?;
        let old = agent.status();
        agent.start()?;
        self.event_bus.publish(SchedulerEvent::AgentStarted {
            agent_id: id.to_string(),
        });
        self.status_changed(id, old, agent.status());
        Ok(())
    }

    /// Stop one agent.
    ///
    /// # Errors
    ///
    /// `SchedulerError::NotFound` for an unknown id, or the agent's
    /// transition error.
    pub fn stop_agent(&self, id: &str) -> Result<(), SchedulerError> {
        let agent = self.require(id)?;
        self.stop_with_reason(&agent, "requested")
    }

    /// Pause one agent.
    ///
    /// # Errors
    ///
    /// `SchedulerError::NotFound` for an unknown id, or the agent's
    /// transition error.
    pub fn pause_agent(&self, id: &str) -> Result<(), SchedulerError> {
        let agent = self.require(id)?;
        let old = agent.status();
        agent.pause()?;
        self.status_changed(id, old, agent.status());
        Ok(())
    }

    /// Resume one agent.
    ///
    /// # Errors
    ///
    /// `SchedulerError::NotFound` for an unknown id, or the agent's
    /// transition error.
    pub fn resume_agent(&self, id: &str) -> Result<(), SchedulerError> {
        let agent = self.require(id)?;
        let old = agent.status();
        agent.resume()?;
        self.status_changed(id, old, agent.status());
        Ok(())
    }

    /// Start every stopped agent. Returns how many started.
    pub fn start_all(&self) -> usize {
        self.for_each_id(|id| self.start_agent(id))
    }

    /// Stop every running or paused agent. Returns how many stopped.
    pub fn stop_all(&self) -> usize {
        self.for_each_id(|id| self.stop_agent(id))
    }

    /// Pause every running agent. Returns how many paused.
    pub fn pause_all(&self) -> usize {
        self.for_each_id(|id| self.pause_agent(id))
    }

    /// Resume every paused agent. Returns how many resumed.
    pub fn resume_all(&self) -> usize {
        self.for_each_id(|id| self.resume_agent(id))
    }

    /// Replace a stopped agent with one built from `config`.
    ///
    /// # Errors
    ///
    /// - `SchedulerError::NotFound` for an unknown id
    /// - `SchedulerError::Validation` if `config` is invalid, renames the
    ///   agent, or the agent is not `Stopped`
    /// - `SchedulerError::FactoryNotRegistered` for an unknown agent type
    pub fn update_config(&self, id: &str, config: AgentConfig) -> Result<(), SchedulerError> {
        config.validate()?;
        if config.id != id {
            return Err(SchedulerError::Validation(format!(
                "config id `{}` does not match agent `{id}`",
                config.id
            )));
        }
        let current = self.require(id)?;
        if current.status() != AgentStatus::Stopped {
            return Err(SchedulerError::Validation(format!(
                "agent `{id}` must be stopped to change its configuration"
            )));
        }
        let replacement = self.factory.create(&config)?;
        self.agents.lock().insert(id.to_string(), replacement);
        debug!(agent_id = id, "agent configuration updated");
        Ok(())
    }

    /// Remove every `Stopped` agent. Returns how many were removed.
    pub fn cleanup_stopped(&self) -> usize {
        let removed: Vec<String> = {
            let mut agents = self.agents.lock();
            let ids: Vec<String> = agents
                .iter()
                .filter(|(_, agent)| agent.status() == AgentStatus::Stopped)
                .map(|(id, _)| id.clone())
                .collect();
            for id in &ids {
                agents.remove(id);
            }
            ids
        };
        for id in &removed {
            self.event_bus.publish(SchedulerEvent::AgentRemoved {
                agent_id: id.clone(),
            });
        }
        if !removed.is_empty() {
            info!(count = removed.len(), "stopped agents cleaned up");
        }
        removed.len()
    }

    fn snapshot(&self) -> Vec<Arc<dyn Agent>> {
        self.agents.lock().values().cloned().collect()
    }

    fn require(&self, id: &str) -> Result<Arc<dyn Agent>, SchedulerError> {
        self.get(id)
            .ok_or_else(|| SchedulerError::NotFound(format!("agent `{id}`")))
    }

    fn for_each_id<F>(&self, op: F) -> usize
    where
        F: Fn(&str) -> Result<(), SchedulerError>,
    {
        let mut ids: Vec<String> = self.agents.lock().keys().cloned().collect();
        ids.sort();
        ids.iter()
            .filter(|id| match op(id) {
                Ok(()) => true,
                Err(e) => {
                    debug!(agent_id = %id, error = %e, "bulk lifecycle operation skipped agent");
                    false
                }
            })
            .count()
    }

    fn stop_with_reason(&self, agent: &Arc<dyn Agent>, reason: &str) -> Result<(), SchedulerError> {
        let old = agent.status();
        agent.stop()?;
        self.event_bus.publish(SchedulerEvent::AgentStopped {
            agent_id: agent.id().to_string(),
            reason: reason.to_string(),
        });
        self.status_changed(agent.id(), old, agent.status());
        Ok(())
    }

    fn status_changed(&self, id: &str, old: AgentStatus, new: AgentStatus) {
        debug!(agent_id = id, %old, %new, "agent status changed");
        self.event_bus.publish(SchedulerEvent::AgentStatusChanged {
            agent_id: id.to_string(),
            old_status: old,
            new_status: new,
        });
        let callback = self.status_callback.read().clone();
        if let Some(callback) = callback {
            callback(id, old, new);
        }
    }
}

//! Builder assembling a scheduler, its registry and its agents.

use std::sync::Arc;

use anyhow::{anyhow, Context};
use tracing::info;

use crate::config::{ConfigSource, EnvConfigSource, SchedulerConfig};
use crate::core::{
    AgentConfig, AgentFactory, AgentRegistry, AgentType, AppResult, AssignmentStrategy, EventBus,
    NoopEventBus, Scheduler, SchedulerError, TaskHandler,
};

/// Assembles a [`Scheduler`] from configuration and explicitly provided
/// collaborators.
pub struct SchedulerBuilder {
    config: SchedulerConfig,
    factory: Arc<AgentFactory>,
    event_bus: Arc<dyn EventBus>,
    strategy: Option<Arc<dyn AssignmentStrategy>>,
    agents: Vec<AgentConfig>,
    start_agents: bool,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SchedulerBuilder {
    /// Default configuration, empty factory, no-op event bus.
    #[must_use]
    pub fn new() -> Self {
        Self {
            config: SchedulerConfig::default(),
            factory: Arc::new(AgentFactory::new()),
            event_bus: Arc::new(NoopEventBus),
            strategy: None,
            agents: Vec::new(),
            start_agents: true,
        }
    }

    /// Configuration read from `AGENT_SCHEDULER_*` variables and `.env`.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable does not parse or the result is
    /// invalid.
    pub fn from_env() -> AppResult<Self> {
        Self::from_source(&EnvConfigSource::new()).context("loading scheduler config from env")
    }

    /// Configuration read from `source`.
    ///
    /// # Errors
    ///
    /// Returns an error if a value does not parse or the result is invalid.
    pub fn from_source(source: &dyn ConfigSource) -> AppResult<Self> {
        let config = SchedulerConfig::from_source(source).map_err(|e| anyhow!(e))?;
        Ok(Self::new().with_config(config))
    }

    /// Configuration parsed from JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the JSON does not parse or is invalid.
    pub fn from_json_str(input: &str) -> AppResult<Self> {
        let config = SchedulerConfig::from_json_str(input)
            .map_err(|e| anyhow!(e))
            .context("parsing scheduler config")?;
        Ok(Self::new().with_config(config))
    }

    /// Replace the configuration.
    #[must_use]
    pub fn with_config(mut self, config: SchedulerConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing factory.
    #[must_use]
    pub fn with_factory(mut self, factory: Arc<AgentFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Register a handler-backed agent type on the factory.
    #[must_use]
    pub fn with_handler(self, agent_type: AgentType, handler: Arc<dyn TaskHandler>) -> Self {
        self.factory.register_handler(agent_type, handler);
        self
    }

    /// Publish lifecycle events to `event_bus`.
    #[must_use]
    pub fn with_event_bus(mut self, event_bus: Arc<dyn EventBus>) -> Self {
        self.event_bus = event_bus;
        self
    }

    /// Override the configured assignment strategy.
    #[must_use]
    pub fn with_strategy(mut self, strategy: Arc<dyn AssignmentStrategy>) -> Self {
        self.strategy = Some(strategy);
        self
    }

    /// Create this agent during `build`.
    #[must_use]
    pub fn with_agent(mut self, config: AgentConfig) -> Self {
        self.agents.push(config);
        self
    }

    /// Whether agents added with `with_agent` are started during `build`.
    /// Defaults to `true`.
    #[must_use]
    pub const fn start_agents(mut self, start: bool) -> Self {
        self.start_agents = start;
        self
    }

    /// Build the registry, create the agents and construct the scheduler.
    /// The scheduler is returned stopped.
    ///
    /// # Errors
    ///
    /// Any error from agent creation, agent start or scheduler construction.
    pub fn build(self) -> Result<Scheduler, SchedulerError> {
        let registry = Arc::new(AgentRegistry::new(self.factory, Arc::clone(&self.event_bus)));
        for agent in self.agents {
            let id = agent.id.clone();
            registry.create(agent)?;
            if self.start_agents {
                registry.start_agent(&id)?;
            }
        }
        let scheduler = Scheduler::new(self.config, Arc::clone(&registry), self.event_bus)?;
        if let Some(strategy) = self.strategy {
            scheduler.set_execution_strategy(strategy);
        }
        info!(agents = registry.count(), "scheduler assembled");
        Ok(scheduler)
    }
}

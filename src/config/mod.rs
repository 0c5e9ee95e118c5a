//! Configuration models and lookup sources.

pub mod scheduler;
pub mod source;

pub use scheduler::{SchedulerConfig, StrategyKind, WorkerPoolConfig};
pub use source::{ConfigSource, EnvConfigSource, ENV_PREFIX};

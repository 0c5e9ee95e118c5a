//! Read-only key/value configuration lookup.
//!
//! Keys are the field names of [`SchedulerConfig`] (`max_concurrent_tasks`,
//! `worker_count`, ...). [`EnvConfigSource`] maps them to upper-case
//! environment variables under a prefix, after loading a `.env` file if one
//! exists.

use std::collections::HashMap;
use std::str::FromStr;

use tracing::debug;

use crate::config::{SchedulerConfig, StrategyKind};

/// Prefix used by [`EnvConfigSource::new`].
pub const ENV_PREFIX: &str = "AGENT_SCHEDULER_";

/// Read-only configuration lookup.
pub trait ConfigSource {
    /// Raw value for `key`, if set.
    fn get(&self, key: &str) -> Option<String>;
}

impl<S: std::hash::BuildHasher> ConfigSource for HashMap<String, String, S> {
    fn get(&self, key: &str) -> Option<String> {
        HashMap::get(self, key).cloned()
    }
}

/// Environment variables, with `.env` loaded through `dotenvy`.
#[derive(Debug, Clone)]
pub struct EnvConfigSource {
    prefix: String,
}

impl Default for EnvConfigSource {
    fn default() -> Self {
        Self::new()
    }
}

impl EnvConfigSource {
    /// Source using [`ENV_PREFIX`].
    #[must_use]
    pub fn new() -> Self {
        Self::with_prefix(ENV_PREFIX)
    }

    /// Source using a custom prefix.
    #[must_use]
    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        if let Ok(path) = dotenvy::dotenv() {
            debug!(path = %path.display(), "loaded .env");
        }
        Self {
            prefix: prefix.into(),
        }
    }
}

impl ConfigSource for EnvConfigSource {
    fn get(&self, key: &str) -> Option<String> {
        std::env::var(format!("{}{}", self.prefix, key.to_ascii_uppercase())).ok()
    }
}

fn parse<T: FromStr>(source: &dyn ConfigSource, key: &str) -> Result<Option<T>, String>
where
    T::Err: std::fmt::Display,
{
    source
        .get(key)
        .map(|raw| {
            raw.trim()
                .parse::<T>()
                .map_err(|e| format!("`{key}` = `{raw}`: {e}"))
        })
        .transpose()
}

impl SchedulerConfig {
    /// Overlay values found in `source` on the defaults, then validate.
    ///
    /// # Errors
    ///
    /// Unparseable value or validation failure.
    pub fn from_source(source: &dyn ConfigSource) -> Result<Self, String> {
        let mut cfg = Self::default();
        if let Some(v) = parse(source, "max_concurrent_tasks")? {
            cfg.max_concurrent_tasks = v;
        }
        if let Some(v) = parse(source, "max_queue_size")? {
            cfg.max_queue_size = v;
        }
        if let Some(v) = parse(source, "tick_interval_ms")? {
            cfg.tick_interval_ms = v;
        }
        if let Some(v) = parse(source, "default_timeout_secs")? {
            cfg.default_timeout_secs = v;
        }
        if let Some(v) = parse::<StrategyKind>(source, "strategy")? {
            cfg.strategy = v;
        }
        if let Some(v) = parse(source, "monitor_interval_secs")? {
            cfg.monitor_interval_secs = v;
        }
        if let Some(v) = parse(source, "worker_count")? {
            cfg.worker_pool.worker_count = v;
        }
        if let Some(v) = parse(source, "max_queue_depth")? {
            cfg.worker_pool.max_queue_depth = v;
        }
        if let Some(v) = parse(source, "thread_stack_size")? {
            cfg.worker_pool.thread_stack_size = v;
        }
        cfg.validate()?;
        Ok(cfg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn source(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_overlay_on_defaults() {
        let cfg = SchedulerConfig::from_source(&source(&[
            ("max_concurrent_tasks", "4"),
            ("strategy", "type_affinity"),
            ("worker_count", "2"),
        ]))
        .unwrap();
        assert_eq!(cfg.max_concurrent_tasks, 4);
        assert_eq!(cfg.strategy, StrategyKind::TypeAffinity);
        assert_eq!(cfg.worker_pool.worker_count, 2);
        assert_eq!(cfg.tick_interval_ms, 100);
    }

    #[test]
    fn test_bad_values_are_reported() {
        let err = SchedulerConfig::from_source(&source(&[("max_queue_size", "lots")])).unwrap_err();
        assert!(err.contains("max_queue_size"));
        assert!(SchedulerConfig::from_source(&source(&[("tick_interval_ms", "0")])).is_err());
    }

    #[test]
    fn test_env_source_uses_prefix() {
        let src = EnvConfigSource::with_prefix("PROMETHEUS_AGENT_SCHEDULER_SOURCE_TEST_");
        assert_eq!(src.get("definitely_unset_key"), None);
    }
}

//! Periodic agent health sampling.

use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::core::agent::AgentStatus;
use crate::core::registry::AgentRegistry;
use crate::core::SchedulerError;
use crate::util::clock::now_ms;

/// Snapshot taken by the monitor thread.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitorStats {
    /// Registered agents.
    pub total: usize,
    /// Agents in `Running`.
    pub running: usize,
    /// Agents in `Stopped`.
    pub stopped: usize,
    /// Agents in `Paused`.
    pub paused: usize,
    /// Agents in `Error`.
    pub error: usize,
    /// Agents reported by [`AgentRegistry::unhealthy`].
    pub unhealthy: usize,
    /// When the sample was taken, in ms since epoch.
    pub sampled_at_ms: u128,
}

impl MonitorStats {
    /// Sample `registry` now.
    #[must_use]
    pub fn sample(registry: &AgentRegistry) -> Self {
        let dist = registry.status_distribution();
        let count = |status: AgentStatus| dist.get(&status).copied().unwrap_or(0);
        Self {
            total: dist.values().sum(),
            running: count(AgentStatus::Running),
            stopped: count(AgentStatus::Stopped),
            paused: count(AgentStatus::Paused),
            error: count(AgentStatus::Error),
            unhealthy: registry.unhealthy().len(),
            sampled_at_ms: now_ms(),
        }
    }
}

struct MonitorState {
    shutdown: bool,
}

/// Background thread sampling a registry at a fixed interval.
pub struct AgentMonitor {
    registry: Arc<AgentRegistry>,
    stats: Arc<Mutex<MonitorStats>>,
    state: Arc<(Mutex<MonitorState>, Condvar)>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl AgentMonitor {
    /// Monitor for `registry`; idle until started.
    #[must_use]
    pub fn new(registry: Arc<AgentRegistry>) -> Self {
        Self {
            registry,
            stats: Arc::new(Mutex::new(MonitorStats::default())),
            state: Arc::new((Mutex::new(MonitorState { shutdown: false }), Condvar::new())),
            handle: Mutex::new(None),
        }
    }

    /// Spawn the sampling thread. A no-op if already monitoring.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Internal` if the thread cannot be spawned.
    pub fn start_monitoring(&self, interval: Duration) -> Result<(), SchedulerError> {
        let mut handle = self.handle.lock();
        if handle.is_some() {
            return Ok(());
        }
        self.state.0.lock().shutdown = false;

        let registry = Arc::clone(&self.registry);
        let stats = Arc::clone(&self.stats);
        let state = Arc::clone(&self.state);
        let spawned = thread::Builder::new()
            .name("agent-monitor".into())
            .spawn(move || {
                info!(?interval, "agent monitor started");
                loop {
                    let sample = MonitorStats::sample(&registry);
                    if sample.unhealthy > 0 {
                        warn!(
                            unhealthy = sample.unhealthy,
                            ids = ?registry.unhealthy(),
                            "unhealthy agents detected"
                        );
                    }
                    *stats.lock() = sample;

                    let (lock, cvar) = &*state;
                    let mut guard = lock.lock();
                    if !guard.shutdown {
                        cvar.wait_for(&mut guard, interval);
                    }
                    if guard.shutdown {
                        break;
                    }
                }
                debug!("agent monitor exiting");
            })
            .map_err(|e| SchedulerError::Internal(format!("failed to spawn monitor: {e}")))?;
        *handle = Some(spawned);
        Ok(())
    }

    /// Stop and join the sampling thread. A no-op if not monitoring.
    pub fn stop_monitoring(&self) {
        let Some(handle) = self.handle.lock().take() else {
            return;
        };
        {
            let (lock, cvar) = &*self.state;
            lock.lock().shutdown = true;
            cvar.notify_all();
        }
        if handle.join().is_err() {
            warn!("agent monitor thread panicked");
        }
        info!("agent monitor stopped");
    }

    /// Whether the sampling thread is running.
    #[must_use]
    pub fn is_monitoring(&self) -> bool {
        self.handle.lock().is_some()
    }

    /// Latest sample.
    #[must_use]
    pub fn stats(&self) -> MonitorStats {
        self.stats.lock().clone()
    }
}

impl Drop for AgentMonitor {
    fn drop(&mut self) {
        self.stop_monitoring();
    }
}

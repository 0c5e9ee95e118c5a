//! Aggregate scheduler statistics.

use serde::{Deserialize, Serialize};

/// Point-in-time statistics returned by [`crate::core::Scheduler::stats`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SchedulerStats {
    /// Tasks admitted by `schedule_task`.
    pub scheduled: u64,
    /// Tasks that completed successfully.
    pub completed: u64,
    /// Tasks that failed or timed out with retries exhausted.
    pub failed: u64,
    /// Tasks cancelled.
    pub cancelled: u64,
    /// Failed attempts that were re-queued.
    pub retried: u64,
    /// Attempts that hit their deadline.
    pub timed_out: u64,
    /// Tasks waiting in the queue.
    pub pending_count: usize,
    /// Tasks executing now.
    pub running_count: usize,
    /// Mean execution time of completed tasks.
    pub avg_exec_ms: f64,
    /// `completed / scheduled` in percent.
    pub completion_rate: f64,
}

/// Counters guarded by the scheduler's stats lock.
#[derive(Debug, Default)]
pub(crate) struct StatsAccumulator {
    scheduled: u64,
    completed: u64,
    failed: u64,
    cancelled: u64,
    retried: u64,
    timed_out: u64,
    total_exec_ms: u64,
}

impl StatsAccumulator {
    pub(crate) const fn record_scheduled(&mut self) {
        self.scheduled += 1;
    }

    pub(crate) const fn record_completed(&mut self, elapsed_ms: u64) {
        self.completed += 1;
        self.total_exec_ms = self.total_exec_ms.saturating_add(elapsed_ms);
    }

    pub(crate) const fn record_failed(&mut self) {
        self.failed += 1;
    }

    pub(crate) const fn record_cancelled(&mut self) {
        self.cancelled += 1;
    }

    pub(crate) const fn record_retried(&mut self) {
        self.retried += 1;
    }

    pub(crate) const fn record_timed_out(&mut self) {
        self.timed_out += 1;
    }

    #[allow(clippy::cast_precision_loss)]
    pub(crate) fn snapshot(&self, pending_count: usize, running_count: usize) -> SchedulerStats {
        let avg_exec_ms = if self.completed == 0 {
            0.0
        } else {
            self.total_exec_ms as f64 / self.completed as f64
        };
        let completion_rate = if self.scheduled == 0 {
            0.0
        } else {
            self.completed as f64 / self.scheduled as f64 * 100.0
        };
        SchedulerStats {
            scheduled: self.scheduled,
            completed: self.completed,
            failed: self.failed,
            cancelled: self.cancelled,
            retried: self.retried,
            timed_out: self.timed_out,
            pending_count,
            running_count,
            avg_exec_ms,
            completion_rate,
        }
    }
}

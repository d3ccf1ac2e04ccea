//! Engine-wide execution statistics.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Counters over finished executions plus live workflow counts.
///
/// `average_execution_time` is a running mean over every finished
/// execution, whatever its outcome.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EngineStats {
    pub total_executions: u64,
    pub successful_executions: u64,
    pub failed_executions: u64,
    pub cancelled_executions: u64,
    pub average_execution_time: Duration,
    /// Workflows currently tracked, by state.
    pub pending: usize,
    pub running: usize,
    pub completed: usize,
    pub failed: usize,
    pub cancelled: usize,
}

/// Outcome of one finished execution, as counted by [`EngineStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RunOutcome {
    Succeeded,
    Failed,
    Cancelled,
}

impl EngineStats {
    pub(crate) fn record(&mut self, outcome: RunOutcome, elapsed: Duration) {
        let previous = self.total_executions as f64;
        self.total_executions += 1;
        match outcome {
            RunOutcome::Succeeded => self.successful_executions += 1,
            RunOutcome::Failed => self.failed_executions += 1,
            RunOutcome::Cancelled => self.cancelled_executions += 1,
        }

        let mean = (self.average_execution_time.as_secs_f64() * previous + elapsed.as_secs_f64())
            / self.total_executions as f64;
        self.average_execution_time = Duration::from_secs_f64(mean);
    }

    /// Share of finished executions that succeeded, in `[0, 1]`.
    pub fn success_rate(&self) -> f64 {
        if self.total_executions == 0 {
            return 0.0;
        }
        self.successful_executions as f64 / self.total_executions as f64
    }
}

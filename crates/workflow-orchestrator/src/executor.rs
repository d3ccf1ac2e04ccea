//! Parallel execution of a ready set.
//!
//! Every step of a wave runs in its own tokio task. Two semaphores bound the
//! work: a per-wave pool of `min(limit, steps)` slots and the engine-wide
//! step pool shared by all workflows. A step holds its engine-wide slot from
//! the moment it is marked `Running` until its outcome has been written back,
//! so the number of `Running` steps never exceeds the engine-wide limit.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::future::join_all;
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, error, info_span, warn};

use crate::dispatch::retry::{RetryPolicy, dispatch_with_retry};
use crate::dispatch::{AgentDispatcher, DispatchError, Task};
use crate::error::StepError;
use crate::manager::WorkflowHandle;
use crate::workflow::StepFailure;

/// Result of one step of a wave.
#[derive(Debug, Clone)]
pub struct StepOutcome {
    pub step_name: String,
    pub result: Result<JsonValue, StepFailure>,
    /// Time from entering `Running` to the outcome being recorded.
    pub elapsed: Duration,
    /// Attempts made; 0 if the step never started.
    pub attempts: u32,
}

impl StepOutcome {
    pub fn is_success(&self) -> bool {
        self.result.is_ok()
    }

    pub fn was_started(&self) -> bool {
        self.attempts > 0
    }

    fn not_started(step_name: String, error: StepError) -> Self {
        Self {
            step_name,
            result: Err(StepFailure::from_step_error(&error, 0)),
            elapsed: Duration::ZERO,
            attempts: 0,
        }
    }
}

/// Runs ready sets against the engine-wide step pool.
#[derive(Debug)]
pub struct ParallelStepExecutor {
    step_slots: Arc<Semaphore>,
    max_concurrent_steps: usize,
    retry: RetryPolicy,
}

impl ParallelStepExecutor {
    pub fn new(max_concurrent_steps: usize, retry: RetryPolicy) -> Self {
        let max_concurrent_steps = max_concurrent_steps.max(1);
        Self {
            step_slots: Arc::new(Semaphore::new(max_concurrent_steps)),
            max_concurrent_steps,
            retry,
        }
    }

    /// Steps currently holding an engine-wide slot.
    pub fn active_steps(&self) -> usize {
        self.max_concurrent_steps
            .saturating_sub(self.step_slots.available_permits())
    }

    /// Runs `steps` of the workflow concurrently and waits for all of them.
    ///
    /// One step failing never cancels its siblings. Every step yields an
    /// outcome; failures are recorded on the workflow and returned as data.
    pub async fn run_ready_set(
        &self,
        handle: &Arc<WorkflowHandle>,
        steps: Vec<String>,
        dispatcher: Arc<dyn AgentDispatcher>,
        concurrency_limit: usize,
    ) -> HashMap<String, StepOutcome> {
        if steps.is_empty() {
            return HashMap::new();
        }

        let pool_size = concurrency_limit.min(steps.len()).max(1);
        let wave_slots = Arc::new(Semaphore::new(pool_size));
        debug!(steps = steps.len(), pool_size, "Dispatching ready set");

        let mut tasks = Vec::with_capacity(steps.len());
        for step_name in &steps {
            let step_span = info_span!(
                "workflow_step",
                workflow_id = %handle.id(),
                step = %step_name,
            );
            let run = run_step(
                Arc::clone(handle),
                step_name.clone(),
                Arc::clone(&dispatcher),
                Arc::clone(&self.step_slots),
                Arc::clone(&wave_slots),
                self.retry.clone(),
            );
            tasks.push(tokio::spawn(run.instrument(step_span)));
        }

        let mut outcomes = HashMap::with_capacity(steps.len());
        for (step_name, joined) in steps.into_iter().zip(join_all(tasks).await) {
            let outcome = match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    error!(step = %step_name, error = %e, "Step task aborted");
                    record_aborted(handle, &step_name, &e.to_string()).await
                }
            };
            outcomes.insert(step_name, outcome);
        }
        outcomes
    }
}

async fn run_step(
    handle: Arc<WorkflowHandle>,
    step_name: String,
    dispatcher: Arc<dyn AgentDispatcher>,
    step_slots: Arc<Semaphore>,
    wave_slots: Arc<Semaphore>,
    retry: RetryPolicy,
) -> StepOutcome {
    let cancelled = || StepError::Cancelled {
        step: step_name.clone(),
    };

    let Ok(_wave_permit) = wave_slots.acquire_owned().await else {
        return StepOutcome::not_started(step_name.clone(), cancelled());
    };
    let Ok(_step_permit) = step_slots.acquire_owned().await else {
        return StepOutcome::not_started(step_name.clone(), cancelled());
    };

    let (task, timeout) = {
        let mut workflow = handle.workflow.lock().await;
        if handle.cancel.is_cancelled() {
            debug!("Workflow cancelled before step start");
            return StepOutcome::not_started(step_name.clone(), cancelled());
        }
        if !workflow.mark_step_running(&step_name, Utc::now()) {
            warn!("Step is not ready, skipping");
            return StepOutcome::not_started(step_name.clone(), cancelled());
        }
        let Some(step) = workflow.step(&step_name) else {
            return StepOutcome::not_started(step_name.clone(), cancelled());
        };
        (Task::for_step(&workflow, step), step.timeout)
    };

    let started = Instant::now();
    debug!(agent_id = %task.agent_id, "Step started");
    let (result, attempts) =
        dispatch_with_retry(dispatcher.as_ref(), task, timeout, &retry, &handle.cancel).await;

    let mut workflow = handle.workflow.lock().await;
    let now = Utc::now();
    let result = if handle.cancel.is_cancelled() {
        workflow.cancel_step(&step_name, attempts, now);
        debug!("Step relabelled as cancelled");
        Err(StepFailure::from_step_error(&cancelled(), attempts))
    } else {
        match result {
            Ok(output) => {
                workflow.complete_step(&step_name, output.clone(), attempts, now);
                debug!(attempts, "Step completed");
                Ok(output)
            }
            Err(e) => {
                let failure = StepFailure::from_step_error(&e, attempts);
                workflow.fail_step(&step_name, failure.clone(), now);
                warn!(attempts, error = %e, "Step failed");
                Err(failure)
            }
        }
    };

    StepOutcome {
        step_name,
        result,
        elapsed: started.elapsed(),
        attempts,
    }
}

/// Records a panicked step task as a permanent failure.
async fn record_aborted(handle: &WorkflowHandle, step_name: &str, reason: &str) -> StepOutcome {
    let error = StepError::Dispatch(DispatchError::permanent(format!(
        "step task aborted: {reason}"
    )));
    let failure = StepFailure::from_step_error(&error, 1);

    let mut workflow = handle.workflow.lock().await;
    workflow.fail_step(step_name, failure.clone(), Utc::now());

    StepOutcome {
        step_name: step_name.to_string(),
        result: Err(failure),
        elapsed: Duration::ZERO,
        attempts: 1,
    }
}

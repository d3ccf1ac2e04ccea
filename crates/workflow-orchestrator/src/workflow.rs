//! Runtime workflow state.
//!
//! A [`Workflow`] is one run of a template against an input payload. It owns
//! its [`StepInstance`]s and is the only mutable state the engine shares
//! between the coordinating loop, the step tasks and `status()` readers. All
//! transitions go through the methods here so the step-state invariants hold
//! no matter who drives them:
//!
//! - a step only enters `Running` from `Pending`
//! - `Completed` steps never change state again
//! - progress only moves when a wave is committed, and never decreases
//! - the workflow leaves `Running` only for a terminal state

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::error::StepError;
use crate::template::StepDefinition;

/// State of a step or of a whole workflow.
///
/// Workflows use the same states as their steps; there is no separate
/// "ready" state since readiness is derived by the scheduler.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionState {
    /// Not started yet.
    Pending,
    /// Currently executing.
    Running,
    /// Finished successfully.
    Completed,
    /// Finished with a permanent error.
    Failed,
    /// Stopped by an explicit cancellation.
    Cancelled,
}

impl ExecutionState {
    /// Returns true for `Completed`, `Failed` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionState::Completed | ExecutionState::Failed | ExecutionState::Cancelled
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionState::Pending => "pending",
            ExecutionState::Running => "running",
            ExecutionState::Completed => "completed",
            ExecutionState::Failed => "failed",
            ExecutionState::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ExecutionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Caller-assigned workflow priority.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Critical,
    High,
    #[default]
    Medium,
    Low,
}

impl Priority {
    /// Numeric priority (1-10, higher is more urgent) sent to agents with each task.
    pub fn task_priority(&self) -> u8 {
        match self {
            Priority::Critical => 10,
            Priority::High => 7,
            Priority::Medium => 5,
            Priority::Low => 1,
        }
    }
}

/// Serializable classification of a step failure.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKind {
    /// The agent returned an error.
    Dispatch { transient: bool },
    /// The last attempt exceeded the step timeout.
    Timeout { timeout_ms: u64 },
    /// The step was stopped by workflow cancellation.
    Cancelled,
}

/// A serializable record of why a step did not complete.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepFailure {
    pub kind: FailureKind,
    /// The full error message of the last attempt.
    pub message: String,
    /// Number of attempts made, including the first one.
    pub attempts: u32,
}

impl StepFailure {
    /// Creates a failure record from a step error, preserving the error kind.
    pub fn from_step_error(error: &StepError, attempts: u32) -> Self {
        let kind = match error {
            StepError::Dispatch(e) => FailureKind::Dispatch {
                transient: e.transient,
            },
            StepError::Timeout { timeout, .. } => FailureKind::Timeout {
                timeout_ms: timeout.as_millis() as u64,
            },
            StepError::Cancelled { .. } => FailureKind::Cancelled,
        };

        StepFailure {
            kind,
            message: error.to_string(),
            attempts,
        }
    }

    /// Returns true if the last attempt timed out.
    pub fn is_timeout(&self) -> bool {
        matches!(self.kind, FailureKind::Timeout { .. })
    }

    /// Returns true if the step was cancelled.
    pub fn is_cancelled(&self) -> bool {
        matches!(self.kind, FailureKind::Cancelled)
    }
}

impl fmt::Display for StepFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// One step of a running workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepInstance {
    pub name: String,
    /// Capability id used to route the step to a worker agent.
    pub agent_id: String,
    /// Names of the steps that must be `Completed` first.
    pub dependencies: Vec<String>,
    pub timeout: Duration,
    pub max_retries: u32,
    /// Retries consumed so far (attempts minus one).
    pub retry_count: u32,
    pub state: ExecutionState,
    /// Present only when `Completed`.
    pub result: Option<JsonValue>,
    /// Present only when `Failed` or `Cancelled`.
    pub failure: Option<StepFailure>,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl StepInstance {
    /// Creates a pending step from its template definition.
    pub fn from_definition(definition: &StepDefinition) -> Self {
        Self {
            name: definition.name.clone(),
            agent_id: definition.agent_id.clone(),
            dependencies: definition.dependencies.clone(),
            timeout: definition.timeout,
            max_retries: definition.max_retries,
            retry_count: 0,
            state: ExecutionState::Pending,
            result: None,
            failure: None,
            started_at: None,
            ended_at: None,
        }
    }

    /// Wall-clock time between start and end, if both are recorded.
    pub fn elapsed(&self) -> Option<Duration> {
        match (self.started_at, self.ended_at) {
            (Some(start), Some(end)) => (end - start).to_std().ok(),
            _ => None,
        }
    }

    fn finish(&mut self, state: ExecutionState, attempts: u32, now: DateTime<Utc>) {
        self.state = state;
        self.retry_count = attempts.saturating_sub(1);
        self.ended_at = Some(now);
    }
}

/// One end-to-end run of a template against a specific input payload.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub id: String,
    pub template_id: String,
    /// Human label copied from the template.
    pub name: String,
    pub priority: Priority,
    pub requested_by: String,
    pub created_at: DateTime<Utc>,
    /// Advisory only, derived from the template estimate.
    pub estimated_completion: Option<DateTime<Utc>>,
    input: Arc<JsonValue>,
    state: ExecutionState,
    steps: Vec<StepInstance>,
    outputs: BTreeMap<String, JsonValue>,
    started_at: Option<DateTime<Utc>>,
    finished_at: Option<DateTime<Utc>>,
    /// Percentage as of the last committed wave.
    #[serde(default)]
    progress: f64,
}

impl Workflow {
    /// Creates a pending workflow. Steps keep the order given.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: impl Into<String>,
        template_id: impl Into<String>,
        name: impl Into<String>,
        priority: Priority,
        requested_by: impl Into<String>,
        input: JsonValue,
        steps: Vec<StepInstance>,
        created_at: DateTime<Utc>,
        estimated_completion: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            id: id.into(),
            template_id: template_id.into(),
            name: name.into(),
            priority,
            requested_by: requested_by.into(),
            created_at,
            estimated_completion,
            input: Arc::new(input),
            state: ExecutionState::Pending,
            steps,
            outputs: BTreeMap::new(),
            started_at: None,
            finished_at: None,
            progress: 0.0,
        }
    }

    pub fn state(&self) -> ExecutionState {
        self.state
    }

    pub fn steps(&self) -> &[StepInstance] {
        &self.steps
    }

    pub fn step(&self, name: &str) -> Option<&StepInstance> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// The shared, read-only input payload.
    pub fn input(&self) -> &Arc<JsonValue> {
        &self.input
    }

    /// Results of completed steps, keyed by step name.
    pub fn outputs(&self) -> &BTreeMap<String, JsonValue> {
        &self.outputs
    }

    pub fn started_at(&self) -> Option<DateTime<Utc>> {
        self.started_at
    }

    pub fn finished_at(&self) -> Option<DateTime<Utc>> {
        self.finished_at
    }

    /// Number of steps in the `Completed` state.
    pub fn completed_count(&self) -> usize {
        self.count_in(ExecutionState::Completed)
    }

    pub fn count_in(&self, state: ExecutionState) -> usize {
        self.steps.iter().filter(|s| s.state == state).count()
    }

    /// Progress as of the last committed wave, in `[0, 100]`.
    ///
    /// Steps that complete mid-wave are visible in [`steps`](Self::steps)
    /// right away but only count here once [`commit_progress`](Self::commit_progress)
    /// runs after the wave.
    pub fn progress_percentage(&self) -> f64 {
        self.progress
    }

    /// Recomputes progress from the `Completed` steps and returns it.
    pub fn commit_progress(&mut self) -> f64 {
        if !self.steps.is_empty() {
            let live = self.completed_count() as f64 / self.steps.len() as f64 * 100.0;
            self.progress = self.progress.max(live);
        }
        self.progress
    }

    /// Names of steps currently `Running`, in template order.
    pub fn running_steps(&self) -> Vec<String> {
        self.names_in(ExecutionState::Running)
    }

    /// Names of steps that failed permanently, in template order.
    pub fn failed_steps(&self) -> Vec<String> {
        self.names_in(ExecutionState::Failed)
    }

    fn names_in(&self, state: ExecutionState) -> Vec<String> {
        self.steps
            .iter()
            .filter(|s| s.state == state)
            .map(|s| s.name.clone())
            .collect()
    }

    /// Returns true if every step is `Completed`.
    pub fn all_completed(&self) -> bool {
        !self.steps.is_empty()
            && self
                .steps
                .iter()
                .all(|s| s.state == ExecutionState::Completed)
    }

    /// Returns true if any step failed permanently.
    pub fn has_failures(&self) -> bool {
        self.steps.iter().any(|s| s.state == ExecutionState::Failed)
    }

    /// `Pending` -> `Running`. Returns false if the workflow was not pending.
    pub fn start(&mut self, now: DateTime<Utc>) -> bool {
        if self.state != ExecutionState::Pending {
            return false;
        }
        self.state = ExecutionState::Running;
        self.started_at = Some(now);
        true
    }

    /// Moves a non-terminal workflow into a terminal state.
    ///
    /// `Completed` and `Failed` are only reachable from `Running`;
    /// `Cancelled` is reachable from `Pending` too. Returns false when the
    /// transition is not allowed.
    pub fn finish(&mut self, state: ExecutionState, now: DateTime<Utc>) -> bool {
        let allowed = match (self.state, state) {
            (ExecutionState::Running, s) if s.is_terminal() => true,
            (ExecutionState::Pending, ExecutionState::Cancelled) => true,
            _ => false,
        };
        if allowed {
            self.state = state;
            self.finished_at = Some(now);
        }
        allowed
    }

    /// Marks a pending step as running. Refuses if any prerequisite is not completed.
    pub fn mark_step_running(&mut self, name: &str, now: DateTime<Utc>) -> bool {
        let deps_done = match self.step(name) {
            Some(step) if step.state == ExecutionState::Pending => {
                step.dependencies.iter().all(|dep| {
                    self.step(dep)
                        .is_some_and(|d| d.state == ExecutionState::Completed)
                })
            }
            _ => false,
        };
        if !deps_done {
            return false;
        }

        if let Some(step) = self.step_mut(name) {
            step.state = ExecutionState::Running;
            step.started_at = Some(now);
        }
        true
    }

    /// Records a successful result for a running step.
    pub fn complete_step(
        &mut self,
        name: &str,
        result: JsonValue,
        attempts: u32,
        now: DateTime<Utc>,
    ) -> bool {
        let Some(step) = self.running_step_mut(name) else {
            return false;
        };
        step.finish(ExecutionState::Completed, attempts, now);
        step.result = Some(result.clone());
        self.outputs.insert(name.to_string(), result);
        true
    }

    /// Records a permanent failure for a running step.
    pub fn fail_step(&mut self, name: &str, failure: StepFailure, now: DateTime<Utc>) -> bool {
        let Some(step) = self.running_step_mut(name) else {
            return false;
        };
        step.finish(ExecutionState::Failed, failure.attempts, now);
        step.failure = Some(failure);
        true
    }

    /// Relabels a running step as cancelled.
    pub fn cancel_step(&mut self, name: &str, attempts: u32, now: DateTime<Utc>) -> bool {
        let Some(step) = self.running_step_mut(name) else {
            return false;
        };
        step.finish(ExecutionState::Cancelled, attempts, now);
        step.failure = Some(StepFailure::from_step_error(
            &StepError::Cancelled {
                step: name.to_string(),
            },
            attempts,
        ));
        true
    }

    /// Relabels every running step as cancelled. Returns how many were changed.
    pub fn cancel_running_steps(&mut self, now: DateTime<Utc>) -> usize {
        let mut cancelled = 0;
        for name in self.running_steps() {
            if self.cancel_step(&name, 1, now) {
                cancelled += 1;
            }
        }
        cancelled
    }

    fn step_mut(&mut self, name: &str) -> Option<&mut StepInstance> {
        self.steps.iter_mut().find(|s| s.name == name)
    }

    fn running_step_mut(&mut self, name: &str) -> Option<&mut StepInstance> {
        self.step_mut(name)
            .filter(|s| s.state == ExecutionState::Running)
    }
}

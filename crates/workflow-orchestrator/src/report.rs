//! Caller-facing snapshots of workflow state.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

use crate::workflow::{ExecutionState, Priority, StepFailure, StepInstance, Workflow};

/// Per-step breakdown.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepReport {
    pub name: String,
    pub agent_id: String,
    pub state: ExecutionState,
    pub result: Option<JsonValue>,
    pub failure: Option<StepFailure>,
    /// Attempts made; 0 if the step never started.
    pub attempts: u32,
    pub started_at: Option<DateTime<Utc>>,
    pub ended_at: Option<DateTime<Utc>>,
    pub elapsed: Option<Duration>,
}

impl From<&StepInstance> for StepReport {
    fn from(step: &StepInstance) -> Self {
        let attempts = if step.started_at.is_some() {
            step.retry_count + 1
        } else {
            0
        };
        Self {
            name: step.name.clone(),
            agent_id: step.agent_id.clone(),
            state: step.state,
            result: step.result.clone(),
            failure: step.failure.clone(),
            attempts,
            started_at: step.started_at,
            ended_at: step.ended_at,
            elapsed: step.elapsed(),
        }
    }
}

/// Returned by `execute_workflow` once the workflow is terminal.
///
/// A failed or cancelled workflow still carries the results of every step
/// that completed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutionReport {
    pub workflow_id: String,
    pub final_state: ExecutionState,
    pub steps: Vec<StepReport>,
    pub outputs: BTreeMap<String, JsonValue>,
    pub failed_steps: Vec<String>,
    pub total_elapsed: Duration,
    /// Step names dispatched in each wave, in order.
    pub waves: Vec<Vec<String>>,
}

impl ExecutionReport {
    pub(crate) fn new(
        workflow: &Workflow,
        total_elapsed: Duration,
        waves: Vec<Vec<String>>,
    ) -> Self {
        Self {
            workflow_id: workflow.id.clone(),
            final_state: workflow.state(),
            steps: workflow.steps().iter().map(StepReport::from).collect(),
            outputs: workflow.outputs().clone(),
            failed_steps: workflow.failed_steps(),
            total_elapsed,
            waves,
        }
    }

    pub fn is_success(&self) -> bool {
        self.final_state == ExecutionState::Completed
    }

    pub fn step(&self, name: &str) -> Option<&StepReport> {
        self.steps.iter().find(|s| s.name == name)
    }
}

/// A consistent point-in-time view of one workflow.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowStatus {
    pub workflow_id: String,
    pub name: String,
    pub template_id: String,
    pub state: ExecutionState,
    pub progress_percentage: f64,
    pub running_steps: Vec<String>,
    pub completed_steps: usize,
    pub total_steps: usize,
    pub steps: Vec<StepReport>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
    pub estimated_completion: Option<DateTime<Utc>>,
}

impl From<&Workflow> for WorkflowStatus {
    fn from(workflow: &Workflow) -> Self {
        Self {
            workflow_id: workflow.id.clone(),
            name: workflow.name.clone(),
            template_id: workflow.template_id.clone(),
            state: workflow.state(),
            progress_percentage: workflow.progress_percentage(),
            running_steps: workflow.running_steps(),
            completed_steps: workflow.completed_count(),
            total_steps: workflow.steps().len(),
            steps: workflow.steps().iter().map(StepReport::from).collect(),
            created_at: workflow.created_at,
            started_at: workflow.started_at(),
            finished_at: workflow.finished_at(),
            estimated_completion: workflow.estimated_completion,
        }
    }
}

/// One row of `list_workflows`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowSummary {
    pub workflow_id: String,
    pub name: String,
    pub template_id: String,
    pub state: ExecutionState,
    pub progress_percentage: f64,
    pub requested_by: String,
    pub priority: Priority,
    pub created_at: DateTime<Utc>,
}

impl From<&Workflow> for WorkflowSummary {
    fn from(workflow: &Workflow) -> Self {
        Self {
            workflow_id: workflow.id.clone(),
            name: workflow.name.clone(),
            template_id: workflow.template_id.clone(),
            state: workflow.state(),
            progress_percentage: workflow.progress_percentage(),
            requested_by: workflow.requested_by.clone(),
            priority: workflow.priority,
            created_at: workflow.created_at,
        }
    }
}

/// Rows of `list_workflows` plus counts over those rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowListing {
    pub workflows: Vec<WorkflowSummary>,
    pub total: usize,
    /// Rows currently `Running`.
    pub active: usize,
    pub completed: usize,
    pub failed: usize,
}

impl WorkflowListing {
    pub fn new(workflows: Vec<WorkflowSummary>) -> Self {
        let count = |state: ExecutionState| workflows.iter().filter(|w| w.state == state).count();
        Self {
            total: workflows.len(),
            active: count(ExecutionState::Running),
            completed: count(ExecutionState::Completed),
            failed: count(ExecutionState::Failed),
            workflows,
        }
    }
}

/// Optional filters for `list_workflows`. Unset fields match everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkflowFilter {
    pub requested_by: Option<String>,
    pub state: Option<ExecutionState>,
}

impl WorkflowFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requested_by(mut self, requester: impl Into<String>) -> Self {
        self.requested_by = Some(requester.into());
        self
    }

    pub fn state(mut self, state: ExecutionState) -> Self {
        self.state = Some(state);
        self
    }

    pub fn matches(&self, workflow: &Workflow) -> bool {
        self.requested_by
            .as_deref()
            .is_none_or(|r| r == workflow.requested_by)
            && self.state.is_none_or(|s| s == workflow.state())
    }
}

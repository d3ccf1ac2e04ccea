//! Error types for workflow orchestration.

use std::time::Duration;

use thiserror::Error;

use crate::dispatch::DispatchError;
use crate::workflow::ExecutionState;

/// Result type for caller-facing engine operations.
pub type Result<T> = std::result::Result<T, WorkflowError>;

/// Errors surfaced synchronously to callers of the engine.
///
/// Step-level failures are never reported through this type; they are
/// recorded on the step itself (see [`StepError`]) and the workflow ends in
/// the `Failed` state instead.
#[derive(Debug, Error)]
pub enum WorkflowError {
    /// The referenced template id is not registered.
    #[error("Unknown template: {0}")]
    UnknownTemplate(String),

    /// A template's step graph contains a dependency cycle.
    #[error("Template '{template_id}' has a dependency cycle: {}", cycle.join(" -> "))]
    CyclicTemplate {
        template_id: String,
        /// Step names along the cycle, first name repeated at the end.
        cycle: Vec<String>,
    },

    /// A template is structurally invalid (empty, duplicate or dangling step names).
    #[error("Invalid template '{template_id}': {reason}")]
    InvalidTemplate { template_id: String, reason: String },

    /// No workflow with the given id is tracked by the manager.
    #[error("Workflow not found: {0}")]
    WorkflowNotFound(String),

    /// The requested operation is not allowed in the workflow's current state.
    #[error("Cannot {operation} workflow {workflow_id} in state {state}")]
    IllegalState {
        workflow_id: String,
        state: ExecutionState,
        operation: &'static str,
    },

    /// The manager has been shut down and accepts no new work.
    #[error("Workflow engine is shutting down")]
    ShuttingDown,

    /// Engine configuration was rejected.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// JSON parsing error while loading templates or configuration.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// I/O error while reading configuration from disk.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl WorkflowError {
    /// Creates an `InvalidTemplate` error.
    pub fn invalid_template(template_id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidTemplate {
            template_id: template_id.into(),
            reason: reason.into(),
        }
    }
}

/// Why a single step attempt (or the step as a whole) did not succeed.
#[derive(Debug, Clone, Error)]
pub enum StepError {
    /// The agent reported an error.
    #[error("Dispatch failed: {0}")]
    Dispatch(#[from] DispatchError),

    /// The attempt did not finish within the step's timeout.
    #[error("Step {step} timed out after {timeout:?}")]
    Timeout { step: String, timeout: Duration },

    /// The workflow was cancelled before the step could finish.
    #[error("Step {step} was cancelled")]
    Cancelled { step: String },
}

impl StepError {
    /// Returns true if another attempt may succeed.
    ///
    /// Timeouts are retried exactly like transient dispatch errors.
    pub fn is_retryable(&self) -> bool {
        match self {
            StepError::Dispatch(e) => e.is_retryable(),
            StepError::Timeout { .. } => true,
            StepError::Cancelled { .. } => false,
        }
    }
}

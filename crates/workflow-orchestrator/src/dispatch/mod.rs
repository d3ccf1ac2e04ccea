//! Worker-agent boundary.
//!
//! The engine hands each step to an [`AgentDispatcher`] as a [`Task`]. What
//! the task payload and the returned result contain is the agent's business;
//! the engine only cares whether the call succeeded and, if not, whether the
//! failure is worth retrying.

pub mod registry;
pub mod retry;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as JsonValue};
use thiserror::Error;
use tracing::debug;

use crate::workflow::{StepInstance, Workflow};

/// A unit of work sent to a worker agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    /// `"{workflow_id}_{step_name}"`.
    pub task_id: String,
    /// The step name.
    pub task_type: String,
    /// Capability id used for routing.
    pub agent_id: String,
    pub input_data: JsonValue,
    /// 1-10, higher is more urgent.
    pub priority: u8,
    pub max_retries: u32,
}

impl Task {
    /// Builds the task for one step of a workflow.
    ///
    /// `input_data` is the workflow input with the result of every step that
    /// has already completed merged in under its step name. Non-object inputs
    /// are wrapped as `{"input": <value>}` first. A step result replaces an
    /// input field of the same name.
    pub fn for_step(workflow: &Workflow, step: &StepInstance) -> Self {
        let mut data = match &**workflow.input() {
            JsonValue::Object(map) => map.clone(),
            JsonValue::Null => Map::new(),
            other => {
                let mut map = Map::new();
                map.insert("input".to_string(), other.clone());
                map
            }
        };
        for (name, result) in workflow.outputs() {
            if data.insert(name.clone(), result.clone()).is_some() {
                debug!(
                    workflow_id = %workflow.id,
                    field = %name,
                    "Step result shadows input field"
                );
            }
        }

        Self {
            task_id: format!("{}_{}", workflow.id, step.name),
            task_type: step.name.clone(),
            agent_id: step.agent_id.clone(),
            input_data: JsonValue::Object(data),
            priority: workflow.priority.task_priority(),
            max_retries: step.max_retries,
        }
    }
}

/// Error reported by a worker agent.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct DispatchError {
    /// Whether another attempt may succeed.
    pub transient: bool,
    pub message: String,
}

impl DispatchError {
    /// A failure worth retrying (overload, connection reset, rate limit).
    pub fn transient(message: impl Into<String>) -> Self {
        Self {
            transient: true,
            message: message.into(),
        }
    }

    /// A failure that will not go away on retry (bad input, unknown agent).
    pub fn permanent(message: impl Into<String>) -> Self {
        Self {
            transient: false,
            message: message.into(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.transient
    }
}

/// Invokes worker agents.
///
/// Implemented once per deployment. A single dispatcher may route by
/// `task.agent_id` (as [`registry::AgentRegistry`] does) or serve a single
/// capability. Retries and timeouts are applied around this call by the
/// engine, so implementations make exactly one attempt.
#[async_trait]
pub trait AgentDispatcher: Send + Sync {
    async fn dispatch(&self, task: Task) -> Result<JsonValue, DispatchError>;
}

//! Typed workflow templates.
//!
//! A [`WorkflowTemplate`] is the immutable, reusable definition of a workflow
//! type: its ordered [`StepDefinition`]s and their dependency graph.
//! Templates are validated once, when they are registered.

use std::collections::HashSet;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::config::duration_secs;
use crate::error::{Result, WorkflowError};
use crate::graph::DependencyGraph;

const DEFAULT_STEP_TIMEOUT: Duration = Duration::from_secs(10 * 60);
const DEFAULT_MAX_RETRIES: u32 = 2;

fn default_step_timeout() -> Duration {
    DEFAULT_STEP_TIMEOUT
}

fn default_max_retries() -> u32 {
    DEFAULT_MAX_RETRIES
}

/// One step of a template.
///
/// # Examples
///
/// ```ignore
/// use workflow_orchestrator::StepDefinition;
/// use std::time::Duration;
///
/// let step = StepDefinition::new("risk_analysis", "risk_assessment")
///     .with_dependencies(["data_extraction", "data_validation"])
///     .with_timeout(Duration::from_secs(15 * 60))
///     .with_max_retries(1);
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepDefinition {
    /// Unique within the template.
    pub name: String,
    /// Capability id of the worker agent that runs this step.
    pub agent_id: String,
    #[serde(default)]
    pub dependencies: Vec<String>,
    /// Per-attempt timeout.
    #[serde(
        rename = "timeout_secs",
        with = "duration_secs",
        default = "default_step_timeout"
    )]
    pub timeout: Duration,
    /// Retries after the first attempt.
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl StepDefinition {
    /// Creates a step with no dependencies, a 10 minute timeout and 2 retries.
    pub fn new(name: impl Into<String>, agent_id: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            agent_id: agent_id.into(),
            dependencies: Vec::new(),
            timeout: DEFAULT_STEP_TIMEOUT,
            max_retries: DEFAULT_MAX_RETRIES,
        }
    }

    pub fn with_dependencies<I, S>(mut self, dependencies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies = dependencies.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }
}

/// A named, reusable workflow definition.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTemplate {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub description: String,
    pub steps: Vec<StepDefinition>,
    /// Advisory estimate of the whole run.
    #[serde(
        rename = "estimated_duration_secs",
        with = "duration_secs",
        default
    )]
    pub estimated_duration: Duration,
}

impl WorkflowTemplate {
    pub fn new(id: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            description: String::new(),
            steps: Vec::new(),
            estimated_duration: Duration::ZERO,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_step(mut self, step: StepDefinition) -> Self {
        self.steps.push(step);
        self
    }

    pub fn with_estimated_duration(mut self, estimate: Duration) -> Self {
        self.estimated_duration = estimate;
        self
    }

    pub fn step(&self, name: &str) -> Option<&StepDefinition> {
        self.steps.iter().find(|s| s.name == name)
    }

    /// Parses a template from JSON. The result is not validated yet.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Checks the template is a well-formed DAG.
    ///
    /// Rejects empty templates, duplicate step names, zero timeouts and
    /// dependencies on unknown steps with `InvalidTemplate`, and dependency
    /// cycles with `CyclicTemplate`.
    pub fn validate(&self) -> Result<()> {
        if self.steps.is_empty() {
            return Err(WorkflowError::invalid_template(&self.id, "template has no steps"));
        }

        let mut seen = HashSet::new();
        for step in &self.steps {
            if !seen.insert(step.name.as_str()) {
                return Err(WorkflowError::invalid_template(
                    &self.id,
                    format!("duplicate step name '{}'", step.name),
                ));
            }
            if step.timeout.is_zero() {
                return Err(WorkflowError::invalid_template(
                    &self.id,
                    format!("step '{}' has a zero timeout", step.name),
                ));
            }
        }

        for step in &self.steps {
            if let Some(missing) = step
                .dependencies
                .iter()
                .find(|dep| !seen.contains(dep.as_str()))
            {
                return Err(WorkflowError::invalid_template(
                    &self.id,
                    format!("step '{}' depends on unknown step '{}'", step.name, missing),
                ));
            }
        }

        if let Some(cycle) = self.dependency_graph().find_cycle() {
            return Err(WorkflowError::CyclicTemplate {
                template_id: self.id.clone(),
                cycle,
            });
        }

        Ok(())
    }

    pub fn dependency_graph(&self) -> DependencyGraph {
        DependencyGraph::from_steps(&self.steps)
    }
}

//! Shared mock dispatchers and fixtures for the integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use tokio::sync::Mutex;
use workflow_orchestrator::{
    AgentDispatcher, DispatchError, EngineConfig, RetryPolicy, StepDefinition, Task,
    TemplateRegistry, WorkflowTemplate,
};

// ============================================================================
// Mock Dispatcher
// ============================================================================

/// What the mock does when a step is dispatched.
#[derive(Debug, Clone)]
pub enum Behavior {
    Succeed,
    FailPermanent,
    /// Fails transiently on the first `times` calls, then succeeds.
    FailTransient { times: u32 },
    AlwaysTransient,
}

/// Dispatcher scripted per step name (`task.task_type`).
///
/// Records every task it receives and the peak number of concurrent calls.
pub struct ScriptedDispatcher {
    behaviors: HashMap<String, Behavior>,
    delays: HashMap<String, Duration>,
    default_delay: Duration,
    calls: Mutex<HashMap<String, u32>>,
    tasks: Mutex<Vec<Task>>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl ScriptedDispatcher {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            delays: HashMap::new(),
            default_delay: Duration::from_millis(20),
            calls: Mutex::new(HashMap::new()),
            tasks: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }

    pub fn with_behavior(mut self, step: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(step.to_string(), behavior);
        self
    }

    pub fn with_delay(mut self, step: &str, delay: Duration) -> Self {
        self.delays.insert(step.to_string(), delay);
        self
    }

    pub fn with_default_delay(mut self, delay: Duration) -> Self {
        self.default_delay = delay;
        self
    }

    pub async fn calls(&self, step: &str) -> u32 {
        self.calls.lock().await.get(step).copied().unwrap_or(0)
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.tasks.lock().await.clone()
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AgentDispatcher for ScriptedDispatcher {
    async fn dispatch(&self, task: Task) -> Result<JsonValue, DispatchError> {
        let step = task.task_type.clone();
        let call = {
            let mut calls = self.calls.lock().await;
            let count = calls.entry(step.clone()).or_insert(0);
            *count += 1;
            *count
        };
        self.tasks.lock().await.push(task);

        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let delay = self.delays.get(&step).copied().unwrap_or(self.default_delay);
        tokio::time::sleep(delay).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        match self.behaviors.get(&step).cloned().unwrap_or(Behavior::Succeed) {
            Behavior::Succeed => Ok(json!({ "step": step, "call": call })),
            Behavior::FailPermanent => {
                Err(DispatchError::permanent(format!("{step} rejected input")))
            }
            Behavior::FailTransient { times } if call <= times => {
                Err(DispatchError::transient(format!("{step} busy")))
            }
            Behavior::FailTransient { .. } => Ok(json!({ "step": step, "call": call })),
            Behavior::AlwaysTransient => Err(DispatchError::transient(format!("{step} busy"))),
        }
    }
}

// ============================================================================
// Fixtures
// ============================================================================

/// `A`, `B(A)`, `C(A)`, `D(B, C)`.
pub fn diamond_template() -> WorkflowTemplate {
    WorkflowTemplate::new("diamond", "Diamond Analysis")
        .with_step(StepDefinition::new("A", "data_extraction_agent"))
        .with_step(StepDefinition::new("B", "financial_analysis_agent").with_dependencies(["A"]))
        .with_step(StepDefinition::new("C", "market_analysis_agent").with_dependencies(["A"]))
        .with_step(
            StepDefinition::new("D", "report_generation_agent").with_dependencies(["B", "C"]),
        )
        .with_estimated_duration(Duration::from_secs(60))
}

/// `count` steps with no dependencies.
pub fn fan_out_template(id: &str, count: usize) -> WorkflowTemplate {
    (0..count).fold(WorkflowTemplate::new(id, "Fan Out"), |template, i| {
        template.with_step(StepDefinition::new(format!("step_{i}"), "worker_agent"))
    })
}

pub fn registry_with(templates: Vec<WorkflowTemplate>) -> Arc<TemplateRegistry> {
    let mut registry = TemplateRegistry::new();
    for template in templates {
        registry.register(template).expect("template should be valid");
    }
    Arc::new(registry)
}

/// Default limits with millisecond backoff.
pub fn fast_config() -> EngineConfig {
    EngineConfig::new().with_retry_policy(RetryPolicy::new(Duration::from_millis(5)))
}

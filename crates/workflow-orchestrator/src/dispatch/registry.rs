//! Routes tasks to registered worker agents by capability id.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::Semaphore;
use tracing::debug;

use super::{AgentDispatcher, DispatchError, Task};

/// Description of a worker agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentInfo {
    /// Capability id that steps reference.
    pub id: String,
    pub display_name: String,
    #[serde(default)]
    pub capabilities: Vec<String>,
    /// Tasks this agent accepts at once. Further tasks wait.
    pub max_concurrent_tasks: usize,
}

impl AgentInfo {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
            capabilities: Vec::new(),
            max_concurrent_tasks: 3,
        }
    }

    pub fn with_capabilities<I, S>(mut self, capabilities: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.capabilities = capabilities.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_max_concurrent_tasks(mut self, max: usize) -> Self {
        self.max_concurrent_tasks = max.max(1);
        self
    }
}

/// Live load of one agent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentStatus {
    pub id: String,
    pub display_name: String,
    pub current_tasks: usize,
    pub max_concurrent_tasks: usize,
    pub load_percentage: f64,
}

struct AgentEntry {
    info: AgentInfo,
    dispatcher: Arc<dyn AgentDispatcher>,
    slots: Arc<Semaphore>,
}

/// A dispatcher that forwards each task to the agent registered for its
/// `agent_id`, holding one of that agent's task slots for the duration of
/// the call.
#[derive(Default)]
pub struct AgentRegistry {
    agents: HashMap<String, AgentEntry>,
}

impl AgentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers (or replaces) the agent serving `info.id`.
    pub fn register(&mut self, info: AgentInfo, dispatcher: Arc<dyn AgentDispatcher>) {
        let slots = Arc::new(Semaphore::new(info.max_concurrent_tasks.max(1)));
        self.agents.insert(
            info.id.clone(),
            AgentEntry {
                info,
                dispatcher,
                slots,
            },
        );
    }

    pub fn with_agent(mut self, info: AgentInfo, dispatcher: Arc<dyn AgentDispatcher>) -> Self {
        self.register(info, dispatcher);
        self
    }

    pub fn contains(&self, agent_id: &str) -> bool {
        self.agents.contains_key(agent_id)
    }

    pub fn info(&self, agent_id: &str) -> Option<&AgentInfo> {
        self.agents.get(agent_id).map(|entry| &entry.info)
    }

    /// Agents advertising the given capability tag.
    pub fn find_by_capability(&self, capability: &str) -> Vec<&AgentInfo> {
        let mut found: Vec<&AgentInfo> = self
            .agents
            .values()
            .map(|entry| &entry.info)
            .filter(|info| info.capabilities.iter().any(|c| c == capability))
            .collect();
        found.sort_by(|a, b| a.id.cmp(&b.id));
        found
    }

    /// Current load of every agent, sorted by id.
    pub fn status(&self) -> Vec<AgentStatus> {
        let mut statuses: Vec<AgentStatus> = self
            .agents
            .values()
            .map(|entry| {
                let max = entry.info.max_concurrent_tasks.max(1);
                let current = max.saturating_sub(entry.slots.available_permits());
                AgentStatus {
                    id: entry.info.id.clone(),
                    display_name: entry.info.display_name.clone(),
                    current_tasks: current,
                    max_concurrent_tasks: max,
                    load_percentage: current as f64 / max as f64 * 100.0,
                }
            })
            .collect();
        statuses.sort_by(|a, b| a.id.cmp(&b.id));
        statuses
    }
}

#[async_trait]
impl AgentDispatcher for AgentRegistry {
    async fn dispatch(&self, task: Task) -> Result<JsonValue, DispatchError> {
        let entry = self.agents.get(&task.agent_id).ok_or_else(|| {
            DispatchError::permanent(format!("Agent {} not found", task.agent_id))
        })?;

        let _permit = entry
            .slots
            .acquire()
            .await
            .map_err(|_| DispatchError::permanent(format!("Agent {} is closed", task.agent_id)))?;

        debug!(agent_id = %task.agent_id, task_id = %task.task_id, "Dispatching task");
        entry.dispatcher.dispatch(task).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::time::Duration;

    struct EchoAgent;

    #[async_trait]
    impl AgentDispatcher for EchoAgent {
        async fn dispatch(&self, task: Task) -> Result<JsonValue, DispatchError> {
            Ok(json!({"handled": task.task_type}))
        }
    }

    struct SleepyAgent;

    #[async_trait]
    impl AgentDispatcher for SleepyAgent {
        async fn dispatch(&self, _task: Task) -> Result<JsonValue, DispatchError> {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok(json!(null))
        }
    }

    fn task(agent_id: &str) -> Task {
        Task {
            task_id: "wf_step".to_string(),
            task_type: "step".to_string(),
            agent_id: agent_id.to_string(),
            input_data: json!({}),
            priority: 5,
            max_retries: 0,
        }
    }

    #[tokio::test]
    async fn test_routes_by_agent_id() {
        let registry = AgentRegistry::new().with_agent(
            AgentInfo::new("echo_agent", "Echo Agent"),
            Arc::new(EchoAgent),
        );

        let result = registry.dispatch(task("echo_agent")).await.unwrap();
        assert_eq!(result, json!({"handled": "step"}));
    }

    #[tokio::test]
    async fn test_unknown_agent_is_permanent_error() {
        let registry = AgentRegistry::new();
        let err = registry.dispatch(task("ghost_agent")).await.unwrap_err();
        assert!(!err.is_retryable());
        assert!(err.message.contains("ghost_agent"));
    }

    #[tokio::test]
    async fn test_status_reports_load() {
        let registry = Arc::new(AgentRegistry::new().with_agent(
            AgentInfo::new("sleepy_agent", "Sleepy Agent").with_max_concurrent_tasks(2),
            Arc::new(SleepyAgent),
        ));

        let background = {
            let registry = Arc::clone(&registry);
            tokio::spawn(async move { registry.dispatch(task("sleepy_agent")).await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;

        let status = registry.status();
        assert_eq!(status.len(), 1);
        assert_eq!(status[0].current_tasks, 1);
        assert_eq!(status[0].load_percentage, 50.0);

        background.await.unwrap().unwrap();
        assert_eq!(registry.status()[0].current_tasks, 0);
    }

    #[test]
    fn test_find_by_capability() {
        let registry = AgentRegistry::new()
            .with_agent(
                AgentInfo::new("data_extraction_agent", "Data Extraction")
                    .with_capabilities(["ocr", "data_extraction"]),
                Arc::new(EchoAgent),
            )
            .with_agent(
                AgentInfo::new("risk_assessment_agent", "Risk Assessment")
                    .with_capabilities(["risk_scoring"]),
                Arc::new(EchoAgent),
            );

        let found = registry.find_by_capability("ocr");
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].id, "data_extraction_agent");
        assert!(registry.contains("risk_assessment_agent"));
        assert!(registry.info("missing").is_none());
    }
}

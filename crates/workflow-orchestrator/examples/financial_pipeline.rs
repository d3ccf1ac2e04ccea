//! Runs the stock comprehensive-analysis workflow against simulated agents.
//!
//! ```sh
//! RUST_LOG=info cargo run --example financial_pipeline
//! ```

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{Value as JsonValue, json};
use workflow_orchestrator::observability::{self, ObservabilityConfig};
use workflow_orchestrator::{
    AgentDispatcher, AgentInfo, AgentRegistry, ChannelNotifier, DispatchError, EngineConfig,
    Priority, RetryPolicy, Task, TemplateRegistry, WorkflowFilter, WorkflowManager, builtin,
};

/// Pretends to analyse by sleeping, and reports which inputs it saw.
struct SimulatedAgent {
    latency: Duration,
}

#[async_trait]
impl AgentDispatcher for SimulatedAgent {
    async fn dispatch(&self, task: Task) -> Result<JsonValue, DispatchError> {
        tokio::time::sleep(self.latency).await;
        let seen: Vec<String> = task
            .input_data
            .as_object()
            .map(|m| m.keys().cloned().collect())
            .unwrap_or_default();
        Ok(json!({ "analysis": task.task_type, "based_on": seen }))
    }
}

fn agents_for(registry: &TemplateRegistry) -> anyhow::Result<AgentRegistry> {
    let template = registry.get(builtin::COMPREHENSIVE_ANALYSIS)?;
    let mut agents = AgentRegistry::new();
    for step in &template.steps {
        if agents.contains(&step.agent_id) {
            continue;
        }
        agents.register(
            AgentInfo::new(&step.agent_id, step.agent_id.replace('_', " "))
                .with_capabilities([step.name.clone()])
                .with_max_concurrent_tasks(3),
            Arc::new(SimulatedAgent {
                latency: Duration::from_millis(150),
            }),
        );
    }
    Ok(agents)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    observability::init(ObservabilityConfig::default())
        .map_err(|e| anyhow::anyhow!("failed to initialise logging: {e}"))?;

    let registry = Arc::new(TemplateRegistry::with_builtin_templates()?);
    for id in registry.ids() {
        let waves = registry.plan(&id)?;
        println!("{id}: {} waves", waves.len());
    }

    let agents = Arc::new(agents_for(&registry)?);
    let config = EngineConfig::new()
        .with_max_concurrent_steps(4)
        .with_retry_policy(RetryPolicy::new(Duration::from_millis(200)));
    let (notifier, mut events) = ChannelNotifier::new();
    let manager = Arc::new(
        WorkflowManager::with_config(registry, agents.clone(), config)?
            .with_notifier(Arc::new(notifier)),
    );

    tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            println!("[event] {} {}", event.kind.as_str(), event.workflow_id);
        }
    });

    let id = manager
        .create_workflow(
            builtin::COMPREHENSIVE_ANALYSIS,
            json!({ "company": "ACME Holdings", "fiscal_year": 2024 }),
            Priority::High,
            "analyst@example.com",
        )
        .await?;
    let execution = manager.spawn_execution(&id);

    loop {
        let status = manager.status(&id).await?;
        println!(
            "{:>5.1}% running={:?}",
            status.progress_percentage, status.running_steps
        );
        if status.state.is_terminal() {
            break;
        }
        for agent in agents.status().iter().filter(|a| a.current_tasks > 0) {
            println!("    {} at {:.0}% load", agent.id, agent.load_percentage);
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    let report = execution.await??;
    println!(
        "{} finished as {} in {:?} over {} waves",
        report.workflow_id,
        report.final_state,
        report.total_elapsed,
        report.waves.len()
    );
    for summary in manager.list_workflows(&WorkflowFilter::new()).await {
        println!("{} {} {:.0}%", summary.workflow_id, summary.state, summary.progress_percentage);
    }
    println!("{:?}", manager.stats().await);

    manager.shutdown().await;
    Ok(())
}

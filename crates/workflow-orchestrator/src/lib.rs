//! 'workflow-orchestrator' - Runs multi-step analysis workflows across a pool
//! of worker agents.
//!
//! A workflow is a DAG of steps defined by a registered template. The engine
//! executes it in waves: every step whose prerequisites have completed runs
//! concurrently, bounded by per-wave and engine-wide limits, with per-attempt
//! timeouts and exponential-backoff retries. Workflows can be watched with
//! `status()` and cancelled cooperatively while they run.
//!
//! # Quick start
//!
//! ```ignore
//! use std::sync::Arc;
//! use async_trait::async_trait;
//! use serde_json::{Value, json};
//! use workflow_orchestrator::{
//!     AgentDispatcher, DispatchError, Priority, Task, TemplateRegistry, WorkflowManager,
//! };
//!
//! struct MyAgents;
//!
//! #[async_trait]
//! impl AgentDispatcher for MyAgents {
//!     async fn dispatch(&self, task: Task) -> Result<Value, DispatchError> {
//!         Ok(json!({ "handled": task.task_type }))
//!     }
//! }
//!
//! let registry = Arc::new(TemplateRegistry::with_builtin_templates()?);
//! let manager = WorkflowManager::new(registry, Arc::new(MyAgents));
//!
//! let id = manager
//!     .create_workflow("esg_evaluation", json!({"company": "ACME"}), Priority::High, "analyst")
//!     .await?;
//! let report = manager.execute_workflow(&id).await?;
//! assert!(report.is_success());
//! ```

pub mod builtin;
pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod factory;
pub mod graph;
pub mod manager;
pub mod notify;
pub mod registry;
pub mod report;
pub mod scheduler;
pub mod stats;
pub mod template;
pub mod workflow;

#[cfg(feature = "observability")]
pub mod observability;

pub use config::EngineConfig;
pub use dispatch::registry::{AgentInfo, AgentRegistry, AgentStatus};
pub use dispatch::retry::RetryPolicy;
pub use dispatch::{AgentDispatcher, DispatchError, Task};
pub use error::{Result, StepError, WorkflowError};
pub use executor::{ParallelStepExecutor, StepOutcome};
pub use factory::WorkflowFactory;
pub use manager::{WorkflowHandle, WorkflowManager};
pub use notify::{
    ChannelNotifier, EventKind, LogNotifier, NotificationSink, NotifyError, WorkflowEvent,
};
pub use registry::TemplateRegistry;
pub use report::{
    ExecutionReport, StepReport, WorkflowFilter, WorkflowListing, WorkflowStatus, WorkflowSummary,
};
pub use stats::EngineStats;
pub use template::{StepDefinition, WorkflowTemplate};
pub use workflow::{ExecutionState, FailureKind, Priority, StepFailure, StepInstance, Workflow};

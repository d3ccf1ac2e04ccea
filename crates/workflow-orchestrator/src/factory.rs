//! Instantiates workflows from registered templates.

use std::sync::Arc;

use chrono::Utc;
use serde_json::Value as JsonValue;
use tracing::debug;
use uuid::Uuid;

use crate::error::Result;
use crate::registry::TemplateRegistry;
use crate::workflow::{Priority, StepInstance, Workflow};

/// Builds pending [`Workflow`]s. Has no side effects: the caller decides
/// whether to track the result with a manager.
#[derive(Debug, Clone)]
pub struct WorkflowFactory {
    registry: Arc<TemplateRegistry>,
}

impl WorkflowFactory {
    pub fn new(registry: Arc<TemplateRegistry>) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        &self.registry
    }

    /// Creates a workflow with a fresh id from `template_id`.
    ///
    /// Fails with `UnknownTemplate` if the id is not registered.
    pub fn create(
        &self,
        template_id: &str,
        input: JsonValue,
        priority: Priority,
        requested_by: impl Into<String>,
    ) -> Result<Workflow> {
        let template = self.registry.get(template_id)?;
        let now = Utc::now();
        let estimated_completion = chrono::Duration::from_std(template.estimated_duration)
            .ok()
            .filter(|estimate| !estimate.is_zero())
            .map(|estimate| now + estimate);

        let steps = template
            .steps
            .iter()
            .map(StepInstance::from_definition)
            .collect();

        let workflow = Workflow::new(
            Uuid::new_v4().to_string(),
            &template.id,
            &template.name,
            priority,
            requested_by,
            input,
            steps,
            now,
            estimated_completion,
        );
        debug!(
            workflow_id = %workflow.id,
            template_id = %template.id,
            steps = workflow.steps().len(),
            "Workflow instantiated"
        );
        Ok(workflow)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WorkflowError;
    use crate::workflow::ExecutionState;
    use serde_json::json;

    fn factory() -> WorkflowFactory {
        WorkflowFactory::new(Arc::new(TemplateRegistry::with_builtin_templates().unwrap()))
    }

    #[test]
    fn test_create_from_builtin() {
        let wf = factory()
            .create("esg_evaluation", json!({"company": "ACME"}), Priority::High, "analyst")
            .unwrap();

        assert_eq!(wf.template_id, "esg_evaluation");
        assert_eq!(wf.name, "ESG Sustainability Evaluation");
        assert_eq!(wf.state(), ExecutionState::Pending);
        assert_eq!(wf.steps().len(), 5);
        assert_eq!(wf.requested_by, "analyst");
        assert_eq!(**wf.input(), json!({"company": "ACME"}));

        let estimate = wf.estimated_completion.unwrap() - wf.created_at;
        assert_eq!(estimate.num_minutes(), 20);
    }

    #[test]
    fn test_ids_are_unique() {
        let factory = factory();
        let a = factory
            .create("risk_assessment", json!({}), Priority::Low, "a")
            .unwrap();
        let b = factory
            .create("risk_assessment", json!({}), Priority::Low, "a")
            .unwrap();
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_unknown_template() {
        let err = factory()
            .create("nonexistent", json!({}), Priority::Medium, "a")
            .unwrap_err();
        assert!(matches!(err, WorkflowError::UnknownTemplate(id) if id == "nonexistent"));
    }
}

//! Template registry.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::builtin;
use crate::error::{Result, WorkflowError};
use crate::template::WorkflowTemplate;

/// Named workflow templates.
///
/// Templates are registered at startup and read-only afterwards. The
/// registry is shared behind an `Arc` and read without locking.
#[derive(Debug, Clone, Default)]
pub struct TemplateRegistry {
    templates: HashMap<String, Arc<WorkflowTemplate>>,
}

impl TemplateRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// A registry pre-loaded with the stock financial-analysis templates.
    pub fn with_builtin_templates() -> Result<Self> {
        let mut registry = Self::new();
        for template in builtin::templates() {
            registry.register(template)?;
        }
        Ok(registry)
    }

    /// Validates and stores a template under its id.
    ///
    /// Invalid or cyclic templates are rejected and not stored. Registering
    /// an id twice replaces the earlier template.
    pub fn register(&mut self, template: WorkflowTemplate) -> Result<()> {
        if let Err(e) = template.validate() {
            warn!(template_id = %template.id, error = %e, "Template registration rejected");
            return Err(e);
        }

        debug!(
            template_id = %template.id,
            steps = template.steps.len(),
            "Template registered"
        );
        self.templates
            .insert(template.id.clone(), Arc::new(template));
        Ok(())
    }

    /// Parses a JSON template and registers it.
    pub fn register_json(&mut self, json: &str) -> Result<()> {
        self.register(WorkflowTemplate::from_json_str(json)?)
    }

    pub fn get(&self, template_id: &str) -> Result<Arc<WorkflowTemplate>> {
        self.templates
            .get(template_id)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownTemplate(template_id.to_string()))
    }

    pub fn contains(&self, template_id: &str) -> bool {
        self.templates.contains_key(template_id)
    }

    /// Registered template ids, sorted.
    pub fn ids(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.templates.keys().cloned().collect();
        ids.sort();
        ids
    }

    pub fn len(&self) -> usize {
        self.templates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.templates.is_empty()
    }

    /// The static wave layering of a template: which steps can run together
    /// when every step succeeds.
    pub fn plan(&self, template_id: &str) -> Result<Vec<Vec<String>>> {
        let template = self.get(template_id)?;
        let graph = template.dependency_graph();
        graph.waves().ok_or_else(|| WorkflowError::CyclicTemplate {
            template_id: template_id.to_string(),
            cycle: graph.find_cycle().unwrap_or_default(),
        })
    }
}

//! Dependency graph over step names.
//!
//! Used at template registration time to reject cycles and to compute the
//! static wave layering of a template.

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::template::StepDefinition;

/// A directed graph of step dependencies.
///
/// The graph keeps both forward edges (dependencies) and reverse edges
/// (dependents), plus the insertion order of nodes so that results such as
/// [`DependencyGraph::waves`] are deterministic.
///
/// # Examples
///
/// ```ignore
/// use workflow_orchestrator::graph::DependencyGraph;
///
/// let mut graph = DependencyGraph::new();
/// graph.add_dependency("validate", "extract");
///
/// assert!(graph.get_dependencies("validate").contains("extract"));
/// assert!(graph.get_dependents("extract").contains("validate"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Forward edges: step -> steps it depends on
    nodes: HashMap<String, BTreeSet<String>>,
    /// Reverse edges: step -> steps that depend on it
    reverse_edges: HashMap<String, BTreeSet<String>>,
    order: Vec<String>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph for a template's step list.
    pub fn from_steps(steps: &[StepDefinition]) -> Self {
        let mut graph = Self::new();
        for step in steps {
            graph.add_node(&step.name);
        }
        for step in steps {
            for dep in &step.dependencies {
                graph.add_dependency(&step.name, dep);
            }
        }
        graph
    }

    /// Adds a node without dependencies. No-op if it already exists.
    pub fn add_node(&mut self, step: &str) {
        if !self.nodes.contains_key(step) {
            self.nodes.insert(step.to_string(), BTreeSet::new());
            self.reverse_edges.insert(step.to_string(), BTreeSet::new());
            self.order.push(step.to_string());
        }
    }

    /// Adds an edge: `step` depends on `depends_on`. Missing nodes are created.
    pub fn add_dependency(&mut self, step: &str, depends_on: &str) {
        self.add_node(step);
        self.add_node(depends_on);

        if let Some(deps) = self.nodes.get_mut(step) {
            deps.insert(depends_on.to_string());
        }
        if let Some(dependents) = self.reverse_edges.get_mut(depends_on) {
            dependents.insert(step.to_string());
        }
    }

    /// Steps the given step depends on.
    pub fn get_dependencies(&self, step: &str) -> BTreeSet<String> {
        self.nodes.get(step).cloned().unwrap_or_default()
    }

    /// Steps that depend on the given step.
    pub fn get_dependents(&self, step: &str) -> BTreeSet<String> {
        self.reverse_edges.get(step).cloned().unwrap_or_default()
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Steps with no dependencies, in insertion order.
    pub fn roots(&self) -> Vec<String> {
        self.order
            .iter()
            .filter(|id| self.nodes.get(*id).is_some_and(|deps| deps.is_empty()))
            .cloned()
            .collect()
    }

    pub fn has_cycle(&self) -> bool {
        self.find_cycle().is_some()
    }

    /// Finds a dependency cycle using depth-first search.
    ///
    /// Returns the step names along the cycle with the first name repeated
    /// at the end (`["X", "Y", "X"]`), or `None` if the graph is acyclic.
    pub fn find_cycle(&self) -> Option<Vec<String>> {
        let mut visited = HashSet::new();
        let mut path = Vec::new();

        for node in &self.order {
            if let Some(cycle) = self.find_cycle_dfs(node, &mut visited, &mut path) {
                return Some(cycle);
            }
        }
        None
    }

    fn find_cycle_dfs(
        &self,
        node: &str,
        visited: &mut HashSet<String>,
        path: &mut Vec<String>,
    ) -> Option<Vec<String>> {
        if let Some(pos) = path.iter().position(|p| p == node) {
            // Back edge
            let mut cycle = path[pos..].to_vec();
            cycle.push(node.to_string());
            return Some(cycle);
        }
        if visited.contains(node) {
            return None;
        }

        visited.insert(node.to_string());
        path.push(node.to_string());

        if let Some(deps) = self.nodes.get(node) {
            for dep in deps {
                if let Some(cycle) = self.find_cycle_dfs(dep, visited, path) {
                    return Some(cycle);
                }
            }
        }

        path.pop();
        None
    }

    /// Layers the graph into waves (Kahn's algorithm).
    ///
    /// Wave `n` holds every step whose dependencies all sit in waves `< n`.
    /// Steps inside a wave keep insertion order. Returns `None` for cyclic
    /// graphs.
    pub fn waves(&self) -> Option<Vec<Vec<String>>> {
        let mut remaining: HashMap<&str, usize> = self
            .nodes
            .iter()
            .map(|(id, deps)| (id.as_str(), deps.len()))
            .collect();
        let mut waves = Vec::new();

        while !remaining.is_empty() {
            let wave: Vec<String> = self
                .order
                .iter()
                .filter(|id| remaining.get(id.as_str()) == Some(&0))
                .cloned()
                .collect();
            if wave.is_empty() {
                return None;
            }

            for id in &wave {
                remaining.remove(id.as_str());
                for dependent in self.reverse_edges.get(id).into_iter().flatten() {
                    if let Some(count) = remaining.get_mut(dependent.as_str()) {
                        *count -= 1;
                    }
                }
            }
            waves.push(wave);
        }

        Some(waves)
    }
}

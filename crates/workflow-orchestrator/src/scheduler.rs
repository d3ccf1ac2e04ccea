//! Dependency scheduling queries.
//!
//! Pure functions over a workflow's step states. They never mutate and are
//! safe to call as often as needed.

use crate::workflow::{ExecutionState, StepInstance, Workflow};

/// Names of the steps that may start now, in template order.
///
/// A step is ready when it is `Pending` and every prerequisite is
/// `Completed`.
pub fn ready_set(workflow: &Workflow) -> Vec<String> {
    workflow
        .steps()
        .iter()
        .filter(|step| is_ready(workflow, step))
        .map(|step| step.name.clone())
        .collect()
}

fn is_ready(workflow: &Workflow, step: &StepInstance) -> bool {
    step.state == ExecutionState::Pending
        && step.dependencies.iter().all(|dep| {
            workflow
                .step(dep)
                .is_some_and(|d| d.state == ExecutionState::Completed)
        })
}

/// True when the workflow can make no further progress: nothing is ready,
/// nothing is running, yet some step is still `Pending`.
///
/// For a registered (acyclic) template this only happens when a failed or
/// cancelled prerequisite blocks its descendants.
pub fn has_unresolvable(workflow: &Workflow) -> bool {
    let steps = workflow.steps();
    let any_pending = steps.iter().any(|s| s.state == ExecutionState::Pending);
    let any_running = steps.iter().any(|s| s.state == ExecutionState::Running);

    any_pending && !any_running && !steps.iter().any(|s| is_ready(workflow, s))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchError;
    use crate::error::StepError;
    use crate::template::StepDefinition;
    use crate::workflow::{Priority, StepFailure};
    use chrono::Utc;
    use serde_json::json;

    fn diamond() -> Workflow {
        let step = |name: &str, deps: &[&str]| {
            StepInstance::from_definition(
                &StepDefinition::new(name, "agent").with_dependencies(deps.iter().copied()),
            )
        };
        Workflow::new(
            "wf",
            "diamond",
            "Diamond",
            Priority::Medium,
            "tester",
            json!({}),
            vec![
                step("A", &[]),
                step("B", &["A"]),
                step("C", &["A"]),
                step("D", &["B", "C"]),
            ],
            Utc::now(),
            None,
        )
    }

    fn run_and_complete(wf: &mut Workflow, name: &str) {
        assert!(wf.mark_step_running(name, Utc::now()));
        assert!(wf.complete_step(name, json!(name), 1, Utc::now()));
    }

    #[test]
    fn test_initial_ready_set_is_roots() {
        let wf = diamond();
        assert_eq!(ready_set(&wf), vec!["A".to_string()]);
        assert!(!has_unresolvable(&wf));
    }

    #[test]
    fn test_ready_set_follows_completion() {
        let mut wf = diamond();
        run_and_complete(&mut wf, "A");
        assert_eq!(ready_set(&wf), vec!["B".to_string(), "C".to_string()]);

        run_and_complete(&mut wf, "B");
        assert_eq!(ready_set(&wf), vec!["C".to_string()]);

        run_and_complete(&mut wf, "C");
        assert_eq!(ready_set(&wf), vec!["D".to_string()]);
    }

    #[test]
    fn test_running_steps_are_not_ready() {
        let mut wf = diamond();
        wf.mark_step_running("A", Utc::now());
        assert!(ready_set(&wf).is_empty());
        assert!(!has_unresolvable(&wf));
    }

    #[test]
    fn test_failed_prerequisite_is_unresolvable() {
        let mut wf = diamond();
        run_and_complete(&mut wf, "A");
        run_and_complete(&mut wf, "C");
        wf.mark_step_running("B", Utc::now());
        wf.fail_step(
            "B",
            StepFailure::from_step_error(&StepError::Dispatch(DispatchError::permanent("x")), 1),
            Utc::now(),
        );

        assert!(ready_set(&wf).is_empty());
        assert!(has_unresolvable(&wf));
    }

    #[test]
    fn test_finished_workflow_is_not_unresolvable() {
        let mut wf = diamond();
        for name in ["A", "B", "C", "D"] {
            run_and_complete(&mut wf, name);
        }
        assert!(ready_set(&wf).is_empty());
        assert!(!has_unresolvable(&wf));
    }
}

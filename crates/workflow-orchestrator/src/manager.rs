//! Workflow lifecycle management.
//!
//! [`WorkflowManager`] owns every live workflow. It drives execution wave by
//! wave, answers status queries while executions are in flight, handles
//! cancellation and keeps engine statistics.
//!
//! # Concurrency
//!
//! Each workflow sits behind its own [`WorkflowHandle`] mutex. The lock is
//! only held to read or apply step state and never across a dispatch, so
//! `status()` always sees a consistent snapshot without waiting on a wave.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::{Value as JsonValue, json};
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, info, info_span, warn};

use crate::config::EngineConfig;
use crate::dispatch::AgentDispatcher;
use crate::error::{Result, WorkflowError};
use crate::executor::ParallelStepExecutor;
use crate::factory::WorkflowFactory;
use crate::notify::{EventKind, LogNotifier, NotificationSink, WorkflowEvent};
use crate::registry::TemplateRegistry;
use crate::report::{
    ExecutionReport, WorkflowFilter, WorkflowListing, WorkflowStatus, WorkflowSummary,
};
use crate::scheduler;
use crate::stats::{EngineStats, RunOutcome};
use crate::workflow::{ExecutionState, Priority, Workflow};

/// A tracked workflow: its state behind a lock plus its cancellation token.
#[derive(Debug)]
pub struct WorkflowHandle {
    id: String,
    pub(crate) workflow: Mutex<Workflow>,
    pub(crate) cancel: CancellationToken,
}

impl WorkflowHandle {
    pub fn new(workflow: Workflow) -> Self {
        Self {
            id: workflow.id.clone(),
            workflow: Mutex::new(workflow),
            cancel: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// A copy of the workflow as it is right now.
    pub async fn snapshot(&self) -> Workflow {
        self.workflow.lock().await.clone()
    }
}

/// The workflow engine.
///
/// # Examples
///
/// ```ignore
/// use std::sync::Arc;
/// use workflow_orchestrator::{Priority, TemplateRegistry, WorkflowManager};
///
/// let registry = Arc::new(TemplateRegistry::with_builtin_templates()?);
/// let manager = WorkflowManager::new(registry, Arc::new(my_dispatcher));
///
/// let id = manager
///     .create_workflow("risk_assessment", input, Priority::High, "analyst@example.com")
///     .await?;
/// let report = manager.execute_workflow(&id).await?;
/// println!("{} finished as {}", report.workflow_id, report.final_state);
/// ```
pub struct WorkflowManager {
    factory: WorkflowFactory,
    dispatcher: Arc<dyn AgentDispatcher>,
    notifier: Arc<dyn NotificationSink>,
    config: EngineConfig,
    executor: ParallelStepExecutor,
    workflow_slots: Arc<Semaphore>,
    workflows: RwLock<HashMap<String, Arc<WorkflowHandle>>>,
    stats: Mutex<EngineStats>,
    shutting_down: AtomicBool,
}

impl WorkflowManager {
    /// Creates a manager with the default [`EngineConfig`] and a [`LogNotifier`].
    pub fn new(registry: Arc<TemplateRegistry>, dispatcher: Arc<dyn AgentDispatcher>) -> Self {
        Self::build(registry, dispatcher, EngineConfig::default())
    }

    /// Creates a manager with a custom configuration.
    pub fn with_config(
        registry: Arc<TemplateRegistry>,
        dispatcher: Arc<dyn AgentDispatcher>,
        config: EngineConfig,
    ) -> Result<Self> {
        config.validate()?;
        Ok(Self::build(registry, dispatcher, config))
    }

    fn build(
        registry: Arc<TemplateRegistry>,
        dispatcher: Arc<dyn AgentDispatcher>,
        config: EngineConfig,
    ) -> Self {
        Self {
            factory: WorkflowFactory::new(registry),
            dispatcher,
            notifier: Arc::new(LogNotifier),
            executor: ParallelStepExecutor::new(config.max_concurrent_steps, config.retry.clone()),
            workflow_slots: Arc::new(Semaphore::new(config.max_concurrent_workflows)),
            config,
            workflows: RwLock::new(HashMap::new()),
            stats: Mutex::new(EngineStats::default()),
            shutting_down: AtomicBool::new(false),
        }
    }

    /// Replaces the notification sink.
    pub fn with_notifier(mut self, notifier: Arc<dyn NotificationSink>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<TemplateRegistry> {
        self.factory.registry()
    }

    /// Steps currently running across all workflows.
    pub fn active_steps(&self) -> usize {
        self.executor.active_steps()
    }

    /// Instantiates a template and starts tracking the new workflow.
    ///
    /// Fails with `UnknownTemplate` without creating anything when the
    /// template id is not registered.
    pub async fn create_workflow(
        &self,
        template_id: &str,
        input: JsonValue,
        priority: Priority,
        requested_by: impl Into<String>,
    ) -> Result<String> {
        self.ensure_accepting()?;
        let workflow = self
            .factory
            .create(template_id, input, priority, requested_by)?;
        self.submit(workflow).await
    }

    /// Starts tracking a workflow built elsewhere (e.g. by a [`WorkflowFactory`]).
    pub async fn submit(&self, workflow: Workflow) -> Result<String> {
        self.ensure_accepting()?;

        let id = workflow.id.clone();
        let event = WorkflowEvent::new(
            EventKind::WorkflowCreated,
            &id,
            &workflow.name,
            json!({
                "template_id": workflow.template_id,
                "priority": workflow.priority,
                "requested_by": workflow.requested_by,
                "steps": workflow.steps().len(),
                "estimated_completion": workflow.estimated_completion,
            }),
        );

        self.workflows
            .write()
            .await
            .insert(id.clone(), Arc::new(WorkflowHandle::new(workflow)));
        info!(workflow_id = %id, "Workflow created");
        self.emit(event).await;
        Ok(id)
    }

    /// Runs a pending workflow to a terminal state.
    ///
    /// Waits for a workflow slot when `max_concurrent_workflows` executions
    /// are already in flight. Step failures do not produce an `Err`: they
    /// end the workflow as `Failed` and are reported in the returned
    /// [`ExecutionReport`]. A workflow cancelled while it waits for a slot
    /// yields a `Cancelled` report without dispatching anything. Fails with
    /// `IllegalState` if the workflow is not `Pending` when the call is made.
    pub async fn execute_workflow(&self, workflow_id: &str) -> Result<ExecutionReport> {
        self.ensure_accepting()?;
        let handle = self.handle(workflow_id).await?;
        self.ensure_pending(&handle).await?;

        let _slot = Arc::clone(&self.workflow_slots)
            .acquire_owned()
            .await
            .map_err(|_| WorkflowError::ShuttingDown)?;

        let started = Instant::now();
        let (name, total_steps) = {
            let mut workflow = handle.workflow.lock().await;
            if workflow.state() == ExecutionState::Cancelled {
                // Cancelled while queued for a slot
                let report = ExecutionReport::new(&workflow, started.elapsed(), Vec::new());
                drop(workflow);
                self.stats
                    .lock()
                    .await
                    .record(RunOutcome::Cancelled, report.total_elapsed);
                info!(workflow_id = %workflow_id, "Workflow cancelled before it started");
                return Ok(report);
            }
            if !workflow.start(Utc::now()) {
                return Err(WorkflowError::IllegalState {
                    workflow_id: workflow_id.to_string(),
                    state: workflow.state(),
                    operation: "execute",
                });
            }
            (workflow.name.clone(), workflow.steps().len())
        };
        self.emit(WorkflowEvent::new(
            EventKind::WorkflowStarted,
            workflow_id,
            &name,
            json!({ "steps": total_steps }),
        ))
        .await;

        let span = info_span!(
            "workflow_execute",
            workflow_id = %workflow_id,
            workflow_name = %name,
            total_steps,
        );
        let waves = self.run_waves(&handle).instrument(span).await;

        let report = self.finalize(&handle, started.elapsed(), waves).await;
        let outcome = match report.final_state {
            ExecutionState::Completed => RunOutcome::Succeeded,
            ExecutionState::Cancelled => RunOutcome::Cancelled,
            _ => RunOutcome::Failed,
        };
        self.stats.lock().await.record(outcome, report.total_elapsed);

        info!(
            workflow_id = %workflow_id,
            state = %report.final_state,
            elapsed = ?report.total_elapsed,
            "Workflow finished"
        );

        let event = match report.final_state {
            ExecutionState::Completed => Some(WorkflowEvent::new(
                EventKind::WorkflowCompleted,
                workflow_id,
                &name,
                json!({
                    "elapsed_ms": report.total_elapsed.as_millis() as u64,
                    "waves": report.waves.len(),
                }),
            )),
            ExecutionState::Failed => Some(WorkflowEvent::new(
                EventKind::WorkflowFailed,
                workflow_id,
                &name,
                json!({
                    "failed_steps": report.failed_steps,
                    "completed_steps": report.outputs.len(),
                }),
            )),
            // The cancel call already announced it
            _ => None,
        };
        if let Some(event) = event {
            self.emit(event).await;
        }

        Ok(report)
    }

    /// Runs [`execute_workflow`](Self::execute_workflow) on its own task.
    pub fn spawn_execution(
        self: &Arc<Self>,
        workflow_id: impl Into<String>,
    ) -> JoinHandle<Result<ExecutionReport>> {
        let manager = Arc::clone(self);
        let workflow_id = workflow_id.into();
        tokio::spawn(async move { manager.execute_workflow(&workflow_id).await })
    }

    /// The wave loop. Returns the step names dispatched in each wave.
    async fn run_waves(&self, handle: &Arc<WorkflowHandle>) -> Vec<Vec<String>> {
        let mut waves = Vec::new();

        loop {
            if handle.cancel.is_cancelled() {
                info!("Cancellation requested, no further waves");
                break;
            }

            let ready = {
                let workflow = handle.workflow.lock().await;
                if workflow.state() != ExecutionState::Running {
                    break;
                }
                if workflow.has_failures() {
                    warn!(
                        failed_steps = ?workflow.failed_steps(),
                        "Step failed permanently, halting"
                    );
                    break;
                }
                let ready = scheduler::ready_set(&workflow);
                if ready.is_empty() && scheduler::has_unresolvable(&workflow) {
                    warn!("Pending steps can no longer be scheduled");
                }
                ready
            };
            if ready.is_empty() {
                break;
            }

            let wave_number = waves.len() + 1;
            let wave_span = info_span!("wave", wave_number, ready_steps = ready.len());
            info!(
                "Executing wave {} with {} steps",
                wave_number,
                ready.len()
            );

            let outcomes = self
                .executor
                .run_ready_set(
                    handle,
                    ready.clone(),
                    Arc::clone(&self.dispatcher),
                    self.config.wave_concurrency,
                )
                .instrument(wave_span)
                .await;

            let failed = outcomes
                .values()
                .filter(|o| o.was_started() && !o.is_success())
                .count();
            let progress = handle.workflow.lock().await.commit_progress();
            debug!(wave_number, failed, progress, "Wave finished");
            waves.push(ready);
        }

        waves
    }

    /// Moves the workflow to its terminal state and builds the report.
    async fn finalize(
        &self,
        handle: &WorkflowHandle,
        elapsed: Duration,
        waves: Vec<Vec<String>>,
    ) -> ExecutionReport {
        let mut workflow = handle.workflow.lock().await;
        let now = Utc::now();

        if handle.cancel.is_cancelled() || workflow.state() == ExecutionState::Cancelled {
            let relabelled = workflow.cancel_running_steps(now);
            if relabelled > 0 {
                debug!(relabelled, "Running steps marked cancelled");
            }
            workflow.finish(ExecutionState::Cancelled, now);
        } else if workflow.all_completed() {
            workflow.finish(ExecutionState::Completed, now);
        } else {
            workflow.finish(ExecutionState::Failed, now);
        }

        ExecutionReport::new(&workflow, elapsed, waves)
    }

    /// A consistent snapshot of the workflow's state and steps.
    pub async fn status(&self, workflow_id: &str) -> Result<WorkflowStatus> {
        let handle = self.handle(workflow_id).await?;
        let workflow = handle.workflow.lock().await;
        Ok(WorkflowStatus::from(&*workflow))
    }

    /// Cancels a pending or running workflow.
    ///
    /// The workflow becomes `Cancelled` immediately. Steps in flight finish
    /// their current attempt and are then relabelled `Cancelled`; no new
    /// step starts. Terminal workflows are left untouched and yield
    /// `IllegalState`.
    pub async fn cancel_workflow(&self, workflow_id: &str) -> Result<()> {
        let handle = self.handle(workflow_id).await?;

        let (name, running) = {
            let mut workflow = handle.workflow.lock().await;
            let state = workflow.state();
            if state.is_terminal() {
                return Err(WorkflowError::IllegalState {
                    workflow_id: workflow_id.to_string(),
                    state,
                    operation: "cancel",
                });
            }
            workflow.finish(ExecutionState::Cancelled, Utc::now());
            handle.cancel.cancel();
            (workflow.name.clone(), workflow.running_steps())
        };

        info!(workflow_id = %workflow_id, in_flight = running.len(), "Workflow cancelled");
        self.emit(WorkflowEvent::new(
            EventKind::WorkflowCancelled,
            workflow_id,
            &name,
            json!({ "in_flight_steps": running }),
        ))
        .await;
        Ok(())
    }

    /// Summaries of tracked workflows matching `filter`, newest first.
    pub async fn list_workflows(&self, filter: &WorkflowFilter) -> Vec<WorkflowSummary> {
        let handles: Vec<Arc<WorkflowHandle>> =
            self.workflows.read().await.values().cloned().collect();

        let mut summaries = Vec::new();
        for handle in handles {
            let workflow = handle.workflow.lock().await;
            if filter.matches(&workflow) {
                summaries.push(WorkflowSummary::from(&*workflow));
            }
        }
        summaries.sort_by(|a, b| {
            b.created_at
                .cmp(&a.created_at)
                .then_with(|| a.workflow_id.cmp(&b.workflow_id))
        });
        summaries
    }

    /// Like [`list_workflows`](Self::list_workflows), with totals by state.
    pub async fn workflow_listing(&self, filter: &WorkflowFilter) -> WorkflowListing {
        WorkflowListing::new(self.list_workflows(filter).await)
    }

    /// Execution counters plus live counts by state.
    pub async fn stats(&self) -> EngineStats {
        let mut stats = self.stats.lock().await.clone();
        let handles: Vec<Arc<WorkflowHandle>> =
            self.workflows.read().await.values().cloned().collect();

        for handle in handles {
            match handle.workflow.lock().await.state() {
                ExecutionState::Pending => stats.pending += 1,
                ExecutionState::Running => stats.running += 1,
                ExecutionState::Completed => stats.completed += 1,
                ExecutionState::Failed => stats.failed += 1,
                ExecutionState::Cancelled => stats.cancelled += 1,
            }
        }
        stats
    }

    /// Number of workflows currently tracked.
    pub async fn workflow_count(&self) -> usize {
        self.workflows.read().await.len()
    }

    /// Drops terminal workflows that finished at least `older_than` ago.
    /// Returns how many were removed.
    pub async fn prune_finished(&self, older_than: Duration) -> usize {
        let Ok(age) = chrono::Duration::from_std(older_than) else {
            return 0;
        };
        let cutoff = Utc::now() - age;

        let handles: Vec<Arc<WorkflowHandle>> =
            self.workflows.read().await.values().cloned().collect();
        let mut expired = Vec::new();
        for handle in handles {
            let workflow = handle.workflow.lock().await;
            let finished_before_cutoff = workflow
                .finished_at()
                .is_some_and(|finished| finished <= cutoff);
            if workflow.state().is_terminal() && finished_before_cutoff {
                expired.push(handle.id().to_string());
            }
        }

        let mut workflows = self.workflows.write().await;
        for id in &expired {
            workflows.remove(id);
        }
        if !expired.is_empty() {
            debug!(removed = expired.len(), "Pruned finished workflows");
        }
        expired.len()
    }

    /// Drops terminal workflows older than the configured retention.
    pub async fn prune_expired(&self) -> usize {
        self.prune_finished(self.config.retention).await
    }

    /// Stops accepting work and cancels every non-terminal workflow.
    /// Returns how many workflows were cancelled.
    pub async fn shutdown(&self) -> usize {
        self.shutting_down.store(true, Ordering::SeqCst);

        let handles: Vec<Arc<WorkflowHandle>> =
            self.workflows.read().await.values().cloned().collect();
        let mut cancelled = 0;
        for handle in handles {
            match self.cancel_workflow(handle.id()).await {
                Ok(()) => cancelled += 1,
                Err(WorkflowError::IllegalState { .. }) => {}
                Err(e) => {
                    warn!(workflow_id = %handle.id(), error = %e, "Cancel on shutdown failed")
                }
            }
        }
        info!(cancelled, "Workflow engine shut down");
        cancelled
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::SeqCst)
    }

    fn ensure_accepting(&self) -> Result<()> {
        if self.is_shutting_down() {
            return Err(WorkflowError::ShuttingDown);
        }
        Ok(())
    }

    async fn ensure_pending(&self, handle: &WorkflowHandle) -> Result<()> {
        let state = handle.workflow.lock().await.state();
        if state != ExecutionState::Pending {
            return Err(WorkflowError::IllegalState {
                workflow_id: handle.id().to_string(),
                state,
                operation: "execute",
            });
        }
        Ok(())
    }

    async fn handle(&self, workflow_id: &str) -> Result<Arc<WorkflowHandle>> {
        self.workflows
            .read()
            .await
            .get(workflow_id)
            .cloned()
            .ok_or_else(|| WorkflowError::WorkflowNotFound(workflow_id.to_string()))
    }

    async fn emit(&self, event: WorkflowEvent) {
        let kind = event.kind;
        let workflow_id = event.workflow_id.clone();
        if let Err(e) = self.notifier.notify(event).await {
            warn!(
                workflow_id = %workflow_id,
                event = kind.as_str(),
                error = %e,
                "Notification sink failed"
            );
        }
    }
}

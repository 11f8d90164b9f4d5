use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::{join_all, BoxFuture};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use planweave_core::config::{AppConfig, EngineConfig, RetryConfig, SpawnConfig};
use planweave_core::error::{PlanweaveError, Result};
use planweave_core::event::EventBus;
use planweave_core::traits::{AgentSpawner, LlmClient, ToolInvoker};
use planweave_core::types::{RunId, ToolCatalogue, WorkflowEvent};
use planweave_core::workflow::{Violation, Workflow};
use planweave_llm::RetryingClient;

use super::arena::StepGraph;
use super::condition::ConditionEvaluator;
use super::executor::StepExecutor;
use super::state::{ExecutionState, FailureStage, RunFailure, RunOutcome, RunStatus};
use super::validator::validate;
use crate::planner::PlannerGateway;
use crate::spawner::RecursiveSpawner;

/// Per-run data shared by every dispatch.
struct RunContext<'a> {
    run_id: &'a RunId,
    graph: StepGraph,
    state: Mutex<ExecutionState>,
    executor: StepExecutor<'a>,
    conditions: ConditionEvaluator<'a>,
    deadline: Option<(Instant, u64)>,
}

/// Plans, validates and executes workflows.
///
/// One engine can serve many runs; each run owns its own execution state.
/// Starting from the entry step, every finished step dispatches its active
/// successors, depth first or concurrently depending on
/// `EngineConfig::parallel_branches`. A step reachable along several paths
/// runs once.
pub struct WorkflowEngine {
    planner: PlannerGateway,
    tools: Arc<dyn ToolInvoker>,
    spawner: Option<Arc<dyn AgentSpawner>>,
    config: EngineConfig,
    spawn_limits: SpawnConfig,
    depth: usize,
    event_bus: Option<Arc<EventBus>>,
    cancel: CancellationToken,
}

impl WorkflowEngine {
    pub fn new(planner: PlannerGateway, tools: Arc<dyn ToolInvoker>) -> Self {
        Self {
            planner,
            tools,
            spawner: None,
            config: EngineConfig::default(),
            spawn_limits: SpawnConfig::default(),
            depth: 0,
            event_bus: None,
            cancel: CancellationToken::new(),
        }
    }

    /// Build an engine from a loaded config.
    ///
    /// `fallbacks` holds one client per `[[fallback_models]]` entry, in the
    /// same order. With `[model.retry]` set or fallbacks present, planner
    /// calls go through a `RetryingClient`.
    pub fn from_config(
        config: &AppConfig,
        llm: Arc<dyn LlmClient>,
        fallbacks: Vec<Arc<dyn LlmClient>>,
        tools: Arc<dyn ToolInvoker>,
    ) -> Self {
        if fallbacks.len() != config.fallback_models.len() {
            warn!(
                configured = config.fallback_models.len(),
                supplied = fallbacks.len(),
                "Fallback model clients do not match the configured fallbacks"
            );
        }

        let llm: Arc<dyn LlmClient> = match (&config.model.retry, fallbacks.is_empty()) {
            (None, true) => llm,
            (retry, _) => {
                let policy = retry.clone().unwrap_or(RetryConfig {
                    max_retries: 0,
                    ..RetryConfig::default()
                });
                let wrapped = config
                    .fallback_models
                    .iter()
                    .cloned()
                    .zip(fallbacks)
                    .fold(RetryingClient::new(llm, policy), |client, (model, fallback)| {
                        client.with_fallback(model, fallback)
                    });
                debug!(
                    fallbacks = wrapped.fallback_count(),
                    "Planner calls retry on transient errors"
                );
                Arc::new(wrapped)
            }
        };

        Self::new(PlannerGateway::new(llm, config.model.clone()), tools)
            .with_config(config.engine.clone())
            .with_spawn_limits(config.spawn.clone())
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_spawn_limits(mut self, limits: SpawnConfig) -> Self {
        self.spawn_limits = limits;
        self
    }

    /// Use `spawner` for delegate steps instead of recursive sub-engines.
    pub fn with_spawner(mut self, spawner: Arc<dyn AgentSpawner>) -> Self {
        self.spawner = Some(spawner);
        self
    }

    pub fn with_event_bus(mut self, bus: Arc<EventBus>) -> Self {
        self.event_bus = Some(bus);
        self
    }

    pub fn with_cancel_token(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Nesting depth; 0 for a top-level engine.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub fn spawn_limits(&self) -> &SpawnConfig {
        &self.spawn_limits
    }

    /// Cancelling this token stops dispatch in every run of this engine and
    /// of its sub-agents.
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Engine for a sub-agent one level down.
    pub(crate) fn child(&self) -> Self {
        Self {
            planner: self.planner.clone(),
            tools: self.tools.clone(),
            spawner: None,
            config: self.config.clone(),
            spawn_limits: self.spawn_limits.clone(),
            depth: self.depth + 1,
            event_bus: self.event_bus.clone(),
            cancel: self.cancel.child_token(),
        }
    }

    /// Plan, validate and execute `task`.
    ///
    /// Never returns an error: every failure is reported in the outcome,
    /// together with whatever results were produced before it.
    pub async fn run(&self, task: &str, catalogue: &ToolCatalogue) -> RunOutcome {
        let run_id = RunId::new();
        let started_at = Utc::now();
        info!(run_id = %run_id, depth = self.depth, tools = catalogue.len(), "Run started");
        self.publish(WorkflowEvent::RunStarted {
            run_id: run_id.clone(),
            task: task.to_string(),
        });

        match self.plan(&run_id, task, catalogue).await {
            Ok(workflow) => {
                self.execute_validated(run_id, started_at, task, &workflow, catalogue)
                    .await
            }
            Err(failure) => self.finish(RunOutcome::not_started(
                run_id,
                started_at,
                failure.stage,
                failure.reason,
                failure.violations,
            )),
        }
    }

    /// Validate and execute an already planned workflow.
    pub async fn execute(
        &self,
        task: &str,
        workflow: &Workflow,
        catalogue: &ToolCatalogue,
    ) -> RunOutcome {
        let run_id = RunId::new();
        let started_at = Utc::now();
        info!(
            run_id = %run_id,
            depth = self.depth,
            steps = workflow.steps.len(),
            "Executing supplied workflow"
        );
        self.publish(WorkflowEvent::RunStarted {
            run_id: run_id.clone(),
            task: task.to_string(),
        });

        if let Err(violations) = validate(workflow, catalogue) {
            self.report_violations(&run_id, &violations);
            let reason = PlanweaveError::Validation(violations.clone()).to_string();
            return self.finish(RunOutcome::not_started(
                run_id,
                started_at,
                FailureStage::Validation,
                reason,
                violations,
            ));
        }
        self.execute_validated(run_id, started_at, task, workflow, catalogue)
            .await
    }

    /// Ask for proposals until one validates or attempts run out.
    async fn plan(
        &self,
        run_id: &RunId,
        task: &str,
        catalogue: &ToolCatalogue,
    ) -> std::result::Result<Workflow, RunFailure> {
        let attempts = self.config.plan_attempts.max(1);
        let mut violations: Vec<Violation> = Vec::new();

        for attempt in 1..=attempts {
            let workflow = self
                .planner
                .propose_with_feedback(task, catalogue, &violations)
                .await
                .map_err(|e| RunFailure {
                    stage: FailureStage::Planning,
                    reason: e.to_string(),
                    violations: vec![],
                })?;
            self.publish(WorkflowEvent::PlanProposed {
                run_id: run_id.clone(),
                steps: workflow.steps.len(),
            });

            match validate(&workflow, catalogue) {
                Ok(()) => {
                    debug!(
                        run_id = %run_id,
                        attempt,
                        steps = workflow.steps.len(),
                        "Workflow accepted"
                    );
                    return Ok(workflow);
                }
                Err(found) => {
                    warn!(
                        run_id = %run_id,
                        attempt,
                        attempts,
                        violations = found.len(),
                        "Proposed workflow is invalid"
                    );
                    self.report_violations(run_id, &found);
                    violations = found;
                }
            }
        }

        Err(RunFailure {
            stage: FailureStage::Validation,
            reason: PlanweaveError::Validation(violations.clone()).to_string(),
            violations,
        })
    }

    async fn execute_validated(
        &self,
        run_id: RunId,
        started_at: DateTime<Utc>,
        task: &str,
        workflow: &Workflow,
        catalogue: &ToolCatalogue,
    ) -> RunOutcome {
        let recursive;
        let spawner: &dyn AgentSpawner = match &self.spawner {
            Some(spawner) => spawner.as_ref(),
            None => {
                recursive = RecursiveSpawner::new(
                    self.child(),
                    catalogue.clone(),
                    self.spawn_limits.clone(),
                );
                &recursive
            }
        };

        let mut executor = StepExecutor::new(&self.planner, &*self.tools, spawner);
        if let Some(bus) = &self.event_bus {
            executor = executor.with_events(bus, &run_id);
        }
        let run = RunContext {
            run_id: &run_id,
            graph: StepGraph::build(workflow),
            state: Mutex::new(ExecutionState::new()),
            executor,
            conditions: ConditionEvaluator::new(&self.planner),
            deadline: self
                .config
                .deadline()
                .map(|budget| (Instant::now() + budget, budget.as_secs())),
        };

        let dispatched = match run.graph.entry() {
            Some(entry) => self.dispatch(&run, entry).await,
            None => Err(PlanweaveError::Planning("workflow has no steps".into())),
        };

        let mut state = run.state.into_inner();
        let summary = match dispatched {
            Ok(()) if state.reached_terminal() => {
                state.complete();
                Some(self.planner.summarize(task, workflow, &state).await)
            }
            Ok(()) => {
                state.fail("no terminal step reached");
                None
            }
            Err(e) => {
                error!(run_id = %run_id, error = %e, "Run aborted");
                state.fail(e.to_string());
                None
            }
        };

        self.finish(RunOutcome::from_state(
            run_id.clone(),
            started_at,
            state,
            summary,
        ))
    }

    /// Run the step at `idx`, then its active successors.
    fn dispatch<'r>(
        &'r self,
        run: &'r RunContext<'r>,
        idx: usize,
    ) -> BoxFuture<'r, Result<()>> {
        Box::pin(async move {
            self.check_budget(run)?;

            let step = run.graph.step(idx);
            let Some(result) = run.executor.execute(step, &run.state).await? else {
                return Ok(());
            };
            if !result.succeeded() {
                debug!(
                    run_id = %run.run_id,
                    step_id = %step.id,
                    "Step failed, successors not dispatched"
                );
                return Ok(());
            }

            let active = run.conditions.select(step, &result).await?;
            if let Some(took_then) = active.took_then {
                self.publish(WorkflowEvent::BranchSelected {
                    run_id: run.run_id.clone(),
                    step_id: step.id.clone(),
                    took_then,
                });
            }

            let targets = run.graph.resolve(active.targets);
            if targets.is_empty() {
                debug!(run_id = %run.run_id, step_id = %step.id, "Path ended");
                run.state.lock().await.mark_terminal_reached();
                return Ok(());
            }

            if self.config.parallel_branches && targets.len() > 1 {
                // Every branch settles before the first error is reported.
                let settled =
                    join_all(targets.into_iter().map(|next| self.dispatch(run, next))).await;
                settled.into_iter().collect::<Result<Vec<()>>>()?;
            } else {
                for next in targets {
                    self.dispatch(run, next).await?;
                }
            }
            Ok(())
        })
    }

    /// Checked before every dispatch; in-flight calls are never interrupted.
    fn check_budget(&self, run: &RunContext<'_>) -> Result<()> {
        if self.cancel.is_cancelled() {
            return Err(PlanweaveError::Cancelled);
        }
        if let Some((deadline, secs)) = run.deadline {
            if Instant::now() >= deadline {
                return Err(PlanweaveError::Timeout(secs));
            }
        }
        Ok(())
    }

    fn report_violations(&self, run_id: &RunId, violations: &[Violation]) {
        for v in violations {
            debug!(run_id = %run_id, invariant = v.invariant(), "{}", v);
        }
        self.publish(WorkflowEvent::ValidationFailed {
            run_id: run_id.clone(),
            violations: violations.iter().map(|v| v.to_string()).collect(),
        });
    }

    fn finish(&self, outcome: RunOutcome) -> RunOutcome {
        match outcome.status {
            RunStatus::Completed => {
                info!(
                    run_id = %outcome.run_id,
                    steps = outcome.completed_step_ids.len(),
                    "Run completed"
                );
                self.publish(WorkflowEvent::RunCompleted {
                    run_id: outcome.run_id.clone(),
                    steps_completed: outcome.completed_step_ids.len(),
                });
            }
            _ => {
                let reason = outcome.failure_reason().unwrap_or("unknown").to_string();
                warn!(
                    run_id = %outcome.run_id,
                    steps = outcome.completed_step_ids.len(),
                    reason = %reason,
                    "Run failed"
                );
                self.publish(WorkflowEvent::RunFailed {
                    run_id: outcome.run_id.clone(),
                    reason,
                });
            }
        }
        outcome
    }

    fn publish(&self, event: WorkflowEvent) {
        if let Some(bus) = &self.event_bus {
            bus.publish(event);
        }
    }
}

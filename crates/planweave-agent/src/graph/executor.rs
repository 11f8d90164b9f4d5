use std::time::Instant;

use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use planweave_core::error::{PlanweaveError, Result};
use planweave_core::event::EventBus;
use planweave_core::traits::{AgentSpawner, ToolInvoker};
use planweave_core::types::{RunId, WorkflowEvent};
use planweave_core::workflow::{StepKind, StepResult, WorkflowStep};

use super::state::ExecutionState;
use crate::planner::PlannerGateway;

/// Runs one step against its collaborator and records the result.
pub struct StepExecutor<'a> {
    planner: &'a PlannerGateway,
    tools: &'a dyn ToolInvoker,
    spawner: &'a dyn AgentSpawner,
    events: Option<(&'a EventBus, &'a RunId)>,
}

impl<'a> StepExecutor<'a> {
    pub fn new(
        planner: &'a PlannerGateway,
        tools: &'a dyn ToolInvoker,
        spawner: &'a dyn AgentSpawner,
    ) -> Self {
        Self {
            planner,
            tools,
            spawner,
            events: None,
        }
    }

    pub fn with_events(mut self, bus: &'a EventBus, run_id: &'a RunId) -> Self {
        self.events = Some((bus, run_id));
        self
    }

    /// Execute `step` unless another path already claimed it.
    ///
    /// Returns `Ok(None)` when the step was skipped. A missing tool yields a
    /// recorded `StepResult::Failed`; every other collaborator error is
    /// returned and nothing is recorded. The state lock is never held across
    /// a collaborator call.
    pub async fn execute(
        &self,
        step: &WorkflowStep,
        state: &Mutex<ExecutionState>,
    ) -> Result<Option<StepResult>> {
        if !state.lock().await.claim(&step.id) {
            debug!(step_id = %step.id, "Step already claimed, skipping");
            return Ok(None);
        }

        info!(step_id = %step.id, kind = %step.kind, "Executing step");
        self.publish(|run_id| WorkflowEvent::StepStarted {
            run_id,
            step_id: step.id.clone(),
        });

        let start = Instant::now();
        let result = match step.kind {
            StepKind::ToolCall => self.call_tool(step).await?,
            StepKind::Delegate => self.delegate(step).await?,
            StepKind::DirectReasoning => self.reason(step, state).await?,
        };

        debug!(
            step_id = %step.id,
            succeeded = result.succeeded(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "Step finished"
        );
        state.lock().await.record(&step.id, result.clone());
        self.publish(|run_id| WorkflowEvent::StepCompleted {
            run_id,
            step_id: step.id.clone(),
            succeeded: result.succeeded(),
        });
        Ok(Some(result))
    }

    async fn call_tool(&self, step: &WorkflowStep) -> Result<StepResult> {
        let tool = step
            .tool_name
            .as_deref()
            .ok_or_else(|| PlanweaveError::step(&step.id, "tool-call step has no tool name"))?;
        let params = step
            .tool_parameters
            .clone()
            .unwrap_or_else(|| serde_json::json!({}));

        match self.tools.invoke(tool, params).await {
            Ok(result) => Ok(StepResult::Tool(result)),
            Err(e) if e.is_recoverable() => {
                warn!(
                    step_id = %step.id,
                    tool = %tool,
                    error = %e,
                    "Tool unavailable, step failed"
                );
                Ok(StepResult::Failed {
                    error: e.to_string(),
                })
            }
            Err(e) => Err(PlanweaveError::step(&step.id, e)),
        }
    }

    async fn delegate(&self, step: &WorkflowStep) -> Result<StepResult> {
        let answer = self
            .spawner
            .spawn(step.description.clone(), step.allowed_tools.clone())
            .await
            .map_err(|e| PlanweaveError::step(&step.id, e))?;
        Ok(StepResult::Delegated { answer })
    }

    async fn reason(
        &self,
        step: &WorkflowStep,
        state: &Mutex<ExecutionState>,
    ) -> Result<StepResult> {
        let prior = state.lock().await.results_in_completion_order();
        let content = self
            .planner
            .reason(&step.description, &prior)
            .await
            .map_err(|e| PlanweaveError::step(&step.id, e))?;
        Ok(StepResult::Reasoning { content })
    }

    fn publish(&self, event: impl FnOnce(RunId) -> WorkflowEvent) {
        if let Some((bus, run_id)) = self.events {
            bus.publish(event(run_id.clone()));
        }
    }
}

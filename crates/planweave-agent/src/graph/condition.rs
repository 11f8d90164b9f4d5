use tracing::debug;

use planweave_core::error::{PlanweaveError, Result};
use planweave_core::workflow::{StepResult, WorkflowStep};

use crate::planner::PlannerGateway;

/// Successors chosen after a step finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ActiveSuccessors<'s> {
    pub targets: &'s [String],
    /// `Some(true)` if a branch predicate held, `None` if the step had no branch.
    pub took_then: Option<bool>,
}

/// Picks which successors of a step become active.
pub struct ConditionEvaluator<'a> {
    planner: &'a PlannerGateway,
}

impl<'a> ConditionEvaluator<'a> {
    pub fn new(planner: &'a PlannerGateway) -> Self {
        Self { planner }
    }

    /// Without a branch the plain `next_steps` are active. With one, the
    /// predicate is judged against `result` and exactly one arm is taken.
    /// A failed judgement fails the step.
    pub async fn select<'s>(
        &self,
        step: &'s WorkflowStep,
        result: &StepResult,
    ) -> Result<ActiveSuccessors<'s>> {
        let Some(branch) = &step.branch else {
            return Ok(ActiveSuccessors {
                targets: &step.next_steps,
                took_then: None,
            });
        };

        let holds = self
            .planner
            .evaluate_condition(&branch.predicate, result)
            .await
            .map_err(|e| {
                PlanweaveError::step(&step.id, format!("condition evaluation failed: {}", e))
            })?;

        debug!(step_id = %step.id, predicate = %branch.predicate, holds, "Branch selected");
        Ok(ActiveSuccessors {
            targets: if holds {
                &branch.then_steps
            } else {
                &branch.else_steps
            },
            took_then: Some(holds),
        })
    }
}

//! Workflow graph execution.
//!
//! A `Workflow` proposed by the planner is checked by `validate`, indexed
//! into a `StepGraph`, and walked by the `WorkflowEngine`. Each step is run
//! by the `StepExecutor`; after a step succeeds the `ConditionEvaluator`
//! decides which successors become active. All progress of a run lives in
//! its `ExecutionState`.

pub mod arena;
pub mod condition;
pub mod engine;
pub mod executor;
pub mod state;
pub mod validator;

pub use arena::StepGraph;
pub use condition::{ActiveSuccessors, ConditionEvaluator};
pub use engine::WorkflowEngine;
pub use executor::StepExecutor;
pub use state::{ExecutionState, FailureStage, RunFailure, RunOutcome, RunStatus};
pub use validator::validate;

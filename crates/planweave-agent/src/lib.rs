//! Planweave agent: turns a task into a planned workflow graph and runs it.
//!
//! The flow of one run is planner → validator → engine. The planner asks the
//! language model for a workflow, the validator rejects structurally broken
//! graphs before anything executes, and the engine walks the graph from its
//! entry step, dispatching tool calls, sub-agents and reasoning steps.

pub mod graph;
pub mod planner;
pub mod spawner;

pub use graph::{
    validate, ActiveSuccessors, ConditionEvaluator, ExecutionState, FailureStage, RunFailure,
    RunOutcome, RunStatus, StepExecutor, StepGraph, WorkflowEngine,
};
pub use planner::{extract_payload, synthetic_summary, PlannerGateway};
pub use spawner::RecursiveSpawner;

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use planweave_core::types::RunId;
use planweave_core::workflow::{StepResult, Violation};

/// Lifecycle of a single run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    #[default]
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// Mutable record of one workflow run.
///
/// Owned by exactly one engine run. Step ids are claimed before execution
/// so a step reachable along several paths runs once; results are kept in
/// the order steps finished.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionState {
    completed: Vec<String>,
    step_results: HashMap<String, StepResult>,
    status: RunStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    failure_reason: Option<String>,
    #[serde(skip)]
    claimed: HashSet<String>,
    #[serde(default)]
    reached_terminal: bool,
}

impl ExecutionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reserve `step_id` for execution. Returns false if another path
    /// already claimed or finished it.
    pub fn claim(&mut self, step_id: &str) -> bool {
        if self.status == RunStatus::Pending {
            self.status = RunStatus::InProgress;
        }
        self.claimed.insert(step_id.to_string())
    }

    /// Record a finished step. A second record for the same id is ignored.
    pub fn record(&mut self, step_id: &str, result: StepResult) {
        if self.step_results.contains_key(step_id) {
            return;
        }
        self.claimed.insert(step_id.to_string());
        self.completed.push(step_id.to_string());
        self.step_results.insert(step_id.to_string(), result);
    }

    pub fn is_completed(&self, step_id: &str) -> bool {
        self.step_results.contains_key(step_id)
    }

    /// Finished step ids, in completion order.
    pub fn completed_step_ids(&self) -> &[String] {
        &self.completed
    }

    pub fn step_results(&self) -> &HashMap<String, StepResult> {
        &self.step_results
    }

    pub fn result(&self, step_id: &str) -> Option<&StepResult> {
        self.step_results.get(step_id)
    }

    /// `(id, result)` pairs in completion order.
    pub fn results_in_completion_order(&self) -> Vec<(String, StepResult)> {
        self.completed
            .iter()
            .filter_map(|id| self.step_results.get(id).map(|r| (id.clone(), r.clone())))
            .collect()
    }

    /// A successful step with no active successors ended a path.
    pub fn mark_terminal_reached(&mut self) {
        self.reached_terminal = true;
    }

    pub fn reached_terminal(&self) -> bool {
        self.reached_terminal
    }

    pub fn status(&self) -> RunStatus {
        self.status
    }

    pub fn complete(&mut self) {
        self.status = RunStatus::Completed;
        self.failure_reason = None;
    }

    pub fn fail(&mut self, reason: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.failure_reason = Some(reason.into());
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure_reason.as_deref()
    }
}

/// Where a run stopped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureStage {
    Planning,
    Validation,
    Execution,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFailure {
    pub stage: FailureStage,
    pub reason: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
}

/// Everything a caller learns about a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: RunId,
    pub status: RunStatus,
    pub step_results: HashMap<String, StepResult>,
    /// In completion order.
    pub completed_step_ids: Vec<String>,
    pub summary: Option<String>,
    pub failure: Option<RunFailure>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    /// A run that failed before any step was dispatched.
    pub fn not_started(
        run_id: RunId,
        started_at: DateTime<Utc>,
        stage: FailureStage,
        reason: impl Into<String>,
        violations: Vec<Violation>,
    ) -> Self {
        Self {
            run_id,
            status: RunStatus::Failed,
            step_results: HashMap::new(),
            completed_step_ids: vec![],
            summary: None,
            failure: Some(RunFailure {
                stage,
                reason: reason.into(),
                violations,
            }),
            started_at,
            finished_at: Utc::now(),
        }
    }

    /// Build from a finished execution state, keeping partial results.
    pub fn from_state(
        run_id: RunId,
        started_at: DateTime<Utc>,
        state: ExecutionState,
        summary: Option<String>,
    ) -> Self {
        let failure = state.failure_reason().map(|reason| RunFailure {
            stage: FailureStage::Execution,
            reason: reason.to_string(),
            violations: vec![],
        });
        Self {
            run_id,
            status: state.status,
            step_results: state.step_results,
            completed_step_ids: state.completed,
            summary,
            failure,
            started_at,
            finished_at: Utc::now(),
        }
    }

    pub fn is_completed(&self) -> bool {
        self.status == RunStatus::Completed
    }

    /// Whether the run got past planning and validation into execution.
    pub fn started(&self) -> bool {
        self.failure
            .as_ref()
            .map_or(true, |f| f.stage == FailureStage::Execution)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.failure.as_ref().map(|f| f.reason.as_str())
    }

    pub fn violations(&self) -> &[Violation] {
        self.failure
            .as_ref()
            .map(|f| f.violations.as_slice())
            .unwrap_or_default()
    }
}

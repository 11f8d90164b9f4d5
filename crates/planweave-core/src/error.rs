use thiserror::Error;

use crate::workflow::Violation;

#[derive(Debug, Error)]
pub enum PlanweaveError {
    // LLM errors
    #[error("LLM request failed: {0}")]
    LlmRequest(String),

    #[error("LLM streaming error: {0}")]
    LlmStream(String),

    // Planning errors
    #[error("Planning failed: {0}")]
    Planning(String),

    #[error("Workflow validation failed: {}", format_violations(.0))]
    Validation(Vec<Violation>),

    // Tool errors
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    #[error("Tool timeout after {timeout_secs}s: {tool}")]
    ToolTimeout { tool: String, timeout_secs: u64 },

    // Execution errors
    #[error("Step '{step}' failed: {message}")]
    StepExecution { step: String, message: String },

    #[error("Run exceeded its deadline ({0}s)")]
    Timeout(u64),

    #[error("Run cancelled")]
    Cancelled,

    #[error("Sub-agent budget exceeded: {0}")]
    SpawnBudgetExceeded(String),

    // Config errors
    #[error("Config error: {0}")]
    Config(String),

    #[error("Config file not found: {0}")]
    ConfigNotFound(String),

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // JSON errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl PlanweaveError {
    /// Wrap any collaborator failure as a fatal error for the given step.
    pub fn step(step: impl Into<String>, message: impl std::fmt::Display) -> Self {
        Self::StepExecution {
            step: step.into(),
            message: message.to_string(),
        }
    }

    /// Whether the error leaves the run able to continue on other paths.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::ToolNotFound(_))
    }
}

fn format_violations(violations: &[Violation]) -> String {
    violations
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

pub type Result<T> = std::result::Result<T, PlanweaveError>;

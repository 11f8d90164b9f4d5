//! Workflow data model: steps, branches, and the validator's violation set.
//!
//! A `Workflow` is what the planner proposes. It is plain data; structural
//! checking lives in the agent crate's validator, and execution state lives
//! with the engine run that owns it.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ToolResult;

/// How a step is carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepKind {
    /// Invoke a named tool with parameters.
    #[serde(alias = "tool-call", alias = "tool", alias = "toolCall")]
    ToolCall,
    /// Hand a sub-task to a recursively spawned sub-agent.
    #[serde(alias = "sub_agent", alias = "sub-agent", alias = "agent")]
    Delegate,
    /// Ask the language model directly, with prior results as context.
    #[serde(
        alias = "direct-reasoning",
        alias = "directReasoning",
        alias = "reasoning",
        alias = "llm"
    )]
    DirectReasoning,
}

impl std::fmt::Display for StepKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::ToolCall => "tool-call",
            Self::Delegate => "delegate",
            Self::DirectReasoning => "direct-reasoning",
        };
        f.write_str(s)
    }
}

/// Conditional routing attached to a step.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Branch {
    /// Natural-language predicate judged against the step's result.
    pub predicate: String,
    #[serde(default, alias = "thenSteps")]
    pub then_steps: Vec<String>,
    #[serde(default, alias = "elseSteps")]
    pub else_steps: Vec<String>,
}

/// A single unit of work in a workflow.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowStep {
    /// Unique identifier for this step.
    pub id: String,
    /// What the step should accomplish. For `delegate` steps this is the
    /// sub-task handed to the sub-agent.
    #[serde(default)]
    pub description: String,
    pub kind: StepKind,
    #[serde(default, alias = "toolName", skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(
        default,
        alias = "toolParameters",
        alias = "parameters",
        skip_serializing_if = "Option::is_none"
    )]
    pub tool_parameters: Option<serde_json::Value>,
    /// Tools a delegated sub-agent may use (empty = the parent's catalogue).
    #[serde(default, alias = "allowedTools", skip_serializing_if = "Vec::is_empty")]
    pub allowed_tools: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub branch: Option<Branch>,
    #[serde(default, alias = "nextSteps")]
    pub next_steps: Vec<String>,
}

impl WorkflowStep {
    fn new(id: impl Into<String>, kind: StepKind) -> Self {
        Self {
            id: id.into(),
            description: String::new(),
            kind,
            tool_name: None,
            tool_parameters: None,
            allowed_tools: vec![],
            branch: None,
            next_steps: vec![],
        }
    }

    /// A step invoking `tool`.
    pub fn tool_call(id: impl Into<String>, tool: impl Into<String>) -> Self {
        let mut step = Self::new(id, StepKind::ToolCall);
        step.tool_name = Some(tool.into());
        step
    }

    /// A step delegating `task` to a sub-agent.
    pub fn delegate(id: impl Into<String>, task: impl Into<String>) -> Self {
        Self::new(id, StepKind::Delegate).with_description(task)
    }

    /// A step answered by the language model directly.
    pub fn reasoning(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self::new(id, StepKind::DirectReasoning).with_description(description)
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn with_params(mut self, params: serde_json::Value) -> Self {
        self.tool_parameters = Some(params);
        self
    }

    pub fn with_allowed_tools(mut self, tools: Vec<String>) -> Self {
        self.allowed_tools = tools;
        self
    }

    /// Set the plain successor list.
    pub fn then(mut self, next: &[&str]) -> Self {
        self.next_steps = next.iter().map(|s| s.to_string()).collect();
        self
    }

    pub fn with_branch(
        mut self,
        predicate: impl Into<String>,
        then_steps: &[&str],
        else_steps: &[&str],
    ) -> Self {
        self.branch = Some(Branch {
            predicate: predicate.into(),
            then_steps: then_steps.iter().map(|s| s.to_string()).collect(),
            else_steps: else_steps.iter().map(|s| s.to_string()).collect(),
        });
        self
    }

    /// Effective successors: `next_steps` followed by both branch target
    /// lists, first occurrence wins.
    pub fn successors(&self) -> Vec<&str> {
        let mut out: Vec<&str> = Vec::new();
        let branch_targets = self
            .branch
            .iter()
            .flat_map(|b| b.then_steps.iter().chain(b.else_steps.iter()));
        for id in self.next_steps.iter().chain(branch_targets) {
            if !out.contains(&id.as_str()) {
                out.push(id);
            }
        }
        out
    }

    /// A step with no effective successors ends a path.
    pub fn is_terminal(&self) -> bool {
        self.successors().is_empty()
    }
}

/// A planned graph of steps for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Workflow {
    #[serde(default)]
    pub goal: String,
    pub steps: Vec<WorkflowStep>,
    #[serde(default, alias = "expectedOutcome")]
    pub expected_outcome: String,
}

impl Workflow {
    pub fn new(goal: impl Into<String>, steps: Vec<WorkflowStep>) -> Self {
        Self {
            goal: goal.into(),
            steps,
            expected_outcome: String::new(),
        }
    }

    pub fn with_expected_outcome(mut self, outcome: impl Into<String>) -> Self {
        self.expected_outcome = outcome.into();
        self
    }

    /// The designated entry step: the first proposed one.
    pub fn entry(&self) -> Option<&WorkflowStep> {
        self.steps.first()
    }

    pub fn step(&self, id: &str) -> Option<&WorkflowStep> {
        self.steps.iter().find(|s| s.id == id)
    }
}

/// One broken structural invariant.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Violation {
    #[error("workflow has no steps")]
    EmptyWorkflow,

    #[error("duplicate step id '{id}'")]
    DuplicateStepId { id: String },

    #[error("step '{step}' references unknown step '{target}'")]
    UnknownStepReference { step: String, target: String },

    #[error("cycle detected: {}", .path.join(" -> "))]
    Cycle { path: Vec<String> },

    #[error("step '{step}' is unreachable from the entry step")]
    Unreachable { step: String },

    #[error("no terminal step (every step has successors)")]
    NoTerminalStep,

    #[error("tool-call step '{step}' has no tool name")]
    MissingToolName { step: String },

    #[error("step '{step}' uses unknown tool '{tool}'")]
    UnknownTool { step: String, tool: String },
}

impl Violation {
    /// Short name of the invariant this violation breaks.
    pub fn invariant(&self) -> &'static str {
        match self {
            Self::EmptyWorkflow => "non-empty",
            Self::DuplicateStepId { .. } => "unique-ids",
            Self::UnknownStepReference { .. } => "known-references",
            Self::Cycle { .. } => "acyclic",
            Self::Unreachable { .. } => "reachable",
            Self::NoTerminalStep => "terminal-step",
            Self::MissingToolName { .. } | Self::UnknownTool { .. } => "known-tools",
        }
    }
}

/// What a finished step produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum StepResult {
    Tool(ToolResult),
    Delegated { answer: String },
    Reasoning { content: String },
    /// Recoverable failure; the run carries on along other paths.
    Failed { error: String },
}

impl StepResult {
    pub fn succeeded(&self) -> bool {
        !matches!(self, Self::Failed { .. })
    }

    /// Plain-text rendering used when feeding results back into prompts.
    pub fn render(&self) -> String {
        match self {
            Self::Tool(result) => result.value_text(),
            Self::Delegated { answer } => answer.clone(),
            Self::Reasoning { content } => content.clone(),
            Self::Failed { error } => format!("FAILED: {}", error),
        }
    }
}

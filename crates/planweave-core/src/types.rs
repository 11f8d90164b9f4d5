use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for one engine run.
#[derive(Debug, Clone, Hash, Eq, PartialEq, Serialize, Deserialize)]
pub struct RunId(pub String);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Role in a conversation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
}

/// A chat message sent to the language model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl ChatMessage {
    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }

    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: text.into(),
            timestamp: Some(Utc::now()),
        }
    }
}

/// Stop reason from the LLM.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum StopReason {
    EndTurn,
    MaxTokens,
    StopSequence,
}

/// A streaming delta from the LLM.
#[derive(Debug, Clone)]
pub enum StreamDelta {
    /// A chunk of text content.
    TextDelta(String),

    /// A chunk of thinking/reasoning content.
    ThinkingDelta(String),

    /// The response is complete.
    Stop(StopReason),

    /// Usage information.
    Usage {
        input_tokens: u64,
        output_tokens: u64,
    },
}

/// Result of a tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolResult {
    /// Source the tool belongs to (e.g. "builtin", an MCP server name).
    pub source_name: String,
    pub tool_name: String,
    pub value: serde_json::Value,
}

impl ToolResult {
    pub fn new(
        source_name: impl Into<String>,
        tool_name: impl Into<String>,
        value: serde_json::Value,
    ) -> Self {
        Self {
            source_name: source_name.into(),
            tool_name: tool_name.into(),
            value,
        }
    }

    /// The value as prompt text: strings verbatim, everything else as JSON.
    pub fn value_text(&self) -> String {
        match &self.value {
            serde_json::Value::String(s) => s.clone(),
            other => other.to_string(),
        }
    }
}

/// Catalogue entry describing one tool to the planner.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default = "default_source")]
    pub source: String,
}

fn default_source() -> String {
    "builtin".to_string()
}

impl ToolDescriptor {
    pub fn new(
        name: impl Into<String>,
        description: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            source: source.into(),
        }
    }
}

/// The read-only set of tools a run may plan against.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ToolCatalogue {
    tools: Vec<ToolDescriptor>,
}

impl ToolCatalogue {
    pub fn new(tools: Vec<ToolDescriptor>) -> Self {
        Self { tools }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.tools.iter().any(|t| t.name == name)
    }

    pub fn get(&self, name: &str) -> Option<&ToolDescriptor> {
        self.tools.iter().find(|t| t.name == name)
    }

    pub fn names(&self) -> Vec<&str> {
        self.tools.iter().map(|t| t.name.as_str()).collect()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &ToolDescriptor> {
        self.tools.iter()
    }

    /// Tools grouped by source, sources in name order.
    pub fn by_source(&self) -> BTreeMap<&str, Vec<&ToolDescriptor>> {
        let mut groups: BTreeMap<&str, Vec<&ToolDescriptor>> = BTreeMap::new();
        for tool in &self.tools {
            groups.entry(tool.source.as_str()).or_default().push(tool);
        }
        groups
    }

    /// A catalogue holding only the named tools. An empty list keeps everything.
    pub fn restrict(&self, allowed: &[String]) -> Self {
        if allowed.is_empty() {
            return self.clone();
        }
        Self {
            tools: self
                .tools
                .iter()
                .filter(|t| allowed.contains(&t.name))
                .cloned()
                .collect(),
        }
    }
}

/// Lifecycle event broadcast to all subscribers.
#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    /// A run started planning or executing.
    RunStarted { run_id: RunId, task: String },
    /// The planner produced a workflow.
    PlanProposed { run_id: RunId, steps: usize },
    /// The proposed workflow broke one or more invariants.
    ValidationFailed { run_id: RunId, violations: Vec<String> },
    /// A step was claimed and is executing.
    StepStarted { run_id: RunId, step_id: String },
    /// A step finished (successfully or with a recoverable failure).
    StepCompleted { run_id: RunId, step_id: String, succeeded: bool },
    /// A branch predicate was judged.
    BranchSelected { run_id: RunId, step_id: String, took_then: bool },
    /// The run finished with status `completed`.
    RunCompleted { run_id: RunId, steps_completed: usize },
    /// The run finished with status `failed`.
    RunFailed { run_id: RunId, reason: String },
}

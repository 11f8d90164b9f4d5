use futures::future::BoxFuture;
use futures::stream::BoxStream;

use crate::config::ModelConfig;
use crate::error::Result;
use crate::types::*;

/// Any backend that can stream a chat completion.
pub trait LlmClient: Send + Sync + 'static {
    /// Send a chat request and receive a stream of deltas.
    fn chat_stream(
        &self,
        config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>>;
}

/// A named capability registered with a `ToolRegistry`.
pub trait Tool: Send + Sync + 'static {
    /// Tool name (used in workflow steps).
    fn name(&self) -> &str;

    /// Capability description shown to the planner.
    fn description(&self) -> &str;

    /// Source the tool is grouped under in the catalogue.
    fn source(&self) -> &str {
        "builtin"
    }

    /// Execute the tool with the step's parameters.
    fn execute(&self, params: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>>;

    /// Timeout in seconds for this tool.
    fn timeout_secs(&self) -> u64 {
        30
    }
}

/// Resolves a tool by name and runs it.
///
/// A missing tool is reported as `PlanweaveError::ToolNotFound`.
pub trait ToolInvoker: Send + Sync + 'static {
    fn invoke(
        &self,
        tool_name: &str,
        params: serde_json::Value,
    ) -> BoxFuture<'_, Result<ToolResult>>;
}

/// Trait for spawning sub-agents without circular dependencies.
///
/// The parent receives only the child's final summarized answer.
pub trait AgentSpawner: Send + Sync + 'static {
    fn spawn(&self, task: String, allowed_tools: Vec<String>) -> BoxFuture<'_, Result<String>>;
}

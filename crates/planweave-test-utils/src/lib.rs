//! Mocks and fixtures shared by the Planweave test suites.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use futures::future::BoxFuture;
use futures::stream::{self, BoxStream, StreamExt};

use planweave_core::config::ModelConfig;
use planweave_core::error::{PlanweaveError, Result};
use planweave_core::traits::{AgentSpawner, LlmClient, Tool};
use planweave_core::types::{ChatMessage, StopReason, StreamDelta, ToolCatalogue, ToolDescriptor};
use planweave_core::workflow::{Workflow, WorkflowStep};

fn reply_stream(text: String) -> BoxStream<'static, Result<StreamDelta>> {
    let mut deltas: Vec<Result<StreamDelta>> = text
        .split_inclusive(' ')
        .map(|chunk| Ok(StreamDelta::TextDelta(chunk.to_string())))
        .collect();
    deltas.push(Ok(StreamDelta::Usage {
        input_tokens: 10,
        output_tokens: text.len() as u64 / 4,
    }));
    deltas.push(Ok(StreamDelta::Stop(StopReason::EndTurn)));
    stream::iter(deltas).boxed()
}

fn last_prompt(messages: &[ChatMessage]) -> String {
    messages.last().map(|m| m.content.clone()).unwrap_or_default()
}

/// LLM that replays canned replies in order and records every prompt.
pub struct ScriptedLlm {
    replies: Mutex<VecDeque<String>>,
    prompts: Mutex<Vec<String>>,
}

impl ScriptedLlm {
    pub fn new(replies: Vec<&str>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().map(String::from).collect()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    /// Prompts received so far, oldest first.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl LlmClient for ScriptedLlm {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        self.prompts.lock().unwrap().push(last_prompt(&messages));
        let next = self.replies.lock().unwrap().pop_front();
        Box::pin(async move {
            match next {
                Some(text) => Ok(reply_stream(text)),
                None => Err(PlanweaveError::LlmRequest("script exhausted".into())),
            }
        })
    }
}

type Responder = Box<dyn Fn(&str) -> Result<String> + Send + Sync>;

/// LLM whose reply is computed from the prompt.
pub struct FnLlm {
    respond: Responder,
    prompts: Mutex<Vec<String>>,
}

impl FnLlm {
    pub fn new(respond: impl Fn(&str) -> Result<String> + Send + Sync + 'static) -> Self {
        Self {
            respond: Box::new(respond),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().unwrap().clone()
    }
}

impl LlmClient for FnLlm {
    fn chat_stream(
        &self,
        _config: &ModelConfig,
        messages: Vec<ChatMessage>,
    ) -> BoxFuture<'_, Result<BoxStream<'_, Result<StreamDelta>>>> {
        let prompt = last_prompt(&messages);
        self.prompts.lock().unwrap().push(prompt.clone());
        let reply = (self.respond)(&prompt);
        Box::pin(async move { reply.map(reply_stream) })
    }
}

/// Tool returning a fixed value, optionally after a delay.
pub struct StaticTool {
    name: String,
    source: String,
    value: serde_json::Value,
    delay: Option<Duration>,
}

impl StaticTool {
    pub fn new(name: &str, value: serde_json::Value) -> Self {
        Self {
            name: name.to_string(),
            source: "builtin".to_string(),
            value,
            delay: None,
        }
    }

    pub fn with_source(mut self, source: &str) -> Self {
        self.source = source.to_string();
        self
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }
}

impl Tool for StaticTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Returns a fixed value"
    }

    fn source(&self) -> &str {
        &self.source
    }

    fn execute(&self, _params: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            Ok(self.value.clone())
        })
    }
}

/// Tool that echoes its parameters back.
pub struct EchoTool;

impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "Echo the parameters back"
    }

    fn execute(&self, params: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move { Ok(params) })
    }
}

/// Tool that always errors.
pub struct FailingTool {
    pub name: String,
}

impl Tool for FailingTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        "Always fails"
    }

    fn execute(&self, _params: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
        Box::pin(async move {
            Err(PlanweaveError::step(self.name.clone(), "tool exploded"))
        })
    }
}

/// Spawner that records each request and answers with a fixed string.
pub struct RecordingSpawner {
    answer: String,
    calls: Mutex<Vec<(String, Vec<String>)>>,
}

impl RecordingSpawner {
    pub fn new(answer: &str) -> Self {
        Self {
            answer: answer.to_string(),
            calls: Mutex::new(Vec::new()),
        }
    }

    pub fn calls(&self) -> Vec<(String, Vec<String>)> {
        self.calls.lock().unwrap().clone()
    }
}

impl AgentSpawner for RecordingSpawner {
    fn spawn(&self, task: String, allowed_tools: Vec<String>) -> BoxFuture<'_, Result<String>> {
        self.calls.lock().unwrap().push((task, allowed_tools));
        let answer = self.answer.clone();
        Box::pin(async move { Ok(answer) })
    }
}

/// Catalogue with one builtin tool per name.
pub fn catalogue(names: &[&str]) -> ToolCatalogue {
    ToolCatalogue::new(
        names
            .iter()
            .map(|n| ToolDescriptor::new(*n, format!("{} tool", n), "builtin"))
            .collect(),
    )
}

/// `step1: web_search -> step2: summarize -> step3: reasoning (terminal)`.
pub fn research_workflow() -> Workflow {
    Workflow::new(
        "research X and summarize",
        vec![
            WorkflowStep::tool_call("step1", "web_search")
                .with_params(serde_json::json!({"query": "X"}))
                .then(&["step2"]),
            WorkflowStep::tool_call("step2", "summarize").then(&["step3"]),
            WorkflowStep::reasoning("step3", "Write the final answer"),
        ],
    )
    .with_expected_outcome("a short summary of X")
}

/// `A -> {B, C}`, `B -> D`, `C -> D`, all direct reasoning.
pub fn diamond_workflow() -> Workflow {
    Workflow::new(
        "diamond",
        vec![
            WorkflowStep::reasoning("A", "start").then(&["B", "C"]),
            WorkflowStep::reasoning("B", "left").then(&["D"]),
            WorkflowStep::reasoning("C", "right").then(&["D"]),
            WorkflowStep::reasoning("D", "join"),
        ],
    )
}

//! Planner gateway: the only place raw model text is turned into typed data.
//!
//! Every prompt the core sends to the language model is built here: workflow
//! proposals, direct-reasoning steps, branch predicates and the final
//! summary. Nothing outside this module sees unparsed model output.

use std::fmt::Write as _;
use std::sync::Arc;

use serde::de::DeserializeOwned;
use tracing::{debug, warn};

use planweave_core::config::ModelConfig;
use planweave_core::error::{PlanweaveError, Result};
use planweave_core::traits::LlmClient;
use planweave_core::types::{ChatMessage, ToolCatalogue};
use planweave_core::workflow::{StepResult, Violation, Workflow};
use planweave_llm::{complete, complete_messages};

use crate::graph::ExecutionState;

/// Longest slice of a single step result fed back into a prompt.
const MAX_RESULT_CHARS: usize = 2_000;

const PLANNER_SYSTEM_PROMPT: &str = "You design workflow graphs for an automated agent. \
     Reply with a single JSON object and nothing else.";

/// Stateless adapter over the language model.
#[derive(Clone)]
pub struct PlannerGateway {
    llm: Arc<dyn LlmClient>,
    config: ModelConfig,
}

impl PlannerGateway {
    pub fn new(llm: Arc<dyn LlmClient>, config: ModelConfig) -> Self {
        Self { llm, config }
    }

    /// Ask the model for a workflow graph solving `task` with `catalogue`.
    pub async fn propose_workflow(
        &self,
        task: &str,
        catalogue: &ToolCatalogue,
    ) -> Result<Workflow> {
        self.propose_with_feedback(task, catalogue, &[]).await
    }

    /// Like `propose_workflow`, but tells the model which invariants its
    /// previous proposal broke.
    pub async fn propose_with_feedback(
        &self,
        task: &str,
        catalogue: &ToolCatalogue,
        previous: &[Violation],
    ) -> Result<Workflow> {
        let messages = vec![
            ChatMessage::system(PLANNER_SYSTEM_PROMPT),
            ChatMessage::user(planning_prompt(task, catalogue, previous)),
        ];
        let reply = complete_messages(&*self.llm, &self.config, messages)
            .await
            .map_err(|e| PlanweaveError::Planning(format!("planner call failed: {}", e)))?;

        match extract_payload::<Workflow>(&reply.content) {
            Some(workflow) => {
                debug!(
                    steps = workflow.steps.len(),
                    goal = %workflow.goal,
                    "Planner proposed workflow"
                );
                Ok(workflow)
            }
            None => {
                warn!(response = %reply.content, "No workflow found in planner response");
                Err(PlanweaveError::Planning(
                    "no parseable workflow in planner response".into(),
                ))
            }
        }
    }

    /// Answer a direct-reasoning step. `prior` is rendered in the order given.
    pub async fn reason(
        &self,
        description: &str,
        prior: &[(String, StepResult)],
    ) -> Result<String> {
        let mut prompt = String::new();
        if !prior.is_empty() {
            prompt.push_str("## Results so far\n\n");
            for (id, result) in prior {
                let _ = writeln!(prompt, "**{}**: {}", id, clip(&result.render()));
            }
            prompt.push_str("\n---\n\n");
        }
        prompt.push_str(description);

        let reply = complete(&*self.llm, &self.config, prompt).await?;
        Ok(reply.content.trim().to_string())
    }

    /// Judge `predicate` against a step's result.
    ///
    /// Any case-insensitive occurrence of "yes" in the reply counts as true.
    pub async fn evaluate_condition(&self, predicate: &str, result: &StepResult) -> Result<bool> {
        let prompt = format!(
            "You are checking whether a condition holds for the result of a workflow step.\n\n\
             Condition:\n{}\n\n\
             Step result:\n{}\n\n\
             Respond with ONLY \"yes\" or \"no\".",
            predicate,
            clip(&result.render())
        );
        let reply = complete(&*self.llm, &self.config, prompt).await?;
        let verdict = is_affirmative(&reply.content);
        debug!(predicate = %predicate, verdict, "Condition evaluated");
        Ok(verdict)
    }

    /// Produce the final answer for a finished run.
    ///
    /// Never fails: a model error or an empty reply yields a summary
    /// assembled from the recorded step results.
    pub async fn summarize(
        &self,
        task: &str,
        workflow: &Workflow,
        state: &ExecutionState,
    ) -> String {
        let mut prompt = format!(
            "Summarize the outcome of the following task for the user.\n\n\
             Task: {}\nGoal: {}\n",
            task, workflow.goal
        );
        if !workflow.expected_outcome.is_empty() {
            let _ = writeln!(prompt, "Expected outcome: {}", workflow.expected_outcome);
        }
        prompt.push_str("\nStep results (in completion order):\n");
        for (id, result) in state.results_in_completion_order() {
            let _ = writeln!(prompt, "- {}: {}", id, clip(&result.render()));
        }

        match complete(&*self.llm, &self.config, prompt).await {
            Ok(reply) if !reply.content.trim().is_empty() => reply.content.trim().to_string(),
            Ok(_) => {
                warn!("Empty summary from model, using synthetic summary");
                synthetic_summary(workflow, state)
            }
            Err(e) => {
                warn!(error = %e, "Summary call failed, using synthetic summary");
                synthetic_summary(workflow, state)
            }
        }
    }
}

fn planning_prompt(task: &str, catalogue: &ToolCatalogue, previous: &[Violation]) -> String {
    let mut prompt = String::from(
        "You are a planner. Break the task below into a directed acyclic graph of steps.\n\n",
    );
    let _ = writeln!(prompt, "Task:\n{}\n", task);

    prompt.push_str("Available tools:\n");
    if catalogue.is_empty() {
        prompt.push_str("(none; use only delegate and direct_reasoning steps)\n");
    }
    for (source, tools) in catalogue.by_source() {
        let _ = writeln!(prompt, "[{}]", source);
        for tool in tools {
            let _ = writeln!(prompt, "- {}: {}", tool.name, tool.description);
        }
    }

    prompt.push_str(
        r#"
Step kinds:
- "tool_call": invoke one tool; set "tool_name" and "tool_parameters".
- "delegate": hand the description to a sub-agent; optionally restrict it with "allowed_tools".
- "direct_reasoning": answer the description yourself using earlier results.

Rules:
- The first step is the entry point; every step must be reachable from it.
- "next_steps" lists successor ids; leave it empty on final steps.
- Use "branch": {"predicate": "...", "then_steps": [...], "else_steps": [...]} to route on a step's result.
- Only use tools from the list above. No cycles.

Respond with ONLY valid JSON in this format:
{
  "goal": "what the workflow achieves",
  "expected_outcome": "what the user receives",
  "steps": [
    {"id": "step1", "description": "...", "kind": "tool_call", "tool_name": "...", "tool_parameters": {}, "next_steps": ["step2"]},
    {"id": "step2", "description": "...", "kind": "direct_reasoning", "next_steps": []}
  ]
}"#,
    );

    if !previous.is_empty() {
        prompt.push_str(
            "\n\nYour previous plan was rejected for these reasons; fix all of them:\n",
        );
        for v in previous {
            let _ = writeln!(prompt, "- {}", v);
        }
    }
    prompt
}

/// Locate the first complete JSON object in `text` that deserializes as `T`.
///
/// Each `{` is tried in order; its balanced closing brace is found while
/// skipping string literals, so prose and code fences around the payload
/// are ignored.
pub fn extract_payload<T: DeserializeOwned>(text: &str) -> Option<T> {
    for (start, _) in text.match_indices('{') {
        let Some(end) = balanced_object_end(text, start) else {
            continue;
        };
        if let Ok(value) = serde_json::from_str::<T>(&text[start..=end]) {
            return Some(value);
        }
    }
    None
}

/// Byte index of the `}` closing the object opened at `start`.
fn balanced_object_end(text: &str, start: usize) -> Option<usize> {
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (offset, c) in text[start..].char_indices() {
        if in_string {
            if escaped {
                escaped = false;
            } else if c == '\\' {
                escaped = true;
            } else if c == '"' {
                in_string = false;
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth = depth.saturating_sub(1);
                if depth == 0 {
                    return Some(start + offset);
                }
            }
            _ => {}
        }
    }
    None
}

fn is_affirmative(answer: &str) -> bool {
    answer.to_lowercase().contains("yes")
}

/// Summary assembled from recorded results when the model can't provide one.
pub fn synthetic_summary(workflow: &Workflow, state: &ExecutionState) -> String {
    let results = state.results_in_completion_order();
    let mut out = String::new();
    if !workflow.goal.is_empty() {
        let _ = writeln!(out, "Goal: {}", workflow.goal);
    }
    let _ = writeln!(
        out,
        "Completed {} of {} steps.",
        results.len(),
        workflow.steps.len()
    );
    for (id, result) in results {
        let _ = writeln!(out, "- {}: {}", id, clip(&result.render()));
    }
    out.trim_end().to_string()
}

fn clip(text: &str) -> String {
    if text.chars().count() <= MAX_RESULT_CHARS {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(MAX_RESULT_CHARS).collect();
    clipped.push_str("…");
    clipped
}

use std::sync::Arc;
use std::time::Duration;

use serde_json::json;

use planweave_agent::{FailureStage, PlannerGateway, RunStatus, WorkflowEngine};
use planweave_core::config::{EngineConfig, ModelConfig, SpawnConfig};
use planweave_core::error::PlanweaveError;
use planweave_core::types::ToolCatalogue;
use planweave_core::workflow::{StepResult, Violation, Workflow, WorkflowStep};
use planweave_test_utils::{
    catalogue, diamond_workflow, research_workflow, FnLlm, RecordingSpawner, ScriptedLlm,
    StaticTool,
};
use planweave_tools::ToolRegistry;

fn registry(names: &[&str]) -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    for name in names {
        registry.register(StaticTool::new(name, json!(format!("{} output", name))));
    }
    registry
}

/// Planner proposes `plan`, conditions hold, summaries and reasoning succeed.
fn planner_llm(plan: &Workflow) -> Arc<FnLlm> {
    let plan = serde_json::to_string(plan).unwrap();
    Arc::new(FnLlm::new(move |prompt| {
        if prompt.contains("You are a planner") {
            Ok(plan.clone())
        } else if prompt.contains("checking whether a condition holds") {
            Ok("yes".into())
        } else if prompt.starts_with("Summarize the outcome") {
            Ok("final summary".into())
        } else {
            Ok("reasoned".into())
        }
    }))
}

fn engine(llm: Arc<FnLlm>, tools: ToolRegistry) -> WorkflowEngine {
    WorkflowEngine::new(
        PlannerGateway::new(llm, ModelConfig::new("test-model")),
        Arc::new(tools),
    )
}

fn reasoning_calls(llm: &FnLlm, description: &str) -> usize {
    llm.prompts()
        .iter()
        .filter(|p| p.ends_with(description))
        .count()
}

#[tokio::test]
async fn research_task_completes_in_order() {
    let llm = planner_llm(&research_workflow());
    let tools = registry(&["web_search", "summarize"]);
    let catalogue = tools.catalogue();
    let engine = engine(llm.clone(), tools);

    let outcome = engine.run("research X and summarize", &catalogue).await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert_eq!(outcome.completed_step_ids, vec!["step1", "step2", "step3"]);
    assert_eq!(outcome.summary.as_deref(), Some("final summary"));
    assert!(outcome.failure.is_none());
    match &outcome.step_results["step1"] {
        StepResult::Tool(result) => {
            assert_eq!(result.tool_name, "web_search");
            assert_eq!(result.source_name, "builtin");
        }
        other => panic!("unexpected result {:?}", other),
    }
    assert_eq!(
        outcome.step_results["step3"],
        StepResult::Reasoning {
            content: "reasoned".into()
        }
    );

    // step3 saw both tool results, in completion order.
    let prompts = llm.prompts();
    let step3 = prompts
        .iter()
        .find(|p| p.ends_with("Write the final answer"))
        .unwrap();
    let first = step3.find("**step1**").unwrap();
    let second = step3.find("**step2**").unwrap();
    assert!(first < second);
}

#[tokio::test]
async fn diamond_join_runs_once_sequentially() {
    let llm = planner_llm(&diamond_workflow());
    let engine = engine(llm.clone(), registry(&[]));

    let outcome = engine
        .execute("diamond", &diamond_workflow(), &catalogue(&[]))
        .await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.completed_step_ids, vec!["A", "B", "D", "C"]);
    assert_eq!(reasoning_calls(&llm, "join"), 1);
}

#[tokio::test]
async fn diamond_join_runs_once_in_parallel() {
    let llm = planner_llm(&diamond_workflow());
    let engine = engine(llm.clone(), registry(&[])).with_config(EngineConfig {
        parallel_branches: true,
        ..EngineConfig::default()
    });

    let outcome = engine
        .execute("diamond", &diamond_workflow(), &catalogue(&[]))
        .await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.completed_step_ids.len(), 4);
    assert_eq!(outcome.completed_step_ids[0], "A");
    assert_eq!(reasoning_calls(&llm, "join"), 1);
    assert_eq!(outcome.step_results.len(), 4);
}

#[tokio::test]
async fn cycle_is_rejected_before_execution() {
    let wf = Workflow::new(
        "loop",
        vec![
            WorkflowStep::reasoning("A", "a").then(&["B"]),
            WorkflowStep::reasoning("B", "b").then(&["A"]),
        ],
    );
    let llm = planner_llm(&wf);
    let engine = engine(llm.clone(), registry(&[]));

    let outcome = engine.execute("loop", &wf, &catalogue(&[])).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(!outcome.started());
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.stage, FailureStage::Validation);
    assert!(failure.violations.contains(&Violation::Cycle {
        path: vec!["A".into(), "B".into(), "A".into()],
    }));
    assert!(failure.violations.contains(&Violation::NoTerminalStep));
    assert!(llm.prompts().is_empty());
}

#[tokio::test]
async fn unreachable_step_is_rejected() {
    let wf = Workflow::new(
        "orphan",
        vec![
            WorkflowStep::reasoning("A", "a").then(&["B"]),
            WorkflowStep::reasoning("B", "b"),
            WorkflowStep::reasoning("C", "c"),
        ],
    );
    let engine = engine(planner_llm(&wf), registry(&[]));

    let outcome = engine.execute("orphan", &wf, &catalogue(&[])).await;

    assert_eq!(
        outcome.violations(),
        [Violation::Unreachable { step: "C".into() }]
    );
    assert!(outcome.step_results.is_empty());
}

#[tokio::test]
async fn unknown_tool_fails_validation_before_any_step() {
    let wf = Workflow::new(
        "fetch",
        vec![
            WorkflowStep::tool_call("s1", "web_search").then(&["s2"]),
            WorkflowStep::tool_call("s2", "fetch_url"),
        ],
    );
    let llm = planner_llm(&wf);
    let tools = registry(&["web_search"]);
    let catalogue = tools.catalogue();
    let engine = engine(llm.clone(), tools);

    let outcome = engine.run("fetch a page", &catalogue).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(!outcome.started());
    assert_eq!(outcome.failure.as_ref().unwrap().stage, FailureStage::Validation);
    assert!(outcome.violations().contains(&Violation::UnknownTool {
        step: "s2".into(),
        tool: "fetch_url".into(),
    }));
    // Only the planning call was made.
    assert_eq!(llm.prompts().len(), 1);
}

#[tokio::test]
async fn missing_tool_at_runtime_keeps_other_path_alive() {
    let wf = Workflow::new(
        "two paths",
        vec![
            WorkflowStep::reasoning("A", "start").then(&["B", "C"]),
            WorkflowStep::tool_call("B", "fetch_url").then(&["D"]),
            WorkflowStep::tool_call("C", "web_search"),
            WorkflowStep::reasoning("D", "after fetch"),
        ],
    );
    let llm = planner_llm(&wf);
    // The catalogue advertises fetch_url but nothing provides it.
    let engine = engine(llm.clone(), registry(&["web_search"]));

    let outcome = engine
        .execute("two paths", &wf, &catalogue(&["web_search", "fetch_url"]))
        .await;

    assert_eq!(outcome.status, RunStatus::Completed);
    assert!(!outcome.step_results["B"].succeeded());
    assert!(outcome.step_results["C"].succeeded());
    assert!(!outcome.step_results.contains_key("D"));
    assert_eq!(reasoning_calls(&llm, "after fetch"), 0);
}

#[tokio::test]
async fn missing_tool_on_only_path_fails_run() {
    let wf = Workflow::new(
        "one path",
        vec![
            WorkflowStep::tool_call("A", "fetch_url").then(&["B"]),
            WorkflowStep::reasoning("B", "after fetch"),
        ],
    );
    let engine = engine(planner_llm(&wf), registry(&[]));

    let outcome = engine
        .execute("one path", &wf, &catalogue(&["fetch_url"]))
        .await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.failure_reason(), Some("no terminal step reached"));
    assert_eq!(outcome.completed_step_ids, vec!["A"]);
    assert!(outcome.summary.is_none());
}

#[tokio::test]
async fn reasoning_error_fails_run_with_partial_results() {
    let plan = serde_json::to_string(&research_workflow()).unwrap();
    let llm = Arc::new(FnLlm::new(move |prompt| {
        if prompt.contains("You are a planner") {
            Ok(plan.clone())
        } else {
            Err(PlanweaveError::LlmRequest("HTTP 401 unauthorized".into()))
        }
    }));
    let tools = registry(&["web_search", "summarize"]);
    let catalogue = tools.catalogue();
    let engine = engine(llm, tools);

    let outcome = engine.run("research X", &catalogue).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    let failure = outcome.failure.as_ref().unwrap();
    assert_eq!(failure.stage, FailureStage::Execution);
    assert!(failure.reason.contains("step3"));
    assert_eq!(outcome.completed_step_ids, vec!["step1", "step2"]);
    assert!(!outcome.step_results.contains_key("step3"));
    assert!(outcome.summary.is_none());
}

#[tokio::test]
async fn entry_step_failure_still_counts_as_started() {
    let wf = Workflow::new("g", vec![WorkflowStep::reasoning("only", "think")]);
    let llm = Arc::new(FnLlm::new(|_| {
        Err(PlanweaveError::LlmRequest("HTTP 401".into()))
    }));
    let engine = engine(llm, registry(&[]));

    let outcome = engine.execute("task", &wf, &catalogue(&[])).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.failure.as_ref().unwrap().stage, FailureStage::Execution);
    assert!(outcome.completed_step_ids.is_empty());
    assert!(outcome.started());
}

#[tokio::test]
async fn branch_takes_then_arm_only() {
    let wf = Workflow::new(
        "branch",
        vec![
            WorkflowStep::tool_call("search", "web_search").with_branch(
                "the search found results",
                &["dig"],
                &["give_up"],
            ),
            WorkflowStep::reasoning("dig", "dig deeper"),
            WorkflowStep::reasoning("give_up", "explain failure"),
        ],
    );
    let llm = planner_llm(&wf);
    let engine = engine(llm.clone(), registry(&["web_search"]));

    let outcome = engine.execute("branch", &wf, &catalogue(&["web_search"])).await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.completed_step_ids, vec!["search", "dig"]);
    assert_eq!(reasoning_calls(&llm, "explain failure"), 0);
}

#[tokio::test]
async fn branch_takes_else_arm_when_predicate_fails() {
    let wf = Workflow::new(
        "branch",
        vec![
            WorkflowStep::reasoning("check", "check it")
                .with_branch("it worked", &["celebrate"], &["retry_later"]),
            WorkflowStep::reasoning("celebrate", "celebrate"),
            WorkflowStep::reasoning("retry_later", "plan a retry"),
        ],
    );
    let llm = Arc::new(FnLlm::new(|prompt| {
        if prompt.contains("checking whether a condition holds") {
            Ok("No.".into())
        } else {
            Ok("fine".into())
        }
    }));
    let engine = engine(llm, registry(&[]));

    let outcome = engine.execute("branch", &wf, &catalogue(&[])).await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.completed_step_ids, vec!["check", "retry_later"]);
}

#[tokio::test(start_paused = true)]
async fn deadline_stops_dispatch_after_in_flight_step() {
    let wf = Workflow::new(
        "slow",
        vec![
            WorkflowStep::tool_call("step1", "slow_search").then(&["step2"]),
            WorkflowStep::reasoning("step2", "never reached"),
        ],
    );
    let mut tools = ToolRegistry::new();
    tools.register(
        StaticTool::new("slow_search", json!("late")).with_delay(Duration::from_secs(10)),
    );
    let llm = planner_llm(&wf);
    let engine = engine(llm.clone(), tools).with_config(EngineConfig {
        deadline_secs: Some(5),
        ..EngineConfig::default()
    });

    let outcome = engine.execute("slow", &wf, &catalogue(&["slow_search"])).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome.failure_reason().unwrap().contains("deadline"));
    // The in-flight call finished and its result was kept.
    assert_eq!(outcome.completed_step_ids, vec!["step1"]);
    assert_eq!(reasoning_calls(&llm, "never reached"), 0);
}

#[tokio::test(start_paused = true)]
async fn parallel_deadline_lets_sibling_calls_finish() {
    let wf = Workflow::new(
        "fan out",
        vec![
            WorkflowStep::reasoning("A", "plan").then(&["B", "C"]),
            WorkflowStep::tool_call("B", "medium_search").then(&["E"]),
            WorkflowStep::tool_call("C", "slow_search"),
            WorkflowStep::reasoning("E", "never reached"),
        ],
    );
    let mut tools = ToolRegistry::new();
    tools.register(
        StaticTool::new("medium_search", json!("b")).with_delay(Duration::from_secs(6)),
    );
    tools.register(
        StaticTool::new("slow_search", json!("c")).with_delay(Duration::from_secs(10)),
    );
    let llm = planner_llm(&wf);
    let engine = engine(llm.clone(), tools).with_config(EngineConfig {
        deadline_secs: Some(5),
        parallel_branches: true,
        ..EngineConfig::default()
    });

    let outcome = engine
        .execute("fan out", &wf, &catalogue(&["medium_search", "slow_search"]))
        .await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome.failure_reason().unwrap().contains("deadline"));
    // C was in flight when B's successor hit the deadline; its result is kept.
    assert_eq!(outcome.completed_step_ids, vec!["A", "B", "C"]);
    assert_eq!(reasoning_calls(&llm, "never reached"), 0);
}

#[tokio::test]
async fn invalid_plan_is_reproposed_with_feedback() {
    let bad = r#"{"goal": "g", "steps": [
        {"id": "a", "kind": "direct_reasoning", "description": "a", "next_steps": ["b"]},
        {"id": "b", "kind": "direct_reasoning", "description": "b", "next_steps": ["a"]}
    ]}"#;
    let good = r#"{"goal": "g", "steps": [{"id": "a", "kind": "direct_reasoning", "description": "a"}]}"#;
    let llm = Arc::new(ScriptedLlm::new(vec![bad, good, "answer", "summary"]));
    let engine = WorkflowEngine::new(
        PlannerGateway::new(llm.clone(), ModelConfig::new("m")),
        Arc::new(ToolRegistry::new()),
    )
    .with_config(EngineConfig {
        plan_attempts: 2,
        ..EngineConfig::default()
    });

    let outcome = engine.run("task", &ToolCatalogue::default()).await;

    assert!(outcome.is_completed());
    assert_eq!(outcome.summary.as_deref(), Some("summary"));
    let prompts = llm.prompts();
    assert!(!prompts[0].contains("previous plan was rejected"));
    assert!(prompts[1].contains("cycle detected: a -> b -> a"));
}

#[tokio::test]
async fn invalid_plan_without_retries_fails_validation() {
    let bad = r#"{"goal": "g", "steps": []}"#;
    let llm = Arc::new(ScriptedLlm::new(vec![bad]));
    let engine = WorkflowEngine::new(
        PlannerGateway::new(llm, ModelConfig::new("m")),
        Arc::new(ToolRegistry::new()),
    );

    let outcome = engine.run("task", &ToolCatalogue::default()).await;

    assert_eq!(outcome.failure.as_ref().unwrap().stage, FailureStage::Validation);
    assert_eq!(outcome.violations(), [Violation::EmptyWorkflow]);
}

#[tokio::test]
async fn unparseable_plan_fails_planning() {
    let llm = Arc::new(ScriptedLlm::new(vec!["Sorry, I can't plan that."]));
    let engine = WorkflowEngine::new(
        PlannerGateway::new(llm, ModelConfig::new("m")),
        Arc::new(ToolRegistry::new()),
    );

    let outcome = engine.run("task", &ToolCatalogue::default()).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert_eq!(outcome.failure.as_ref().unwrap().stage, FailureStage::Planning);
    assert!(!outcome.started());
}

#[tokio::test]
async fn delegate_step_runs_a_sub_agent() {
    let parent = Workflow::new(
        "parent",
        vec![
            WorkflowStep::delegate("d", "child task")
                .with_allowed_tools(vec!["web_search".into()])
                .then(&["wrap"]),
            WorkflowStep::reasoning("wrap", "Wrap up"),
        ],
    );
    let child = Workflow::new("child", vec![WorkflowStep::tool_call("s", "web_search")]);
    let parent_plan = serde_json::to_string(&parent).unwrap();
    let child_plan = serde_json::to_string(&child).unwrap();

    let llm = Arc::new(FnLlm::new(move |prompt| {
        let is_child = prompt.contains("child task") && !prompt.contains("parent task");
        if prompt.contains("You are a planner") {
            Ok(if is_child {
                child_plan.clone()
            } else {
                parent_plan.clone()
            })
        } else if prompt.starts_with("Summarize the outcome") {
            Ok(if prompt.contains("Task: child task") {
                "child answer".into()
            } else {
                "parent answer".into()
            })
        } else {
            Ok("wrapped".into())
        }
    }));
    let tools = registry(&["web_search", "shell"]);
    let catalogue = tools.catalogue();
    let engine = engine(llm.clone(), tools);

    let outcome = engine.run("parent task", &catalogue).await;

    assert!(outcome.is_completed());
    assert_eq!(
        outcome.step_results["d"],
        StepResult::Delegated {
            answer: "child answer".into()
        }
    );
    assert_eq!(outcome.summary.as_deref(), Some("parent answer"));

    let prompts = llm.prompts();
    let child_planning = prompts
        .iter()
        .find(|p| p.contains("You are a planner") && p.contains("Task:\nchild task"))
        .unwrap();
    assert!(!child_planning.contains("- shell:"));
    let wrap = prompts.iter().find(|p| p.ends_with("Wrap up")).unwrap();
    assert!(wrap.contains("**d**: child answer"));
}

#[tokio::test]
async fn spawn_budget_exceeded_fails_the_step() {
    let wf = Workflow::new("delegate", vec![WorkflowStep::delegate("d", "sub task")]);
    let engine = engine(planner_llm(&wf), registry(&[])).with_spawn_limits(SpawnConfig {
        max_depth: 0,
        max_fanout: 8,
    });

    let outcome = engine.execute("delegate", &wf, &catalogue(&[])).await;

    assert_eq!(outcome.status, RunStatus::Failed);
    assert!(outcome.failure_reason().unwrap().contains("budget"));
    assert!(outcome.step_results.is_empty());
}

#[tokio::test]
async fn custom_spawner_receives_delegations() {
    let wf = Workflow::new(
        "delegate",
        vec![WorkflowStep::delegate("d", "summarize the docs")
            .with_allowed_tools(vec!["web_search".into()])],
    );
    let spawner = Arc::new(RecordingSpawner::new("docs summary"));
    let engine = engine(planner_llm(&wf), registry(&["web_search"])).with_spawner(spawner.clone());

    let outcome = engine
        .execute("delegate", &wf, &catalogue(&["web_search"]))
        .await;

    assert!(outcome.is_completed());
    assert_eq!(
        spawner.calls(),
        vec![("summarize the docs".to_string(), vec!["web_search".to_string()])]
    );
}

//! Structural checks run on every proposed workflow before execution.
//!
//! Checks run in a fixed order so the same workflow always yields the same
//! violation list: duplicate ids, dangling references, cycles, reachability
//! from the entry step, terminal steps, then tool names.

use std::collections::HashSet;

use planweave_core::types::ToolCatalogue;
use planweave_core::workflow::{StepKind, Violation, Workflow};

use super::arena::StepGraph;

/// Validate `workflow` against `catalogue`.
///
/// Pure and deterministic. Returns every violation found, not just the first.
pub fn validate(workflow: &Workflow, catalogue: &ToolCatalogue) -> Result<(), Vec<Violation>> {
    if workflow.steps.is_empty() {
        return Err(vec![Violation::EmptyWorkflow]);
    }

    let graph = StepGraph::build(workflow);
    let mut violations = Vec::new();

    let mut seen = HashSet::new();
    let mut reported = HashSet::new();
    for step in &workflow.steps {
        if !seen.insert(step.id.as_str()) && reported.insert(step.id.as_str()) {
            violations.push(Violation::DuplicateStepId {
                id: step.id.clone(),
            });
        }
    }

    for (from, target) in graph.dangling() {
        violations.push(Violation::UnknownStepReference {
            step: graph.step(*from).id.clone(),
            target: target.clone(),
        });
    }

    violations.extend(find_cycles(&graph));

    let reachable = graph.reachable();
    for (idx, step) in graph.steps() {
        if !reachable[idx] {
            violations.push(Violation::Unreachable {
                step: step.id.clone(),
            });
        }
    }

    if graph.terminals().is_empty() {
        violations.push(Violation::NoTerminalStep);
    }

    for (_, step) in graph.steps() {
        match step.kind {
            StepKind::ToolCall => match step.tool_name.as_deref() {
                None | Some("") => violations.push(Violation::MissingToolName {
                    step: step.id.clone(),
                }),
                Some(tool) if !catalogue.contains(tool) => {
                    violations.push(Violation::UnknownTool {
                        step: step.id.clone(),
                        tool: tool.to_string(),
                    })
                }
                Some(_) => {}
            },
            StepKind::Delegate => {
                for tool in &step.allowed_tools {
                    if !catalogue.contains(tool) {
                        violations.push(Violation::UnknownTool {
                            step: step.id.clone(),
                            tool: tool.clone(),
                        });
                    }
                }
            }
            StepKind::DirectReasoning => {}
        }
    }

    if violations.is_empty() {
        Ok(())
    } else {
        Err(violations)
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Color {
    White,
    Gray,
    Black,
}

/// Three-color DFS over every step, entry first. Each back edge yields one
/// cycle whose path starts and ends on the same id.
fn find_cycles(graph: &StepGraph) -> Vec<Violation> {
    let mut colors = vec![Color::White; graph.len()];
    let mut stack = Vec::new();
    let mut cycles = Vec::new();

    for idx in 0..graph.len() {
        if colors[idx] == Color::White {
            visit(graph, idx, &mut colors, &mut stack, &mut cycles);
        }
    }
    cycles
}

fn visit(
    graph: &StepGraph,
    node: usize,
    colors: &mut [Color],
    stack: &mut Vec<usize>,
    cycles: &mut Vec<Violation>,
) {
    colors[node] = Color::Gray;
    stack.push(node);

    for &next in graph.successors(node) {
        match colors[next] {
            Color::White => visit(graph, next, colors, stack, cycles),
            Color::Gray => {
                let start = stack.iter().position(|&n| n == next).unwrap_or(0);
                let mut path: Vec<String> = stack[start..]
                    .iter()
                    .map(|&n| graph.step(n).id.clone())
                    .collect();
                path.push(graph.step(next).id.clone());
                cycles.push(Violation::Cycle { path });
            }
            Color::Black => {}
        }
    }

    stack.pop();
    colors[node] = Color::Black;
}

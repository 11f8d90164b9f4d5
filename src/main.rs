use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use planweave_agent::{extract_payload, validate, StepGraph};
use planweave_core::config::AppConfig;
use planweave_core::types::{ToolCatalogue, ToolDescriptor};
use planweave_core::workflow::Workflow;

#[derive(Parser)]
#[command(name = "planweave", version, about = "Plan, validate and inspect workflow graphs")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check a workflow file against the structural invariants
    Validate {
        /// Workflow JSON (raw planner output is accepted too)
        workflow: PathBuf,
        /// JSON array of tool descriptors or tool names
        #[arg(short, long)]
        catalogue: Option<PathBuf>,
        /// Extra tool name to treat as available (repeatable)
        #[arg(long = "tool")]
        tools: Vec<String>,
    },
    /// Show the entry step, terminal steps and a topological order
    Inspect {
        /// Workflow JSON (raw planner output is accepted too)
        workflow: PathBuf,
    },
    /// Load a config file and print the effective configuration
    Config {
        /// Path to config file
        #[arg(default_value = "planweave.toml")]
        path: PathBuf,
    },
}

fn main() -> anyhow::Result<ExitCode> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("planweave=info,warn")),
        )
        .with_target(false)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate {
            workflow,
            catalogue,
            tools,
        } => {
            let wf = load_workflow(&workflow)?;
            let mut descriptors = match catalogue {
                Some(path) => load_catalogue(&path)?,
                None => vec![],
            };
            for name in tools {
                descriptors.push(ToolDescriptor::new(name, "", "cli"));
            }
            let catalogue = ToolCatalogue::new(descriptors);
            debug!(steps = wf.steps.len(), tools = catalogue.len(), "Validating workflow");

            match validate(&wf, &catalogue) {
                Ok(()) => {
                    println!("OK: {} steps, no violations", wf.steps.len());
                    Ok(ExitCode::SUCCESS)
                }
                Err(violations) => {
                    println!("{} violation(s):", violations.len());
                    for v in &violations {
                        println!("  [{}] {}", v.invariant(), v);
                    }
                    Ok(ExitCode::FAILURE)
                }
            }
        }
        Commands::Inspect { workflow } => {
            let wf = load_workflow(&workflow)?;
            let graph = StepGraph::build(&wf);
            let Some(entry) = graph.entry() else {
                bail!("workflow has no steps");
            };

            if !wf.goal.is_empty() {
                println!("Goal:      {}", wf.goal);
            }
            println!("Steps:     {}", graph.len());
            println!("Entry:     {}", graph.step(entry).id);
            let terminals: Vec<&str> = graph
                .terminals()
                .into_iter()
                .map(|idx| graph.step(idx).id.as_str())
                .collect();
            println!(
                "Terminals: {}",
                if terminals.is_empty() {
                    "(none)".to_string()
                } else {
                    terminals.join(", ")
                }
            );
            match graph.topological_order() {
                Some(order) => {
                    println!("Order:");
                    for (n, idx) in order.into_iter().enumerate() {
                        let step = graph.step(idx);
                        let tool = step
                            .tool_name
                            .as_deref()
                            .map(|t| format!(" ({})", t))
                            .unwrap_or_default();
                        println!("  {:>2}. {} [{}]{}", n + 1, step.id, step.kind, tool);
                    }
                }
                None => println!("Order:     (graph has a cycle)"),
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Config { path } => {
            let config = AppConfig::load(&path)
                .with_context(|| format!("failed to load {}", path.display()))?;
            info!(path = %path.display(), "Config loaded");
            println!("{}", toml::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
    }
}

/// Parse a workflow file, falling back to locating the payload in prose.
fn load_workflow(path: &Path) -> anyhow::Result<Workflow> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    match serde_json::from_str::<Workflow>(&text) {
        Ok(wf) => Ok(wf),
        Err(e) => extract_payload::<Workflow>(&text)
            .with_context(|| format!("no workflow found in {}: {}", path.display(), e)),
    }
}

fn load_catalogue(path: &Path) -> anyhow::Result<Vec<ToolDescriptor>> {
    let text = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if let Ok(descriptors) = serde_json::from_str::<Vec<ToolDescriptor>>(&text) {
        return Ok(descriptors);
    }
    let names: Vec<String> = serde_json::from_str(&text)
        .with_context(|| format!("{} is not a tool catalogue", path.display()))?;
    Ok(names
        .into_iter()
        .map(|name| ToolDescriptor::new(name, "", "builtin"))
        .collect())
}

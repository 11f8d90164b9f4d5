use std::sync::atomic::{AtomicUsize, Ordering};

use futures::future::BoxFuture;
use tracing::info;

use planweave_core::config::SpawnConfig;
use planweave_core::error::{PlanweaveError, Result};
use planweave_core::traits::AgentSpawner;
use planweave_core::types::ToolCatalogue;

use crate::graph::WorkflowEngine;

/// Spawns sub-agents as nested workflow engines.
///
/// One spawner serves one parent run. Each sub-agent plans its own workflow
/// against the parent's catalogue, narrowed to the delegate step's
/// `allowed_tools`. Nesting depth and the number of sub-agents per run are
/// capped by `SpawnConfig`.
pub struct RecursiveSpawner {
    engine: WorkflowEngine,
    catalogue: ToolCatalogue,
    limits: SpawnConfig,
    spawned: AtomicUsize,
}

impl RecursiveSpawner {
    /// `engine` is the sub-agent engine, already one level below the parent.
    pub fn new(engine: WorkflowEngine, catalogue: ToolCatalogue, limits: SpawnConfig) -> Self {
        Self {
            engine,
            catalogue,
            limits,
            spawned: AtomicUsize::new(0),
        }
    }

    /// Sub-agents spawned so far, including rejected attempts.
    pub fn spawned(&self) -> usize {
        self.spawned.load(Ordering::SeqCst)
    }

    /// Run `task` in a sub-engine and return its summary.
    pub async fn spawn_restricted(&self, task: &str, allowed_tools: &[String]) -> Result<String> {
        let depth = self.engine.depth();
        if depth > self.limits.max_depth {
            return Err(PlanweaveError::SpawnBudgetExceeded(format!(
                "depth {} exceeds max_depth {}",
                depth, self.limits.max_depth
            )));
        }
        let count = self.spawned.fetch_add(1, Ordering::SeqCst) + 1;
        if count > self.limits.max_fanout {
            return Err(PlanweaveError::SpawnBudgetExceeded(format!(
                "{} sub-agents exceed max_fanout {}",
                count, self.limits.max_fanout
            )));
        }

        let catalogue = self.catalogue.restrict(allowed_tools);
        info!(depth, tools = catalogue.len(), "Spawning sub-agent");

        let outcome = self.engine.run(task, &catalogue).await;
        if outcome.is_completed() {
            Ok(outcome.summary.unwrap_or_default())
        } else {
            Err(PlanweaveError::step(
                format!("sub-agent {}", outcome.run_id),
                outcome.failure_reason().unwrap_or("run failed"),
            ))
        }
    }
}

impl AgentSpawner for RecursiveSpawner {
    fn spawn(&self, task: String, allowed_tools: Vec<String>) -> BoxFuture<'_, Result<String>> {
        Box::pin(async move { self.spawn_restricted(&task, &allowed_tools).await })
    }
}

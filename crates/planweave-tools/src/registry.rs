use std::collections::HashMap;
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use planweave_core::error::{PlanweaveError, Result};
use planweave_core::traits::{Tool, ToolInvoker};
use planweave_core::types::{ToolCatalogue, ToolDescriptor, ToolResult};

/// Registry of available tools.
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool.
    pub fn register(&mut self, tool: impl Tool) {
        let name = tool.name().to_string();
        self.tools.insert(name, Arc::new(tool));
    }

    /// Unregister a tool by name.
    pub fn unregister(&mut self, name: &str) -> bool {
        self.tools.remove(name).is_some()
    }

    /// Get a tool by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// List all registered tool names, sorted.
    pub fn list(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.tools.keys().map(|s| s.as_str()).collect();
        names.sort_unstable();
        names
    }

    /// Catalogue handed to the planner, in name order.
    pub fn catalogue(&self) -> ToolCatalogue {
        let descriptors = self
            .list()
            .into_iter()
            .filter_map(|name| self.tools.get(name))
            .map(|t| ToolDescriptor::new(t.name(), t.description(), t.source()))
            .collect();
        ToolCatalogue::new(descriptors)
    }

    /// Execute a tool by name.
    pub async fn execute(&self, name: &str, params: serde_json::Value) -> Result<ToolResult> {
        let tool = self
            .get(name)
            .ok_or_else(|| PlanweaveError::ToolNotFound(name.to_string()))?;

        let timeout = std::time::Duration::from_secs(tool.timeout_secs());
        debug!(tool = %name, timeout_secs = tool.timeout_secs(), "Invoking tool");

        match tokio::time::timeout(timeout, tool.execute(params)).await {
            Ok(result) => Ok(ToolResult::new(tool.source(), name, result?)),
            Err(_) => Err(PlanweaveError::ToolTimeout {
                tool: name.to_string(),
                timeout_secs: tool.timeout_secs(),
            }),
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolInvoker for ToolRegistry {
    fn invoke(
        &self,
        tool_name: &str,
        params: serde_json::Value,
    ) -> BoxFuture<'_, Result<ToolResult>> {
        let tool_name = tool_name.to_string();
        Box::pin(async move { self.execute(&tool_name, params).await })
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use planweave_test_utils::{EchoTool, StaticTool};

    struct SlowTool;

    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "Never finishes in time"
        }

        fn timeout_secs(&self) -> u64 {
            1
        }

        fn execute(&self, _params: serde_json::Value) -> BoxFuture<'_, Result<serde_json::Value>> {
            Box::pin(async move {
                tokio::time::sleep(Duration::from_secs(60)).await;
                Ok(serde_json::Value::Null)
            })
        }
    }

    #[tokio::test]
    async fn test_invoke_wraps_value_with_source() {
        let mut registry = ToolRegistry::new();
        registry.register(
            StaticTool::new("web_search", serde_json::json!("results")).with_source("search"),
        );

        let result = registry
            .invoke("web_search", serde_json::json!({"query": "rust"}))
            .await
            .unwrap();
        assert_eq!(result.source_name, "search");
        assert_eq!(result.tool_name, "web_search");
        assert_eq!(result.value, serde_json::json!("results"));
    }

    #[tokio::test]
    async fn test_invoke_passes_parameters() {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);

        let result = registry
            .invoke("echo", serde_json::json!({"n": 1}))
            .await
            .unwrap();
        assert_eq!(result.value, serde_json::json!({"n": 1}));
    }

    #[tokio::test]
    async fn test_missing_tool_is_not_found() {
        let registry = ToolRegistry::new();
        let err = registry
            .invoke("fetch_url", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, PlanweaveError::ToolNotFound(name) if name == "fetch_url"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_tool_timeout() {
        let mut registry = ToolRegistry::new();
        registry.register(SlowTool);

        let err = registry
            .invoke("slow", serde_json::Value::Null)
            .await
            .unwrap_err();
        assert!(matches!(err, PlanweaveError::ToolTimeout { timeout_secs: 1, .. }));
    }

    #[test]
    fn test_catalogue_is_sorted_and_grouped() {
        let mut registry = ToolRegistry::new();
        registry.register(
            StaticTool::new("web_search", serde_json::json!(1)).with_source("search"),
        );
        registry.register(EchoTool);

        let catalogue = registry.catalogue();
        assert_eq!(catalogue.names(), vec!["echo", "web_search"]);
        assert_eq!(catalogue.by_source()["search"].len(), 1);
        assert!(registry.unregister("echo"));
        assert_eq!(registry.list(), vec!["web_search"]);
    }
}

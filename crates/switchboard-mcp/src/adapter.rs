//! Adapter between a local ToolRegistry and the MCP tool surface

use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use switchboard_core::tools::ToolRegistry;

use crate::protocol::{McpTool, ToolCallResult};

/// Serves a ToolRegistry as MCP tools
#[derive(Clone)]
pub struct McpToolAdapter {
    registry: Arc<ToolRegistry>,
}

impl McpToolAdapter {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// List all tools as MCP tool definitions
    pub fn list_tools(&self) -> Vec<McpTool> {
        self.registry
            .list_tools()
            .into_iter()
            .map(|t| McpTool {
                name: t.name,
                description: t.description,
                input_schema: t.input_schema,
            })
            .collect()
    }

    /// Execute a tool. Failures come back as `isError` results, not JSON-RPC errors.
    pub async fn call_tool(&self, name: &str, arguments: Value) -> ToolCallResult {
        debug!("MCP calling tool: {}", name);
        match self.registry.execute(name, arguments).await {
            Ok(text) => ToolCallResult::text(text),
            Err(e) => ToolCallResult::error(format!("Error: {}", e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::tools::math;

    #[test]
    fn test_list_tools() {
        let adapter = McpToolAdapter::new(Arc::new(math::registry()));
        let names: Vec<String> = adapter.list_tools().into_iter().map(|t| t.name).collect();
        assert_eq!(names, vec!["add", "multiply"]);
    }

    #[tokio::test]
    async fn test_call_tool() {
        let adapter = McpToolAdapter::new(Arc::new(math::registry()));
        let result = adapter
            .call_tool("add", serde_json::json!({"a": 3, "b": 5}))
            .await;
        assert_eq!(result.is_error, None);
        assert_eq!(result.joined_text(), "8");
    }

    #[tokio::test]
    async fn test_call_unknown_tool() {
        let adapter = McpToolAdapter::new(Arc::new(ToolRegistry::new()));
        let result = adapter.call_tool("nonexistent", serde_json::json!({})).await;
        assert_eq!(result.is_error, Some(true));
        assert!(result.joined_text().contains("Unknown tool"));
    }
}

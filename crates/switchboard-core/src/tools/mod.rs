//! Local tool handlers and their registry

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

pub mod currency;
pub mod math;

pub use currency::{FrankfurterRates, RateQuote, RateSource, StaticRates};

/// Model-facing description of a tool
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Individual tool handler
#[async_trait]
pub trait ToolHandler: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn input_schema(&self) -> Value;
    async fn execute(&self, input: Value) -> Result<String>;
}

/// Registry of tools executed in this process.
///
/// This is what an MCP or A2A server hosts. Remote tools reached through a
/// transport live in [`crate::catalog::ToolCatalog`] instead.
pub struct ToolRegistry {
    tools: HashMap<Arc<str>, Arc<dyn ToolHandler>>,
}

impl ToolRegistry {
    /// Create a new empty tool registry
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Register a tool handler, replacing any handler with the same name
    pub fn register(&mut self, handler: Arc<dyn ToolHandler>) {
        let name: Arc<str> = Arc::from(handler.name());
        debug!("Registering tool: {}", name);
        self.tools.insert(name, handler);
    }

    /// Get a tool by name
    pub fn get(&self, name: &str) -> Option<Arc<dyn ToolHandler>> {
        self.tools.get(name).cloned()
    }

    /// Number of registered tools
    pub fn len(&self) -> usize {
        self.tools.len()
    }

    /// Check if registry is empty
    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Tool definitions sorted by name
    pub fn list_tools(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<ToolDefinition> = self
            .tools
            .values()
            .map(|handler| ToolDefinition {
                name: handler.name().to_string(),
                description: handler.description().to_string(),
                input_schema: handler.input_schema(),
            })
            .collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    /// Execute a tool by name
    pub async fn execute(&self, tool_name: &str, input: Value) -> Result<String> {
        debug!("Executing tool: {} with input: {:?}", tool_name, input);

        let handler = self
            .tools
            .get(tool_name)
            .ok_or_else(|| anyhow!("Unknown tool: {}", tool_name))?;

        match handler.execute(input).await {
            Ok(result) => {
                debug!("Tool {} succeeded", tool_name);
                Ok(result)
            }
            Err(e) => {
                warn!("Tool {} failed: {}", tool_name, e);
                Err(e)
            }
        }
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Helper function to create a JSON schema for tool input
pub fn json_schema(properties: Value, required: Vec<&str>) -> Value {
    serde_json::json!({
        "type": "object",
        "properties": properties,
        "required": required,
    })
}

/// Read a required numeric argument
pub(crate) fn number_arg(input: &Value, key: &str) -> Result<f64> {
    match input.get(key) {
        Some(Value::Number(n)) => n
            .as_f64()
            .ok_or_else(|| anyhow!("'{}' is not a finite number", key)),
        // Models occasionally quote numbers
        Some(Value::String(s)) => s
            .trim()
            .parse::<f64>()
            .map_err(|_| anyhow!("'{}' must be a number, got \"{}\"", key, s)),
        Some(other) => Err(anyhow!("'{}' must be a number, got {}", key, other)),
        None => Err(anyhow!("Missing '{}' parameter", key)),
    }
}

/// Read a required string argument
pub(crate) fn string_arg<'a>(input: &'a Value, key: &str) -> Result<&'a str> {
    input
        .get(key)
        .and_then(|v| v.as_str())
        .ok_or_else(|| anyhow!("Missing '{}' parameter", key))
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Echoes its `word` argument back in upper case
    struct Shout;

    #[async_trait]
    impl ToolHandler for Shout {
        fn name(&self) -> &str {
            "shout"
        }
        fn description(&self) -> &str {
            "Upper-cases a word"
        }
        fn input_schema(&self) -> Value {
            json_schema(serde_json::json!({"word": {"type": "string"}}), vec!["word"])
        }
        async fn execute(&self, input: Value) -> Result<String> {
            Ok(string_arg(&input, "word")?.to_uppercase())
        }
    }

    struct Broken;

    #[async_trait]
    impl ToolHandler for Broken {
        fn name(&self) -> &str {
            "broken"
        }
        fn description(&self) -> &str {
            "Never works"
        }
        fn input_schema(&self) -> Value {
            json_schema(serde_json::json!({}), vec![])
        }
        async fn execute(&self, _input: Value) -> Result<String> {
            Err(anyhow!("backend on fire"))
        }
    }

    fn registry() -> ToolRegistry {
        let mut registry = ToolRegistry::new();
        registry.register(Arc::new(Shout));
        registry.register(Arc::new(Broken));
        registry
    }

    #[tokio::test]
    async fn test_execute_by_name() {
        let out = registry()
            .execute("shout", serde_json::json!({"word": "hey"}))
            .await
            .unwrap();
        assert_eq!(out, "HEY");
    }

    #[tokio::test]
    async fn test_execute_errors() {
        let registry = registry();
        let err = registry
            .execute("whisper", serde_json::json!({}))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "Unknown tool: whisper");

        let err = registry
            .execute("broken", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("on fire"));

        let err = registry
            .execute("shout", serde_json::json!({"word": 7}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("'word'"));
    }

    #[test]
    fn test_definitions_sorted_and_replaced() {
        let mut registry = registry();
        registry.register(Arc::new(Shout));
        assert_eq!(registry.len(), 2);

        let names: Vec<String> = registry.list_tools().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["broken", "shout"]);
        assert_eq!(
            registry.list_tools()[1].input_schema["required"],
            serde_json::json!(["word"])
        );
    }

    #[test]
    fn test_number_arg_accepts_quoted_numbers() {
        let input = serde_json::json!({"a": 3, "b": " 5.5", "c": true});
        assert_eq!(number_arg(&input, "a").unwrap(), 3.0);
        assert_eq!(number_arg(&input, "b").unwrap(), 5.5);
        assert!(number_arg(&input, "c").is_err());
        assert!(
            number_arg(&input, "d")
                .unwrap_err()
                .to_string()
                .contains("Missing 'd'")
        );
    }
}

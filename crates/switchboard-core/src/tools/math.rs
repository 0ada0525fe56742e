//! Math toolset: `add` and `multiply`

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{ToolHandler, ToolRegistry, json_schema, number_arg};

/// Register every math tool into a registry
pub fn register_all(registry: &mut ToolRegistry) {
    registry.register(Arc::new(AddTool));
    registry.register(Arc::new(MultiplyTool));
}

/// Build a registry holding only the math toolset
pub fn registry() -> ToolRegistry {
    let mut registry = ToolRegistry::new();
    register_all(&mut registry);
    registry
}

fn operands_schema() -> Value {
    json_schema(
        serde_json::json!({
            "a": { "type": "number", "description": "First number" },
            "b": { "type": "number", "description": "Second number" }
        }),
        vec!["a", "b"],
    )
}

/// Render a number the way a person would write it: `8` rather than `8.0`.
pub fn format_number(value: f64) -> String {
    if value.fract() == 0.0 && value.abs() < 1e15 {
        format!("{}", value as i64)
    } else {
        format!("{}", value)
    }
}

fn checked(value: f64, op: &str) -> Result<String> {
    if !value.is_finite() {
        return Err(anyhow!("Result of {} is not a finite number", op));
    }
    Ok(format_number(value))
}

pub struct AddTool;

#[async_trait]
impl ToolHandler for AddTool {
    fn name(&self) -> &str {
        "add"
    }

    fn description(&self) -> &str {
        "Add two numbers and return the sum."
    }

    fn input_schema(&self) -> Value {
        operands_schema()
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let a = number_arg(&input, "a")?;
        let b = number_arg(&input, "b")?;
        checked(a + b, "addition")
    }
}

pub struct MultiplyTool;

#[async_trait]
impl ToolHandler for MultiplyTool {
    fn name(&self) -> &str {
        "multiply"
    }

    fn description(&self) -> &str {
        "Multiply two numbers and return the product."
    }

    fn input_schema(&self) -> Value {
        operands_schema()
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let a = number_arg(&input, "a")?;
        let b = number_arg(&input, "b")?;
        checked(a * b, "multiplication")
    }
}

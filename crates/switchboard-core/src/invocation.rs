//! Tool invocation envelopes and the invoker seam the agent talks to

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::DispatchError;
use crate::tools::{ToolDefinition, ToolRegistry};

/// One tool invocation request
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolCall {
    pub tool_name: String,
    #[serde(default = "empty_object")]
    pub arguments: Value,
    pub correlation_id: String,
}

fn empty_object() -> Value {
    Value::Object(Default::default())
}

impl ToolCall {
    /// Build a call with a fresh correlation id
    pub fn new(tool_name: impl Into<String>, arguments: Value) -> Self {
        Self::with_id(tool_name, arguments, uuid::Uuid::new_v4().to_string())
    }

    pub fn with_id(
        tool_name: impl Into<String>,
        arguments: Value,
        correlation_id: impl Into<String>,
    ) -> Self {
        Self {
            tool_name: tool_name.into(),
            arguments,
            correlation_id: correlation_id.into(),
        }
    }
}

/// Outcome of one invocation, tagged with the originating call's id
#[derive(Debug, Clone, PartialEq)]
pub struct ToolResponse {
    pub correlation_id: String,
    pub outcome: Result<Value, DispatchError>,
}

impl ToolResponse {
    pub fn ok(correlation_id: impl Into<String>, result: Value) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome: Ok(result),
        }
    }

    pub fn err(correlation_id: impl Into<String>, error: DispatchError) -> Self {
        Self {
            correlation_id: correlation_id.into(),
            outcome: Err(error),
        }
    }

    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }

    /// Wire form: `{correlationId, result}` or `{correlationId, error: {kind, message}}`
    pub fn to_envelope(&self) -> Value {
        match &self.outcome {
            Ok(result) => serde_json::json!({
                "correlationId": self.correlation_id,
                "result": result,
            }),
            Err(e) => serde_json::json!({
                "correlationId": self.correlation_id,
                "error": {
                    "kind": e.kind(),
                    "message": e.to_string(),
                },
            }),
        }
    }

    /// Text handed back to a model
    pub fn render(&self) -> String {
        match &self.outcome {
            Ok(Value::String(s)) => s.clone(),
            Ok(other) => other.to_string(),
            Err(e) => format!("Error ({}): {}", e.kind(), e),
        }
    }
}

/// Anything that can run tool calls for an orchestrator
#[async_trait]
pub trait ToolInvoker: Send + Sync {
    /// Tools the orchestrator may call
    fn definitions(&self) -> Vec<ToolDefinition>;

    /// Run one call. Never fails as a whole; errors ride in the response.
    async fn invoke(&self, call: ToolCall) -> ToolResponse;

    /// Run calls concurrently. Responses carry their call's correlation id.
    async fn invoke_all(&self, calls: Vec<ToolCall>) -> Vec<ToolResponse> {
        futures_util::future::join_all(calls.into_iter().map(|call| self.invoke(call))).await
    }
}

/// In-process invocation, used when tools run in the same binary
#[async_trait]
impl ToolInvoker for ToolRegistry {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.list_tools()
    }

    async fn invoke(&self, call: ToolCall) -> ToolResponse {
        let Some(handler) = self.get(&call.tool_name) else {
            return ToolResponse::err(
                call.correlation_id,
                DispatchError::UnknownTool(call.tool_name),
            );
        };
        match handler.execute(call.arguments).await {
            Ok(text) => ToolResponse::ok(call.correlation_id, text_to_value(text)),
            Err(e) => ToolResponse::err(
                call.correlation_id,
                DispatchError::tool_failed(call.tool_name, e.to_string()),
            ),
        }
    }
}

/// Interpret tool text output: JSON scalars/objects come back typed, prose stays a string
pub fn text_to_value(text: String) -> Value {
    match serde_json::from_str::<Value>(text.trim()) {
        Ok(v) => v,
        Err(_) => Value::String(text),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::math;
    use std::time::Duration;

    #[test]
    fn test_call_serialization() {
        let call = ToolCall::with_id("add", serde_json::json!({"a": 3, "b": 5}), "c-1");
        let json = serde_json::to_value(&call).unwrap();
        assert_eq!(json["toolName"], "add");
        assert_eq!(json["correlationId"], "c-1");
        assert_eq!(json["arguments"]["b"], 5);

        let parsed: ToolCall =
            serde_json::from_str(r#"{"toolName":"ping","correlationId":"x"}"#).unwrap();
        assert!(parsed.arguments.as_object().unwrap().is_empty());
    }

    #[test]
    fn test_new_calls_get_unique_ids() {
        let a = ToolCall::new("add", serde_json::json!({}));
        let b = ToolCall::new("add", serde_json::json!({}));
        assert_ne!(a.correlation_id, b.correlation_id);
    }

    #[test]
    fn test_envelopes() {
        let ok = ToolResponse::ok("c-1", serde_json::json!(8));
        assert_eq!(
            ok.to_envelope(),
            serde_json::json!({"correlationId": "c-1", "result": 8})
        );

        let err = ToolResponse::err(
            "c-2",
            DispatchError::timeout("tools/call add", Duration::from_millis(1)),
        );
        let env = err.to_envelope();
        assert_eq!(env["correlationId"], "c-2");
        assert_eq!(env["error"]["kind"], "timeout_error");
        assert!(env.get("result").is_none());
    }

    #[test]
    fn test_render() {
        assert_eq!(ToolResponse::ok("a", serde_json::json!("hi")).render(), "hi");
        assert_eq!(ToolResponse::ok("a", serde_json::json!(8)).render(), "8");
        let rendered =
            ToolResponse::err("a", DispatchError::UnknownTool("x".to_string())).render();
        assert!(rendered.starts_with("Error (unknown_tool_error)"));
    }

    #[test]
    fn test_text_to_value() {
        assert_eq!(text_to_value("8".to_string()), serde_json::json!(8));
        assert_eq!(
            text_to_value("1 USD = 0.9 EUR".to_string()),
            serde_json::json!("1 USD = 0.9 EUR")
        );
    }

    #[tokio::test]
    async fn test_registry_invoker() {
        let registry = math::registry();
        let responses = registry
            .invoke_all(vec![
                ToolCall::with_id("add", serde_json::json!({"a": 3, "b": 5}), "first"),
                ToolCall::with_id("divide", serde_json::json!({}), "second"),
                ToolCall::with_id("multiply", serde_json::json!({"a": 2}), "third"),
            ])
            .await;

        assert_eq!(responses.len(), 3);
        let by_id = |id: &str| responses.iter().find(|r| r.correlation_id == id).unwrap();
        assert_eq!(by_id("first").outcome, Ok(serde_json::json!(8)));
        assert_eq!(
            by_id("second").outcome,
            Err(DispatchError::UnknownTool("divide".to_string()))
        );
        assert_eq!(
            by_id("third").outcome.as_ref().unwrap_err().kind(),
            "tool_execution_error"
        );
    }
}

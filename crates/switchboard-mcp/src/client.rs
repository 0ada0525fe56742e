//! MCP client: handshake, tool discovery and tool calls over any transport

use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use switchboard_core::invocation::text_to_value;
use switchboard_core::{DispatchError, DispatchResult, Endpoint};

use crate::protocol::{McpTool, PROTOCOL_VERSION, ToolCallResult};
use crate::transport::{ResourceGauge, SseTransport, StdioTransport, Transport};

/// An initialized MCP connection to one back end
pub struct McpClient {
    backend: String,
    transport: Arc<dyn Transport>,
    server_name: Option<String>,
}

impl McpClient {
    /// Open the transport for `endpoint` and run the `initialize` handshake.
    ///
    /// A failed handshake closes the transport before returning.
    pub async fn connect(
        backend: &str,
        endpoint: &Endpoint,
        connect_timeout: Duration,
        gauge: &ResourceGauge,
    ) -> DispatchResult<Self> {
        let transport: Arc<dyn Transport> = match endpoint {
            Endpoint::LocalProcess { command, args, env } => {
                Arc::new(StdioTransport::spawn(backend, command, args, env, gauge)?)
            }
            Endpoint::StreamingNetwork { url } => {
                Arc::new(SseTransport::connect(backend, url, connect_timeout, gauge).await?)
            }
        };

        match Self::initialize(backend, transport.as_ref(), connect_timeout).await {
            Ok(server_name) => {
                info!(
                    "MCP client connected to '{}' over {} (server: {})",
                    backend,
                    transport.kind(),
                    server_name.as_deref().unwrap_or("unknown")
                );
                Ok(Self {
                    backend: backend.to_string(),
                    transport,
                    server_name,
                })
            }
            Err(e) => {
                transport.close().await;
                Err(e)
            }
        }
    }

    async fn initialize(
        backend: &str,
        transport: &dyn Transport,
        timeout: Duration,
    ) -> DispatchResult<Option<String>> {
        let result = transport
            .request(
                "initialize",
                serde_json::json!({
                    "protocolVersion": PROTOCOL_VERSION,
                    "capabilities": {},
                    "clientInfo": {
                        "name": "switchboard",
                        "version": env!("CARGO_PKG_VERSION")
                    }
                }),
                timeout,
            )
            .await
            .map_err(|e| match e {
                // a slow start is a readiness problem, not a broken server
                DispatchError::Timeout { .. } => {
                    DispatchError::not_ready(backend, "initialize handshake timed out")
                }
                other => other,
            })?;

        debug!("MCP initialize response from '{}': {}", backend, result);
        transport
            .notify("notifications/initialized", serde_json::json!({}))
            .await?;

        Ok(result
            .pointer("/serverInfo/name")
            .and_then(Value::as_str)
            .map(str::to_string))
    }

    pub fn backend(&self) -> &str {
        &self.backend
    }

    pub fn server_name(&self) -> Option<&str> {
        self.server_name.as_deref()
    }

    pub fn transport_kind(&self) -> &'static str {
        self.transport.kind()
    }

    /// Discover tools via `tools/list`
    pub async fn list_tools(&self, timeout: Duration) -> DispatchResult<Vec<McpTool>> {
        let result = self
            .transport
            .request("tools/list", serde_json::json!({}), timeout)
            .await?;
        let tools: Vec<McpTool> = serde_json::from_value(
            result
                .get("tools")
                .cloned()
                .unwrap_or(serde_json::json!([])),
        )
        .map_err(|e| DispatchError::protocol(&self.backend, format!("bad tools/list: {}", e)))?;

        info!(
            "Discovered {} tools from MCP server '{}'",
            tools.len(),
            self.backend
        );
        Ok(tools)
    }

    /// Call a tool by its remote name
    pub async fn call_tool(
        &self,
        name: &str,
        arguments: Value,
        timeout: Duration,
    ) -> DispatchResult<Value> {
        let result = self
            .transport
            .request(
                "tools/call",
                serde_json::json!({
                    "name": name,
                    "arguments": arguments,
                }),
                timeout,
            )
            .await
            .map_err(|e| match e {
                DispatchError::ToolExecution { message, .. } => {
                    DispatchError::tool_failed(name, message)
                }
                other => other,
            })?;

        let result: ToolCallResult = serde_json::from_value(result).map_err(|e| {
            DispatchError::protocol(&self.backend, format!("bad tools/call result: {}", e))
        })?;

        if result.is_error == Some(true) {
            return Err(DispatchError::tool_failed(name, result.joined_text()));
        }
        Ok(match result.structured_content {
            Some(structured) => structured,
            None => text_to_value(result.joined_text()),
        })
    }

    pub async fn ping(&self, timeout: Duration) -> DispatchResult<()> {
        self.transport
            .request("ping", serde_json::json!({}), timeout)
            .await
            .map(|_| ())
    }

    pub async fn close(&self) {
        self.transport.close().await;
    }

    pub fn is_closed(&self) -> bool {
        self.transport.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapter::McpToolAdapter;
    use crate::http::SseServerHandle;
    use crate::server::McpServer;
    use switchboard_core::tools::math;

    async fn math_server() -> SseServerHandle {
        let server = Arc::new(McpServer::new(
            "math",
            McpToolAdapter::new(Arc::new(math::registry())),
        ));
        SseServerHandle::bind(server, "127.0.0.1:0").await.unwrap()
    }

    #[tokio::test]
    async fn test_connect_nonexistent_command() {
        let gauge = ResourceGauge::new();
        let endpoint = Endpoint::LocalProcess {
            command: "/nonexistent/binary/path".to_string(),
            args: vec![],
            env: vec![],
        };
        let err = McpClient::connect("bad", &endpoint, Duration::from_secs(1), &gauge)
            .await
            .err()
            .unwrap();
        assert_eq!(err.kind(), "connection_error");
    }

    #[tokio::test]
    async fn test_sse_round_trip() {
        let handle = math_server().await;
        let gauge = ResourceGauge::new();
        let endpoint = Endpoint::StreamingNetwork {
            url: handle.sse_url(),
        };
        let client = McpClient::connect("math", &endpoint, Duration::from_secs(5), &gauge)
            .await
            .unwrap();
        assert_eq!(client.server_name(), Some("math"));
        assert_eq!(client.transport_kind(), "sse");
        assert_eq!(gauge.streams(), 1);

        let tools = client.list_tools(Duration::from_secs(5)).await.unwrap();
        assert_eq!(tools.len(), 2);

        let sum = client
            .call_tool(
                "add",
                serde_json::json!({"a": 3, "b": 5}),
                Duration::from_secs(5),
            )
            .await
            .unwrap();
        assert_eq!(sum, serde_json::json!(8));

        let err = client
            .call_tool("add", serde_json::json!({"a": 3}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "tool_execution_error");

        client.ping(Duration::from_secs(5)).await.unwrap();
        client.close().await;
        assert!(client.is_closed());
        assert_eq!(gauge.open(), 0);
        handle.stop();
    }
}

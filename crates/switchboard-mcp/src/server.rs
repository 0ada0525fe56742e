//! MCP server: request handling plus the stdio loop
//!
//! Requests are newline-delimited JSON-RPC. Each request is handled on its own
//! task so a slow tool does not hold up the rest; a single writer task owns the
//! output stream.

use anyhow::{Context, Result};
use serde_json::Value;
use std::sync::Arc;
use tokio::io::{self, AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt, BufReader};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::adapter::McpToolAdapter;
use crate::protocol::*;

/// MCP server for one toolset
pub struct McpServer {
    adapter: McpToolAdapter,
    name: String,
}

impl McpServer {
    pub fn new(name: impl Into<String>, adapter: McpToolAdapter) -> Self {
        Self {
            adapter,
            name: name.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run over this process's stdin/stdout
    pub async fn serve_stdio(self: Arc<Self>) -> Result<()> {
        let name = self.name.clone();
        info!("MCP server '{}' starting on STDIO", name);
        self.serve(BufReader::new(io::stdin()), io::stdout()).await?;
        info!("MCP server '{}' STDIO closed", name);
        Ok(())
    }

    /// Serve requests from `reader` until EOF, writing responses to `writer`
    pub async fn serve<R, W>(self: Arc<Self>, reader: R, writer: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let (tx, rx) = mpsc::channel::<String>(64);
        let writer_task = tokio::spawn(write_lines(writer, rx));

        let mut lines = reader.lines();
        while let Some(line) = lines.next_line().await? {
            let line = line.trim().to_string();
            if line.is_empty() {
                continue;
            }
            debug!("MCP received: {}", preview(&line));

            let server = Arc::clone(&self);
            let tx = tx.clone();
            tokio::spawn(async move {
                if let Some(response) = server.handle_line(&line).await {
                    match serde_json::to_string(&response) {
                        Ok(json) => {
                            let _ = tx.send(json).await;
                        }
                        Err(e) => warn!("Failed to serialize MCP response: {}", e),
                    }
                }
            });
        }

        // in-flight handlers hold sender clones; the writer drains until they finish
        drop(tx);
        writer_task.await.context("MCP writer task panicked")??;
        Ok(())
    }

    /// Parse and handle one raw message
    pub async fn handle_line(&self, line: &str) -> Option<JsonRpcResponse> {
        match serde_json::from_str::<JsonRpcRequest>(line) {
            Ok(request) => self.handle_request(request).await,
            Err(e) => {
                warn!("Invalid JSON-RPC request: {}", e);
                Some(JsonRpcResponse::error(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                ))
            }
        }
    }

    /// Handle a single JSON-RPC request. Notifications produce no response.
    pub async fn handle_request(&self, request: JsonRpcRequest) -> Option<JsonRpcResponse> {
        let id = request.id.clone().unwrap_or(Value::Null);

        match request.method.as_str() {
            "initialize" => {
                let result = InitializeResult {
                    protocol_version: PROTOCOL_VERSION.to_string(),
                    capabilities: ServerCapabilities {
                        tools: ToolsCapability {
                            list_changed: false,
                        },
                    },
                    server_info: ServerInfo {
                        name: self.name.clone(),
                        version: env!("CARGO_PKG_VERSION").to_string(),
                    },
                };
                Some(to_response(id, &result))
            }

            "notifications/initialized" => {
                info!("MCP client initialized");
                None
            }

            "tools/list" => {
                let tools = self.adapter.list_tools();
                info!("MCP tools/list: returning {} tools", tools.len());
                Some(JsonRpcResponse::success(
                    id,
                    serde_json::json!({ "tools": tools }),
                ))
            }

            "tools/call" => {
                let name = request
                    .params
                    .get("name")
                    .and_then(|v| v.as_str())
                    .unwrap_or("");
                let arguments = request
                    .params
                    .get("arguments")
                    .cloned()
                    .unwrap_or(serde_json::json!({}));

                if name.is_empty() {
                    return Some(JsonRpcResponse::error(
                        id,
                        INVALID_PARAMS,
                        "Missing 'name' parameter".to_string(),
                    ));
                }

                info!("MCP tools/call: {}", name);
                let result = self.adapter.call_tool(name, arguments).await;
                Some(to_response(id, &result))
            }

            "ping" => Some(JsonRpcResponse::success(id, serde_json::json!({}))),

            _ => {
                warn!("MCP unknown method: {}", request.method);
                if request.id.is_none() {
                    None
                } else {
                    Some(JsonRpcResponse::error(
                        id,
                        METHOD_NOT_FOUND,
                        format!("Unknown method: {}", request.method),
                    ))
                }
            }
        }
    }
}

fn to_response<T: serde::Serialize>(id: Value, result: &T) -> JsonRpcResponse {
    match serde_json::to_value(result) {
        Ok(value) => JsonRpcResponse::success(id, value),
        Err(e) => JsonRpcResponse::error(id, INTERNAL_ERROR, e.to_string()),
    }
}

/// First 200 characters of a message, for logs
fn preview(message: &str) -> String {
    message.chars().take(200).collect()
}

async fn write_lines<W: AsyncWrite + Unpin>(
    mut writer: W,
    mut rx: mpsc::Receiver<String>,
) -> Result<()> {
    while let Some(json) = rx.recv().await {
        debug!("MCP sending: {}", preview(&json));
        writer.write_all(json.as_bytes()).await?;
        writer.write_all(b"\n").await?;
        writer.flush().await?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use switchboard_core::tools::{ToolRegistry, math};

    fn make_server() -> Arc<McpServer> {
        let adapter = McpToolAdapter::new(Arc::new(math::registry()));
        Arc::new(McpServer::new("math", adapter))
    }

    fn request(id: Option<i64>, method: &str, params: Value) -> JsonRpcRequest {
        JsonRpcRequest {
            jsonrpc: "2.0".to_string(),
            id: id.map(|i| serde_json::json!(i)),
            method: method.to_string(),
            params,
        }
    }

    #[tokio::test]
    async fn test_handle_initialize() {
        let resp = make_server()
            .handle_request(request(Some(1), "initialize", serde_json::json!({})))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["protocolVersion"], "2024-11-05");
        assert_eq!(result["serverInfo"]["name"], "math");
    }

    #[tokio::test]
    async fn test_handle_tools_list() {
        let resp = make_server()
            .handle_request(request(Some(2), "tools/list", serde_json::json!({})))
            .await
            .unwrap();
        let tools = resp.result.unwrap()["tools"].as_array().unwrap().clone();
        assert_eq!(tools.len(), 2);
        assert_eq!(tools[0]["name"], "add");
    }

    #[tokio::test]
    async fn test_handle_tools_call() {
        let resp = make_server()
            .handle_request(request(
                Some(3),
                "tools/call",
                serde_json::json!({"name": "multiply", "arguments": {"a": 2, "b": 4}}),
            ))
            .await
            .unwrap();
        let result = resp.result.unwrap();
        assert_eq!(result["content"][0]["text"], "8");
        assert!(result.get("isError").is_none());
    }

    #[tokio::test]
    async fn test_handle_tools_call_missing_name() {
        let resp = make_server()
            .handle_request(request(Some(4), "tools/call", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, INVALID_PARAMS);
    }

    #[tokio::test]
    async fn test_handle_unknown_method_and_notification() {
        let server = make_server();
        let resp = server
            .handle_request(request(Some(5), "unknown/method", serde_json::json!({})))
            .await
            .unwrap();
        assert_eq!(resp.error.unwrap().code, METHOD_NOT_FOUND);

        let none = server
            .handle_request(request(
                None,
                "notifications/initialized",
                serde_json::json!({}),
            ))
            .await;
        assert!(none.is_none());
    }

    #[tokio::test]
    async fn test_handle_line_parse_error() {
        let resp = make_server().handle_line("{not json").await.unwrap();
        assert_eq!(resp.error.unwrap().code, PARSE_ERROR);
        assert_eq!(resp.id, Value::Null);
    }

    #[test]
    fn test_preview_respects_char_boundaries() {
        let line = format!("{}é…", "x".repeat(199));
        let cut = preview(&line);
        assert_eq!(cut.chars().count(), 200);
        assert!(cut.ends_with('é'));
        assert_eq!(preview("short"), "short");
    }

    #[tokio::test]
    async fn test_serve_non_ascii_request() {
        let server = make_server();
        let (client, server_end) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_end);
        let serve = tokio::spawn(server.serve(BufReader::new(server_read), server_write));

        // multi-byte characters straddle the 200th byte of the request line
        let padding = format!("{}é…", "x".repeat(150));
        let request = serde_json::json!({
            "jsonrpc": "2.0",
            "id": 9,
            "method": "tools/call",
            "params": {"name": "add", "arguments": {"a": 1, "b": 2}, "note": padding}
        });
        let (client_read, mut client_write) = tokio::io::split(client);
        client_write
            .write_all(format!("{}\n", request).as_bytes())
            .await
            .unwrap();
        client_write.shutdown().await.unwrap();
        drop(client_write);

        let mut lines = BufReader::new(client_read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], 9);
        assert_eq!(value["result"]["content"][0]["text"], "3");

        serve.await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_serve_over_duplex() {
        let server = Arc::new(McpServer::new(
            "empty",
            McpToolAdapter::new(Arc::new(ToolRegistry::new())),
        ));
        let (client, server_end) = tokio::io::duplex(4096);
        let (server_read, server_write) = tokio::io::split(server_end);
        let serve = tokio::spawn(server.serve(BufReader::new(server_read), server_write));

        let (client_read, mut client_write) = tokio::io::split(client);
        client_write
            .write_all(b"{\"jsonrpc\":\"2.0\",\"id\":7,\"method\":\"ping\"}\n")
            .await
            .unwrap();
        client_write.shutdown().await.unwrap();
        drop(client_write);

        let mut lines = BufReader::new(client_read).lines();
        let line = lines.next_line().await.unwrap().unwrap();
        let value: Value = serde_json::from_str(&line).unwrap();
        assert_eq!(value["id"], 7);
        assert!(value["result"].is_object());

        serve.await.unwrap().unwrap();
    }
}

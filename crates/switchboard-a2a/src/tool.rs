//! Peer A2A agents exposed as tools taking a single `query`

use anyhow::{Result, anyhow};
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use tracing::debug;

use switchboard_core::ToolHandler;
use switchboard_core::ToolRegistry;
use switchboard_core::config::PeerConfig;

use crate::client::A2aClient;

/// Forwards `{query}` to a peer agent and returns its reply text
pub struct A2aAgentTool {
    name: String,
    description: String,
    url: String,
    session_id: String,
    client: A2aClient,
}

impl A2aAgentTool {
    pub fn new(peer: &PeerConfig, client: A2aClient) -> Self {
        let description = peer.description.clone().unwrap_or_else(|| {
            format!("Ask the '{}' agent at {} a question in plain language.", peer.name, peer.url)
        });
        Self {
            name: peer.tool_name(),
            description,
            url: peer.url.clone(),
            // one peer conversation per tool instance
            session_id: uuid::Uuid::new_v4().simple().to_string(),
            client,
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl ToolHandler for A2aAgentTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn input_schema(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": {
                    "type": "string",
                    "description": "The question or instruction for the agent"
                }
            },
            "required": ["query"]
        })
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let query = input
            .get("query")
            .and_then(Value::as_str)
            .filter(|q| !q.trim().is_empty())
            .ok_or_else(|| anyhow!("Missing 'query' parameter"))?;

        debug!(
            "Forwarding to agent at {}: {}",
            self.url,
            query.chars().take(100).collect::<String>()
        );
        self.client.ask(&self.url, &self.session_id, query).await
    }
}

/// Math and currency agents on their usual ports
pub fn default_peers() -> Vec<PeerConfig> {
    vec![
        PeerConfig {
            name: "math".to_string(),
            url: "http://localhost:10001".to_string(),
            tool_name: Some("math_tool".to_string()),
            description: Some(
                "Performs math operations. Ask it to add or multiply numbers.".to_string(),
            ),
        },
        PeerConfig {
            name: "currency".to_string(),
            url: "http://localhost:10000".to_string(),
            tool_name: Some("currency_tool".to_string()),
            description: Some(
                "Looks up exchange rates and converts between currencies.".to_string(),
            ),
        },
    ]
}

/// A registry with one tool per peer
pub fn peer_registry(peers: &[PeerConfig]) -> Result<ToolRegistry> {
    let client = A2aClient::new()?;
    let mut registry = ToolRegistry::new();
    for peer in peers {
        registry.register(Arc::new(A2aAgentTool::new(peer, client.clone())));
    }
    Ok(registry)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::{A2aServer, TaskHandler};

    struct Fixed;

    #[async_trait]
    impl TaskHandler for Fixed {
        async fn handle(&self, _session_id: &str, query: &str) -> Result<String> {
            Ok(format!("answered: {}", query))
        }
    }

    #[test]
    fn test_default_peer_tools() {
        let registry = peer_registry(&default_peers()).unwrap();
        let names: Vec<String> = registry.list_tools().into_iter().map(|d| d.name).collect();
        assert_eq!(names, vec!["currency_tool", "math_tool"]);
        let schema = registry.get("math_tool").unwrap().input_schema();
        assert_eq!(schema["required"][0], "query");
    }

    #[tokio::test]
    async fn test_missing_query() {
        let registry = peer_registry(&default_peers()).unwrap();
        let err = registry
            .execute("math_tool", serde_json::json!({}))
            .await
            .unwrap_err();
        assert!(err.to_string().contains("query"));
    }

    #[tokio::test]
    async fn test_forwards_to_peer() {
        let card = crate::handler::default_agent_card("http://127.0.0.1/");
        let handle = Arc::new(A2aServer::new(card, Arc::new(Fixed)))
            .bind("127.0.0.1:0")
            .await
            .unwrap();
        let peer = PeerConfig {
            name: "echo".to_string(),
            url: handle.url(),
            tool_name: None,
            description: None,
        };
        let registry = peer_registry(&[peer]).unwrap();
        let out = registry
            .execute("echo_tool", serde_json::json!({"query": "3 + 5"}))
            .await
            .unwrap();
        assert_eq!(out, "answered: 3 + 5");
        handle.stop();
    }
}

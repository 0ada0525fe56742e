//! A2A client for talking to peer agents

use anyhow::{Context, Result, anyhow};
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::{debug, info};

use crate::protocol::*;

#[derive(Clone)]
pub struct A2aClient {
    http: Client,
}

impl A2aClient {
    pub fn new() -> Result<Self> {
        Self::with_timeout(Duration::from_secs(30))
    }

    pub fn with_timeout(timeout: Duration) -> Result<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { http })
    }

    /// Fetch an agent's capability card
    pub async fn fetch_agent_card(&self, base_url: &str) -> Result<AgentCard> {
        let url = format!("{}/.well-known/agent.json", base_url.trim_end_matches('/'));
        debug!("Fetching agent card from {}", url);

        let resp = self
            .http
            .get(&url)
            .send()
            .await
            .with_context(|| format!("Failed to connect to agent at {}", url))?;

        if !resp.status().is_success() {
            return Err(anyhow!("Agent card request failed: HTTP {}", resp.status()));
        }

        let card: AgentCard = resp.json().await.context("Failed to parse agent card")?;
        info!("Fetched agent card: {} ({} skills)", card.name, card.skills.len());
        Ok(card)
    }

    /// `tasks/send`; returns once the peer has finished the task
    pub async fn send_task(&self, base_url: &str, params: TaskSendParams) -> Result<Task> {
        debug!("Sending task {} to {}", params.id, base_url);
        let params = serde_json::to_value(&params).context("Failed to encode task")?;
        self.rpc(base_url, "tasks/send", params).await
    }

    pub async fn get_task(&self, base_url: &str, task_id: &str) -> Result<Task> {
        self.rpc(base_url, "tasks/get", serde_json::json!({ "id": task_id }))
            .await
    }

    pub async fn cancel_task(&self, base_url: &str, task_id: &str) -> Result<Task> {
        self.rpc(base_url, "tasks/cancel", serde_json::json!({ "id": task_id }))
            .await
    }

    /// Send `query` and return the peer's reply text.
    ///
    /// A failed task is an error carrying the peer's message.
    pub async fn ask(&self, base_url: &str, session_id: &str, query: &str) -> Result<String> {
        let task = self
            .send_task(base_url, TaskSendParams::text(session_id, query))
            .await?;
        let reply = task.reply_text();
        match task.status.state {
            TaskState::Completed => {
                reply.ok_or_else(|| anyhow!("Agent completed task {} without a reply", task.id))
            }
            state => Err(anyhow!(
                "Agent task {} ended {}: {}",
                task.id,
                state,
                reply.unwrap_or_default()
            )),
        }
    }

    async fn rpc<T: DeserializeOwned>(&self, base_url: &str, method: &str, params: Value) -> Result<T> {
        let request = JsonRpcRequest::new(method, params);
        let resp = self
            .http
            .post(base_url)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("Failed to reach agent at {}", base_url))?;

        if !resp.status().is_success() {
            return Err(anyhow!("A2A {} failed: HTTP {}", method, resp.status()));
        }

        let response: JsonRpcResponse = resp
            .json()
            .await
            .with_context(|| format!("Failed to parse {} response", method))?;

        if let Some(err) = response.error {
            return Err(anyhow!("A2A error {}: {}", err.code, err.message));
        }
        let result = response
            .result
            .ok_or_else(|| anyhow!("A2A {} response has no result", method))?;
        serde_json::from_value(result).with_context(|| format!("Unexpected {} result", method))
    }
}

//! A2A server: agent card plus JSON-RPC task endpoint
//!
//! `tasks/send` runs the handler to completion and answers with the final
//! task. Tasks live in memory for the life of the process.

use anyhow::{Context, Result};
use async_trait::async_trait;
use axum::Router;
use axum::extract::State;
use axum::routing::{get, post};
use axum::Json;
use serde_json::Value;
use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::RwLock;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::protocol::*;

/// Produces a reply for one task
#[async_trait]
pub trait TaskHandler: Send + Sync {
    /// Answer `query` within the conversation identified by `session_id`
    async fn handle(&self, session_id: &str, query: &str) -> Result<String>;
}

pub struct A2aServer {
    card: AgentCard,
    handler: Arc<dyn TaskHandler>,
    tasks: RwLock<HashMap<String, Task>>,
}

impl A2aServer {
    pub fn new(card: AgentCard, handler: Arc<dyn TaskHandler>) -> Self {
        Self {
            card,
            handler,
            tasks: RwLock::new(HashMap::new()),
        }
    }

    pub fn card(&self) -> &AgentCard {
        &self.card
    }

    pub fn router(self: Arc<Self>) -> Router {
        Router::new()
            .route("/.well-known/agent.json", get(agent_card))
            .route("/", post(rpc))
            .with_state(self)
    }

    /// Bind `addr` and serve until the returned handle is stopped
    pub async fn bind(self: Arc<Self>, addr: &str) -> Result<A2aServerHandle> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind A2A server on {}", addr))?;
        let local_addr = listener.local_addr()?;
        info!("A2A agent '{}' listening on http://{}", self.card.name, local_addr);

        let router = self.router();
        let task = tokio::spawn(async move {
            axum::serve(listener, router)
                .await
                .context("A2A server failed")
        });
        Ok(A2aServerHandle { local_addr, task })
    }

    /// Handle one raw JSON-RPC body
    pub async fn handle_body(&self, body: &str) -> JsonRpcResponse {
        let request: JsonRpcRequest = match serde_json::from_str(body) {
            Ok(r) => r,
            Err(e) => {
                warn!("Invalid A2A request: {}", e);
                return JsonRpcResponse::error(
                    Value::Null,
                    PARSE_ERROR,
                    format!("Parse error: {}", e),
                );
            }
        };
        self.handle_request(request).await
    }

    pub async fn handle_request(&self, request: JsonRpcRequest) -> JsonRpcResponse {
        let id = request.id.clone();
        debug!("A2A {} id={}", request.method, id);

        let outcome = match request.method.as_str() {
            "tasks/send" => match serde_json::from_value::<TaskSendParams>(request.params) {
                Ok(params) => self.send(params).await,
                Err(e) => Err((INVALID_PARAMS, format!("Invalid params: {}", e))),
            },
            "tasks/get" => match serde_json::from_value::<TaskIdParams>(request.params) {
                Ok(params) => self.get(&params.id).await,
                Err(e) => Err((INVALID_PARAMS, format!("Invalid params: {}", e))),
            },
            "tasks/cancel" => match serde_json::from_value::<TaskIdParams>(request.params) {
                Ok(params) => self.cancel(&params.id).await,
                Err(e) => Err((INVALID_PARAMS, format!("Invalid params: {}", e))),
            },
            other => Err((METHOD_NOT_FOUND, format!("Unknown method: {}", other))),
        };

        match outcome.and_then(|task| {
            serde_json::to_value(task).map_err(|e| (INTERNAL_ERROR, e.to_string()))
        }) {
            Ok(result) => JsonRpcResponse::success(id, result),
            Err((code, message)) => JsonRpcResponse::error(id, code, message),
        }
    }

    async fn send(&self, params: TaskSendParams) -> Result<Task, (i64, String)> {
        let query = params.message.text();
        if query.trim().is_empty() {
            return Err((INVALID_PARAMS, "Message has no text parts".to_string()));
        }
        let session_id = params
            .session_id
            .clone()
            .unwrap_or_else(|| params.id.clone());

        let working = Task {
            id: params.id.clone(),
            session_id: Some(session_id.clone()),
            status: TaskStatus::now(TaskState::Working, None),
            artifacts: vec![],
        };
        self.tasks.write().await.insert(params.id.clone(), working);
        info!("A2A task {} started (session {})", params.id, session_id);

        let (status, artifacts) = match self.handler.handle(&session_id, &query).await {
            Ok(reply) => (
                TaskStatus::now(TaskState::Completed, None),
                vec![Artifact {
                    name: None,
                    parts: vec![Part::Text { text: reply }],
                    index: 0,
                }],
            ),
            Err(e) => {
                warn!("A2A task {} failed: {:#}", params.id, e);
                (
                    TaskStatus::now(
                        TaskState::Failed,
                        Some(Message::agent_text(format!("Error: {}", e))),
                    ),
                    vec![],
                )
            }
        };

        let mut tasks = self.tasks.write().await;
        let task = tasks.entry(params.id.clone()).or_insert_with(|| Task {
            id: params.id.clone(),
            session_id: Some(session_id.clone()),
            status: status.clone(),
            artifacts: vec![],
        });
        // a cancel that landed while the handler ran wins
        if task.status.state != TaskState::Canceled {
            task.status = status;
            task.artifacts = artifacts;
        }
        info!("A2A task {} {}", task.id, task.status.state);
        Ok(task.clone())
    }

    async fn get(&self, id: &str) -> Result<Task, (i64, String)> {
        self.tasks
            .read()
            .await
            .get(id)
            .cloned()
            .ok_or_else(|| (TASK_NOT_FOUND, format!("Task not found: {}", id)))
    }

    async fn cancel(&self, id: &str) -> Result<Task, (i64, String)> {
        let mut tasks = self.tasks.write().await;
        let task = tasks
            .get_mut(id)
            .ok_or_else(|| (TASK_NOT_FOUND, format!("Task not found: {}", id)))?;
        if task.status.state.is_terminal() {
            return Err((
                TASK_NOT_CANCELABLE,
                format!("Task {} is already {}", id, task.status.state),
            ));
        }
        task.status = TaskStatus::now(TaskState::Canceled, None);
        info!("A2A task {} canceled", id);
        Ok(task.clone())
    }
}

async fn agent_card(State(server): State<Arc<A2aServer>>) -> Json<AgentCard> {
    Json(server.card.clone())
}

async fn rpc(State(server): State<Arc<A2aServer>>, body: String) -> Json<JsonRpcResponse> {
    Json(server.handle_body(&body).await)
}

/// A running A2A server
pub struct A2aServerHandle {
    local_addr: SocketAddr,
    task: JoinHandle<Result<()>>,
}

impl A2aServerHandle {
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn url(&self) -> String {
        format!("http://{}", self.local_addr)
    }

    pub async fn wait(self) -> Result<()> {
        self.task.await.context("A2A server task panicked")?
    }

    pub fn stop(&self) {
        self.task.abort();
    }
}

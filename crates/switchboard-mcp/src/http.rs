//! MCP over HTTP server-sent events
//!
//! `GET /sse` opens a session stream whose first event is `endpoint`, naming
//! `/messages/?session_id=<id>`. Requests POSTed there are answered with 202
//! and their JSON-RPC responses are pushed down the stream as `message`
//! events.

use anyhow::{Context, Result};
use axum::Router;
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::IntoResponse;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::{get, post};
use futures_util::StreamExt;
use futures_util::stream::{self, Stream};
use serde::Deserialize;
use std::collections::HashMap;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::protocol::JsonRpcRequest;
use crate::server::McpServer;

type Sessions = Arc<Mutex<HashMap<String, mpsc::Sender<String>>>>;

#[derive(Clone)]
struct SseState {
    server: Arc<McpServer>,
    sessions: Sessions,
}

#[derive(Deserialize)]
struct MessageQuery {
    session_id: String,
}

/// Removes a session from the map when its stream is dropped
struct SessionGuard {
    id: String,
    sessions: Sessions,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        lock(&self.sessions).remove(&self.id);
        debug!("MCP SSE session {} closed", self.id);
    }
}

fn lock(sessions: &Sessions) -> std::sync::MutexGuard<'_, HashMap<String, mpsc::Sender<String>>> {
    sessions.lock().unwrap_or_else(|e| e.into_inner())
}

pub fn router(server: Arc<McpServer>) -> Router {
    let state = SseState {
        server,
        sessions: Arc::new(Mutex::new(HashMap::new())),
    };
    Router::new()
        .route("/sse", get(open_stream))
        .route("/messages/", post(post_message))
        .with_state(state)
}

async fn open_stream(
    State(state): State<SseState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let id = uuid::Uuid::new_v4().simple().to_string();
    let (tx, rx) = mpsc::channel::<String>(64);
    lock(&state.sessions).insert(id.clone(), tx);
    info!("MCP SSE session {} opened", id);

    let endpoint = Event::default()
        .event("endpoint")
        .data(format!("/messages/?session_id={}", id));
    let guard = SessionGuard {
        id,
        sessions: Arc::clone(&state.sessions),
    };

    let messages = stream::unfold((rx, guard), |(mut rx, guard)| async move {
        let json = rx.recv().await?;
        Some((
            Ok(Event::default().event("message").data(json)),
            (rx, guard),
        ))
    });

    Sse::new(stream::once(async move { Ok::<_, Infallible>(endpoint) }).chain(messages))
        .keep_alive(KeepAlive::default())
}

async fn post_message(
    State(state): State<SseState>,
    Query(query): Query<MessageQuery>,
    body: String,
) -> impl IntoResponse {
    let request: JsonRpcRequest = match serde_json::from_str(&body) {
        Ok(r) => r,
        Err(e) => {
            warn!("Invalid JSON-RPC body for session {}: {}", query.session_id, e);
            return (StatusCode::BAD_REQUEST, format!("Invalid JSON-RPC: {}", e));
        }
    };

    let Some(tx) = lock(&state.sessions).get(&query.session_id).cloned() else {
        return (StatusCode::NOT_FOUND, "Could not find session".to_string());
    };

    tokio::spawn(async move {
        if let Some(response) = state.server.handle_request(request).await {
            match serde_json::to_string(&response) {
                Ok(json) => {
                    if tx.send(json).await.is_err() {
                        debug!("MCP SSE session gone before response was sent");
                    }
                }
                Err(e) => warn!("Failed to serialize MCP response: {}", e),
            }
        }
    });

    (StatusCode::ACCEPTED, "Accepted".to_string())
}

/// A running SSE server
pub struct SseServerHandle {
    local_addr: SocketAddr,
    shutdown: CancellationToken,
    task: JoinHandle<Result<()>>,
}

impl SseServerHandle {
    /// Bind `addr` (port 0 picks a free port) and start serving
    pub async fn bind(server: Arc<McpServer>, addr: &str) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .with_context(|| format!("Failed to bind MCP SSE server on {}", addr))?;
        let local_addr = listener.local_addr()?;
        info!(
            "MCP server '{}' listening on http://{}/sse",
            server.name(),
            local_addr
        );

        let shutdown = CancellationToken::new();
        let signal = shutdown.clone();
        let task = tokio::spawn(async move {
            axum::serve(listener, router(server))
                .with_graceful_shutdown(async move { signal.cancelled().await })
                .await
                .context("MCP SSE server failed")
        });

        Ok(Self {
            local_addr,
            shutdown,
            task,
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// URL clients open the event stream at
    pub fn sse_url(&self) -> String {
        format!("http://{}/sse", self.local_addr)
    }

    /// Token that stops the server when cancelled
    pub fn shutdown_token(&self) -> CancellationToken {
        self.shutdown.clone()
    }

    /// Wait until the server stops
    pub async fn wait(self) -> Result<()> {
        self.task.await.context("MCP SSE server task panicked")?
    }

    /// Stop accepting connections and abort open streams
    pub fn stop(&self) {
        self.shutdown.cancel();
        self.task.abort();
    }
}

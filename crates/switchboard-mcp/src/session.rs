//! Dispatch session: one MCP client per back end behind a single tool catalog
//!
//! A session owns its catalog and its transports. Nothing is shared between
//! sessions, and closing (or dropping) a session releases every subprocess
//! and stream it opened.

use async_trait::async_trait;
use backoff::ExponentialBackoffBuilder;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

use switchboard_core::config::{BackendConfig, DispatchConfig, RetryConfig};
use switchboard_core::{
    DispatchError, DispatchResult, ToolCall, ToolCatalog, ToolDefinition, ToolDescriptor,
    ToolInvoker, ToolResponse,
};

use crate::client::McpClient;
use crate::transport::ResourceGauge;

pub struct Session {
    id: String,
    catalog: ToolCatalog,
    clients: HashMap<String, McpClient>,
    call_timeout: Duration,
    gauge: ResourceGauge,
}

impl Session {
    /// Connect every back end, discover tools and build the catalog
    pub async fn open(config: &DispatchConfig, backends: &[BackendConfig]) -> DispatchResult<Self> {
        Self::open_with_gauge(config, backends, ResourceGauge::new()).await
    }

    /// Like [`open`](Self::open), counting resources on a caller-supplied gauge
    pub async fn open_with_gauge(
        config: &DispatchConfig,
        backends: &[BackendConfig],
        gauge: ResourceGauge,
    ) -> DispatchResult<Self> {
        let id = uuid::Uuid::new_v4().to_string();
        info!("Opening session {} with {} backends", id, backends.len());

        let attempts = futures_util::future::join_all(
            backends
                .iter()
                .map(|backend| connect_with_retry(backend, config, &gauge)),
        )
        .await;

        let mut clients = HashMap::new();
        let mut first_error = None;
        for attempt in attempts {
            match attempt {
                Ok(client) => {
                    clients.insert(client.backend().to_string(), client);
                }
                Err(e) => {
                    warn!("Session {}: {}", id, e);
                    first_error.get_or_insert(e);
                }
            }
        }

        let mut session = Self {
            id,
            catalog: ToolCatalog::new(),
            clients,
            call_timeout: config.call_timeout(),
            gauge,
        };
        if let Some(e) = first_error {
            session.close().await;
            return Err(e);
        }

        // catalog in config order so duplicate detection is deterministic
        for backend in backends {
            if let Err(e) = session.discover(backend, config.call_timeout()).await {
                session.close().await;
                return Err(e);
            }
        }

        info!(
            "Session {} ready: {} tools from {} backends",
            session.id,
            session.catalog.len(),
            session.clients.len()
        );
        Ok(session)
    }

    async fn discover(&mut self, backend: &BackendConfig, timeout: Duration) -> DispatchResult<()> {
        let client = self.clients.get(&backend.name).ok_or_else(|| {
            DispatchError::connection(&backend.name, "backend has no open client")
        })?;
        let endpoint = endpoint_for(backend)?;
        for tool in client.list_tools(timeout).await? {
            self.catalog.register(ToolDescriptor {
                name: tool.name.clone(),
                backend: backend.name.clone(),
                remote_name: tool.name,
                description: tool.description,
                input_schema: tool.input_schema,
                endpoint: endpoint.clone(),
            })?;
        }
        Ok(())
    }

    /// Open a session, run `f`, and close the session however `f` ends
    pub async fn scoped<F, Fut, T>(
        config: &DispatchConfig,
        backends: &[BackendConfig],
        f: F,
    ) -> anyhow::Result<T>
    where
        F: FnOnce(Arc<Session>) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let session = Arc::new(Self::open(config, backends).await?);
        let result = f(Arc::clone(&session)).await;
        session.close().await;
        result
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn catalog(&self) -> &ToolCatalog {
        &self.catalog
    }

    pub fn gauge(&self) -> &ResourceGauge {
        &self.gauge
    }

    pub fn backends(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.clients.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    /// Invoke one tool. Registry misses fail before any transport is touched.
    pub async fn call(&self, call: ToolCall) -> ToolResponse {
        let ToolCall {
            tool_name,
            arguments,
            correlation_id,
        } = call;

        let descriptor = match self.catalog.resolve(&tool_name) {
            Ok(d) => d,
            Err(e) => return ToolResponse::err(correlation_id, e),
        };
        let Some(client) = self.clients.get(&descriptor.backend) else {
            return ToolResponse::err(
                correlation_id,
                DispatchError::connection(&descriptor.backend, "backend is not connected"),
            );
        };

        debug!(
            "Session {} call {} -> {}:{} [{}]",
            self.id, tool_name, descriptor.backend, descriptor.remote_name, correlation_id
        );
        match client
            .call_tool(&descriptor.remote_name, arguments, self.call_timeout)
            .await
        {
            Ok(result) => ToolResponse::ok(correlation_id, result),
            Err(e) => {
                warn!("Tool {} failed [{}]: {}", tool_name, correlation_id, e);
                ToolResponse::err(correlation_id, e)
            }
        }
    }

    /// Invoke several tools concurrently
    pub async fn call_many(&self, calls: Vec<ToolCall>) -> Vec<ToolResponse> {
        futures_util::future::join_all(calls.into_iter().map(|c| self.call(c))).await
    }

    /// Close every transport. Safe to call more than once.
    pub async fn close(&self) {
        futures_util::future::join_all(self.clients.values().map(|c| c.close())).await;
        debug!(
            "Session {} closed (open processes={}, streams={})",
            self.id,
            self.gauge.processes(),
            self.gauge.streams()
        );
    }
}

#[async_trait]
impl ToolInvoker for Session {
    fn definitions(&self) -> Vec<ToolDefinition> {
        self.catalog.definitions()
    }

    async fn invoke(&self, call: ToolCall) -> ToolResponse {
        self.call(call).await
    }

    async fn invoke_all(&self, calls: Vec<ToolCall>) -> Vec<ToolResponse> {
        self.call_many(calls).await
    }
}

fn endpoint_for(backend: &BackendConfig) -> DispatchResult<switchboard_core::Endpoint> {
    backend
        .endpoint()
        .map_err(|e| DispatchError::connection(&backend.name, e.to_string()))
}

/// Connect one back end, retrying while it reports "not ready yet"
async fn connect_with_retry(
    backend: &BackendConfig,
    config: &DispatchConfig,
    gauge: &ResourceGauge,
) -> DispatchResult<McpClient> {
    let endpoint = endpoint_for(backend)?;
    let connect_timeout = config.connect_timeout();

    if !config.retry.is_enabled() {
        return McpClient::connect(&backend.name, &endpoint, connect_timeout, gauge).await;
    }

    let endpoint = &endpoint;
    backoff::future::retry(backoff_policy(&config.retry), || async move {
        McpClient::connect(&backend.name, endpoint, connect_timeout, gauge)
            .await
            .map_err(|e| {
                if e.is_retryable() {
                    debug!("Backend '{}' not ready, retrying: {}", backend.name, e);
                    backoff::Error::transient(e)
                } else {
                    backoff::Error::permanent(e)
                }
            })
    })
    .await
}

fn backoff_policy(retry: &RetryConfig) -> backoff::ExponentialBackoff {
    ExponentialBackoffBuilder::new()
        .with_initial_interval(Duration::from_millis(retry.initial_interval_ms))
        .with_max_interval(Duration::from_millis(retry.max_interval_ms))
        .with_multiplier(retry.multiplier)
        .with_max_elapsed_time(Some(Duration::from_millis(retry.max_elapsed_ms)))
        .build()
}

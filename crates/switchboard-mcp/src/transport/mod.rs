//! Client-side transports to MCP back ends
//!
//! Both transports share the same contract: JSON-RPC requests matched to
//! responses by id, a per-call deadline, and a terminal failure mode where
//! malformed framing or a lost connection fails every in-flight call.

mod sse;
mod stdio;

pub use sse::{SseDecoder, SseEvent, SseTransport};
pub use stdio::StdioTransport;

use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::oneshot;
use tracing::{debug, warn};

use switchboard_core::{DispatchError, DispatchResult};

/// Uniform request/response contract over one back end connection
#[async_trait]
pub trait Transport: Send + Sync {
    /// Back end name used in errors and logs
    fn backend(&self) -> &str;

    /// "stdio" or "sse"
    fn kind(&self) -> &'static str;

    /// Send a request and wait up to `timeout` for its response's `result`
    async fn request(&self, method: &str, params: Value, timeout: Duration)
    -> DispatchResult<Value>;

    /// Fire-and-forget notification
    async fn notify(&self, method: &str, params: Value) -> DispatchResult<()>;

    /// Release the subprocess or stream. Idempotent.
    async fn close(&self);

    fn is_closed(&self) -> bool;
}

/// Live subprocess and stream counters, shared by every transport of a session
#[derive(Debug, Clone, Default)]
pub struct ResourceGauge {
    processes: Arc<AtomicUsize>,
    streams: Arc<AtomicUsize>,
}

impl ResourceGauge {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn processes(&self) -> usize {
        self.processes.load(Ordering::SeqCst)
    }

    pub fn streams(&self) -> usize {
        self.streams.load(Ordering::SeqCst)
    }

    /// Processes plus streams
    pub fn open(&self) -> usize {
        self.processes() + self.streams()
    }

    pub(crate) fn track_process(&self) -> GaugeGuard {
        GaugeGuard::new(Arc::clone(&self.processes))
    }

    pub(crate) fn track_stream(&self) -> GaugeGuard {
        GaugeGuard::new(Arc::clone(&self.streams))
    }
}

/// Decrements its counter when dropped
#[derive(Debug)]
pub(crate) struct GaugeGuard {
    counter: Arc<AtomicUsize>,
}

impl GaugeGuard {
    fn new(counter: Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self { counter }
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.counter.fetch_sub(1, Ordering::SeqCst);
    }
}

type Reply = oneshot::Sender<DispatchResult<Value>>;

/// Matches JSON-RPC responses to waiting callers by id
pub(crate) struct Correlator {
    backend: String,
    next_id: AtomicU64,
    pending: Mutex<HashMap<u64, Reply>>,
    terminated: AtomicBool,
}

impl Correlator {
    pub(crate) fn new(backend: impl Into<String>) -> Self {
        Self {
            backend: backend.into(),
            next_id: AtomicU64::new(1),
            pending: Mutex::new(HashMap::new()),
            terminated: AtomicBool::new(false),
        }
    }

    pub(crate) fn backend(&self) -> &str {
        &self.backend
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::SeqCst)
    }

    /// Allocate an id and a slot for its response
    pub(crate) fn register(&self) -> DispatchResult<(u64, oneshot::Receiver<DispatchResult<Value>>)> {
        let mut pending = self.lock();
        // checked under the lock so fail_all cannot miss this slot
        if self.is_terminated() {
            return Err(DispatchError::connection(
                &self.backend,
                "transport is closed",
            ));
        }
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = oneshot::channel();
        pending.insert(id, tx);
        Ok((id, rx))
    }

    /// Drop a slot whose caller gave up
    pub(crate) fn forget(&self, id: u64) {
        self.lock().remove(&id);
    }

    /// Route one incoming message. An `Err` means the framing is broken and
    /// the transport must be torn down.
    pub(crate) fn dispatch(&self, message: Value) -> DispatchResult<()> {
        if message.get("method").is_some() {
            // server-initiated request or notification; nothing here answers them
            debug!(
                "Ignoring server message on '{}': {}",
                self.backend, message["method"]
            );
            return Ok(());
        }

        let id = match message.get("id").and_then(Value::as_u64) {
            Some(id) => id,
            None => {
                return Err(DispatchError::protocol(
                    &self.backend,
                    format!("response without a numeric id: {}", truncate(&message)),
                ));
            }
        };

        if id == 0 || id >= self.next_id.load(Ordering::SeqCst) {
            return Err(DispatchError::protocol(
                &self.backend,
                format!("response for id {} that was never issued", id),
            ));
        }

        let Some(reply) = self.lock().remove(&id) else {
            debug!("Dropping late response id={} on '{}'", id, self.backend);
            return Ok(());
        };

        let outcome = match message.get("error") {
            Some(error) => Err(DispatchError::tool_failed(
                &self.backend,
                error
                    .get("message")
                    .and_then(Value::as_str)
                    .unwrap_or("unknown JSON-RPC error")
                    .to_string(),
            )),
            None => Ok(message.get("result").cloned().unwrap_or(Value::Null)),
        };
        let _ = reply.send(outcome);
        Ok(())
    }

    /// Mark terminated and fail every waiting call with `error`
    pub(crate) fn fail_all(&self, error: DispatchError) {
        let drained: Vec<Reply> = {
            let mut pending = self.lock();
            self.terminated.store(true, Ordering::SeqCst);
            pending.drain().map(|(_, tx)| tx).collect()
        };
        if !drained.is_empty() {
            warn!(
                "Failing {} in-flight call(s) on '{}': {}",
                drained.len(),
                self.backend,
                error
            );
        }
        for tx in drained {
            let _ = tx.send(Err(error.clone()));
        }
    }

    /// Wait for a registered response, enforcing the deadline
    pub(crate) async fn wait(
        &self,
        id: u64,
        method: &str,
        rx: oneshot::Receiver<DispatchResult<Value>>,
        timeout: Duration,
    ) -> DispatchResult<Value> {
        match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(_)) => Err(DispatchError::not_ready(
                &self.backend,
                "connection dropped before a response arrived",
            )),
            Err(_) => {
                self.forget(id);
                Err(DispatchError::timeout(
                    format!("{} on '{}'", method, self.backend),
                    timeout,
                ))
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<u64, Reply>> {
        // a poisoned map is still structurally valid
        self.pending.lock().unwrap_or_else(|e| e.into_inner())
    }
}

pub(crate) fn request_body(id: u64, method: &str, params: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params,
    })
}

pub(crate) fn notification_body(method: &str, params: Value) -> Value {
    serde_json::json!({
        "jsonrpc": "2.0",
        "method": method,
        "params": params,
    })
}

fn truncate(value: &Value) -> String {
    let s = value.to_string();
    s.chars().take(120).collect()
}

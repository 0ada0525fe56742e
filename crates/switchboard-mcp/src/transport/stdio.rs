//! Child process transport: newline-delimited JSON-RPC over stdin/stdout

use async_trait::async_trait;
use serde_json::Value;
use std::process::Stdio;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use switchboard_core::{DispatchError, DispatchResult};

use super::{Correlator, GaugeGuard, ResourceGauge, Transport, notification_body, request_body};

struct ManagedChild {
    child: Child,
    _guard: GaugeGuard,
}

type SharedChild = Arc<Mutex<Option<ManagedChild>>>;

pub struct StdioTransport {
    backend: String,
    correlator: Arc<Correlator>,
    stdin: Mutex<Option<ChildStdin>>,
    child: SharedChild,
}

impl StdioTransport {
    /// Spawn the back end process and start reading its stdout
    pub fn spawn(
        backend: &str,
        command: &str,
        args: &[String],
        env: &[(String, String)],
        gauge: &ResourceGauge,
    ) -> DispatchResult<Self> {
        info!("Spawning MCP server '{}': {} {:?}", backend, command, args);

        let mut cmd = Command::new(command);
        cmd.args(args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        for (key, value) in env {
            cmd.env(key, value);
        }

        let mut child = cmd.spawn().map_err(|e| {
            DispatchError::connection(backend, format!("failed to spawn '{}': {}", command, e))
        })?;

        let (Some(stdin), Some(stdout)) = (child.stdin.take(), child.stdout.take()) else {
            return Err(DispatchError::connection(
                backend,
                "failed to capture child stdio",
            ));
        };

        if let Some(stderr) = child.stderr.take() {
            let name = backend.to_string();
            tokio::spawn(async move {
                let mut lines = BufReader::new(stderr).lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if !line.trim().is_empty() {
                        debug!("MCP server '{}' stderr: {}", name, line);
                    }
                }
            });
        }

        let correlator = Arc::new(Correlator::new(backend));
        let child: SharedChild = Arc::new(Mutex::new(Some(ManagedChild {
            child,
            _guard: gauge.track_process(),
        })));

        tokio::spawn(read_loop(
            backend.to_string(),
            stdout,
            Arc::clone(&correlator),
            Arc::downgrade(&child),
        ));

        Ok(Self {
            backend: backend.to_string(),
            correlator,
            stdin: Mutex::new(Some(stdin)),
            child,
        })
    }

    async fn write_line(&self, message: &Value) -> DispatchResult<()> {
        let mut line = message.to_string();
        line.push('\n');

        let mut guard = self.stdin.lock().await;
        let stdin = guard
            .as_mut()
            .ok_or_else(|| DispatchError::connection(&self.backend, "transport is closed"))?;
        let written = async {
            stdin.write_all(line.as_bytes()).await?;
            stdin.flush().await
        }
        .await;
        written.map_err(|e| DispatchError::not_ready(&self.backend, format!("write failed: {}", e)))
    }
}

async fn read_loop(
    backend: String,
    stdout: ChildStdout,
    correlator: Arc<Correlator>,
    child: Weak<Mutex<Option<ManagedChild>>>,
) {
    let mut lines = BufReader::new(stdout).lines();
    let failure = loop {
        match lines.next_line().await {
            Ok(Some(line)) => {
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                let routed = serde_json::from_str::<Value>(line)
                    .map_err(|e| {
                        let head: String = line.chars().take(100).collect();
                        DispatchError::protocol(
                            &backend,
                            format!("invalid JSON line ({}): {}", e, head),
                        )
                    })
                    .and_then(|message| correlator.dispatch(message));
                if let Err(e) = routed {
                    break e;
                }
            }
            Ok(None) => break DispatchError::not_ready(&backend, "server closed connection"),
            Err(e) => break DispatchError::not_ready(&backend, format!("read failed: {}", e)),
        }
    };

    correlator.fail_all(failure.clone());
    if matches!(failure, DispatchError::Protocol { .. }) {
        warn!("Terminating MCP server '{}': {}", backend, failure);
        // a dropped transport already killed the child
        if let Some(child) = child.upgrade()
            && let Some(mut managed) = child.lock().await.take()
        {
            let _ = managed.child.kill().await;
        }
    }
}

#[async_trait]
impl Transport for StdioTransport {
    fn backend(&self) -> &str {
        &self.backend
    }

    fn kind(&self) -> &'static str {
        "stdio"
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> DispatchResult<Value> {
        let (id, rx) = self.correlator.register()?;
        if let Err(e) = self.write_line(&request_body(id, method, params)).await {
            self.correlator.forget(id);
            return Err(e);
        }
        self.correlator.wait(id, method, rx, timeout).await
    }

    async fn notify(&self, method: &str, params: Value) -> DispatchResult<()> {
        if self.correlator.is_terminated() {
            return Err(DispatchError::connection(&self.backend, "transport is closed"));
        }
        self.write_line(&notification_body(method, params)).await
    }

    async fn close(&self) {
        self.correlator
            .fail_all(DispatchError::connection(&self.backend, "transport closed"));
        self.stdin.lock().await.take();
        if let Some(mut managed) = self.child.lock().await.take() {
            let _ = managed.child.kill().await;
            debug!("MCP server '{}' stopped", self.backend);
        }
    }

    fn is_closed(&self) -> bool {
        self.correlator.is_terminated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sh(script: &str) -> Vec<String> {
        vec!["-c".to_string(), script.to_string()]
    }

    #[tokio::test]
    async fn test_spawn_nonexistent_command() {
        let gauge = ResourceGauge::new();
        let err = StdioTransport::spawn("bad", "/nonexistent/binary/path", &[], &[], &gauge)
            .err()
            .unwrap();
        assert_eq!(err.kind(), "connection_error");
        assert!(!err.is_retryable());
        assert_eq!(gauge.open(), 0);
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let gauge = ResourceGauge::new();
        let transport = StdioTransport::spawn("silent", "cat", &[], &[], &gauge).unwrap();
        // cat echoes the request back, which carries a method and is ignored
        let err = transport
            .request("tools/call", serde_json::json!({}), Duration::from_millis(1))
            .await
            .unwrap_err();
        assert!(matches!(err, DispatchError::Timeout { .. }));
        assert_eq!(gauge.processes(), 1);

        transport.close().await;
        assert!(transport.is_closed());
        assert_eq!(gauge.open(), 0);
    }

    #[tokio::test]
    async fn test_garbage_fails_in_flight_and_terminates() {
        let gauge = ResourceGauge::new();
        let transport = StdioTransport::spawn(
            "garbage",
            "sh",
            &sh("read line; echo 'this is not json'; sleep 5"),
            &[],
            &gauge,
        )
        .unwrap();

        let err = transport
            .request("ping", serde_json::json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "protocol_error");
        assert!(transport.is_closed());

        // read loop kills the child after tearing down
        for _ in 0..50 {
            if gauge.processes() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(gauge.processes(), 0);

        let err = transport
            .request("ping", serde_json::json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "connection_error");
    }

    #[tokio::test]
    async fn test_non_ascii_garbage_is_protocol_error() {
        let gauge = ResourceGauge::new();
        // a two-byte character straddles byte 100 of the reply
        let garbage = format!("{}é…", "x".repeat(99));
        let transport = StdioTransport::spawn(
            "accented",
            "sh",
            &sh(&format!("read line; echo '{}'; sleep 5", garbage)),
            &[],
            &gauge,
        )
        .unwrap();

        let err = transport
            .request("ping", serde_json::json!({}), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "protocol_error");
        assert!(err.to_string().contains('x'));
        assert!(transport.is_closed());

        for _ in 0..50 {
            if gauge.processes() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(gauge.processes(), 0);
    }

    #[tokio::test]
    async fn test_exit_is_retryable_connection_error() {
        let gauge = ResourceGauge::new();
        let transport =
            StdioTransport::spawn("quitter", "sh", &sh("read line; exit 0"), &[], &gauge).unwrap();
        let err = transport
            .request("initialize", serde_json::json!({}), Duration::from_secs(5))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "connection_error");
        assert!(err.is_retryable());
        transport.close().await;
        assert_eq!(gauge.open(), 0);
    }
}

//! Streaming network transport: MCP over HTTP server-sent events
//!
//! `GET` opens the event stream. The server's first `endpoint` event names the
//! URL to `POST` requests to; responses come back as `message` events on the
//! stream and are matched to callers by JSON-RPC id.

use async_trait::async_trait;
use futures_util::StreamExt;
use serde_json::Value;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info, warn};
use url::Url;

use switchboard_core::{DispatchError, DispatchResult};

use super::{Correlator, ResourceGauge, Transport, notification_body, request_body};

/// One dispatched server-sent event
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SseEvent {
    /// `event:` field, "message" when absent
    pub event: String,
    pub data: String,
}

/// Incremental `text/event-stream` parser
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
    event: Option<String>,
    data: Vec<String>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes; returns every event completed by them
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<SseEvent>, String> {
        self.buffer.extend_from_slice(chunk);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|&b| b == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = std::str::from_utf8(&raw[..raw.len() - 1])
                .map_err(|e| format!("invalid UTF-8 in event stream: {}", e))?;
            let line = line.strip_suffix('\r').unwrap_or(line);

            if line.is_empty() {
                if let Some(event) = self.take_event() {
                    events.push(event);
                }
                continue;
            }
            if line.starts_with(':') {
                continue;
            }

            let (field, value) = match line.split_once(':') {
                Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
                None => (line, ""),
            };
            match field {
                "event" => self.event = Some(value.to_string()),
                "data" => self.data.push(value.to_string()),
                "id" | "retry" => {}
                other => debug!("Ignoring SSE field '{}'", other),
            }
        }

        Ok(events)
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        let event = self.event.take();
        if self.data.is_empty() && event.is_none() {
            return None;
        }
        let data = std::mem::take(&mut self.data).join("\n");
        Some(SseEvent {
            event: event.unwrap_or_else(|| "message".to_string()),
            data,
        })
    }
}

pub struct SseTransport {
    backend: String,
    http: reqwest::Client,
    endpoint: Url,
    correlator: Arc<Correlator>,
    cancel: CancellationToken,
    reader: Mutex<Option<JoinHandle<()>>>,
    _drop_guard: DropGuard,
}

impl SseTransport {
    /// Open the event stream and wait for the server to announce its POST endpoint
    pub async fn connect(
        backend: &str,
        url: &str,
        connect_timeout: Duration,
        gauge: &ResourceGauge,
    ) -> DispatchResult<Self> {
        info!("Connecting to MCP SSE server '{}' at {}", backend, url);
        let base = Url::parse(url)
            .map_err(|e| DispatchError::connection(backend, format!("invalid url '{}': {}", url, e)))?;
        let http = reqwest::Client::new();
        let deadline = Instant::now() + connect_timeout;

        let response = tokio::time::timeout(
            connect_timeout,
            http.get(base.clone())
                .header(reqwest::header::ACCEPT, "text/event-stream")
                .send(),
        )
        .await
        .map_err(|_| DispatchError::not_ready(backend, "timed out opening event stream"))?
        .map_err(|e| classify_http_error(backend, &e))?;

        let status = response.status();
        if status.is_server_error() {
            return Err(DispatchError::not_ready(
                backend,
                format!("event stream refused with HTTP {}", status),
            ));
        }
        if !status.is_success() {
            return Err(DispatchError::connection(
                backend,
                format!("event stream refused with HTTP {}", status),
            ));
        }

        let guard = gauge.track_stream();
        let mut stream = Box::pin(response.bytes_stream());
        let mut decoder = SseDecoder::new();
        let mut early_events = Vec::new();

        let endpoint = loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let chunk = match tokio::time::timeout(remaining, stream.next()).await {
                Err(_) => {
                    return Err(DispatchError::not_ready(
                        backend,
                        "no endpoint event before the connect deadline",
                    ));
                }
                Ok(None) => {
                    return Err(DispatchError::not_ready(
                        backend,
                        "stream closed during handshake",
                    ));
                }
                Ok(Some(Err(e))) => return Err(classify_http_error(backend, &e)),
                Ok(Some(Ok(chunk))) => chunk,
            };
            let mut events = decoder
                .push(&chunk)
                .map_err(|reason| DispatchError::protocol(backend, reason))?
                .into_iter();
            if let Some(found) = events.by_ref().find(|e| e.event == "endpoint") {
                early_events.extend(events);
                break base.join(found.data.trim()).map_err(|e| {
                    DispatchError::protocol(backend, format!("bad endpoint '{}': {}", found.data, e))
                })?;
            }
        };
        debug!("MCP SSE server '{}' endpoint: {}", backend, endpoint);

        let correlator = Arc::new(Correlator::new(backend));
        let cancel = CancellationToken::new();

        let reader = {
            let correlator = Arc::clone(&correlator);
            let cancel = cancel.clone();
            let backend = backend.to_string();
            tokio::spawn(async move {
                let _guard = guard;
                let failure = 'read: {
                    for event in early_events {
                        if let Err(e) = route_event(&correlator, event) {
                            break 'read Some(e);
                        }
                    }
                    loop {
                        let next = tokio::select! {
                            _ = cancel.cancelled() => None,
                            chunk = stream.next() => Some(chunk),
                        };
                        let Some(chunk) = next else {
                            break 'read None;
                        };
                        let chunk = match chunk {
                            Some(Ok(chunk)) => chunk,
                            Some(Err(e)) => {
                                break 'read Some(DispatchError::not_ready(
                                    &backend,
                                    format!("event stream error: {}", e),
                                ));
                            }
                            None => {
                                break 'read Some(DispatchError::not_ready(
                                    &backend,
                                    "event stream closed",
                                ));
                            }
                        };
                        let events = match decoder.push(&chunk) {
                            Ok(events) => events,
                            Err(reason) => break 'read Some(DispatchError::protocol(&backend, reason)),
                        };
                        for event in events {
                            if let Err(e) = route_event(&correlator, event) {
                                break 'read Some(e);
                            }
                        }
                    }
                };
                match failure {
                    Some(e) => {
                        warn!("MCP SSE stream '{}' terminated: {}", backend, e);
                        correlator.fail_all(e);
                    }
                    None => {
                        correlator.fail_all(DispatchError::connection(&backend, "transport closed"))
                    }
                }
            })
        };

        Ok(Self {
            backend: backend.to_string(),
            http,
            endpoint,
            correlator,
            _drop_guard: cancel.clone().drop_guard(),
            cancel,
            reader: Mutex::new(Some(reader)),
        })
    }

    async fn post(&self, message: &Value) -> DispatchResult<()> {
        let response = self
            .http
            .post(self.endpoint.clone())
            .json(message)
            .send()
            .await
            .map_err(|e| classify_http_error(&self.backend, &e))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            let body = response.text().await.unwrap_or_default();
            Err(DispatchError::connection(
                &self.backend,
                format!("POST rejected with HTTP {}: {}", status, body.trim()),
            ))
        }
    }
}

fn route_event(correlator: &Correlator, event: SseEvent) -> DispatchResult<()> {
    match event.event.as_str() {
        "message" => {
            let message: Value = serde_json::from_str(&event.data).map_err(|e| {
                DispatchError::protocol(
                    correlator.backend(),
                    format!("invalid JSON in message event: {}", e),
                )
            })?;
            correlator.dispatch(message)
        }
        other => {
            debug!("Ignoring SSE event '{}'", other);
            Ok(())
        }
    }
}

/// Refused connections and timeouts mean "not up yet"; anything else is fatal
fn classify_http_error(backend: &str, e: &reqwest::Error) -> DispatchError {
    if e.is_connect() || e.is_timeout() {
        DispatchError::not_ready(backend, e.to_string())
    } else {
        DispatchError::connection(backend, e.to_string())
    }
}

#[async_trait]
impl Transport for SseTransport {
    fn backend(&self) -> &str {
        &self.backend
    }

    fn kind(&self) -> &'static str {
        "sse"
    }

    async fn request(
        &self,
        method: &str,
        params: Value,
        timeout: Duration,
    ) -> DispatchResult<Value> {
        let started = Instant::now();
        let (id, rx) = self.correlator.register()?;
        let posted = tokio::time::timeout(timeout, self.post(&request_body(id, method, params)))
            .await
            .unwrap_or_else(|_| {
                Err(DispatchError::timeout(
                    format!("{} on '{}'", method, self.backend),
                    timeout,
                ))
            });
        if let Err(e) = posted {
            self.correlator.forget(id);
            return Err(e);
        }
        let remaining = timeout.saturating_sub(started.elapsed());
        self.correlator.wait(id, method, rx, remaining).await
    }

    async fn notify(&self, method: &str, params: Value) -> DispatchResult<()> {
        if self.correlator.is_terminated() {
            return Err(DispatchError::connection(&self.backend, "transport is closed"));
        }
        self.post(&notification_body(method, params)).await
    }

    async fn close(&self) {
        self.cancel.cancel();
        if let Some(reader) = self.reader.lock().await.take() {
            let _ = reader.await;
        }
        debug!("MCP SSE stream '{}' closed", self.backend);
    }

    fn is_closed(&self) -> bool {
        self.correlator.is_terminated()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::Router;
    use axum::extract::State;
    use axum::http::StatusCode;
    use axum::response::sse::{Event, Sse};
    use axum::routing::{get, post};
    use futures_util::stream::{self, Stream};
    use std::convert::Infallible;
    use tokio::net::TcpListener;
    use tokio::sync::mpsc;

    /// Announces `/messages/`, then pushes `reply` as a message event after each POST
    #[derive(Clone)]
    struct Scripted {
        reply: Option<&'static str>,
        tx: mpsc::Sender<String>,
        rx: Arc<Mutex<Option<mpsc::Receiver<String>>>>,
    }

    async fn open_stream(
        State(state): State<Scripted>,
    ) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
        let rx = state.rx.lock().await.take();
        let endpoint = stream::once(async {
            Ok::<_, Infallible>(Event::default().event("endpoint").data("/messages/"))
        });
        let messages = stream::unfold(rx, |rx| async move {
            let mut rx = rx?;
            let data = rx.recv().await?;
            Some((Ok(Event::default().event("message").data(data)), Some(rx)))
        });
        Sse::new(endpoint.chain(messages))
    }

    async fn accept(State(state): State<Scripted>) -> StatusCode {
        if let Some(reply) = state.reply {
            let _ = state.tx.send(reply.to_string()).await;
        }
        StatusCode::ACCEPTED
    }

    async fn scripted_server(reply: Option<&'static str>) -> String {
        let (tx, rx) = mpsc::channel(8);
        let state = Scripted {
            reply,
            tx,
            rx: Arc::new(Mutex::new(Some(rx))),
        };
        let app = Router::new()
            .route("/sse", get(open_stream))
            .route("/messages/", post(accept))
            .with_state(state);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let _ = axum::serve(listener, app).await;
        });
        format!("http://{}/sse", addr)
    }

    #[test]
    fn test_decoder_basic_events() {
        let mut decoder = SseDecoder::new();
        let events = decoder
            .push(b"event: endpoint\ndata: /messages/?session_id=abc\n\ndata: {\"id\":1}\n\n")
            .unwrap();
        assert_eq!(
            events,
            vec![
                SseEvent {
                    event: "endpoint".to_string(),
                    data: "/messages/?session_id=abc".to_string(),
                },
                SseEvent {
                    event: "message".to_string(),
                    data: "{\"id\":1}".to_string(),
                },
            ]
        );
    }

    #[test]
    fn test_decoder_split_chunks_crlf_and_comments() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b": keep-alive\r\n\r\nevent: mess").unwrap().is_empty());
        assert!(decoder.push(b"age\r\ndata: line one\r\n").unwrap().is_empty());
        let events = decoder.push(b"data: line two\r\n\r\n").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event, "message");
        assert_eq!(events[0].data, "line one\nline two");
    }

    #[test]
    fn test_decoder_rejects_invalid_utf8() {
        let mut decoder = SseDecoder::new();
        assert!(decoder.push(b"data: \xff\xfe\n").is_err());
    }

    #[tokio::test]
    async fn test_connect_refused_is_retryable() {
        let gauge = ResourceGauge::new();
        let err = SseTransport::connect(
            "down",
            "http://127.0.0.1:1/sse",
            Duration::from_secs(2),
            &gauge,
        )
        .await
        .err()
        .unwrap();
        assert_eq!(err.kind(), "connection_error");
        assert!(err.is_retryable());
        assert_eq!(gauge.open(), 0);
    }

    #[tokio::test]
    async fn test_connect_invalid_url() {
        let gauge = ResourceGauge::new();
        let err = SseTransport::connect("bad", "not a url", Duration::from_secs(1), &gauge)
            .await
            .err()
            .unwrap();
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_silent_server_times_out() {
        let url = scripted_server(None).await;
        let gauge = ResourceGauge::new();
        let transport = SseTransport::connect("silent", &url, Duration::from_secs(2), &gauge)
            .await
            .unwrap();
        assert_eq!(gauge.streams(), 1);

        let err = transport
            .request("tools/call", serde_json::json!({}), Duration::from_millis(50))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "timeout_error");
        assert!(!transport.is_closed());

        transport.close().await;
        assert!(transport.is_closed());
        assert_eq!(gauge.streams(), 0);
    }

    #[tokio::test]
    async fn test_malformed_message_fails_in_flight_and_terminates() {
        let url = scripted_server(Some("{not json")).await;
        let gauge = ResourceGauge::new();
        let transport = SseTransport::connect("broken", &url, Duration::from_secs(2), &gauge)
            .await
            .unwrap();

        let err = transport
            .request("ping", serde_json::json!({}), Duration::from_secs(2))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "protocol_error");
        assert!(transport.is_closed());

        for _ in 0..50 {
            if gauge.streams() == 0 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert_eq!(gauge.streams(), 0);

        let err = transport
            .request("ping", serde_json::json!({}), Duration::from_secs(1))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "connection_error");
    }
}

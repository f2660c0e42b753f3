//! Streamable HTTP transport
//!
//! Same JSON-RPC semantics as [`super::http`], with a different connection
//! lifecycle: the server hands out a session id during `initialize`
//! (`Mcp-Session-Id`) and may answer any request with either a JSON body or a
//! `text/event-stream` carrying the response among other messages.

use super::*;
use crate::connection::NetworkSpec;
use crate::transport::http::{build_headers, status_error};
use futures::{Stream, StreamExt};
use reqwest::header::{ACCEPT, CONTENT_TYPE, HeaderMap, HeaderValue};
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

/// Session header used by streamable HTTP servers
pub const SESSION_HEADER: &str = "Mcp-Session-Id";

/// Tool transport for streamable HTTP servers
pub struct StreamableHttpTransport {
    url: String,
    http_client: reqwest::Client,
    headers: HeaderMap,

    /// `None` until the handshake ran; `Some(None)` for servers without sessions
    session: AsyncMutex<Option<Option<String>>>,

    request_id: AtomicU64,
}

impl StreamableHttpTransport {
    pub fn new(spec: &NetworkSpec) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(spec.timeout)
            .build()
            .map_err(|e| ToolClientError::Config(format!("Failed to create HTTP client: {e}")))?;

        let mut headers = build_headers(&spec.headers)?;
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("application/json, text/event-stream"),
        );

        Ok(Self {
            url: spec.url.clone(),
            http_client,
            headers,
            session: AsyncMutex::new(None),
            request_id: AtomicU64::new(0),
        })
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// POST one message; returns the raw response
    async fn post(&self, body: &Value, session_id: Option<&str>) -> Result<reqwest::Response> {
        let mut request = self
            .http_client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(body);

        if let Some(session_id) = session_id {
            request = request.header(SESSION_HEADER, session_id);
        }

        request
            .send()
            .await
            .map_err(|e| ToolClientError::connection(format!("HTTP request failed: {e}")))
    }

    /// Send a request and wait for the response carrying the same id
    async fn exchange(
        &self,
        method: &str,
        params: Value,
        session_id: Option<&str>,
    ) -> Result<(Value, Option<String>)> {
        let id = self.next_request_id();
        let request = rpc_request(id, method, params);

        debug!("Sending streamable HTTP request to {}: {}", self.url, method);

        let response = self.post(&request, session_id).await?;
        if !response.status().is_success() {
            return Err(status_error(method, response).await);
        }

        let returned_session = response
            .headers()
            .get(SESSION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);

        let is_stream = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.starts_with("text/event-stream"));

        let message = if is_stream {
            read_event_stream(method, id, response.bytes_stream()).await?
        } else {
            response
                .json()
                .await
                .map_err(|e| ToolClientError::Protocol(format!("Failed to parse response: {e}")))?
        };

        Ok((rpc_result(method, message)?, returned_session))
    }

    /// Session id for the next request, running the handshake when needed
    async fn session_id(&self) -> Result<Option<String>> {
        let mut session = self.session.lock().await;
        if let Some(existing) = session.as_ref() {
            return Ok(existing.clone());
        }

        let (result, session_id) = self.exchange("initialize", initialize_params(), None).await?;
        info!(
            "Opened session with tool server: {} (session: {})",
            result["serverInfo"]["name"].as_str().unwrap_or("unknown"),
            session_id.as_deref().unwrap_or("none")
        );

        let notification = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });
        if let Err(e) = self.post(&notification, session_id.as_deref()).await {
            warn!("Failed to send initialized notification to {}: {}", self.url, e);
        }

        *session = Some(session_id.clone());
        Ok(session_id)
    }

    async fn reset_session(&self) {
        *self.session.lock().await = None;
    }

    /// Request within the session; a 404 means the server dropped the session,
    /// so the handshake is repeated once
    async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        let session_id = self.session_id().await?;

        match self.exchange(method, params.clone(), session_id.as_deref()).await {
            Err(ToolClientError::Transport {
                status: Some(404), ..
            }) if session_id.is_some() => {
                debug!("Session expired at {}, re-initializing", self.url);
                self.reset_session().await;
                let session_id = self.session_id().await?;
                self.exchange(method, params, session_id.as_deref())
                    .await
                    .map(|(result, _)| result)
            }
            other => other.map(|(result, _)| result),
        }
    }
}

#[async_trait]
impl ToolTransport for StreamableHttpTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        let result = self.send_request("tools/list", json!({})).await?;
        parse_tool_list(&result)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        let params = json!({
            "name": name,
            "arguments": arguments
        });

        let result = self.send_request("tools/call", params).await?;
        parse_call_result(result)
    }
}

/// Read events until the response with `id` arrives; notifications and
/// server requests interleaved on the stream are skipped
async fn read_event_stream<S, B, E>(method: &str, id: u64, stream: S) -> Result<Value>
where
    S: Stream<Item = std::result::Result<B, E>>,
    B: AsRef<[u8]>,
    E: std::fmt::Display,
{
    let mut stream = std::pin::pin!(stream);
    let mut buffer = EventBuffer::default();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk
            .map_err(|e| ToolClientError::connection(format!("Event stream interrupted: {e}")))?;
        buffer.push(chunk.as_ref());

        while let Some(event) = buffer.next_event() {
            if let Some(message) = parse_sse_event(&event).filter(|m| is_response_to(m, id)) {
                return Ok(message);
            }
        }
    }

    // A final event may lack the blank-line terminator
    parse_sse_event(&buffer.remainder())
        .filter(|message| is_response_to(message, id))
        .ok_or_else(|| {
            ToolClientError::Protocol(format!("{method}: event stream ended without a response"))
        })
}

/// Raw event stream bytes, cut into events at blank lines
///
/// Only complete events are decoded, so a character split across network
/// chunks arrives intact.
#[derive(Default)]
struct EventBuffer {
    bytes: Vec<u8>,
}

impl EventBuffer {
    fn push(&mut self, chunk: &[u8]) {
        self.bytes.extend_from_slice(chunk);
    }

    fn next_event(&mut self) -> Option<String> {
        let (end, next) = find_blank_line(&self.bytes)?;
        let event = String::from_utf8_lossy(&self.bytes[..end]).into_owned();
        self.bytes.drain(..next);
        Some(event)
    }

    fn remainder(&self) -> String {
        String::from_utf8_lossy(&self.bytes).into_owned()
    }
}

/// End of the first event and start of the next, for `\n\n` or `\r\n\r\n`
fn find_blank_line(bytes: &[u8]) -> Option<(usize, usize)> {
    bytes
        .iter()
        .enumerate()
        .filter(|(_, byte)| **byte == b'\n')
        .find_map(|(i, _)| {
            let next = match bytes.get(i + 1..) {
                Some([b'\n', ..]) => i + 2,
                Some([b'\r', b'\n', ..]) => i + 3,
                _ => return None,
            };
            let end = if i > 0 && bytes[i - 1] == b'\r' { i - 1 } else { i };
            Some((end, next))
        })
}

/// JSON payload of one server-sent event (its `data:` lines joined)
fn parse_sse_event(event: &str) -> Option<Value> {
    let data: Vec<&str> = event
        .lines()
        .filter_map(|line| line.strip_prefix("data:"))
        .map(|d| d.strip_prefix(' ').unwrap_or(d))
        .collect();

    if data.is_empty() {
        return None;
    }

    serde_json::from_str(&data.join("\n")).ok()
}

fn is_response_to(message: &Value, id: u64) -> bool {
    message.get("id").and_then(Value::as_u64) == Some(id)
        && (message.get("result").is_some() || message.get("error").is_some())
}

//! Plain HTTP transport
//!
//! JSON-RPC 2.0 over HTTP POST, one request per response.

use super::*;
use crate::connection::NetworkSpec;
use reqwest::header::{HeaderMap, HeaderName, HeaderValue, RETRY_AFTER};
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::Mutex as AsyncMutex;
use tracing::info;

/// Tool transport using plain HTTP POST requests
pub struct HttpTransport {
    url: String,

    /// HTTP client with the per-request timeout applied
    http_client: reqwest::Client,

    /// Headers sent with every request
    headers: HeaderMap,

    /// Whether the initialize handshake has completed
    initialized: AsyncMutex<bool>,

    /// Request ID counter
    request_id: AtomicU64,
}

impl HttpTransport {
    /// Create a new HTTP transport from a network spec
    pub fn new(spec: &NetworkSpec) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .timeout(spec.timeout)
            .build()
            .map_err(|e| ToolClientError::Config(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            url: spec.url.clone(),
            http_client,
            headers: build_headers(&spec.headers)?,
            initialized: AsyncMutex::new(false),
            request_id: AtomicU64::new(0),
        })
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Send a JSON-RPC request over HTTP
    async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        let request = rpc_request(self.next_request_id(), method, params);

        debug!("Sending HTTP request to {}: {}", self.url, method);

        let response = self
            .http_client
            .post(&self.url)
            .headers(self.headers.clone())
            .json(&request)
            .send()
            .await
            .map_err(|e| ToolClientError::connection(format!("HTTP request failed: {e}")))?;

        if !response.status().is_success() {
            return Err(status_error(method, response).await);
        }

        let response_json: Value = response
            .json()
            .await
            .map_err(|e| ToolClientError::Protocol(format!("Failed to parse response: {e}")))?;

        debug!("Received response for: {}", method);

        rpc_result(method, response_json)
    }

    /// Run the initialize handshake once per transport
    async fn ensure_initialized(&self) -> Result<()> {
        let mut initialized = self.initialized.lock().await;
        if *initialized {
            return Ok(());
        }

        match self.send_request("initialize", initialize_params()).await {
            Ok(result) => {
                info!(
                    "Connected to tool server: {} v{}",
                    result["serverInfo"]["name"].as_str().unwrap_or("unknown"),
                    result["serverInfo"]["version"].as_str().unwrap_or("unknown")
                );

                // Send initialized notification (fire and forget)
                let notification = serde_json::json!({
                    "jsonrpc": "2.0",
                    "method": "notifications/initialized"
                });
                let _ = self
                    .http_client
                    .post(&self.url)
                    .headers(self.headers.clone())
                    .json(&notification)
                    .send()
                    .await;
            }
            // Stateless endpoints reject the handshake but serve tool calls
            Err(ToolClientError::Protocol(message)) => {
                debug!("Server at {} skipped initialize: {}", self.url, message);
            }
            Err(e) => return Err(e),
        }

        *initialized = true;
        Ok(())
    }
}

#[async_trait]
impl ToolTransport for HttpTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.ensure_initialized().await?;

        let result = self.send_request("tools/list", json!({})).await?;
        parse_tool_list(&result)
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        self.ensure_initialized().await?;

        let params = json!({
            "name": name,
            "arguments": arguments
        });

        let result = self.send_request("tools/call", params).await?;
        parse_call_result(result)
    }
}

/// Build a header map from configured headers
pub(crate) fn build_headers(
    headers: &std::collections::BTreeMap<String, String>,
) -> Result<HeaderMap> {
    let mut header_map = HeaderMap::new();
    header_map.insert("Content-Type", HeaderValue::from_static("application/json"));

    for (key, value) in headers {
        let name = HeaderName::from_str(key).map_err(|e| {
            ToolClientError::Config(format!("Invalid header name '{key}': {e}"))
        })?;
        let value = HeaderValue::from_str(value)
            .map_err(|e| ToolClientError::Config(format!("Invalid header value for '{key}': {e}")))?;
        header_map.insert(name, value);
    }

    Ok(header_map)
}

/// Turn a non-success response into a transport error, keeping the status and
/// any `Retry-After` hint
pub(crate) async fn status_error(method: &str, response: reqwest::Response) -> ToolClientError {
    let status = response.status();
    let retry_after = response
        .headers()
        .get(RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(parse_retry_after);
    let body = response.text().await.unwrap_or_default();

    ToolClientError::Transport {
        message: format!("HTTP {status} for {method}: {body}"),
        status: Some(status.as_u16()),
        retry_after,
    }
}

/// `Retry-After` in delay-seconds form
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

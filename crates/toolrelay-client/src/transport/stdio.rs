//! Pipe transport
//!
//! Communicates with a tool server via standard input/output by spawning
//! the server as a child process. Newline-delimited JSON-RPC 2.0.

use super::*;
use crate::connection::PipeSpec;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::process::{Child, ChildStdin, ChildStdout, Command};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{info, warn};

/// Running child process and its pipes
struct PipeSession {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
}

/// Tool transport using a spawned child process
///
/// The process is started on first use and respawned on the next request
/// after any transport failure.
pub struct StdioTransport {
    spec: PipeSpec,

    /// Live session; requests are serialized through this lock
    session: AsyncMutex<Option<PipeSession>>,

    /// Request ID counter
    request_id: AtomicU64,
}

impl StdioTransport {
    pub fn new(spec: PipeSpec) -> Self {
        Self {
            spec,
            session: AsyncMutex::new(None),
            request_id: AtomicU64::new(0),
        }
    }

    fn next_request_id(&self) -> u64 {
        self.request_id.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Spawn the child process and run the initialize handshake
    async fn spawn(&self) -> Result<PipeSession> {
        debug!("Starting tool server: {} {:?}", self.spec.command, self.spec.args);

        let mut command = Command::new(&self.spec.command);
        command
            .args(&self.spec.args)
            .envs(&self.spec.env)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true);

        if let Some(cwd) = &self.spec.cwd {
            command.current_dir(cwd);
        }

        let mut child = command.spawn().map_err(|e| {
            ToolClientError::connection(format!(
                "Failed to spawn '{}': {e}",
                self.spec.command
            ))
        })?;

        let stdin = child
            .stdin
            .take()
            .ok_or_else(|| ToolClientError::connection("Failed to get stdin"))?;
        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| ToolClientError::connection("Failed to get stdout"))?;

        let mut session = PipeSession {
            child,
            stdin,
            stdout: BufReader::new(stdout),
        };

        let result = self
            .exchange(&mut session, "initialize", initialize_params())
            .await?;
        info!(
            "Started tool server: {} v{}",
            result["serverInfo"]["name"].as_str().unwrap_or("unknown"),
            result["serverInfo"]["version"].as_str().unwrap_or("unknown")
        );

        let notification = json!({
            "jsonrpc": "2.0",
            "method": "notifications/initialized"
        });
        write_line(&mut session.stdin, &notification).await?;

        Ok(session)
    }

    /// Write one request and read lines until the matching response
    async fn exchange(
        &self,
        session: &mut PipeSession,
        method: &str,
        params: Value,
    ) -> Result<Value> {
        let id = self.next_request_id();
        let request = rpc_request(id, method, params);

        debug!("Sending request: {}", method);
        write_line(&mut session.stdin, &request).await?;

        loop {
            let mut line = String::new();
            let read = session
                .stdout
                .read_line(&mut line)
                .await
                .map_err(|e| ToolClientError::connection(e.to_string()))?;

            if read == 0 {
                return Err(ToolClientError::connection("Server closed connection"));
            }

            let Ok(message) = serde_json::from_str::<Value>(line.trim()) else {
                debug!("Skipping non-JSON output from tool server: {}", line.trim());
                continue;
            };

            if message.get("id").and_then(Value::as_u64) != Some(id) {
                // Notification or unrelated message
                continue;
            }

            debug!("Received response for: {}", method);
            return rpc_result(method, message);
        }
    }

    /// Send a request on the live session, spawning one if needed
    async fn send_request(&self, method: &str, params: Value) -> Result<Value> {
        let mut guard = self.session.lock().await;

        if guard.is_none() {
            let session = tokio::time::timeout(self.spec.timeout, self.spawn())
                .await
                .map_err(|_| {
                    ToolClientError::connection(format!(
                        "Handshake with '{}' timed out after {:?}",
                        self.spec.command, self.spec.timeout
                    ))
                })??;
            *guard = Some(session);
        }
        let Some(session) = guard.as_mut() else {
            return Err(ToolClientError::connection("Tool server not running"));
        };

        let result = tokio::time::timeout(self.spec.timeout, self.exchange(session, method, params))
            .await
            .unwrap_or_else(|_| {
                Err(ToolClientError::connection(format!(
                    "{method} timed out after {:?}",
                    self.spec.timeout
                )))
            });

        if matches!(result, Err(ToolClientError::Transport { .. })) {
            // Stream state is unknown after a failure; start over next time
            if let Some(mut session) = guard.take() {
                if let Err(e) = session.child.start_kill() {
                    warn!("Failed to kill tool server '{}': {}", self.spec.command, e);
                }
            }
        }

        result
    }
}

async fn write_line(stdin: &mut ChildStdin, message: &Value) -> Result<()> {
    let mut line = serde_json::to_string(message)?;
    line.push('\n');

    stdin
        .write_all(line.as_bytes())
        .await
        .map_err(|e| ToolClientError::connection(e.to_string()))?;
    stdin
        .flush()
        .await
        .map_err(|e| ToolClientError::connection(e.to_string()))
}

#[async_trait]
impl ToolTransport for StdioTransport {
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

impl Drop for StdioTransport {
    fn drop(&mut self) {
        // Best effort cleanup - kill child process
        if let Ok(mut session) = self.session.try_lock() {
            if let Some(session) = session.as_mut() {
                let _ = session.child.start_kill();
            }
        }
    }
}

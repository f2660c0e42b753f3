//! Error types for tool client operations

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while discovering or invoking remote tools
#[derive(Error, Debug)]
pub enum ToolClientError {
    /// Malformed or incomplete server descriptor
    #[error("Configuration error: {0}")]
    Config(String),

    /// The server's circuit breaker is open; no network attempt was made
    #[error("Circuit open for server '{server}', retry in {retry_after:?}")]
    CircuitOpen {
        server: String,
        retry_after: Duration,
    },

    /// Connection refused, DNS failure, timeout or a non-success HTTP status
    #[error("Transport error: {message}")]
    Transport {
        message: String,
        /// HTTP status, if the server answered at all
        status: Option<u16>,
        /// Server-supplied retry hint (`Retry-After`)
        retry_after: Option<Duration>,
    },

    /// The server answered with a malformed or error-bearing payload
    #[error("Protocol error: {0}")]
    Protocol(String),

    /// No server claims the requested tool
    #[error("Tool not found: {0}")]
    ToolNotFound(String),

    /// No active server with this name
    #[error("Tool server not found: {0}")]
    ServerNotFound(String),

    /// Arguments do not satisfy the tool's declared input schema
    #[error("Invalid arguments for tool '{tool}': {message}")]
    Validation { tool: String, message: String },

    /// The bridge gave up waiting for the background call
    #[error("Timed out after {0:?}")]
    Timeout(Duration),

    /// The background event loop is unavailable
    #[error("Bridge error: {0}")]
    Bridge(String),

    /// A tool call failed; wraps the underlying cause
    #[error("Tool '{tool}' on server '{server}' failed: {source}")]
    ToolInvocation {
        server: String,
        tool: String,
        #[source]
        source: Box<ToolClientError>,
    },

    /// Environment variable referenced from configuration is not set
    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ToolClientError {
    /// Transport error without an HTTP status (connection-level failure)
    pub fn connection(message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: None,
            retry_after: None,
        }
    }

    /// Transport error carrying the HTTP status the server answered with
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Transport {
            message: message.into(),
            status: Some(status),
            retry_after: None,
        }
    }

    /// Whether this error comes from the circuit breaker rather than the server
    pub fn is_circuit_open(&self) -> bool {
        match self {
            Self::CircuitOpen { .. } => true,
            Self::ToolInvocation { source, .. } => source.is_circuit_open(),
            _ => false,
        }
    }
}

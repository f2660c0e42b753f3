//! Remote tool invocation client
//!
//! Discovers the tools exposed by independent tool servers, caches their
//! schemas and invokes them on behalf of an agent runtime:
//! - HTTP, streamable HTTP and child-process pipe transports
//! - Process-local and shared cache tiers with a persisted fallback
//! - Per-server circuit breaker and retry with exponential backoff
//! - A single background event loop serving blocking callers
//! - Direct in-process calls for servers hosted by this process
//!
//! # Example
//!
//! ```no_run
//! use toolrelay_client::ToolClient;
//! use serde_json::json;
//!
//! # fn example() -> toolrelay_client::Result<()> {
//! let client = ToolClient::from_config_file("toolrelay.json")?;
//!
//! for tool in client.get_all_tools_cached()? {
//!     println!("{}: {}", tool.name, tool.description);
//! }
//!
//! let server = client.find_tool_server("create_document")?;
//! let result = client.call_tool(&server, "create_document", json!({"doctype": "Note"}), None)?;
//! println!("{}", result.joined_text());
//! # Ok(())
//! # }
//! ```

pub mod bridge;
pub mod cache;
pub mod circuit;
pub mod client;
pub mod config;
pub mod connection;
pub mod discovery;
pub mod error;
pub mod local;
pub mod retry;
pub mod schema;
pub mod store;
pub mod tool;
pub mod transport;

#[cfg(test)]
pub(crate) mod testing;

// Re-export commonly used types
pub use bridge::AsyncBridge;
pub use cache::{CacheManager, MemorySharedCache, SharedCache, SharedValue};
pub use circuit::{CircuitBreaker, CircuitState, CircuitStatus};
pub use client::{ToolClient, ToolClientBuilder};
pub use config::{ClientSettings, ServerDescriptor, ToolRelayConfig, TransportKind};
pub use connection::{ConnectionBuilder, ConnectionSpec};
pub use discovery::ToolIndex;
pub use error::ToolClientError;
pub use local::LocalToolHost;
pub use retry::RetryPolicy;
pub use store::{FallbackSnapshot, FileServerStore, MemoryServerStore, ServerStore};
pub use tool::{RemoteTool, ToolOutput};
pub use transport::{CatalogTool, ToolCallResult, ToolDescriptor, ToolTransport};

/// Result type for tool client operations
pub type Result<T> = std::result::Result<T, ToolClientError>;

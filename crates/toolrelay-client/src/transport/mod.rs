//! Wire transports for the remote tool protocol

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tracing::debug;

use crate::Result;
use crate::connection::ConnectionSpec;
use crate::error::ToolClientError;

#[cfg(feature = "http")]
pub mod http;
#[cfg(feature = "stdio")]
pub mod stdio;
#[cfg(feature = "http")]
pub mod streamable;

/// Protocol version announced during the handshake
pub(crate) const PROTOCOL_VERSION: &str = "2024-11-05";

/// Transport trait - abstracts over HTTP, streaming HTTP and pipe servers
///
/// All methods take `&self` so transports can be shared through `Arc`;
/// implementations keep connection state behind interior mutability.
#[async_trait]
pub trait ToolTransport: Send + Sync {
    /// Discovery call
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>>;

    /// Invocation call
    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult>;
}

/// Type alias for Arc-wrapped transport
pub type ArcTransport = Arc<dyn ToolTransport>;

/// Creates transports from connection specs
pub trait TransportFactory: Send + Sync {
    fn create(&self, server: &str, spec: &ConnectionSpec) -> Result<ArcTransport>;
}

/// Tool definition as returned by discovery
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolDescriptor {
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(
        rename = "inputSchema",
        alias = "input_schema",
        alias = "parameters",
        default = "empty_object_schema"
    )]
    pub input_schema: Value, // JSON Schema
}

impl ToolDescriptor {
    pub fn new(name: impl Into<String>, description: impl Into<String>, input_schema: Value) -> Self {
        Self {
            name: name.into(),
            description: description.into(),
            input_schema,
        }
    }
}

/// Normalized catalog entry handed to the agent runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CatalogTool {
    pub name: String,
    pub description: String,
    pub parameters: Value,
}

impl From<ToolDescriptor> for CatalogTool {
    fn from(tool: ToolDescriptor) -> Self {
        let parameters = if tool.input_schema.is_object() {
            tool.input_schema
        } else {
            empty_object_schema()
        };

        Self {
            name: tool.name,
            description: tool.description,
            parameters,
        }
    }
}

/// Tool invocation result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallResult {
    #[serde(default)]
    pub content: Vec<ContentBlock>,
    #[serde(default, rename = "isError")]
    pub is_error: bool,
}

impl ToolCallResult {
    /// Single text block result
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            content: vec![ContentBlock::Text { text: text.into() }],
            is_error: false,
        }
    }

    /// All text blocks joined by newlines
    pub fn joined_text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Content block in a tool result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum ContentBlock {
    Text {
        text: String,
    },
    Image {
        data: String,
        #[serde(rename = "mimeType")]
        mime_type: String,
    },
    Resource {
        #[serde(default)]
        uri: Option<String>,
        #[serde(skip_serializing_if = "Option::is_none", rename = "mimeType")]
        mime_type: Option<String>,
    },
    #[serde(other)]
    Unsupported,
}

pub(crate) fn empty_object_schema() -> Value {
    json!({"type": "object", "properties": {}})
}

/// Normalize a tool definition in any of the shapes servers emit
///
/// Accepts `{name, description, inputSchema | input_schema | parameters}` and
/// the function-calling wrapper `{type: "function", function: {...}}`.
pub fn normalize_tool(value: &Value) -> Option<ToolDescriptor> {
    if let Some(function) = value.get("function").filter(|f| f.is_object()) {
        return normalize_tool(function);
    }

    let name = value.get("name")?.as_str()?.trim();
    if name.is_empty() {
        return None;
    }

    let description = value
        .get("description")
        .and_then(Value::as_str)
        .unwrap_or_default();

    let schema = ["inputSchema", "input_schema", "parameters"]
        .iter()
        .find_map(|key| value.get(*key).filter(|s| s.is_object()))
        .cloned()
        .unwrap_or_else(empty_object_schema);

    Some(ToolDescriptor::new(name, description, schema))
}

/// Parse a discovery result (`{tools: [...]}` or a bare array), skipping
/// entries that carry no usable name
pub(crate) fn parse_tool_list(result: &Value) -> Result<Vec<ToolDescriptor>> {
    let items = result
        .get("tools")
        .unwrap_or(result)
        .as_array()
        .ok_or_else(|| ToolClientError::Protocol("Discovery result has no tool list".to_string()))?;

    Ok(items.iter().filter_map(normalize_tool).collect())
}

pub(crate) fn parse_call_result(result: Value) -> Result<ToolCallResult> {
    serde_json::from_value(result)
        .map_err(|e| ToolClientError::Protocol(format!("Failed to parse tool result: {e}")))
}

/// Build a JSON-RPC 2.0 request envelope
pub(crate) fn rpc_request(id: u64, method: &str, params: Value) -> Value {
    json!({
        "jsonrpc": "2.0",
        "id": id,
        "method": method,
        "params": params
    })
}

pub(crate) fn initialize_params() -> Value {
    json!({
        "protocolVersion": PROTOCOL_VERSION,
        "capabilities": {},
        "clientInfo": {
            "name": env!("CARGO_PKG_NAME"),
            "version": env!("CARGO_PKG_VERSION")
        }
    })
}

/// Extract `result` from a JSON-RPC response, mapping the error member to a
/// protocol error
pub(crate) fn rpc_result(method: &str, response: Value) -> Result<Value> {
    if let Some(error) = response.get("error") {
        return Err(ToolClientError::Protocol(format!("{method}: {error}")));
    }

    response
        .get("result")
        .cloned()
        .ok_or_else(|| ToolClientError::Protocol(format!("{method}: no result in response")))
}

/// Default factory: picks the transport implementation by spec kind
#[derive(Debug, Default, Clone, Copy)]
pub struct DefaultTransportFactory;

impl TransportFactory for DefaultTransportFactory {
    fn create(&self, server: &str, spec: &ConnectionSpec) -> Result<ArcTransport> {
        debug!("Creating {} transport for server: {}", spec.kind(), server);

        let transport: ArcTransport = match spec {
            #[cfg(feature = "http")]
            ConnectionSpec::Http(network) => Arc::new(http::HttpTransport::new(network)?),
            #[cfg(feature = "http")]
            ConnectionSpec::StreamingHttp(network) => {
                Arc::new(streamable::StreamableHttpTransport::new(network)?)
            }
            #[cfg(feature = "stdio")]
            ConnectionSpec::Pipe(pipe) => Arc::new(stdio::StdioTransport::new(pipe.clone())),
            #[allow(unreachable_patterns)]
            other => {
                return Err(ToolClientError::Config(format!(
                    "Transport '{}' not compiled in",
                    other.kind()
                )));
            }
        };

        Ok(transport)
    }
}

/// Reuses transports per server while the connection spec is unchanged
pub struct TransportPool {
    factory: Arc<dyn TransportFactory>,
    entries: Mutex<HashMap<String, (ConnectionSpec, ArcTransport)>>,
}

impl TransportPool {
    pub fn new(factory: Arc<dyn TransportFactory>) -> Self {
        Self {
            factory,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Transport for `server`, created on first use or when `spec` changed
    pub fn get(&self, server: &str, spec: &ConnectionSpec) -> Result<ArcTransport> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());

        if let Some((cached_spec, transport)) = entries.get(server) {
            if cached_spec == spec {
                return Ok(Arc::clone(transport));
            }
        }

        let transport = self.factory.create(server, spec)?;
        entries.insert(server.to_string(), (spec.clone(), Arc::clone(&transport)));
        Ok(transport)
    }

    /// Drop the pooled transport for `server`
    pub fn evict(&self, server: &str) {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(server);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::NetworkSpec;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn test_normalize_native_shapes() {
        let native = json!({"name": "create_document", "description": "Create", "inputSchema": {"type": "object"}});
        let snake = json!({"name": "get_report", "input_schema": {"type": "object", "required": ["name"]}});
        let openai = json!({"type": "function", "function": {"name": "send_email", "parameters": {"type": "object"}}});

        let tool = normalize_tool(&native).unwrap();
        assert_eq!(tool.name, "create_document");
        assert_eq!(tool.description, "Create");

        let tool = normalize_tool(&snake).unwrap();
        assert_eq!(tool.input_schema["required"][0], "name");
        assert_eq!(tool.description, "");

        let tool = normalize_tool(&openai).unwrap();
        assert_eq!(tool.name, "send_email");
    }

    #[test]
    fn test_normalize_defaults_and_rejects() {
        let tool = normalize_tool(&json!({"name": "ping"})).unwrap();
        assert_eq!(tool.input_schema, empty_object_schema());

        assert!(normalize_tool(&json!({"description": "no name"})).is_none());
        assert!(normalize_tool(&json!({"name": "  "})).is_none());
    }

    #[test]
    fn test_parse_tool_list() {
        let result = json!({"tools": [{"name": "a"}, {"bogus": true}, {"name": "b"}]});
        let tools = parse_tool_list(&result).unwrap();
        assert_eq!(tools.len(), 2);

        let bare = json!([{"name": "a"}]);
        assert_eq!(parse_tool_list(&bare).unwrap().len(), 1);

        assert!(matches!(
            parse_tool_list(&json!({"tools": "nope"})),
            Err(ToolClientError::Protocol(_))
        ));
    }

    #[test]
    fn test_call_result_parsing() {
        let result = parse_call_result(json!({
            "content": [
                {"type": "text", "text": "line one"},
                {"type": "image", "data": "aGk=", "mimeType": "image/png"},
                {"type": "audio", "data": "..."},
                {"type": "text", "text": "line two"}
            ]
        }))
        .unwrap();

        assert!(!result.is_error);
        assert_eq!(result.content.len(), 4);
        assert_eq!(result.content[2], ContentBlock::Unsupported);
        assert_eq!(result.joined_text(), "line one\nline two");
    }

    #[test]
    fn test_rpc_result_error_member() {
        let response = json!({"jsonrpc": "2.0", "id": 1, "error": {"code": -32601, "message": "nope"}});
        assert!(matches!(
            rpc_result("tools/call", response),
            Err(ToolClientError::Protocol(_))
        ));

        let response = json!({"jsonrpc": "2.0", "id": 1, "result": {"ok": true}});
        assert_eq!(rpc_result("tools/call", response).unwrap()["ok"], true);
    }

    #[test]
    fn test_catalog_tool_from_descriptor() {
        let tool: CatalogTool = ToolDescriptor::new("a", "desc", Value::Null).into();
        assert_eq!(tool.parameters, empty_object_schema());
    }

    struct CountingFactory {
        created: AtomicUsize,
    }

    struct NullTransport;

    #[async_trait]
    impl ToolTransport for NullTransport {
        async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
            Ok(Vec::new())
        }

        async fn call_tool(&self, _name: &str, _arguments: Value) -> Result<ToolCallResult> {
            Ok(ToolCallResult::text(""))
        }
    }

    impl TransportFactory for CountingFactory {
        fn create(&self, _server: &str, _spec: &ConnectionSpec) -> Result<ArcTransport> {
            self.created.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(NullTransport))
        }
    }

    fn spec(url: &str) -> ConnectionSpec {
        ConnectionSpec::Http(NetworkSpec {
            url: url.to_string(),
            headers: BTreeMap::new(),
            timeout: Duration::from_secs(30),
        })
    }

    #[test]
    fn test_pool_reuses_until_spec_changes() {
        let factory = Arc::new(CountingFactory {
            created: AtomicUsize::new(0),
        });
        let pool = TransportPool::new(factory.clone());

        let transport = pool.get("a", &spec("http://one")).unwrap();
        assert!(tokio_test::block_on(transport.list_tools()).unwrap().is_empty());
        pool.get("a", &spec("http://one")).unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 1);

        pool.get("a", &spec("http://two")).unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 2);

        pool.evict("a");
        pool.get("a", &spec("http://two")).unwrap();
        assert_eq!(factory.created.load(Ordering::SeqCst), 3);
    }
}

//! Scripted transports for client tests

use crate::Result;
use crate::config::{ClientSettings, ServerDescriptor, TransportKind};
use crate::connection::ConnectionSpec;
use crate::error::ToolClientError;
use crate::transport::{ArcTransport, ToolCallResult, ToolDescriptor, ToolTransport, TransportFactory};
use async_trait::async_trait;
use serde_json::{Value, json};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

/// Transport answering from a fixed tool list and counting every request
pub(crate) struct ScriptedTransport {
    tools: Vec<ToolDescriptor>,
    reachable: AtomicBool,
    pub list_calls: AtomicUsize,
    pub call_calls: AtomicUsize,
}

impl ScriptedTransport {
    pub fn serving(names: &[&str]) -> Arc<Self> {
        let tools = names
            .iter()
            .map(|name| {
                ToolDescriptor::new(
                    *name,
                    format!("{name} tool"),
                    json!({
                        "type": "object",
                        "properties": {"doctype": {"type": "string"}},
                        "required": ["doctype"]
                    }),
                )
            })
            .collect();

        Arc::new(Self {
            tools,
            reachable: AtomicBool::new(true),
            list_calls: AtomicUsize::new(0),
            call_calls: AtomicUsize::new(0),
        })
    }

    pub fn unreachable() -> Arc<Self> {
        Arc::new(Self {
            tools: Vec::new(),
            reachable: AtomicBool::new(false),
            list_calls: AtomicUsize::new(0),
            call_calls: AtomicUsize::new(0),
        })
    }

    pub fn set_reachable(&self, reachable: bool) {
        self.reachable.store(reachable, Ordering::SeqCst);
    }

    pub fn lists(&self) -> usize {
        self.list_calls.load(Ordering::SeqCst)
    }

    pub fn calls(&self) -> usize {
        self.call_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ToolTransport for ScriptedTransport {
    async fn list_tools(&self) -> Result<Vec<ToolDescriptor>> {
        self.list_calls.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(ToolClientError::connection("Connection refused"));
        }
        Ok(self.tools.clone())
    }

    async fn call_tool(&self, name: &str, arguments: Value) -> Result<ToolCallResult> {
        self.call_calls.fetch_add(1, Ordering::SeqCst);
        if !self.reachable.load(Ordering::SeqCst) {
            return Err(ToolClientError::connection("Connection refused"));
        }
        if !self.tools.iter().any(|t| t.name == name) {
            return Err(ToolClientError::Protocol(format!("Unknown tool: {name}")));
        }
        Ok(ToolCallResult::text(format!("{name}: {arguments}")))
    }
}

/// Factory handing out scripted transports by server name
#[derive(Default)]
pub(crate) struct ScriptedFactory {
    transports: HashMap<String, Arc<ScriptedTransport>>,
    pub created: AtomicUsize,
}

impl ScriptedFactory {
    pub fn with(mut self, server: &str, transport: Arc<ScriptedTransport>) -> Self {
        self.transports.insert(server.to_string(), transport);
        self
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

impl TransportFactory for ScriptedFactory {
    fn create(&self, server: &str, _spec: &ConnectionSpec) -> Result<ArcTransport> {
        self.created.fetch_add(1, Ordering::SeqCst);
        let transport: ArcTransport = self
            .transports
            .get(server)
            .cloned()
            .ok_or_else(|| ToolClientError::Config(format!("No scripted transport for {server}")))?;
        Ok(transport)
    }
}

/// Network descriptor on a host that is never same-host
pub(crate) fn remote(name: &str) -> ServerDescriptor {
    ServerDescriptor::http(name, TransportKind::Http, format!("http://{name}.tools.test/rpc"))
}

/// Settings with a quick retry schedule
pub(crate) fn test_settings() -> ClientSettings {
    let mut settings = ClientSettings::default();
    settings.retry.max_retries = 1;
    settings.retry.base_delay_ms = 1;
    settings.retry.max_delay_ms = 2;
    settings.bridge_timeout_secs = 10;
    settings
}

//! Tool discovery and the tool index
//!
//! Tool lists are resolved through the cache tiers first, then the in-process
//! host, then the live server, and finally the last persisted snapshot. The
//! index maps every known tool name to the server that serves it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::Result;
use crate::client::ToolClient;
use crate::error::ToolClientError;
use crate::store::FallbackSnapshot;
use crate::transport::{CatalogTool, ToolDescriptor};

/// Tool name to server name
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ToolIndex {
    pub tools: BTreeMap<String, String>,
    pub built_at: DateTime<Utc>,
}

impl ToolIndex {
    pub fn new() -> Self {
        Self {
            tools: BTreeMap::new(),
            built_at: Utc::now(),
        }
    }

    /// Record `tool` for `server` unless another server already claimed it
    ///
    /// Returns `false` when the name was taken.
    pub fn insert(&mut self, tool: &str, server: &str) -> bool {
        if self.tools.contains_key(tool) {
            return false;
        }
        self.tools.insert(tool.to_string(), server.to_string());
        true
    }

    pub fn server_for(&self, tool: &str) -> Option<&str> {
        self.tools.get(tool).map(String::as_str)
    }

    pub fn is_stale(&self, ttl: Duration) -> bool {
        let age = Utc::now().signed_duration_since(self.built_at);
        age.to_std().is_ok_and(|age| age >= ttl)
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }
}

impl Default for ToolIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl ToolClient {
    /// Tool list of `server`
    ///
    /// Tries, in order: local cache, shared cache, the registered same-host
    /// tool host, the server itself, the persisted fallback snapshot. The
    /// first success fills the cache tiers.
    pub fn discover_tools(&self, server: &str) -> Result<Vec<ToolDescriptor>> {
        let descriptor = self.descriptor(server)?;
        let key = self.cache.tools_key(server);

        if let Some((tools, tier)) = self.cache.get::<Vec<ToolDescriptor>>(&key) {
            debug!("Tools of '{}' served from {:?} cache", server, tier);
            return Ok(tools);
        }

        let spec = self.connections.build(&descriptor, None)?;

        if let Some(host) = self.local_host_for(&spec) {
            match host.list_tools() {
                Ok(tools) => {
                    debug!("Listed {} tools of '{}' in process", tools.len(), server);
                    self.store_tools(&key, &tools);
                    return Ok(tools);
                }
                Err(e) => warn!("In-process listing for '{}' failed: {}", server, e),
            }
        }

        let live = self.guarded(server, &spec, |transport| async move {
            transport.list_tools().await
        });

        let error = match live {
            Ok(tools) => {
                info!("Discovered {} tools from server '{}'", tools.len(), server);
                self.store_tools(&key, &tools);
                if self.settings.persist_snapshots {
                    self.persist_snapshot(server, &tools);
                }
                return Ok(tools);
            }
            Err(e) => e,
        };

        match self.store.fallback_snapshot(server) {
            Ok(Some(snapshot)) => match snapshot.tools() {
                Ok(tools) => {
                    warn!(
                        "Discovery of '{}' failed ({}), using snapshot from {}",
                        server, error, snapshot.last_connected
                    );
                    self.store_tools(&key, &tools);
                    return Ok(tools);
                }
                Err(e) => warn!("Unreadable fallback snapshot for '{}': {}", server, e),
            },
            Ok(None) => {}
            Err(e) => warn!("Failed to read fallback snapshot for '{}': {}", server, e),
        }

        Err(error)
    }

    fn store_tools(&self, key: &str, tools: &[ToolDescriptor]) {
        if let Err(e) = self.cache.put(key, &tools) {
            warn!("Failed to cache tools under {}: {}", key, e);
        }
    }

    fn persist_snapshot(&self, server: &str, tools: &[ToolDescriptor]) {
        let saved = FallbackSnapshot::connected(tools)
            .and_then(|snapshot| self.store.save_snapshot(server, &snapshot));

        if let Err(e) = saved {
            warn!("Failed to save fallback snapshot for '{}': {}", server, e);
        }
    }

    /// Rebuild the tool index from every active server
    ///
    /// Servers with an open circuit are skipped and a server that fails to
    /// answer is logged and left out. Servers are visited in name order and
    /// the first one to claim a tool name keeps it.
    pub fn rebuild_index(&self) -> Result<ToolIndex> {
        let mut index = ToolIndex::new();

        for descriptor in self.active_descriptors()? {
            let server = descriptor.name.as_str();

            if self.breaker.is_open(server) {
                debug!("Skipping server '{}' with open circuit", server);
                continue;
            }

            let tools = match self.discover_tools(server) {
                Ok(tools) => tools,
                Err(e) => {
                    warn!("Skipping server '{}' in tool index: {}", server, e);
                    continue;
                }
            };

            for tool in &tools {
                if !index.insert(&tool.name, server) {
                    debug!(
                        "Tool '{}' of '{}' shadowed by '{}'",
                        tool.name,
                        server,
                        index.server_for(&tool.name).unwrap_or_default()
                    );
                }
            }
        }

        info!("Tool index rebuilt with {} tools", index.len());
        if let Err(e) = self.cache.put(&self.cache.index_key(), &index) {
            warn!("Failed to cache tool index: {}", e);
        }

        Ok(index)
    }

    /// Fresh cached index, if any
    fn cached_index(&self) -> Option<ToolIndex> {
        let (index, _) = self.cache.get::<ToolIndex>(&self.cache.index_key())?;
        let ttl = Duration::from_secs(self.settings.index_ttl_secs);
        (!index.is_stale(ttl)).then_some(index)
    }

    /// Name of the server serving `tool`
    ///
    /// A miss in a cached index triggers one rebuild before giving up.
    pub fn find_tool_server(&self, tool: &str) -> Result<String> {
        if let Some(index) = self.cached_index() {
            if let Some(server) = index.server_for(tool) {
                return Ok(server.to_string());
            }
            debug!("Tool '{}' not in cached index, rebuilding", tool);
        }

        self.rebuild_index()?
            .server_for(tool)
            .map(str::to_string)
            .ok_or_else(|| ToolClientError::ToolNotFound(tool.to_string()))
    }

    /// Merged catalog of every active server's tools
    ///
    /// Deduplicated by name with the same first-server-wins rule as the
    /// index. The catalog is only cached when at least one server answered
    /// or no server is active.
    pub fn get_all_tools_cached(&self) -> Result<Vec<CatalogTool>> {
        let key = self.cache.catalog_key();
        if let Some((catalog, _)) = self.cache.get::<Vec<CatalogTool>>(&key) {
            return Ok(catalog);
        }

        let servers = self.active_descriptors()?;
        let mut seen = HashSet::new();
        let mut catalog = Vec::new();
        let mut answered = 0usize;

        for descriptor in &servers {
            let server = descriptor.name.as_str();

            if self.breaker.is_open(server) {
                debug!("Leaving server '{}' out of catalog, circuit open", server);
                continue;
            }

            match self.discover_tools(server) {
                Ok(tools) => {
                    answered += 1;
                    catalog.extend(
                        tools
                            .into_iter()
                            .filter(|tool| seen.insert(tool.name.clone()))
                            .map(CatalogTool::from),
                    );
                }
                Err(e) => warn!("Leaving server '{}' out of catalog: {}", server, e),
            }
        }

        if answered > 0 || servers.is_empty() {
            if let Err(e) = self.cache.put(&key, &catalog) {
                warn!("Failed to cache tool catalog: {}", e);
            }
        }

        Ok(catalog)
    }
}

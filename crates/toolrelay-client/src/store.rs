//! Server descriptor store
//!
//! The client never owns server records. It reads them, and the last known
//! discovery snapshot per server, through [`ServerStore`].

use crate::Result;
use crate::config::{ServerDescriptor, ToolRelayConfig};
use crate::error::ToolClientError;
use crate::transport::{ToolDescriptor, parse_tool_list};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, warn};

/// Outcome of the last connection attempt recorded with a snapshot
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SnapshotStatus {
    Connected,
    Error,
    #[default]
    Unknown,
}

/// Last known discovery result of one server
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FallbackSnapshot {
    /// Raw tool list as discovered (`{tools: [...]}` or a bare array)
    pub tools_discovered: Value,
    pub last_connected: DateTime<Utc>,
    #[serde(default)]
    pub status: SnapshotStatus,
}

impl FallbackSnapshot {
    /// Snapshot of a successful discovery taken now
    pub fn connected(tools: &[ToolDescriptor]) -> Result<Self> {
        Ok(Self {
            tools_discovered: serde_json::to_value(tools)?,
            last_connected: Utc::now(),
            status: SnapshotStatus::Connected,
        })
    }

    /// Decode the stored tool list
    pub fn tools(&self) -> Result<Vec<ToolDescriptor>> {
        parse_tool_list(&self.tools_discovered)
    }
}

/// Read access to server descriptors and fallback snapshots
pub trait ServerStore: Send + Sync {
    /// Descriptor of `name`, active or not
    fn descriptor(&self, name: &str) -> Result<Option<ServerDescriptor>>;

    /// Every known descriptor; the client filters inactive ones
    fn descriptors(&self) -> Result<Vec<ServerDescriptor>>;

    /// Last known discovery result of `name`
    fn fallback_snapshot(&self, name: &str) -> Result<Option<FallbackSnapshot>>;

    /// Record a discovery result; stores that cannot write ignore it
    fn save_snapshot(&self, _name: &str, _snapshot: &FallbackSnapshot) -> Result<()> {
        Ok(())
    }
}

#[derive(Debug, Default)]
struct Records {
    servers: BTreeMap<String, ServerDescriptor>,
    snapshots: BTreeMap<String, FallbackSnapshot>,
}

/// In-memory store
#[derive(Debug, Default)]
pub struct MemoryServerStore {
    records: RwLock<Records>,
}

impl MemoryServerStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store holding `servers`
    pub fn with_servers(servers: impl IntoIterator<Item = ServerDescriptor>) -> Self {
        let store = Self::new();
        for server in servers {
            store.upsert(server);
        }
        store
    }

    /// Insert or replace a descriptor
    pub fn upsert(&self, server: ServerDescriptor) {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.servers.insert(server.name.clone(), server);
    }

    /// Flip the active flag of `name`; returns `false` if unknown
    pub fn set_active(&self, name: &str, active: bool) -> bool {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        match records.servers.get_mut(name) {
            Some(server) => {
                server.is_active = active;
                true
            }
            None => false,
        }
    }

    pub fn remove(&self, name: &str) -> Option<ServerDescriptor> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.snapshots.remove(name);
        records.servers.remove(name)
    }
}

impl ServerStore for MemoryServerStore {
    fn descriptor(&self, name: &str) -> Result<Option<ServerDescriptor>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.servers.get(name).cloned())
    }

    fn descriptors(&self) -> Result<Vec<ServerDescriptor>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.servers.values().cloned().collect())
    }

    fn fallback_snapshot(&self, name: &str) -> Result<Option<FallbackSnapshot>> {
        let records = self.records.read().unwrap_or_else(|e| e.into_inner());
        Ok(records.snapshots.get(name).cloned())
    }

    fn save_snapshot(&self, name: &str, snapshot: &FallbackSnapshot) -> Result<()> {
        let mut records = self.records.write().unwrap_or_else(|e| e.into_inner());
        records.snapshots.insert(name.to_string(), snapshot.clone());
        Ok(())
    }
}

/// Store backed by a `toolrelay.json` file
///
/// The file is read once at construction. Saved snapshots are written back
/// to the same file.
#[derive(Debug)]
pub struct FileServerStore {
    path: PathBuf,
    config: RwLock<ToolRelayConfig>,
}

impl FileServerStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let config = ToolRelayConfig::from_file(&path)?;
        debug!(
            "Loaded {} tool servers from {}",
            config.servers.len(),
            path.display()
        );

        Ok(Self {
            path,
            config: RwLock::new(config),
        })
    }

    /// Copy of the loaded configuration
    pub fn config(&self) -> ToolRelayConfig {
        self.config
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl ServerStore for FileServerStore {
    fn descriptor(&self, name: &str) -> Result<Option<ServerDescriptor>> {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        Ok(config.servers.get(name).cloned())
    }

    fn descriptors(&self) -> Result<Vec<ServerDescriptor>> {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        Ok(config.servers.values().cloned().collect())
    }

    fn fallback_snapshot(&self, name: &str) -> Result<Option<FallbackSnapshot>> {
        let config = self.config.read().unwrap_or_else(|e| e.into_inner());
        Ok(config.snapshots.get(name).cloned())
    }

    fn save_snapshot(&self, name: &str, snapshot: &FallbackSnapshot) -> Result<()> {
        let mut config = self.config.write().unwrap_or_else(|e| e.into_inner());
        config.snapshots.insert(name.to_string(), snapshot.clone());

        if let Err(e) = write_snapshot(&self.path, name, snapshot) {
            warn!("Failed to persist snapshot for '{}': {}", name, e);
            return Err(e);
        }
        Ok(())
    }
}

/// Merge one snapshot into the file as it is on disk
///
/// The loaded configuration has `${VAR}` references already resolved, so it
/// is never written back; every field other than `snapshots.<name>` keeps
/// its raw text.
fn write_snapshot(path: &Path, name: &str, snapshot: &FallbackSnapshot) -> Result<()> {
    let content = std::fs::read_to_string(path)?;
    let mut raw: Value = serde_json::from_str(&content)?;

    let root = raw
        .as_object_mut()
        .ok_or_else(|| ToolClientError::Config("Config file is not a JSON object".to_string()))?;
    let snapshots = root
        .entry("snapshots")
        .or_insert_with(|| Value::Object(Map::new()))
        .as_object_mut()
        .ok_or_else(|| ToolClientError::Config("'snapshots' is not a JSON object".to_string()))?;
    snapshots.insert(name.to_string(), serde_json::to_value(snapshot)?);

    std::fs::write(path, serde_json::to_string_pretty(&raw)?)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TransportKind;
    use serde_json::json;
    use std::io::Write;

    #[test]
    fn test_snapshot_round_trip_through_tools() {
        let tools = vec![ToolDescriptor::new("a", "first", json!({"type": "object"}))];
        let snapshot = FallbackSnapshot::connected(&tools).unwrap();

        assert_eq!(snapshot.status, SnapshotStatus::Connected);
        assert_eq!(snapshot.tools().unwrap(), tools);
    }

    #[test]
    fn test_snapshot_accepts_wrapped_tool_list() {
        let snapshot: FallbackSnapshot = serde_json::from_value(json!({
            "toolsDiscovered": {"tools": [{"name": "x", "parameters": {"type": "object"}}]},
            "lastConnected": "2024-05-01T10:00:00Z"
        }))
        .unwrap();

        assert_eq!(snapshot.status, SnapshotStatus::Unknown);
        let tools = snapshot.tools().unwrap();
        assert_eq!(tools[0].name, "x");
    }

    #[test]
    fn test_memory_store() {
        let store = MemoryServerStore::with_servers([
            ServerDescriptor::http("a", TransportKind::Http, "http://a"),
            ServerDescriptor::pipe("b", "b-tools", ""),
        ]);

        assert_eq!(store.descriptors().unwrap().len(), 2);
        assert!(store.descriptor("a").unwrap().is_some());
        assert!(store.descriptor("zzz").unwrap().is_none());

        assert!(store.set_active("a", false));
        assert!(!store.descriptor("a").unwrap().unwrap().is_active);
        assert!(!store.set_active("zzz", false));

        let snapshot = FallbackSnapshot::connected(&[]).unwrap();
        store.save_snapshot("b", &snapshot).unwrap();
        assert_eq!(store.fallback_snapshot("b").unwrap(), Some(snapshot));

        store.remove("b");
        assert!(store.fallback_snapshot("b").unwrap().is_none());
    }

    #[test]
    fn test_file_store_persists_snapshots() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"servers": {{"docs": {{"transport": "http", "url": "http://docs"}}}}}}"#
        )
        .unwrap();

        let store = FileServerStore::open(file.path()).unwrap();
        assert_eq!(store.descriptor("docs").unwrap().unwrap().name, "docs");
        assert!(store.fallback_snapshot("docs").unwrap().is_none());

        let tools = vec![ToolDescriptor::new("search", "", json!({"type": "object"}))];
        let snapshot = FallbackSnapshot::connected(&tools).unwrap();
        store.save_snapshot("docs", &snapshot).unwrap();

        let reopened = FileServerStore::open(file.path()).unwrap();
        let saved = reopened.fallback_snapshot("docs").unwrap().unwrap();
        assert_eq!(saved.tools().unwrap(), tools);
    }

    #[test]
    fn test_file_store_keeps_env_references() {
        unsafe {
            std::env::set_var("TOOLRELAY_STORE_TEST_KEY", "s3cr3t-value");
        }

        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"servers": {{"docs": {{"transport": "http", "url": "http://docs", "credential": "${{TOOLRELAY_STORE_TEST_KEY}}"}}}}, "extra": 1}}"#
        )
        .unwrap();

        let store = FileServerStore::open(file.path()).unwrap();
        let descriptor = store.descriptor("docs").unwrap().unwrap();
        assert_eq!(descriptor.connection.credential.as_deref(), Some("s3cr3t-value"));

        let snapshot = FallbackSnapshot::connected(&[]).unwrap();
        store.save_snapshot("docs", &snapshot).unwrap();

        let written = std::fs::read_to_string(file.path()).unwrap();
        assert!(written.contains("${TOOLRELAY_STORE_TEST_KEY}"));
        assert!(!written.contains("s3cr3t-value"));
        assert!(written.contains("\"extra\": 1"));

        let reopened = FileServerStore::open(file.path()).unwrap();
        assert!(reopened.fallback_snapshot("docs").unwrap().is_some());
    }

    #[test]
    fn test_file_store_missing_file() {
        let result = FileServerStore::open("/nonexistent/toolrelay.json");
        assert!(result.is_err());
    }
}

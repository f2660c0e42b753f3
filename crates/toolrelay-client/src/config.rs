//! Configuration types for the tool client
//!
//! A `toolrelay.json` file carries the client settings, the tool server
//! descriptors and (optionally) the last known fallback snapshots:
//!
//! ```json
//! {
//!   "settings": { "hostIdentity": "erp.internal", "bridgeTimeoutSecs": 60 },
//!   "servers": {
//!     "documents": {
//!       "transport": "http",
//!       "url": "http://erp.internal/api/tools",
//!       "credential": "${DOCS_API_KEY}"
//!     },
//!     "filesystem": {
//!       "transport": "pipe",
//!       "command": "fs-tools",
//!       "args": "--root /srv/data --readonly",
//!       "env": "{\"RUST_LOG\": \"warn\"}"
//!     }
//!   }
//! }
//! ```

use crate::error::ToolClientError;
use crate::store::FallbackSnapshot;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, HashMap};
use std::path::PathBuf;
use std::time::Duration;

/// Root configuration file
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ToolRelayConfig {
    /// Client tuning knobs
    #[serde(default)]
    pub settings: ClientSettings,

    /// Tool server descriptors keyed by server name
    #[serde(default)]
    pub servers: BTreeMap<String, ServerDescriptor>,

    /// Last successful discovery per server, used when everything else fails
    #[serde(default)]
    pub snapshots: BTreeMap<String, FallbackSnapshot>,
}

/// Transport used to reach a tool server
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TransportKind {
    /// Plain JSON-RPC request/response over HTTP POST
    Http,
    /// Streamable HTTP: session header, JSON or event-stream responses
    #[serde(alias = "streamable-http", alias = "streamable_http")]
    StreamingHttp,
    /// Spawned child process speaking the protocol over stdin/stdout
    #[serde(alias = "stdio")]
    Pipe,
}

impl std::fmt::Display for TransportKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Http => "http",
            Self::StreamingHttp => "streaming-http",
            Self::Pipe => "pipe",
        };
        f.write_str(name)
    }
}

/// A tool server record as persisted by the configuration store
///
/// The client treats descriptors as read-only input.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerDescriptor {
    /// Unique server name (filled from the map key when loaded from a file)
    #[serde(default)]
    pub name: String,

    /// Transport kind
    pub transport: TransportKind,

    /// Transport-specific connection parameters
    #[serde(flatten)]
    pub connection: ConnectionParams,

    /// Inactive servers are ignored by discovery and invocation
    #[serde(default = "default_active")]
    pub is_active: bool,
}

/// Raw connection parameters; which fields matter depends on the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConnectionParams {
    /// Server URL (network transports)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,

    /// Extra HTTP headers (network transports)
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub headers: HashMap<String, String>,

    /// Command to spawn (pipe transport)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<String>,

    /// Whitespace-delimited argument string (pipe transport)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<String>,

    /// Environment variables as a JSON object or a JSON-encoded string (pipe transport)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub env: Option<Value>,

    /// Working directory (pipe transport)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cwd: Option<PathBuf>,

    /// Opaque credential stored with the descriptor
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,
}

impl Default for ConnectionParams {
    fn default() -> Self {
        Self {
            url: None,
            headers: HashMap::new(),
            command: None,
            args: None,
            env: None,
            cwd: None,
            credential: None,
            timeout_secs: default_timeout(),
        }
    }
}

impl ServerDescriptor {
    /// Descriptor for a network server
    pub fn http(name: impl Into<String>, kind: TransportKind, url: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            transport: kind,
            connection: ConnectionParams {
                url: Some(url.into()),
                ..ConnectionParams::default()
            },
            is_active: true,
        }
    }

    /// Descriptor for a pipe server
    pub fn pipe(name: impl Into<String>, command: impl Into<String>, args: &str) -> Self {
        Self {
            name: name.into(),
            transport: TransportKind::Pipe,
            connection: ConnectionParams {
                command: Some(command.into()),
                args: (!args.is_empty()).then(|| args.to_string()),
                ..ConnectionParams::default()
            },
            is_active: true,
        }
    }
}

/// Client tuning knobs; every field has a default
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ClientSettings {
    /// Host identity of this process, used for same-host detection and
    /// injected as host identification header
    pub host_identity: Option<String>,

    /// Prefix for every cache key
    pub cache_prefix: String,

    /// Process-local cache lifespan
    pub local_ttl_secs: u64,

    /// Shared cache lifespan
    pub shared_ttl_secs: u64,

    /// Tool index lifespan
    pub index_ttl_secs: u64,

    /// How long a looked-up server descriptor is reused
    pub descriptor_memo_secs: u64,

    /// Hard wall-clock limit for a call submitted to the bridge
    pub bridge_timeout_secs: u64,

    /// Ask the store to save a fallback snapshot after a live discovery
    pub persist_snapshots: bool,

    pub circuit_breaker: CircuitBreakerSettings,

    pub retry: RetrySettings,
}

impl Default for ClientSettings {
    fn default() -> Self {
        Self {
            host_identity: None,
            cache_prefix: "toolrelay".to_string(),
            local_ttl_secs: 300,
            shared_ttl_secs: 600,
            index_ttl_secs: 300,
            descriptor_memo_secs: 5,
            bridge_timeout_secs: 120,
            persist_snapshots: false,
            circuit_breaker: CircuitBreakerSettings::default(),
            retry: RetrySettings::default(),
        }
    }
}

impl ClientSettings {
    pub fn bridge_timeout(&self) -> Duration {
        Duration::from_secs(self.bridge_timeout_secs)
    }
}

/// Circuit breaker thresholds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct CircuitBreakerSettings {
    /// Consecutive failures that open the circuit (0 disables the breaker)
    pub failure_threshold: u32,

    /// Seconds an open circuit waits before allowing a trial call
    pub recovery_timeout_secs: u64,
}

impl Default for CircuitBreakerSettings {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            recovery_timeout_secs: 60,
        }
    }
}

/// Retry executor knobs
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RetrySettings {
    /// Retries beyond the first attempt
    pub max_retries: u32,

    /// Backoff before the first retry, doubled for each further retry
    pub base_delay_ms: u64,

    /// Backoff ceiling
    pub max_delay_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_retries: 3,
            base_delay_ms: 200,
            max_delay_ms: 5_000,
        }
    }
}

// Default functions for serde
fn default_timeout() -> u64 {
    30
}

fn default_active() -> bool {
    true
}

impl ToolRelayConfig {
    /// Load configuration from a file
    ///
    /// Server names are taken from the map keys and `${VAR}` references are
    /// resolved from the environment.
    ///
    /// # Example
    ///
    /// ```no_run
    /// # use toolrelay_client::config::ToolRelayConfig;
    /// let config = ToolRelayConfig::from_file("toolrelay.json")?;
    /// # Ok::<(), toolrelay_client::ToolClientError>(())
    /// ```
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ToolClientError> {
        let content = std::fs::read_to_string(path.as_ref()).map_err(|e| {
            ToolClientError::Config(format!("Failed to read config file: {e}"))
        })?;

        Self::from_json(&content)
    }

    /// Parse configuration from a JSON string
    pub fn from_json(content: &str) -> Result<Self, ToolClientError> {
        let mut config: ToolRelayConfig = serde_json::from_str(content).map_err(|e| {
            ToolClientError::Config(format!("Failed to parse config file: {e}"))
        })?;

        for (name, server) in &mut config.servers {
            if server.name.is_empty() {
                server.name.clone_from(name);
            } else if &server.name != name {
                return Err(ToolClientError::Config(format!(
                    "Server key '{name}' does not match descriptor name '{}'",
                    server.name
                )));
            }
        }

        config.resolve_env_vars()?;

        Ok(config)
    }

    /// Resolve environment variables in server descriptors
    ///
    /// Supports `${VAR}` and `$VAR` syntax for environment variable expansion.
    pub fn resolve_env_vars(&mut self) -> Result<(), ToolClientError> {
        for server in self.servers.values_mut() {
            let params = &mut server.connection;

            for field in [
                &mut params.url,
                &mut params.command,
                &mut params.args,
                &mut params.credential,
            ]
            .into_iter()
            .flatten()
            {
                *field = resolve_env_string(field)?;
            }

            for value in params.headers.values_mut() {
                *value = resolve_env_string(value)?;
            }

            match params.env.as_mut() {
                Some(Value::String(blob)) => *blob = resolve_env_string(blob)?,
                Some(Value::Object(map)) => {
                    for value in map.values_mut() {
                        if let Value::String(s) = value {
                            *s = resolve_env_string(s)?;
                        }
                    }
                }
                _ => {}
            }

            if let Some(path) = params.cwd.as_mut() {
                let resolved = resolve_env_string(&path.to_string_lossy())?;
                *path = PathBuf::from(resolved);
            }
        }

        Ok(())
    }

    /// Save configuration to a file
    pub fn save_to_file(&self, path: impl AsRef<std::path::Path>) -> Result<(), ToolClientError> {
        let json = serde_json::to_string_pretty(self)
            .map_err(|e| ToolClientError::Config(format!("Failed to serialize config: {e}")))?;

        std::fs::write(path.as_ref(), json)
            .map_err(|e| ToolClientError::Config(format!("Failed to write config file: {e}")))?;

        Ok(())
    }
}

/// Resolve environment variable references in strings
///
/// Supports `${VAR}` and `$VAR` syntax.
///
/// # Example
///
/// ```
/// # use toolrelay_client::config::resolve_env_string;
/// let home = std::env::var("HOME").unwrap_or_default();
/// # if !home.is_empty() {
/// assert_eq!(resolve_env_string("${HOME}/tools")?, format!("{home}/tools"));
/// # }
/// # Ok::<(), toolrelay_client::ToolClientError>(())
/// ```
pub fn resolve_env_string(s: &str) -> Result<String, ToolClientError> {
    let mut result = s.to_string();

    // Pattern for ${VAR} syntax
    let re_braces = regex::Regex::new(r"\$\{([A-Za-z_][A-Za-z0-9_]*)\}")
        .map_err(|e| ToolClientError::Config(e.to_string()))?;

    for cap in re_braces.captures_iter(s) {
        let var_name = &cap[1];
        let value = std::env::var(var_name)
            .map_err(|_| ToolClientError::EnvVarNotFound(var_name.to_string()))?;
        result = result.replace(&cap[0], &value);
    }

    // Pattern for $VAR syntax (without braces)
    let re_simple = regex::Regex::new(r"\$([A-Za-z_][A-Za-z0-9_]*)")
        .map_err(|e| ToolClientError::Config(e.to_string()))?;

    for cap in re_simple.captures_iter(&result.clone()) {
        let var_name = &cap[1];
        let value = std::env::var(var_name)
            .map_err(|_| ToolClientError::EnvVarNotFound(var_name.to_string()))?;
        result = result.replace(&cap[0], &value);
    }

    Ok(result)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_parsing_http() {
        let json = r#"{
            "servers": {
                "documents": {
                    "transport": "http",
                    "url": "http://localhost:8000/tools",
                    "headers": {"X-Site": "erp"}
                }
            }
        }"#;

        let config = ToolRelayConfig::from_json(json).unwrap();
        let server = config.servers.get("documents").unwrap();

        assert_eq!(server.name, "documents");
        assert_eq!(server.transport, TransportKind::Http);
        assert_eq!(
            server.connection.url.as_deref(),
            Some("http://localhost:8000/tools")
        );
        assert_eq!(server.connection.headers.get("X-Site").unwrap(), "erp");
        assert_eq!(server.connection.timeout_secs, 30); // default
        assert!(server.is_active); // default
        assert_eq!(config.settings.bridge_timeout_secs, 120);
    }

    #[test]
    fn test_config_parsing_pipe_and_aliases() {
        let json = r#"{
            "servers": {
                "fs": {
                    "transport": "stdio",
                    "command": "fs-tools",
                    "args": "--root /tmp",
                    "env": {"LEVEL": "debug"},
                    "isActive": false
                },
                "stream": {
                    "transport": "streamable-http",
                    "url": "http://tools.example.com/mcp"
                }
            }
        }"#;

        let config = ToolRelayConfig::from_json(json).unwrap();

        let fs = config.servers.get("fs").unwrap();
        assert_eq!(fs.transport, TransportKind::Pipe);
        assert_eq!(fs.connection.args.as_deref(), Some("--root /tmp"));
        assert!(!fs.is_active);

        let stream = config.servers.get("stream").unwrap();
        assert_eq!(stream.transport, TransportKind::StreamingHttp);
    }

    #[test]
    fn test_settings_overrides() {
        let json = r#"{
            "settings": {
                "hostIdentity": "erp.internal",
                "circuitBreaker": {"failureThreshold": 2},
                "retry": {"maxRetries": 1}
            }
        }"#;

        let config = ToolRelayConfig::from_json(json).unwrap();
        assert_eq!(config.settings.host_identity.as_deref(), Some("erp.internal"));
        assert_eq!(config.settings.circuit_breaker.failure_threshold, 2);
        assert_eq!(config.settings.circuit_breaker.recovery_timeout_secs, 60);
        assert_eq!(config.settings.retry.max_retries, 1);
        assert_eq!(config.settings.retry.base_delay_ms, 200);
    }

    #[test]
    fn test_legacy_sse_transport_rejected() {
        let json = r#"{
            "servers": {
                "old": {"transport": "sse", "url": "http://tools.example.com/sse"}
            }
        }"#;

        let result = ToolRelayConfig::from_json(json);
        assert!(matches!(result, Err(ToolClientError::Config(_))));
    }

    #[test]
    fn test_mismatched_server_name_rejected() {
        let json = r#"{
            "servers": {
                "a": {"name": "b", "transport": "http", "url": "http://x"}
            }
        }"#;

        let result = ToolRelayConfig::from_json(json);
        assert!(matches!(result, Err(ToolClientError::Config(_))));
    }

    #[test]
    fn test_env_var_resolution() {
        unsafe {
            std::env::set_var("TOOLRELAY_TEST_VAR", "test_value");
            std::env::set_var("TOOLRELAY_OTHER_VAR", "other_value");
        }

        let result = resolve_env_string("${TOOLRELAY_TEST_VAR}").unwrap();
        assert_eq!(result, "test_value");

        let result = resolve_env_string("prefix_${TOOLRELAY_TEST_VAR}_suffix").unwrap();
        assert_eq!(result, "prefix_test_value_suffix");

        let result = resolve_env_string("$TOOLRELAY_TEST_VAR").unwrap();
        assert_eq!(result, "test_value");

        let result =
            resolve_env_string("${TOOLRELAY_TEST_VAR}_${TOOLRELAY_OTHER_VAR}").unwrap();
        assert_eq!(result, "test_value_other_value");
    }

    #[test]
    fn test_env_var_in_credential() {
        unsafe {
            std::env::set_var("TOOLRELAY_TEST_KEY", "abc:def");
        }

        let json = r#"{
            "servers": {
                "documents": {
                    "transport": "http",
                    "url": "http://localhost/tools",
                    "credential": "${TOOLRELAY_TEST_KEY}"
                }
            }
        }"#;

        let config = ToolRelayConfig::from_json(json).unwrap();
        let server = config.servers.get("documents").unwrap();
        assert_eq!(server.connection.credential.as_deref(), Some("abc:def"));
    }

    #[test]
    fn test_missing_env_var() {
        let result = resolve_env_string("${TOOLRELAY_SURELY_UNSET_VARIABLE}");
        assert!(matches!(result, Err(ToolClientError::EnvVarNotFound(_))));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("toolrelay.json");

        let mut config = ToolRelayConfig::default();
        config.servers.insert(
            "fs".to_string(),
            ServerDescriptor::pipe("fs", "fs-tools", "--root /srv"),
        );
        config.save_to_file(&path).unwrap();

        let loaded = ToolRelayConfig::from_file(&path).unwrap();
        assert_eq!(loaded.servers.get("fs"), config.servers.get("fs"));
    }
}

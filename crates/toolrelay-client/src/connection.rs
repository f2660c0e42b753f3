//! Connection spec building
//!
//! Turns a persisted [`ServerDescriptor`] into the transport-specific
//! [`ConnectionSpec`] the transports consume.

use crate::config::{ServerDescriptor, TransportKind};
use crate::error::ToolClientError;
use crate::Result;
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

/// Header carrying the caller's host identity
pub const HOST_IDENTITY_HEADER: &str = "X-Toolrelay-Host";

/// Environment variable the credential is exported as for pipe servers
pub const PIPE_CREDENTIAL_ENV: &str = "TOOLRELAY_API_KEY";

/// Everything needed to open a connection to a tool server
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionSpec {
    Http(NetworkSpec),
    StreamingHttp(NetworkSpec),
    Pipe(PipeSpec),
}

/// URL, headers and timeout for the network transports
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NetworkSpec {
    pub url: String,
    pub headers: BTreeMap<String, String>,
    pub timeout: Duration,
}

/// Command line, environment and timeout for the pipe transport
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PipeSpec {
    pub command: String,
    pub args: Vec<String>,
    pub env: BTreeMap<String, String>,
    pub cwd: Option<PathBuf>,
    pub timeout: Duration,
}

impl ConnectionSpec {
    pub fn kind(&self) -> TransportKind {
        match self {
            Self::Http(_) => TransportKind::Http,
            Self::StreamingHttp(_) => TransportKind::StreamingHttp,
            Self::Pipe(_) => TransportKind::Pipe,
        }
    }

    /// URL for network transports
    pub fn url(&self) -> Option<&str> {
        match self {
            Self::Http(spec) | Self::StreamingHttp(spec) => Some(&spec.url),
            Self::Pipe(_) => None,
        }
    }

    pub fn timeout(&self) -> Duration {
        match self {
            Self::Http(spec) | Self::StreamingHttp(spec) => spec.timeout,
            Self::Pipe(spec) => spec.timeout,
        }
    }
}

/// Builds connection specs, injecting host identification and credentials
#[derive(Debug, Clone, Default)]
pub struct ConnectionBuilder {
    host_identity: Option<String>,
}

impl ConnectionBuilder {
    pub fn new(host_identity: Option<String>) -> Self {
        Self { host_identity }
    }

    /// Build the connection spec for `server`
    ///
    /// `credential_override` takes precedence over the descriptor's own
    /// credential. Fails with [`ToolClientError::Config`] when the transport's
    /// mandatory field is missing.
    pub fn build(
        &self,
        server: &ServerDescriptor,
        credential_override: Option<&str>,
    ) -> Result<ConnectionSpec> {
        let credential = credential_override
            .or(server.connection.credential.as_deref())
            .filter(|c| !c.trim().is_empty());
        let timeout = Duration::from_secs(server.connection.timeout_secs);

        match server.transport {
            TransportKind::Http => Ok(ConnectionSpec::Http(
                self.network_spec(server, credential, timeout)?,
            )),
            TransportKind::StreamingHttp => Ok(ConnectionSpec::StreamingHttp(
                self.network_spec(server, credential, timeout)?,
            )),
            TransportKind::Pipe => Ok(ConnectionSpec::Pipe(Self::pipe_spec(
                server, credential, timeout,
            )?)),
        }
    }

    fn network_spec(
        &self,
        server: &ServerDescriptor,
        credential: Option<&str>,
        timeout: Duration,
    ) -> Result<NetworkSpec> {
        let url = server
            .connection
            .url
            .as_deref()
            .map(str::trim)
            .filter(|u| !u.is_empty())
            .ok_or_else(|| {
                ToolClientError::Config(format!(
                    "Server '{}' uses {} transport but has no URL",
                    server.name, server.transport
                ))
            })?;

        let mut headers: BTreeMap<String, String> = server
            .connection
            .headers
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();

        if let Some(identity) = &self.host_identity {
            headers.insert("X-Forwarded-Host".to_string(), identity.clone());
            headers.insert(HOST_IDENTITY_HEADER.to_string(), identity.clone());
        }

        if let Some(credential) = credential {
            headers.insert("Authorization".to_string(), authorization_value(credential));
        }

        Ok(NetworkSpec {
            url: url.to_string(),
            headers,
            timeout,
        })
    }

    fn pipe_spec(
        server: &ServerDescriptor,
        credential: Option<&str>,
        timeout: Duration,
    ) -> Result<PipeSpec> {
        let command = server
            .connection
            .command
            .as_deref()
            .map(str::trim)
            .filter(|c| !c.is_empty())
            .ok_or_else(|| {
                ToolClientError::Config(format!(
                    "Server '{}' uses pipe transport but has no command",
                    server.name
                ))
            })?;

        let args = server
            .connection
            .args
            .as_deref()
            .map(|a| a.split_whitespace().map(str::to_string).collect())
            .unwrap_or_default();

        let mut env = parse_env(&server.name, server.connection.env.as_ref())?;
        if let Some(credential) = credential {
            env.insert(PIPE_CREDENTIAL_ENV.to_string(), credential.to_string());
        }

        Ok(PipeSpec {
            command: command.to_string(),
            args,
            env,
            cwd: server.connection.cwd.clone(),
            timeout,
        })
    }
}

/// `token <key:secret>` for split credentials, `Bearer <token>` otherwise
pub fn authorization_value(credential: &str) -> String {
    if credential.contains(':') {
        format!("token {credential}")
    } else {
        format!("Bearer {credential}")
    }
}

fn parse_env(server: &str, env: Option<&Value>) -> Result<BTreeMap<String, String>> {
    let object = match env {
        None | Some(Value::Null) => return Ok(BTreeMap::new()),
        Some(Value::String(blob)) if blob.trim().is_empty() => return Ok(BTreeMap::new()),
        Some(Value::String(blob)) => serde_json::from_str::<Value>(blob).map_err(|e| {
            ToolClientError::Config(format!("Server '{server}' has malformed env JSON: {e}"))
        })?,
        Some(other) => other.clone(),
    };

    let Value::Object(map) = object else {
        return Err(ToolClientError::Config(format!(
            "Server '{server}' env must be a JSON object"
        )));
    };

    Ok(map
        .into_iter()
        .map(|(key, value)| {
            let value = match value {
                Value::String(s) => s,
                other => other.to_string(),
            };
            (key, value)
        })
        .collect())
}

//! High-level tool client
//!
//! [`ToolClient`] is the only surface the agent runtime talks to. It owns the
//! cache tiers, the circuit breaker, the retry policy and the transport pool,
//! and pushes every network call through the process-wide [`AsyncBridge`].

use crate::Result;
use crate::bridge::AsyncBridge;
use crate::cache::{CacheManager, SharedCache};
use crate::circuit::{CircuitBreaker, CircuitState};
use crate::config::{ClientSettings, ServerDescriptor};
use crate::connection::{ConnectionBuilder, ConnectionSpec};
use crate::error::ToolClientError;
use crate::local::{LocalToolHost, is_same_host_spec};
use crate::retry::RetryPolicy;
use crate::schema::validate_arguments;
use crate::store::{FileServerStore, ServerStore};
use crate::transport::{
    DefaultTransportFactory, ToolCallResult, ToolDescriptor, TransportFactory, TransportPool,
};
use cached::{Cached, TimedCache};
use serde_json::Value;
use std::path::Path;
use std::sync::{Arc, Mutex, OnceLock};
use std::time::Duration;
use tracing::{debug, info};

static GLOBAL: OnceLock<ToolClient> = OnceLock::new();

/// Client for discovering and invoking remote tools
pub struct ToolClient {
    pub(crate) settings: ClientSettings,
    pub(crate) store: Arc<dyn ServerStore>,
    pub(crate) cache: CacheManager,
    pub(crate) breaker: CircuitBreaker,
    pub(crate) retry: RetryPolicy,
    pub(crate) pool: TransportPool,
    pub(crate) connections: ConnectionBuilder,
    pub(crate) local_host: Option<Arc<dyn LocalToolHost>>,
    descriptors: Mutex<TimedCache<String, ServerDescriptor>>,
}

/// Builder for [`ToolClient`]
pub struct ToolClientBuilder {
    store: Arc<dyn ServerStore>,
    settings: ClientSettings,
    shared_cache: Option<Arc<dyn SharedCache>>,
    factory: Arc<dyn TransportFactory>,
    local_host: Option<Arc<dyn LocalToolHost>>,
}

impl ToolClientBuilder {
    pub fn settings(mut self, settings: ClientSettings) -> Self {
        self.settings = settings;
        self
    }

    /// Shared cache tier; without one only the process-local tier is used
    pub fn shared_cache(mut self, cache: Arc<dyn SharedCache>) -> Self {
        self.shared_cache = Some(cache);
        self
    }

    pub fn transport_factory(mut self, factory: Arc<dyn TransportFactory>) -> Self {
        self.factory = factory;
        self
    }

    /// Register the in-process tool host used for same-host servers
    pub fn local_host(mut self, host: Arc<dyn LocalToolHost>) -> Self {
        self.local_host = Some(host);
        self
    }

    pub fn build(self) -> ToolClient {
        let settings = self.settings;

        let cache = CacheManager::new(
            settings.cache_prefix.clone(),
            Duration::from_secs(settings.local_ttl_secs),
            self.shared_cache,
            Duration::from_secs(settings.shared_ttl_secs),
        );

        ToolClient {
            store: self.store,
            cache,
            breaker: CircuitBreaker::from(&settings.circuit_breaker),
            retry: RetryPolicy::from(&settings.retry),
            pool: TransportPool::new(self.factory),
            connections: ConnectionBuilder::new(settings.host_identity.clone()),
            local_host: self.local_host,
            descriptors: Mutex::new(TimedCache::with_lifespan(Duration::from_secs(
                settings.descriptor_memo_secs,
            ))),
            settings,
        }
    }
}

impl ToolClient {
    pub fn builder(store: Arc<dyn ServerStore>) -> ToolClientBuilder {
        ToolClientBuilder {
            store,
            settings: ClientSettings::default(),
            shared_cache: None,
            factory: Arc::new(DefaultTransportFactory),
            local_host: None,
        }
    }

    /// Client over a `toolrelay.json` file, using the settings it carries
    pub fn from_config_file(path: impl AsRef<Path>) -> Result<Self> {
        let store = FileServerStore::open(path)?;
        let settings = store.config().settings;

        Ok(Self::builder(Arc::new(store)).settings(settings).build())
    }

    /// Install `client` as the process-wide instance
    ///
    /// Fails if an instance is already installed.
    pub fn init_global(client: ToolClient) -> Result<&'static ToolClient> {
        let mut installed = false;
        let global = GLOBAL.get_or_init(|| {
            installed = true;
            client
        });

        if installed {
            Ok(global)
        } else {
            Err(ToolClientError::Config(
                "Global tool client already initialized".to_string(),
            ))
        }
    }

    /// The process-wide instance, if one was installed
    pub fn global() -> Option<&'static ToolClient> {
        GLOBAL.get()
    }

    pub fn settings(&self) -> &ClientSettings {
        &self.settings
    }

    /// Breaker state of `server`
    pub fn circuit_state(&self, server: &str) -> CircuitState {
        self.breaker.snapshot(server)
    }

    /// Active descriptor of `server`, memoized briefly
    pub(crate) fn descriptor(&self, server: &str) -> Result<ServerDescriptor> {
        let key = server.to_string();

        let memo = self
            .descriptors
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .cache_get(&key)
            .cloned();

        let descriptor = match memo {
            Some(descriptor) => descriptor,
            None => {
                let descriptor = self
                    .store
                    .descriptor(server)?
                    .ok_or_else(|| ToolClientError::ServerNotFound(server.to_string()))?;
                let _ = self
                    .descriptors
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .cache_set(key, descriptor.clone());
                descriptor
            }
        };

        if !descriptor.is_active {
            return Err(ToolClientError::ServerNotFound(server.to_string()));
        }
        Ok(descriptor)
    }

    /// All active descriptors, in name order
    pub(crate) fn active_descriptors(&self) -> Result<Vec<ServerDescriptor>> {
        let mut servers: Vec<ServerDescriptor> = self
            .store
            .descriptors()?
            .into_iter()
            .filter(|s| s.is_active)
            .collect();
        servers.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(servers)
    }

    /// The registered local host, if `spec` points at this process
    pub(crate) fn local_host_for(&self, spec: &ConnectionSpec) -> Option<&Arc<dyn LocalToolHost>> {
        let host = self.local_host.as_ref()?;
        is_same_host_spec(spec, self.settings.host_identity.as_deref()).then_some(host)
    }

    /// Schema of `tool` if it is known without going to the network
    fn known_schema(&self, server: &str, tool: &str) -> Option<Value> {
        let tools = match self.cache.get::<Vec<ToolDescriptor>>(&self.cache.tools_key(server)) {
            Some((tools, _)) => tools,
            None => self
                .store
                .fallback_snapshot(server)
                .ok()
                .flatten()
                .and_then(|snapshot| snapshot.tools().ok())?,
        };

        tools
            .into_iter()
            .find(|t| t.name == tool)
            .map(|t| t.input_schema)
    }

    /// Run one transport operation on the bridge under the breaker
    ///
    /// The breaker sees exactly one outcome per call, after retries.
    pub(crate) fn guarded<T, F, Fut>(&self, server: &str, spec: &ConnectionSpec, op: F) -> Result<T>
    where
        T: Send + 'static,
        F: Fn(crate::transport::ArcTransport) -> Fut + Send + Sync + 'static,
        Fut: std::future::Future<Output = Result<T>> + Send + 'static,
    {
        self.breaker.try_acquire(server)?;

        let transport = match self.pool.get(server, spec) {
            Ok(transport) => transport,
            Err(e) => {
                self.breaker.release(server);
                return Err(e);
            }
        };

        let retry = self.retry.clone();
        let name = server.to_string();
        let result = AsyncBridge::global().run_with_timeout(
            async move {
                retry
                    .execute(&name, || op(Arc::clone(&transport)))
                    .await
            },
            self.settings.bridge_timeout(),
        );

        match &result {
            Ok(_) => self.breaker.record_success(server),
            Err(e) if is_server_failure(e) => {
                self.breaker.record_failure(server);
                if !matches!(e, ToolClientError::Protocol(_)) {
                    // Stale session or dead child; reconnect on the next call
                    self.pool.evict(server);
                }
            }
            Err(_) => self.breaker.release(server),
        }

        result
    }

    /// Invoke `tool` on `server`
    ///
    /// Circuit-open, validation and configuration errors are returned as
    /// they are; everything else is wrapped in
    /// [`ToolClientError::ToolInvocation`].
    pub fn call_tool(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        credential: Option<&str>,
    ) -> Result<ToolCallResult> {
        debug!("Calling tool '{}' on server '{}'", tool, server);

        self.call_tool_inner(server, tool, arguments, credential)
            .map_err(|e| match e {
                ToolClientError::CircuitOpen { .. }
                | ToolClientError::Validation { .. }
                | ToolClientError::Config(_) => e,
                other => ToolClientError::ToolInvocation {
                    server: server.to_string(),
                    tool: tool.to_string(),
                    source: Box::new(other),
                },
            })
    }

    fn call_tool_inner(
        &self,
        server: &str,
        tool: &str,
        arguments: Value,
        credential: Option<&str>,
    ) -> Result<ToolCallResult> {
        let descriptor = self.descriptor(server)?;
        let spec = self.connections.build(&descriptor, credential)?;

        if let Some(schema) = self.known_schema(server, tool) {
            validate_arguments(tool, &schema, &arguments)?;
        }

        if let Some(host) = self.local_host_for(&spec) {
            debug!("Server '{}' is same-host, calling in process", server);
            return host.call_tool(tool, &arguments);
        }

        let tool_name = tool.to_string();
        let result = self.guarded(server, &spec, move |transport| {
            let tool_name = tool_name.clone();
            let arguments = arguments.clone();
            async move { transport.call_tool(&tool_name, arguments).await }
        })?;

        if result.is_error {
            debug!("Tool '{}' on '{}' reported an error result", tool, server);
        }
        Ok(result)
    }

    /// Resolve the server owning `tool` and invoke it there
    pub fn invoke(
        &self,
        tool: &str,
        arguments: Value,
        credential: Option<&str>,
    ) -> Result<ToolCallResult> {
        let server = self.find_tool_server(tool)?;
        self.call_tool(&server, tool, arguments, credential)
    }

    /// Invalidate cached tool lists, the index and the catalog
    ///
    /// With `server` only that server's tool list is dropped. Circuit state
    /// is left alone.
    pub fn clear_cache(&self, server: Option<&str>) -> Result<()> {
        match server {
            Some(server) => {
                self.cache.invalidate(&self.cache.tools_key(server));
                let _ = self
                    .descriptors
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .cache_remove(&server.to_string());
                info!("Cleared cache for server '{}'", server);
            }
            None => {
                for descriptor in self.store.descriptors()? {
                    self.cache.invalidate(&self.cache.tools_key(&descriptor.name));
                }
                self.cache.clear_local();
                self.descriptors
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .cache_clear();
                info!("Cleared all tool caches");
            }
        }

        self.cache.invalidate(&self.cache.index_key());
        self.cache.invalidate(&self.cache.catalog_key());
        Ok(())
    }
}

/// Errors that say something about the server's health
fn is_server_failure(error: &ToolClientError) -> bool {
    matches!(
        error,
        ToolClientError::Transport { .. }
            | ToolClientError::Timeout(_)
            | ToolClientError::Protocol(_)
    )
}

//! Tiered cache for tool schemas, the tool index and the merged catalog
//!
//! Reads go process-local first, then to the shared key-value service; a hit
//! in the shared tier is copied back into the local tier. Writes go to both.
//! The persisted fallback tier lives in the [`crate::store::ServerStore`].

use crate::Result;
use cached::{Cached, TimedCache};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Value as returned by a shared cache service
///
/// Older writers stored raw bytes, newer ones strings; both decode the same.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SharedValue {
    Bytes(Vec<u8>),
    Text(String),
}

impl SharedValue {
    fn as_bytes(&self) -> &[u8] {
        match self {
            Self::Bytes(bytes) => bytes,
            Self::Text(text) => text.as_bytes(),
        }
    }
}

/// Cross-process key-value cache service
pub trait SharedCache: Send + Sync {
    fn get(&self, key: &str) -> Result<Option<SharedValue>>;

    fn set(&self, key: &str, value: SharedValue, ttl: Duration) -> Result<()>;

    fn delete(&self, key: &str) -> Result<()>;
}

/// Entry with an absolute expiry
#[derive(Debug, Clone)]
pub struct CacheEntry<T> {
    pub value: T,
    pub expires_at: Instant,
}

impl<T> CacheEntry<T> {
    pub fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    pub fn is_expired(&self) -> bool {
        Instant::now() >= self.expires_at
    }
}

/// In-process [`SharedCache`] for single-process deployments and tests
#[derive(Debug, Default)]
pub struct MemorySharedCache {
    entries: Mutex<HashMap<String, CacheEntry<SharedValue>>>,
}

impl MemorySharedCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of live entries
    pub fn len(&self) -> usize {
        let entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.values().filter(|e| !e.is_expired()).count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SharedCache for MemorySharedCache {
    fn get(&self, key: &str) -> Result<Option<SharedValue>> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        match entries.get(key) {
            Some(entry) if entry.is_expired() => {
                entries.remove(key);
                Ok(None)
            }
            Some(entry) => Ok(Some(entry.value.clone())),
            None => Ok(None),
        }
    }

    fn set(&self, key: &str, value: SharedValue, ttl: Duration) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.insert(key.to_string(), CacheEntry::new(value, ttl));
        Ok(())
    }

    fn delete(&self, key: &str) -> Result<()> {
        let mut entries = self.entries.lock().unwrap_or_else(|e| e.into_inner());
        entries.remove(key);
        Ok(())
    }
}

/// Which tier answered a read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheTier {
    Local,
    Shared,
}

/// Owns the process-local and shared cache tiers
pub struct CacheManager {
    prefix: String,
    local: Mutex<TimedCache<String, Value>>,
    shared: Option<Arc<dyn SharedCache>>,
    shared_ttl: Duration,
}

impl CacheManager {
    /// Create a cache manager
    ///
    /// # Arguments
    ///
    /// * `prefix` - Namespace for every key
    /// * `local_ttl` - Lifespan of process-local entries
    /// * `shared` - Shared service, if the deployment has one
    /// * `shared_ttl` - Lifespan of shared entries
    pub fn new(
        prefix: impl Into<String>,
        local_ttl: Duration,
        shared: Option<Arc<dyn SharedCache>>,
        shared_ttl: Duration,
    ) -> Self {
        Self {
            prefix: prefix.into(),
            local: Mutex::new(TimedCache::with_lifespan(local_ttl)),
            shared,
            shared_ttl,
        }
    }

    fn local(&self) -> std::sync::MutexGuard<'_, TimedCache<String, Value>> {
        self.local.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Key holding the tool list of `server`
    pub fn tools_key(&self, server: &str) -> String {
        format!("{}:tools:{server}", self.prefix)
    }

    /// Key holding the tool index
    pub fn index_key(&self) -> String {
        format!("{}:index", self.prefix)
    }

    /// Key holding the merged catalog
    pub fn catalog_key(&self) -> String {
        format!("{}:catalog", self.prefix)
    }

    /// Read `key` through the tiers, backfilling the local tier on a shared hit
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<(T, CacheTier)> {
        if let Some(value) = self.get_local(key) {
            debug!("Local cache hit for key: {}", key);
            return Some((value, CacheTier::Local));
        }

        let raw = self.get_shared_raw(key)?;
        let value = serde_json::from_slice::<Value>(raw.as_bytes())
            .map_err(|e| warn!("Discarding undecodable shared cache entry {}: {}", key, e))
            .ok()?;
        let typed = serde_json::from_value::<T>(value.clone())
            .map_err(|e| warn!("Discarding mistyped shared cache entry {}: {}", key, e))
            .ok()?;

        debug!("Shared cache hit for key: {}", key);
        let _ = self.local().cache_set(key.to_string(), value);
        Some((typed, CacheTier::Shared))
    }

    /// Read `key` from the process-local tier only
    pub fn get_local<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        let value = self.local().cache_get(&key.to_string()).cloned()?;
        serde_json::from_value(value).ok()
    }

    fn get_shared_raw(&self, key: &str) -> Option<SharedValue> {
        let shared = self.shared.as_ref()?;
        match shared.get(key) {
            Ok(value) => value,
            Err(e) => {
                warn!("Shared cache read failed for {}: {}", key, e);
                None
            }
        }
    }

    /// Write `value` to the local and shared tiers
    ///
    /// Shared-tier failures are logged and otherwise ignored.
    pub fn put<T: Serialize>(&self, key: &str, value: &T) -> Result<()> {
        let value = serde_json::to_value(value)?;

        if let Some(shared) = &self.shared {
            let encoded = SharedValue::Text(value.to_string());
            if let Err(e) = shared.set(key, encoded, self.shared_ttl) {
                warn!("Shared cache write failed for {}: {}", key, e);
            }
        }

        let _ = self.local().cache_set(key.to_string(), value);
        Ok(())
    }

    /// Remove `key` from both tiers
    pub fn invalidate(&self, key: &str) {
        let _ = self.local().cache_remove(&key.to_string());

        if let Some(shared) = &self.shared {
            if let Err(e) = shared.delete(key) {
                warn!("Shared cache delete failed for {}: {}", key, e);
            }
        }
    }

    /// Drop every process-local entry
    pub fn clear_local(&self) {
        self.local().cache_clear();
    }
}

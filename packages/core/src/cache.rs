//! Caches for resolved tracks and analyses
//!
//! Entries are keyed by track id and never expire; track metadata and
//! audio analyses do not change once published.

use std::collections::HashMap;
use std::marker::PhantomData;
use std::time::Duration;

use async_trait::async_trait;
use beatsync_shared_config::RedisConfig;
use dashmap::DashMap;
use redis::aio::MultiplexedConnection;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use crate::error::CacheError;

/// Keyed store consulted before the external API
#[async_trait]
pub trait Cache<T>: Send + Sync {
    /// Look up every id; missing ids are simply absent from the result
    async fn resolve(&self, ids: &[String]) -> Result<HashMap<String, T>, CacheError>;

    async fn store(&self, values: &HashMap<String, T>) -> Result<(), CacheError>;
}

// =============================================================================
// In-memory
// =============================================================================

/// Process-local cache
#[derive(Debug)]
pub struct MemoryCache<T> {
    entries: DashMap<String, T>,
}

impl<T> MemoryCache<T> {
    pub fn new() -> Self {
        Self {
            entries: DashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl<T> Default for MemoryCache<T> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<T> Cache<T> for MemoryCache<T>
where
    T: Clone + Send + Sync,
{
    async fn resolve(&self, ids: &[String]) -> Result<HashMap<String, T>, CacheError> {
        Ok(ids
            .iter()
            .filter_map(|id| {
                self.entries
                    .get(id)
                    .map(|entry| (id.clone(), entry.value().clone()))
            })
            .collect())
    }

    async fn store(&self, values: &HashMap<String, T>) -> Result<(), CacheError> {
        for (id, value) in values {
            self.entries.insert(id.clone(), value.clone());
        }
        Ok(())
    }
}

// =============================================================================
// Redis
// =============================================================================

/// Redis-backed cache storing JSON values under `{prefix}:{namespace}:{id}`
pub struct RedisCache<T> {
    connection: MultiplexedConnection,
    prefix: String,
    namespace: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T> std::fmt::Debug for RedisCache<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisCache")
            .field("prefix", &self.prefix)
            .field("namespace", &self.namespace)
            .finish()
    }
}

impl<T> RedisCache<T> {
    /// Connect to Redis, giving up after the configured connect timeout
    pub async fn connect(config: &RedisConfig, namespace: &str) -> Result<Self, CacheError> {
        let client = redis::Client::open(config.connection_url())?;
        let connection = tokio::time::timeout(
            Duration::from_secs(config.connect_timeout_secs),
            client.get_multiplexed_async_connection(),
        )
        .await
        .map_err(|_| CacheError::Timeout)??;

        debug!(prefix = %config.key_prefix, namespace, "Connected resolver cache");

        Ok(Self {
            connection,
            prefix: config.key_prefix.clone(),
            namespace: namespace.to_string(),
            _marker: PhantomData,
        })
    }

    fn key(&self, id: &str) -> String {
        cache_key(&self.prefix, &self.namespace, id)
    }
}

fn cache_key(prefix: &str, namespace: &str, id: &str) -> String {
    format!("{}:{}:{}", prefix, namespace, id)
}

#[async_trait]
impl<T> Cache<T> for RedisCache<T>
where
    T: Serialize + DeserializeOwned + Send + Sync,
{
    async fn resolve(&self, ids: &[String]) -> Result<HashMap<String, T>, CacheError> {
        if ids.is_empty() {
            return Ok(HashMap::new());
        }

        let keys: Vec<String> = ids.iter().map(|id| self.key(id)).collect();
        let mut conn = self.connection.clone();
        let values: Vec<Option<String>> = redis::cmd("MGET")
            .arg(&keys)
            .query_async(&mut conn)
            .await?;

        let mut found = HashMap::with_capacity(ids.len());
        for (id, raw) in ids.iter().zip(values) {
            let Some(raw) = raw else { continue };
            match serde_json::from_str(&raw) {
                Ok(value) => {
                    found.insert(id.clone(), value);
                }
                Err(e) => warn!(id = %id, error = %e, "Ignoring undecodable cache entry"),
            }
        }
        Ok(found)
    }

    async fn store(&self, values: &HashMap<String, T>) -> Result<(), CacheError> {
        if values.is_empty() {
            return Ok(());
        }

        let mut pipe = redis::pipe();
        for (id, value) in values {
            pipe.cmd("SET")
                .arg(self.key(id))
                .arg(serde_json::to_string(value)?)
                .ignore();
        }

        let mut conn = self.connection.clone();
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}

// Key-Value Cache Handle
//
// `KeyValueStore` is the seam to whatever shared store backs the engine
// (Redis in production deployments). It only moves strings with an optional
// TTL. `Cache` is the typed handle every component receives: it namespaces
// keys by prefix and (de)serializes values with serde_json.
//
// `MemoryStore` is the in-process implementation, built on moka with a
// per-entry expiry so each `set` can choose its own TTL.

use async_trait::async_trait;
use moka::future::Cache as MokaCache;
use moka::Expiry;
use serde::{de::DeserializeOwned, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::debug;

use crate::error::StoreError;

/// Raw get/set store with TTL
#[async_trait]
pub trait KeyValueStore: Send + Sync {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError>;

    async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError>;
}

/// Typed, prefix-namespaced handle over a [`KeyValueStore`]
#[derive(Clone)]
pub struct Cache {
    store: Arc<dyn KeyValueStore>,
}

impl Cache {
    pub fn new(store: Arc<dyn KeyValueStore>) -> Self {
        Self { store }
    }

    /// Cache over a fresh [`MemoryStore`]
    pub fn in_memory(max_capacity: u64) -> Self {
        Self::new(Arc::new(MemoryStore::new(max_capacity)))
    }

    fn full_key(prefix: &str, key: &str) -> String {
        format!("{}:{}", prefix, key)
    }

    pub async fn get_item<T: DeserializeOwned>(&self, key: &str, prefix: &str) -> Result<Option<T>, StoreError> {
        let full_key = Self::full_key(prefix, key);
        match self.store.get_raw(&full_key).await? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Serialization(format!("{}: {}", full_key, e))),
            None => Ok(None),
        }
    }

    pub async fn set_item<T: Serialize + ?Sized>(
        &self,
        key: &str,
        value: &T,
        prefix: &str,
        ttl: Option<Duration>,
    ) -> Result<(), StoreError> {
        let full_key = Self::full_key(prefix, key);
        let raw = serde_json::to_string(value)
            .map_err(|e| StoreError::Serialization(format!("{}: {}", full_key, e)))?;
        debug!("Cache set {} (ttl: {:?})", full_key, ttl);
        self.store.set_raw(&full_key, raw, ttl).await
    }
}

#[derive(Clone)]
struct StoredValue {
    raw: Arc<str>,
    ttl: Option<Duration>,
}

struct PerEntryTtl;

impl Expiry<String, StoredValue> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &StoredValue, _created_at: Instant) -> Option<Duration> {
        value.ttl
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &StoredValue,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        value.ttl
    }
}

/// In-process [`KeyValueStore`] with per-entry TTL
pub struct MemoryStore {
    entries: MokaCache<String, StoredValue>,
}

impl MemoryStore {
    pub fn new(max_capacity: u64) -> Self {
        let entries = MokaCache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .build();
        Self { entries }
    }
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new(100_000)
    }
}

#[async_trait]
impl KeyValueStore for MemoryStore {
    async fn get_raw(&self, key: &str) -> Result<Option<String>, StoreError> {
        Ok(self.entries.get(key).await.map(|v| v.raw.to_string()))
    }

    async fn set_raw(&self, key: &str, value: String, ttl: Option<Duration>) -> Result<(), StoreError> {
        self.entries
            .insert(
                key.to_string(),
                StoredValue {
                    raw: Arc::from(value),
                    ttl,
                },
            )
            .await;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Record {
        keys: Vec<String>,
        slot: u64,
    }

    #[tokio::test]
    async fn test_typed_round_trip_with_prefix() {
        let cache = Cache::in_memory(100);
        let record = Record {
            keys: vec!["a".to_string()],
            slot: 7,
        };
        cache.set_item("user", &record, "kind-a", None).await.unwrap();

        let hit: Option<Record> = cache.get_item("user", "kind-a").await.unwrap();
        assert_eq!(hit, Some(record));

        // Same key under a different prefix is a different entry
        let miss: Option<Record> = cache.get_item("user", "kind-b").await.unwrap();
        assert!(miss.is_none());
    }

    #[tokio::test]
    async fn test_entry_expires_after_ttl() {
        let cache = Cache::in_memory(100);
        cache
            .set_item("k", &1u64, "ttl", Some(Duration::from_millis(50)))
            .await
            .unwrap();
        assert_eq!(cache.get_item::<u64>("k", "ttl").await.unwrap(), Some(1));

        tokio::time::sleep(Duration::from_millis(120)).await;
        assert_eq!(cache.get_item::<u64>("k", "ttl").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_shape_mismatch_is_serialization_error() {
        let cache = Cache::in_memory(100);
        cache.set_item("k", "text", "p", None).await.unwrap();
        let result = cache.get_item::<Record>("k", "p").await;
        assert!(matches!(result, Err(StoreError::Serialization(_))));
    }
}

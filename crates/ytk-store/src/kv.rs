// SPDX-License-Identifier: MIT OR Apache-2.0
//! Durable key-value capability.
//!
//! The client runtime keeps small control records here: the stored permit
//! and its usage counters, the offline sync queue, and the last-synced
//! timestamp.

use crate::Result;
use crate::error::StoreError;
use async_trait::async_trait;
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Raw byte-oriented key-value store.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Fetch the value stored under `key`.
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn put_raw(&self, key: &str, value: Vec<u8>) -> Result<()>;

    /// Remove `key`. Returns `true` if a value was present.
    async fn remove(&self, key: &str) -> Result<bool>;

    /// All keys with the given prefix, sorted.
    async fn keys(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Fetch and JSON-decode the value under `key`.
pub async fn get_json<T: DeserializeOwned>(store: &dyn KvStore, key: &str) -> Result<Option<T>> {
    match store.get_raw(key).await? {
        None => Ok(None),
        Some(bytes) => serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| StoreError::Corrupt {
                path: key.to_string(),
                reason: e.to_string(),
            }),
    }
}

/// JSON-encode `value` and store it under `key`.
pub async fn put_json<T: Serialize>(store: &dyn KvStore, key: &str, value: &T) -> Result<()> {
    let bytes = serde_json::to_vec(value).map_err(|e| StoreError::Corrupt {
        path: key.to_string(),
        reason: e.to_string(),
    })?;
    store.put_raw(key, bytes).await
}

/// In-memory [`KvStore`]. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryKvStore {
    entries: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryKvStore {
    /// New empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get_raw(&self, key: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.entries.lock().await.get(key).cloned())
    }

    async fn put_raw(&self, key: &str, value: Vec<u8>) -> Result<()> {
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<bool> {
        Ok(self.entries.lock().await.remove(key).is_some())
    }

    async fn keys(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .entries
            .lock()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn roundtrip_and_remove() {
        let store = MemoryKvStore::new();
        put_json(&store, "sync/last", &42u64).await.unwrap();
        let back: Option<u64> = get_json(&store, "sync/last").await.unwrap();
        assert_eq!(back, Some(42));
        assert!(store.remove("sync/last").await.unwrap());
        assert!(!store.remove("sync/last").await.unwrap());
        let gone: Option<u64> = get_json(&store, "sync/last").await.unwrap();
        assert_eq!(gone, None);
    }

    #[tokio::test]
    async fn prefix_listing_is_sorted() {
        let store = MemoryKvStore::new();
        for key in ["queue/2", "queue/1", "permit/current"] {
            store.put_raw(key, vec![1]).await.unwrap();
        }
        assert_eq!(store.keys("queue/").await.unwrap(), vec!["queue/1", "queue/2"]);
    }

    #[tokio::test]
    async fn corrupt_value_is_reported_not_swallowed() {
        let store = MemoryKvStore::new();
        store.put_raw("bad", b"not json".to_vec()).await.unwrap();
        let err = get_json::<u64>(&store, "bad").await.unwrap_err();
        assert!(matches!(err, StoreError::Corrupt { .. }));
    }
}

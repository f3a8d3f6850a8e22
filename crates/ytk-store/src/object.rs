// SPDX-License-Identifier: MIT OR Apache-2.0
//! Object storage capability.
//!
//! Key layout used by the pipeline:
//!
//! ```text
//! uploads/{userId}/{unixMillis}-{originalFileName}     pre-OCR
//! processed/{jstDate}/{userId}/{unixMillis}-{...}      post-OCR
//! batch-input/manifest-{unixMillis}.jsonl              orchestrator manifests
//! batch-output/{jobId}/output.jsonl                    vendor results
//! dead-letters/{jobId}/{unixMillis}.json               migration failures
//! merchants/common-merchants.json                      cached merchant list
//! ```
//!
//! Objects under `uploads/` always carry `trace-id` and `user-id` metadata;
//! that metadata is the bridge that lets an asynchronous object-created
//! event resume the originating trace.

use crate::Result;
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;

/// Metadata key carrying the originating trace.
pub const META_TRACE_ID: &str = "trace-id";

/// Metadata key carrying the uploading user.
pub const META_USER_ID: &str = "user-id";

/// One stored object: bytes plus string metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ObjectRecord {
    /// Full object key.
    pub key: String,
    /// Object bytes.
    pub bytes: Vec<u8>,
    /// String metadata. Deterministic ordering.
    pub metadata: BTreeMap<String, String>,
}

/// Object storage capability.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Store bytes and metadata under `key`, replacing any existing object.
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        metadata: BTreeMap<String, String>,
    ) -> Result<()>;

    /// Fetch the object at `key`.
    async fn get(&self, key: &str) -> Result<Option<ObjectRecord>>;

    /// Copy `from` to `to`, metadata included. Errors if `from` is absent.
    async fn copy(&self, from: &str, to: &str) -> Result<()>;

    /// Delete `key`. Returns `true` if an object was present.
    async fn delete(&self, key: &str) -> Result<bool>;

    /// All keys under `prefix`, sorted.
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

/// Move an object: copy then delete the source.
pub async fn move_object(store: &dyn ObjectStore, from: &str, to: &str) -> Result<()> {
    store.copy(from, to).await?;
    store.delete(from).await?;
    Ok(())
}

/// In-memory [`ObjectStore`]. Clones share the same bucket.
#[derive(Clone, Default)]
pub struct MemoryObjectStore {
    objects: Arc<Mutex<BTreeMap<String, ObjectRecord>>>,
}

impl MemoryObjectStore {
    /// New empty bucket.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored objects, for test assertions.
    pub async fn len(&self) -> usize {
        self.objects.lock().await.len()
    }

    /// Returns `true` when the bucket holds no objects.
    pub async fn is_empty(&self) -> bool {
        self.objects.lock().await.is_empty()
    }
}

#[async_trait]
impl ObjectStore for MemoryObjectStore {
    async fn put(
        &self,
        key: &str,
        bytes: Vec<u8>,
        metadata: BTreeMap<String, String>,
    ) -> Result<()> {
        let record = ObjectRecord {
            key: key.to_string(),
            bytes,
            metadata,
        };
        self.objects.lock().await.insert(key.to_string(), record);
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<ObjectRecord>> {
        Ok(self.objects.lock().await.get(key).cloned())
    }

    async fn copy(&self, from: &str, to: &str) -> Result<()> {
        let mut guard = self.objects.lock().await;
        let Some(src) = guard.get(from).cloned() else {
            return Err(StoreError::NotFound {
                key: from.to_string(),
            });
        };
        guard.insert(
            to.to_string(),
            ObjectRecord {
                key: to.to_string(),
                ..src
            },
        );
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<bool> {
        Ok(self.objects.lock().await.remove(key).is_some())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .objects
            .lock()
            .await
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect())
    }
}

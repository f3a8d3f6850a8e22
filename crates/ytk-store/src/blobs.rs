// SPDX-License-Identifier: MIT OR Apache-2.0
//! Local blob storage for captured image bytes.
//!
//! Rows in the image table point at blobs by path. Blobs outlive nothing:
//! every allocation has a scoped release — on skip, on failure, on removal,
//! and after processing completes.

use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use ytk_core::ImageId;

/// Local durable storage for captured blobs.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Persist a blob for `id`, returning its storage path.
    async fn save(&self, id: &ImageId, bytes: Vec<u8>) -> Result<String>;

    /// Read the blob at `path`. `None` when it was deleted externally.
    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>>;

    /// Delete the blob at `path`. Returns `true` if bytes were present.
    async fn delete(&self, path: &str) -> Result<bool>;
}

/// In-memory [`BlobStore`]. Clones share the same map.
#[derive(Clone, Default)]
pub struct MemoryBlobStore {
    blobs: Arc<Mutex<BTreeMap<String, Vec<u8>>>>,
}

impl MemoryBlobStore {
    /// New empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Drop a blob behind the repository's back, for crash-recovery tests.
    pub async fn corrupt_remove(&self, path: &str) {
        self.blobs.lock().await.remove(path);
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn save(&self, id: &ImageId, bytes: Vec<u8>) -> Result<String> {
        let path = format!("mem://blobs/{id}");
        self.blobs.lock().await.insert(path.clone(), bytes);
        Ok(path)
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        Ok(self.blobs.lock().await.get(path).cloned())
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        Ok(self.blobs.lock().await.remove(path).is_some())
    }
}

/// Filesystem [`BlobStore`] rooted at a directory.
#[derive(Clone)]
pub struct FileBlobStore {
    root: PathBuf,
}

impl FileBlobStore {
    /// Open (and create) the root directory.
    pub async fn open(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root).await?;
        Ok(Self { root })
    }

    fn blob_path(&self, id: &ImageId) -> PathBuf {
        let safe: String = id
            .as_str()
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.root.join(format!("{safe}.blob"))
    }
}

#[async_trait]
impl BlobStore for FileBlobStore {
    async fn save(&self, id: &ImageId, bytes: Vec<u8>) -> Result<String> {
        let path = self.blob_path(id);
        fs::write(&path, bytes).await?;
        Ok(path.to_string_lossy().to_string())
    }

    async fn read(&self, path: &str) -> Result<Option<Vec<u8>>> {
        match fs::read(path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete(&self, path: &str) -> Result<bool> {
        match fs::remove_file(path).await {
            Ok(()) => Ok(true),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(err) => Err(err.into()),
        }
    }
}

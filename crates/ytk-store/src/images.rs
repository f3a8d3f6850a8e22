// SPDX-License-Identifier: MIT OR Apache-2.0
//! Receipt-image repository.
//!
//! The repository is the single enforcement point for the image lifecycle
//! state machine: a write that changes `status` must be a transition the FSM
//! allows, otherwise the write is refused.

use crate::Result;
use crate::error::StoreError;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::fs;
use tokio::sync::Mutex;
use tracing::warn;
use ytk_core::{ContentDigest, ImageId, ImageStatus, ReceiptImage, UserId};

/// Receipt-image rows, keyed by [`ImageId`].
#[async_trait]
pub trait ImageRepo: Send + Sync {
    /// Insert a fresh row. Errors if the id already exists.
    async fn insert(&self, row: ReceiptImage) -> Result<()>;

    /// Fetch one row.
    async fn get(&self, id: &ImageId) -> Result<Option<ReceiptImage>>;

    /// Replace a row.
    ///
    /// If the write changes `status`, the change must be a valid FSM
    /// transition from the stored status; otherwise the write fails with
    /// [`StoreError::ForbiddenTransition`] and nothing is modified.
    async fn update(&self, row: ReceiptImage) -> Result<()>;

    /// All rows for a user, FIFO by `created_at`.
    async fn list(&self, user: &UserId) -> Result<Vec<ReceiptImage>>;

    /// Rows for a user in the given status, FIFO by `created_at`.
    async fn list_by_status(&self, user: &UserId, status: ImageStatus)
    -> Result<Vec<ReceiptImage>>;

    /// Rows for a user carrying this content digest.
    async fn find_by_digest(&self, user: &UserId, digest: &ContentDigest)
    -> Result<Vec<ReceiptImage>>;

    /// Remove a row entirely, returning it if present.
    async fn remove(&self, id: &ImageId) -> Result<Option<ReceiptImage>>;

    /// Delete every row for a user, returning the count.
    async fn remove_user(&self, user: &UserId) -> Result<u64>;
}

fn check_transition(stored: &ReceiptImage, incoming: &ReceiptImage) -> Result<()> {
    if stored.status != incoming.status && !stored.status.can_transition_to(incoming.status) {
        return Err(StoreError::ForbiddenTransition {
            id: incoming.id.to_string(),
            from: stored.status,
            to: incoming.status,
        });
    }
    Ok(())
}

fn sort_fifo(rows: &mut [ReceiptImage]) {
    rows.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
}

// ---------------------------------------------------------------------------
// MemoryImageRepo
// ---------------------------------------------------------------------------

/// In-memory [`ImageRepo`]. Clones share the same table.
#[derive(Clone, Default)]
pub struct MemoryImageRepo {
    rows: Arc<Mutex<BTreeMap<ImageId, ReceiptImage>>>,
}

impl MemoryImageRepo {
    /// New empty repository.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ImageRepo for MemoryImageRepo {
    async fn insert(&self, row: ReceiptImage) -> Result<()> {
        let mut guard = self.rows.lock().await;
        if guard.contains_key(&row.id) {
            return Err(StoreError::AlreadyExists {
                key: row.id.to_string(),
            });
        }
        guard.insert(row.id.clone(), row);
        Ok(())
    }

    async fn get(&self, id: &ImageId) -> Result<Option<ReceiptImage>> {
        Ok(self.rows.lock().await.get(id).cloned())
    }

    async fn update(&self, row: ReceiptImage) -> Result<()> {
        let mut guard = self.rows.lock().await;
        let Some(stored) = guard.get(&row.id) else {
            return Err(StoreError::NotFound {
                key: row.id.to_string(),
            });
        };
        check_transition(stored, &row)?;
        guard.insert(row.id.clone(), row);
        Ok(())
    }

    async fn list(&self, user: &UserId) -> Result<Vec<ReceiptImage>> {
        let guard = self.rows.lock().await;
        let mut rows: Vec<_> = guard.values().filter(|r| &r.user_id == user).cloned().collect();
        sort_fifo(&mut rows);
        Ok(rows)
    }

    async fn list_by_status(
        &self,
        user: &UserId,
        status: ImageStatus,
    ) -> Result<Vec<ReceiptImage>> {
        let guard = self.rows.lock().await;
        let mut rows: Vec<_> = guard
            .values()
            .filter(|r| &r.user_id == user && r.status == status)
            .cloned()
            .collect();
        sort_fifo(&mut rows);
        Ok(rows)
    }

    async fn find_by_digest(
        &self,
        user: &UserId,
        digest: &ContentDigest,
    ) -> Result<Vec<ReceiptImage>> {
        let guard = self.rows.lock().await;
        let mut rows: Vec<_> = guard
            .values()
            .filter(|r| &r.user_id == user && r.content_digest.as_ref() == Some(digest))
            .cloned()
            .collect();
        sort_fifo(&mut rows);
        Ok(rows)
    }

    async fn remove(&self, id: &ImageId) -> Result<Option<ReceiptImage>> {
        Ok(self.rows.lock().await.remove(id))
    }

    async fn remove_user(&self, user: &UserId) -> Result<u64> {
        let mut guard = self.rows.lock().await;
        let doomed: Vec<ImageId> = guard
            .values()
            .filter(|r| &r.user_id == user)
            .map(|r| r.id.clone())
            .collect();
        let count = doomed.len() as u64;
        for id in doomed {
            guard.remove(&id);
        }
        Ok(count)
    }
}

// ---------------------------------------------------------------------------
// JsonFileImageRepo
// ---------------------------------------------------------------------------

/// File-backed [`ImageRepo`]: one JSON document per row under a directory,
/// with an in-memory view hydrated at startup.
///
/// Startup hydration is where crash recovery happens — rows parked in
/// `uploading` by a dead process are demoted to `compressed` before the
/// worker ever sees them.
#[derive(Clone)]
pub struct JsonFileImageRepo {
    memory: MemoryImageRepo,
    dir: PathBuf,
}

impl JsonFileImageRepo {
    /// Open (and create) the backing directory and hydrate all rows.
    ///
    /// Unreadable documents are logged and skipped; a single corrupt row
    /// must not block the rest of the queue.
    pub async fn open(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir).await?;
        let memory = MemoryImageRepo::new();

        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            let bytes = match fs::read(&path).await {
                Ok(b) => b,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to read image row");
                    continue;
                }
            };
            let mut row: ReceiptImage = match serde_json::from_slice(&bytes) {
                Ok(r) => r,
                Err(err) => {
                    warn!(path = %path.display(), error = %err, "failed to parse image row");
                    continue;
                }
            };
            if row.status == ImageStatus::Uploading {
                // The PUT this row was waiting on died with the old process.
                row.status = ImageStatus::Compressed;
            }
            memory.insert(row).await?;
        }

        Ok(Self { memory, dir })
    }

    fn row_path(&self, id: &ImageId) -> PathBuf {
        // Image ids may contain path-hostile characters in the stem; the
        // on-disk name is the id with separators flattened.
        let safe: String = id
            .as_str()
            .chars()
            .map(|c| if c == '/' || c == '\\' { '_' } else { c })
            .collect();
        self.dir.join(format!("{safe}.json"))
    }

    async fn persist(&self, row: &ReceiptImage) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(row).map_err(|e| StoreError::Corrupt {
            path: row.id.to_string(),
            reason: e.to_string(),
        })?;
        fs::write(self.row_path(&row.id), bytes).await?;
        Ok(())
    }
}

#[async_trait]
impl ImageRepo for JsonFileImageRepo {
    async fn insert(&self, row: ReceiptImage) -> Result<()> {
        self.memory.insert(row.clone()).await?;
        self.persist(&row).await
    }

    async fn get(&self, id: &ImageId) -> Result<Option<ReceiptImage>> {
        self.memory.get(id).await
    }

    async fn update(&self, row: ReceiptImage) -> Result<()> {
        self.memory.update(row.clone()).await?;
        self.persist(&row).await
    }

    async fn list(&self, user: &UserId) -> Result<Vec<ReceiptImage>> {
        self.memory.list(user).await
    }

    async fn list_by_status(
        &self,
        user: &UserId,
        status: ImageStatus,
    ) -> Result<Vec<ReceiptImage>> {
        self.memory.list_by_status(user, status).await
    }

    async fn find_by_digest(
        &self,
        user: &UserId,
        digest: &ContentDigest,
    ) -> Result<Vec<ReceiptImage>> {
        self.memory.find_by_digest(user, digest).await
    }

    async fn remove(&self, id: &ImageId) -> Result<Option<ReceiptImage>> {
        let removed = self.memory.remove(id).await?;
        if removed.is_some() {
            let _ = fs::remove_file(self.row_path(id)).await;
        }
        Ok(removed)
    }

    async fn remove_user(&self, user: &UserId) -> Result<u64> {
        let rows = self.memory.list(user).await?;
        for row in &rows {
            let _ = fs::remove_file(self.row_path(&row.id)).await;
        }
        self.memory.remove_user(user).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use ytk_core::TraceId;

    fn row(id: &str, user: &str, status: ImageStatus) -> ReceiptImage {
        let mut r = ReceiptImage::new_pending(
            ImageId::new(id).unwrap(),
            UserId::new(user).unwrap(),
            TraceId::random(),
            format!("/blobs/{id}"),
            300_000,
            Utc::now(),
        );
        r.status = status;
        r
    }

    #[tokio::test]
    async fn insert_twice_is_rejected() {
        let repo = MemoryImageRepo::new();
        repo.insert(row("1-a.jpg", "u1", ImageStatus::Pending)).await.unwrap();
        let err = repo
            .insert(row("1-a.jpg", "u1", ImageStatus::Pending))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::AlreadyExists { .. }));
    }

    #[tokio::test]
    async fn forbidden_transition_is_refused() {
        let repo = MemoryImageRepo::new();
        repo.insert(row("1-a.jpg", "u1", ImageStatus::Pending)).await.unwrap();

        let mut jumped = repo.get(&ImageId::new("1-a.jpg").unwrap()).await.unwrap().unwrap();
        jumped.status = ImageStatus::Uploaded;
        let err = repo.update(jumped).await.unwrap_err();
        assert!(matches!(err, StoreError::ForbiddenTransition { .. }));

        // Row is untouched.
        let stored = repo.get(&ImageId::new("1-a.jpg").unwrap()).await.unwrap().unwrap();
        assert_eq!(stored.status, ImageStatus::Pending);
    }

    #[tokio::test]
    async fn same_status_update_is_allowed() {
        let repo = MemoryImageRepo::new();
        repo.insert(row("1-a.jpg", "u1", ImageStatus::Pending)).await.unwrap();
        let mut r = repo.get(&ImageId::new("1-a.jpg").unwrap()).await.unwrap().unwrap();
        r.retry_count = 2;
        repo.update(r).await.unwrap();
    }

    #[tokio::test]
    async fn listing_is_fifo_by_created_at() {
        let repo = MemoryImageRepo::new();
        let now = Utc::now();
        let mut first = row("1-a.jpg", "u1", ImageStatus::Compressed);
        first.created_at = now - chrono::Duration::seconds(10);
        let mut second = row("2-b.jpg", "u1", ImageStatus::Compressed);
        second.created_at = now;
        repo.insert(second).await.unwrap();
        repo.insert(first).await.unwrap();

        let user = UserId::new("u1").unwrap();
        let listed = repo.list_by_status(&user, ImageStatus::Compressed).await.unwrap();
        assert_eq!(listed[0].id.as_str(), "1-a.jpg");
        assert_eq!(listed[1].id.as_str(), "2-b.jpg");
    }

    #[tokio::test]
    async fn digest_lookup_scopes_to_user() {
        let repo = MemoryImageRepo::new();
        let digest = ContentDigest::of(b"same bytes");
        let mut a = row("1-a.jpg", "u1", ImageStatus::Uploaded);
        a.content_digest = Some(digest);
        a.object_key = Some("uploads/u1/1-a.jpg".into());
        a.uploaded_at = Some(Utc::now());
        let mut b = row("2-b.jpg", "u2", ImageStatus::Uploaded);
        b.content_digest = Some(digest);
        b.object_key = Some("uploads/u2/2-b.jpg".into());
        b.uploaded_at = Some(Utc::now());
        repo.insert(a).await.unwrap();
        repo.insert(b).await.unwrap();

        let hits = repo
            .find_by_digest(&UserId::new("u1").unwrap(), &digest)
            .await
            .unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].id.as_str(), "1-a.jpg");
    }

    #[tokio::test]
    async fn file_repo_survives_reopen_and_demotes_uploading() {
        let tmp = tempfile::tempdir().unwrap();

        {
            let repo = JsonFileImageRepo::open(tmp.path()).await.unwrap();
            repo.insert(row("1-a.jpg", "u1", ImageStatus::Pending)).await.unwrap();
            let mut r = repo.get(&ImageId::new("1-a.jpg").unwrap()).await.unwrap().unwrap();
            r.status = ImageStatus::Compressed;
            repo.update(r.clone()).await.unwrap();
            r.status = ImageStatus::Uploading;
            repo.update(r).await.unwrap();
            // Process "crashes" here with the row in `uploading`.
        }

        let repo = JsonFileImageRepo::open(tmp.path()).await.unwrap();
        let recovered = repo.get(&ImageId::new("1-a.jpg").unwrap()).await.unwrap().unwrap();
        assert_eq!(recovered.status, ImageStatus::Compressed);
    }

    #[tokio::test]
    async fn file_repo_remove_deletes_document() {
        let tmp = tempfile::tempdir().unwrap();
        let repo = JsonFileImageRepo::open(tmp.path()).await.unwrap();
        repo.insert(row("1-a.jpg", "u1", ImageStatus::Pending)).await.unwrap();
        repo.remove(&ImageId::new("1-a.jpg").unwrap()).await.unwrap();

        let reopened = JsonFileImageRepo::open(tmp.path()).await.unwrap();
        assert!(reopened.get(&ImageId::new("1-a.jpg").unwrap()).await.unwrap().is_none());
    }
}

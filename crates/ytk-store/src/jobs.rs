// SPDX-License-Identifier: MIT OR Apache-2.0
//! Batch-job repository.
//!
//! `insert_if_absent` is the orchestrator's idempotency barrier: exactly one
//! of any number of concurrent submissions with the same intent wins it.

use crate::Result;
use async_trait::async_trait;
use std::collections::BTreeMap;
use std::sync::Arc;
use tokio::sync::Mutex;
use ytk_core::{BatchJob, IntentId, JobId};

/// Batch-job records, keyed by [`IntentId`].
#[async_trait]
pub trait BatchJobRepo: Send + Sync {
    /// Insert only if no record with this intent exists. Returns `false`
    /// when the barrier is already held.
    async fn insert_if_absent(&self, job: BatchJob) -> Result<bool>;

    /// Fetch by intent (primary key).
    async fn get(&self, intent: &IntentId) -> Result<Option<BatchJob>>;

    /// Fetch by vendor job id (secondary index).
    async fn get_by_job(&self, job: &JobId) -> Result<Option<BatchJob>>;

    /// Replace a record.
    async fn update(&self, job: BatchJob) -> Result<()>;
}

/// In-memory [`BatchJobRepo`]. Clones share the same table.
#[derive(Clone, Default)]
pub struct MemoryBatchJobRepo {
    rows: Arc<Mutex<BTreeMap<IntentId, BatchJob>>>,
}

impl MemoryBatchJobRepo {
    /// New empty table.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BatchJobRepo for MemoryBatchJobRepo {
    async fn insert_if_absent(&self, job: BatchJob) -> Result<bool> {
        let mut guard = self.rows.lock().await;
        if guard.contains_key(&job.intent_id) {
            return Ok(false);
        }
        guard.insert(job.intent_id.clone(), job);
        Ok(true)
    }

    async fn get(&self, intent: &IntentId) -> Result<Option<BatchJob>> {
        Ok(self.rows.lock().await.get(intent).cloned())
    }

    async fn get_by_job(&self, job: &JobId) -> Result<Option<BatchJob>> {
        Ok(self
            .rows
            .lock()
            .await
            .values()
            .find(|j| j.job_id.as_ref() == Some(job))
            .cloned())
    }

    async fn update(&self, job: BatchJob) -> Result<()> {
        self.rows.lock().await.insert(job.intent_id.clone(), job);
        Ok(())
    }
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Emergency-stop control record.
//!
//! A single mutable cell, written by one admin at a time and read by every
//! presign request through a 60-second cache so a stampede never hammers
//! the control table.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use ytk_core::TraceId;
use ytk_store::{KvStore, StoreError, get_json, put_json};
use ytk_telemetry::{EventLevel, EventName, TelemetryEvent};

const CONTROL_KEY: &str = "control/emergency-stop";

/// How long a read may serve the cached record.
pub const CONTROL_CACHE_TTL: Duration = Duration::from_secs(60);

/// The persisted control record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ControlRecord {
    /// Whether the gate is stopped.
    pub emergency_stop: bool,
    /// Operator-supplied reason.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Last write time.
    pub updated_at: DateTime<Utc>,
    /// Who wrote it.
    pub updated_by: String,
}

impl ControlRecord {
    fn inactive() -> Self {
        Self {
            emergency_stop: false,
            reason: None,
            updated_at: DateTime::<Utc>::UNIX_EPOCH,
            updated_by: "system".into(),
        }
    }
}

struct Cached {
    record: ControlRecord,
    fetched_at: Instant,
}

/// Cached reader / single-writer for the emergency-stop flag.
#[derive(Clone)]
pub struct ControlStore {
    kv: Arc<dyn KvStore>,
    cache: Arc<Mutex<Option<Cached>>>,
}

impl ControlStore {
    /// New store over the control table.
    pub fn new(kv: Arc<dyn KvStore>) -> Self {
        Self {
            kv,
            cache: Arc::new(Mutex::new(None)),
        }
    }

    /// The current record, served from cache within the TTL.
    pub async fn read(&self) -> Result<ControlRecord, StoreError> {
        let mut guard = self.cache.lock().await;
        if let Some(cached) = guard.as_ref() {
            if cached.fetched_at.elapsed() < CONTROL_CACHE_TTL {
                return Ok(cached.record.clone());
            }
        }
        let record: ControlRecord = get_json(self.kv.as_ref(), CONTROL_KEY)
            .await?
            .unwrap_or_else(ControlRecord::inactive);
        *guard = Some(Cached {
            record: record.clone(),
            fetched_at: Instant::now(),
        });
        Ok(record)
    }

    /// Whether the gate should refuse presigns right now.
    pub async fn is_stopped(&self) -> Result<bool, StoreError> {
        Ok(self.read().await?.emergency_stop)
    }

    /// Flip the flag. Writes invalidate the cache immediately, so the
    /// writing admin observes their own write.
    pub async fn write(
        &self,
        active: bool,
        reason: Option<String>,
        updated_by: impl Into<String>,
        now: DateTime<Utc>,
    ) -> Result<ControlRecord, StoreError> {
        let record = ControlRecord {
            emergency_stop: active,
            reason,
            updated_at: now,
            updated_by: updated_by.into(),
        };
        put_json(self.kv.as_ref(), CONTROL_KEY, &record).await?;
        *self.cache.lock().await = Some(Cached {
            record: record.clone(),
            fetched_at: Instant::now(),
        });

        TelemetryEvent::new(EventName::EmergencyStop, TraceId::random())
            .level(EventLevel::Warn)
            .field("active", active)
            .field("updated_by", record.updated_by.clone())
            .emit();
        Ok(record)
    }
}

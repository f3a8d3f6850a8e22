// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured telemetry for the ingestion pipeline.
//!
//! Every log line is a single-line JSON document `{timestamp, level, event,
//! trace_id, user_id?, ...data}`. Event names come from a closed set so
//! dashboards and alerts can rely on them; free-form detail goes in `data`.

#![deny(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::{Arc, Mutex};
use ytk_core::{TraceId, UserId};

// ---------------------------------------------------------------------------
// EventName
// ---------------------------------------------------------------------------

/// Closed set of telemetry event names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventName {
    /// An upload PUT was dispatched.
    UploadStarted,
    /// The object landed in cloud storage.
    UploadCompleted,
    /// An upload gave up (retries exhausted or non-retriable).
    UploadFailed,
    /// A duplicate image was dropped before upload.
    UploadSkipped,
    /// A quota check or the presign gate rejected an upload.
    QuotaExceeded,
    /// A permit was issued.
    PermitIssued,
    /// A permit failed validation at the gate.
    PermitRejected,
    /// The batch orchestrator accepted an intent.
    BatchStarted,
    /// A vendor batch job was created.
    BatchSubmitted,
    /// A vendor batch finished and its results were ingested.
    BatchCompleted,
    /// A transaction row was written from an OCR result.
    ResultWritten,
    /// A failed post-OCR migration was parked for repair.
    DeadLetterWritten,
    /// Any pipeline state machine moved.
    StateTransition,
    /// A sync round started.
    SyncStarted,
    /// A sync round finished cleanly.
    SyncCompleted,
    /// A sync round errored.
    SyncFailed,
    /// Connectivity came back.
    NetworkOnline,
    /// Connectivity was lost.
    NetworkOffline,
    /// The emergency-stop flag flipped.
    EmergencyStop,
}

impl EventName {
    /// Stable wire representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UploadStarted => "UPLOAD_STARTED",
            Self::UploadCompleted => "UPLOAD_COMPLETED",
            Self::UploadFailed => "UPLOAD_FAILED",
            Self::UploadSkipped => "UPLOAD_SKIPPED",
            Self::QuotaExceeded => "QUOTA_EXCEEDED",
            Self::PermitIssued => "PERMIT_ISSUED",
            Self::PermitRejected => "PERMIT_REJECTED",
            Self::BatchStarted => "BATCH_STARTED",
            Self::BatchSubmitted => "BATCH_SUBMITTED",
            Self::BatchCompleted => "BATCH_COMPLETED",
            Self::ResultWritten => "RESULT_WRITTEN",
            Self::DeadLetterWritten => "DEAD_LETTER_WRITTEN",
            Self::StateTransition => "STATE_TRANSITION",
            Self::SyncStarted => "SYNC_STARTED",
            Self::SyncCompleted => "SYNC_COMPLETED",
            Self::SyncFailed => "SYNC_FAILED",
            Self::NetworkOnline => "NETWORK_ONLINE",
            Self::NetworkOffline => "NETWORK_OFFLINE",
            Self::EmergencyStop => "EMERGENCY_STOP",
        }
    }
}

impl fmt::Display for EventName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// TelemetryEvent
// ---------------------------------------------------------------------------

/// Severity of a telemetry event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    /// Routine progress.
    Info,
    /// Recoverable problem.
    Warn,
    /// Pipeline-visible failure.
    Error,
}

/// One telemetry document, serialised as a single JSON line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TelemetryEvent {
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: EventLevel,
    /// Closed-set event name.
    pub event: EventName,
    /// Correlation id; present on every line.
    pub trace_id: TraceId,
    /// Affected user, when one is in scope.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub user_id: Option<UserId>,
    /// Free-form structured detail. Deterministic ordering.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub data: BTreeMap<String, serde_json::Value>,
}

impl TelemetryEvent {
    /// New info-level event stamped with the current time.
    pub fn new(event: EventName, trace_id: TraceId) -> Self {
        Self {
            timestamp: Utc::now(),
            level: EventLevel::Info,
            event,
            trace_id,
            user_id: None,
            data: BTreeMap::new(),
        }
    }

    /// Set the severity.
    pub fn level(mut self, level: EventLevel) -> Self {
        self.level = level;
        self
    }

    /// Attach the affected user.
    pub fn user(mut self, user_id: UserId) -> Self {
        self.user_id = Some(user_id);
        self
    }

    /// Attach a key-value detail. Unserialisable values are skipped.
    pub fn field(mut self, key: impl Into<String>, value: impl Serialize) -> Self {
        if let Ok(v) = serde_json::to_value(value) {
            self.data.insert(key.into(), v);
        }
        self
    }

    /// The single-line JSON representation.
    pub fn to_json_line(&self) -> String {
        serde_json::to_string(self).unwrap_or_else(|_| {
            format!(
                "{{\"event\":\"{}\",\"trace_id\":\"{}\"}}",
                self.event, self.trace_id
            )
        })
    }

    /// Emit through `tracing` at the event's severity.
    pub fn emit(&self) {
        let line = self.to_json_line();
        match self.level {
            EventLevel::Info => tracing::info!(target: "ytk.telemetry", "{line}"),
            EventLevel::Warn => tracing::warn!(target: "ytk.telemetry", "{line}"),
            EventLevel::Error => tracing::error!(target: "ytk.telemetry", "{line}"),
        }
    }
}

// ---------------------------------------------------------------------------
// EventCounters
// ---------------------------------------------------------------------------

/// Thread-safe per-event-name counters.
///
/// Cheap to clone; clones share the same underlying counters.
#[derive(Clone, Default)]
pub struct EventCounters {
    counts: Arc<Mutex<BTreeMap<EventName, u64>>>,
}

impl EventCounters {
    /// New empty counter set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one occurrence.
    pub fn record(&self, event: EventName) {
        let mut guard = self.counts.lock().expect("counter lock poisoned");
        *guard.entry(event).or_insert(0) += 1;
    }

    /// Current count for one event name.
    pub fn count(&self, event: EventName) -> u64 {
        let guard = self.counts.lock().expect("counter lock poisoned");
        guard.get(&event).copied().unwrap_or(0)
    }

    /// Snapshot of all counters, keyed by the stable string name.
    pub fn snapshot(&self) -> BTreeMap<String, u64> {
        let guard = self.counts.lock().expect("counter lock poisoned");
        guard
            .iter()
            .map(|(k, v)| (k.as_str().to_string(), *v))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn trace() -> TraceId {
        TraceId::new("trace-1").unwrap()
    }

    #[test]
    fn event_names_serialise_to_wire_form() {
        assert_eq!(
            serde_json::to_string(&EventName::UploadStarted).unwrap(),
            "\"UPLOAD_STARTED\""
        );
        assert_eq!(
            serde_json::to_string(&EventName::DeadLetterWritten).unwrap(),
            "\"DEAD_LETTER_WRITTEN\""
        );
    }

    #[test]
    fn json_line_is_single_line_and_carries_trace() {
        let line = TelemetryEvent::new(EventName::UploadStarted, trace())
            .user(UserId::new("device-abc").unwrap())
            .field("image_id", "1-a.jpg")
            .to_json_line();
        assert!(!line.contains('\n'));
        let doc: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert_eq!(doc["event"], "UPLOAD_STARTED");
        assert_eq!(doc["trace_id"], "trace-1");
        assert_eq!(doc["user_id"], "device-abc");
        assert_eq!(doc["image_id"], serde_json::Value::Null); // detail nests under data
        assert_eq!(doc["data"]["image_id"], "1-a.jpg");
    }

    #[test]
    fn absent_user_is_omitted() {
        let line = TelemetryEvent::new(EventName::SyncStarted, trace()).to_json_line();
        let doc: serde_json::Value = serde_json::from_str(&line).unwrap();
        assert!(doc.get("user_id").is_none());
        assert!(doc.get("data").is_none());
    }

    #[test]
    fn counters_accumulate_and_share() {
        let counters = EventCounters::new();
        let clone = counters.clone();
        counters.record(EventName::UploadStarted);
        clone.record(EventName::UploadStarted);
        clone.record(EventName::UploadFailed);
        assert_eq!(counters.count(EventName::UploadStarted), 2);
        assert_eq!(counters.count(EventName::UploadFailed), 1);
        assert_eq!(counters.count(EventName::SyncFailed), 0);
        let snap = counters.snapshot();
        assert_eq!(snap["UPLOAD_STARTED"], 2);
    }
}

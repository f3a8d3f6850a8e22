// SPDX-License-Identifier: MIT OR Apache-2.0
//! Global queue status and snapshot statistics.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use ytk_core::ImageStatus;

/// Why the queue is paused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PauseReason {
    /// No connectivity; resumed by the network monitor.
    Offline,
    /// The presign gate rejected an upload for quota; resumed by the user.
    Quota,
}

/// Global status of the upload queue.
///
/// This is a single value, separate from per-image statuses: a unit
/// finishing while the queue is paused must not clobber the pause.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum QueueStatus {
    /// No work in flight.
    Idle,
    /// The worker is moving an image.
    Processing,
    /// The worker will not start new uploads.
    Paused {
        /// What paused the queue.
        reason: PauseReason,
    },
}

impl QueueStatus {
    /// Returns `true` when the worker may start a new unit.
    pub fn accepts_work(&self) -> bool {
        !matches!(self, Self::Paused { .. })
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => f.write_str("idle"),
            Self::Processing => f.write_str("processing"),
            Self::Paused { reason } => write!(
                f,
                "paused({})",
                match reason {
                    PauseReason::Offline => "offline",
                    PauseReason::Quota => "quota",
                }
            ),
        }
    }
}

/// Snapshot counts per image status, for the UI layer.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueStats {
    /// Total rows for the user.
    pub total: usize,
    /// Rows per status, keyed by the stable status string.
    pub by_status: BTreeMap<String, usize>,
}

impl QueueStats {
    /// Count for one status.
    pub fn count(&self, status: ImageStatus) -> usize {
        self.by_status.get(status.as_str()).copied().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn paused_rejects_work() {
        assert!(QueueStatus::Idle.accepts_work());
        assert!(QueueStatus::Processing.accepts_work());
        assert!(
            !QueueStatus::Paused {
                reason: PauseReason::Offline
            }
            .accepts_work()
        );
    }

    #[test]
    fn status_serialises_with_reason() {
        let json = serde_json::to_value(QueueStatus::Paused {
            reason: PauseReason::Quota,
        })
        .unwrap();
        assert_eq!(json["state"], "paused");
        assert_eq!(json["reason"], "quota");
    }
}

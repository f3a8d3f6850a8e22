// SPDX-License-Identifier: MIT OR Apache-2.0
//! Bi-directional transaction sync.
//!
//! Dirty-flag push, cursor-based pull, a persisted offline queue drained on
//! reconnect, and version-based conflict resolution with the server as the
//! arbiter. The engine's status is a four-state machine; only `syncing` is
//! non-re-entrant — attempts made while a sync runs coalesce into it.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod engine;
pub mod monitor;
pub mod offline;
pub mod transport;

pub use engine::{ImageLifecycle, ReconnectGuard, SyncEngine, SyncError, SyncReport, SyncStatus};
pub use monitor::{NetworkMonitor, Subscription};
pub use offline::{OfflineQueue, SyncAction, SyncActionKind};
pub use transport::{PullPage, PushRejection, PushResponse, SyncTransport};

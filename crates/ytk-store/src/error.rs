// SPDX-License-Identifier: MIT OR Apache-2.0
//! Structured storage errors.

use ytk_core::ImageStatus;

/// Errors surfaced by the persistence layer.
///
/// Domain modules translate these into the shared taxonomy before anything
/// user-visible sees them.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A row or object with this key already exists.
    #[error("already exists: {key}")]
    AlreadyExists {
        /// Conflicting key.
        key: String,
    },

    /// The requested row or object does not exist.
    #[error("not found: {key}")]
    NotFound {
        /// Missing key.
        key: String,
    },

    /// A status write violated the image lifecycle state machine.
    #[error("forbidden transition {from} -> {to} for image {id}")]
    ForbiddenTransition {
        /// Image whose row was being written.
        id: String,
        /// Status currently stored.
        from: ImageStatus,
        /// Status the write attempted.
        to: ImageStatus,
    },

    /// Underlying filesystem failure.
    #[error("storage io: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted document could not be decoded.
    #[error("corrupt record at {path}: {reason}")]
    Corrupt {
        /// Where the record lives.
        path: String,
        /// Decode failure detail.
        reason: String,
    },
}

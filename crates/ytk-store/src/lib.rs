// SPDX-License-Identifier: MIT OR Apache-2.0
//! Persistence capabilities for the client runtime and the cloud plane.
//!
//! Every store is a trait so callers name exactly the capability they need;
//! concrete implementations (in-memory, JSON-file) satisfy one trait each
//! and double as test seams. Nothing in this crate knows about HTTP or the
//! pipeline.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod blobs;
pub mod clock;
pub mod error;
pub mod images;
pub mod jobs;
pub mod kv;
pub mod object;
pub mod transactions;

pub use blobs::{BlobStore, FileBlobStore, MemoryBlobStore};
pub use clock::{Clock, FixedClock, SystemClock};
pub use error::StoreError;
pub use images::{ImageRepo, JsonFileImageRepo, MemoryImageRepo};
pub use jobs::{BatchJobRepo, MemoryBatchJobRepo};
pub use kv::{KvStore, MemoryKvStore, get_json, put_json};
pub use object::{
    META_TRACE_ID, META_USER_ID, MemoryObjectStore, ObjectRecord, ObjectStore, move_object,
};
pub use transactions::{MemoryTransactionRepo, TransactionRepo, VersionedPut};

/// Convenience alias used throughout this crate.
pub type Result<T> = std::result::Result<T, StoreError>;

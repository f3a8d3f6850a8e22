// SPDX-License-Identifier: MIT OR Apache-2.0
//! The receipt upload queue.
//!
//! Transports newly-captured blobs through a monotone pipeline into cloud
//! storage, obeying dedup, quota, backpressure, retry, and crash-recovery
//! contracts. The queue itself is the durable collection plus its
//! operations; [`worker::UploadWorker`] is the single long-lived task that
//! moves images through it, one in-flight upload at a time.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod cancel;
pub mod gate;
pub mod queue;
pub mod status;
pub mod worker;

pub use cancel::CancellationToken;
pub use gate::{BlobUploader, PresignGate, PresignRequest, PresignedUpload};
pub use queue::{QueueError, RecoveryReport, UploadQueue};
pub use status::{PauseReason, QueueStats, QueueStatus};
pub use worker::UploadWorker;

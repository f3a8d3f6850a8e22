// SPDX-License-Identifier: MIT OR Apache-2.0
//! HTTP adapters for the client runtime.
//!
//! Every call crossing to the cloud carries an explicit deadline and the
//! `X-Trace-Id` header, and surfaces failures as structured
//! [`ytk_core::TransportError`]s for the domain layers to classify.

#![deny(unsafe_code)]
#![warn(missing_docs)]

pub mod api;
pub mod batch_api;
pub mod config;
pub mod gate;
pub mod lifecycle;
pub mod net;
pub mod quota_api;
pub mod sync_transport;

pub use api::{ApiClient, INTENT_HEADER};
pub use batch_api::{BatchAccepted, BatchApi, BatchSubmission};
pub use config::{ClientConfig, ClientConfigError};
pub use gate::{HttpBlobUploader, HttpPresignGate};
pub use lifecycle::{QueueImageLifecycle, bind_image_lifecycle};
pub use net::{NetworkBinding, bind_queue_to_network};
pub use quota_api::{GuestExpiry, QuotaApi, QuotaSnapshot};
pub use sync_transport::HttpSyncTransport;

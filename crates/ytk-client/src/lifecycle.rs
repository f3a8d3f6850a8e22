// SPDX-License-Identifier: MIT OR Apache-2.0
//! Image-lifecycle wiring.
//!
//! A pulled transaction is the client's proof that OCR finished for its
//! source image. This adapter lets the sync engine advance the matching
//! queue row `uploaded → processing → processed`, releasing the local blob.

use async_trait::async_trait;
use std::sync::Arc;
use tracing::warn;
use ytk_core::ImageId;
use ytk_queue::UploadQueue;
use ytk_sync::{ImageLifecycle, SyncEngine};

/// [`ImageLifecycle`] backed by the upload queue.
pub struct QueueImageLifecycle {
    queue: UploadQueue,
}

impl QueueImageLifecycle {
    /// New adapter over the queue.
    pub fn new(queue: UploadQueue) -> Self {
        Self { queue }
    }
}

#[async_trait]
impl ImageLifecycle for QueueImageLifecycle {
    async fn image_processed(&self, image: &ImageId) {
        // A failure here must not disturb the sync round; the image stays
        // where it is and the next pull retries the advance.
        if let Err(err) = self.queue.complete_ocr(image).await {
            warn!(image_id = %image, error = %err, "image lifecycle advance failed");
        }
    }
}

/// Wire the queue into the sync engine's pull path. Call once at startup.
pub fn bind_image_lifecycle(engine: &SyncEngine, queue: UploadQueue) {
    engine.bind_image_lifecycle(Arc::new(QueueImageLifecycle::new(queue)));
}

// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connectivity wiring for the client runtime.
//!
//! On an online→offline edge the upload queue pauses; on the way back it
//! resumes and every failed image returns to `pending`. The sync engine
//! wires its own reconnect drain separately.

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use ytk_queue::{PauseReason, UploadQueue};
use ytk_sync::{NetworkMonitor, Subscription};

/// Keeps the queue's network subscription and reaction task alive.
pub struct NetworkBinding {
    _subscription: Subscription,
    handle: JoinHandle<()>,
}

impl NetworkBinding {
    /// Abort the reaction task (the subscription dies with the binding).
    pub fn shutdown(self) {
        self.handle.abort();
    }
}

/// Bind the upload queue to connectivity edges.
pub fn bind_queue_to_network(monitor: &NetworkMonitor, queue: UploadQueue) -> NetworkBinding {
    let (tx, mut rx) = mpsc::unbounded_channel();
    let subscription = monitor.subscribe(move |online| {
        let _ = tx.send(online);
    });

    let handle = tokio::spawn(async move {
        while let Some(online) = rx.recv().await {
            if online {
                match queue.retry_all_failed().await {
                    Ok(retried) if retried > 0 => {
                        tracing::info!(retried, "reconnect returned failed uploads to pending");
                    }
                    Ok(_) => {}
                    Err(err) => warn!(error = %err, "reconnect retry failed"),
                }
                queue.resume();
            } else {
                queue.pause(PauseReason::Offline);
            }
        }
    });

    NetworkBinding {
        _subscription: subscription,
        handle,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use ytk_core::UserId;
    use ytk_permit::quota::QuotaDecision;
    use ytk_permit::{LedgerError, Permit, QuotaCheck};
    use ytk_queue::QueueStatus;
    use ytk_store::{MemoryBlobStore, MemoryImageRepo, SystemClock};

    struct OpenQuota;

    #[async_trait::async_trait]
    impl QuotaCheck for OpenQuota {
        async fn check(&self) -> Result<QuotaDecision, LedgerError> {
            Ok(QuotaDecision {
                allowed: true,
                reason: None,
                remaining_total: 1,
                remaining_daily: None,
            })
        }
        async fn record_upload(&self) -> Result<(), LedgerError> {
            Ok(())
        }
        async fn current_permit(&self) -> Result<Option<Permit>, LedgerError> {
            Ok(None)
        }
    }

    #[tokio::test]
    async fn offline_edge_pauses_and_online_edge_resumes() {
        let (queue, _wake) = UploadQueue::new(
            UserId::new("device-abc").unwrap(),
            Arc::new(MemoryImageRepo::new()),
            Arc::new(MemoryBlobStore::new()),
            Arc::new(OpenQuota),
            Arc::new(SystemClock),
        );
        let monitor = NetworkMonitor::new();
        let binding = bind_queue_to_network(&monitor, queue.clone());

        monitor.set_online(false);
        wait_for(|| {
            queue.status()
                == QueueStatus::Paused {
                    reason: PauseReason::Offline,
                }
        })
        .await;

        monitor.set_online(true);
        wait_for(|| queue.status() == QueueStatus::Idle).await;
        binding.shutdown();
    }

    async fn wait_for(mut predicate: impl FnMut() -> bool) {
        for _ in 0..100 {
            if predicate() {
                return;
            }
            tokio::task::yield_now().await;
        }
        panic!("condition never held");
    }
}

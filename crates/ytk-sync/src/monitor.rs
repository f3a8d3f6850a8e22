// SPDX-License-Identifier: MIT OR Apache-2.0
//! Connectivity monitor with edge-triggered notifications.
//!
//! Browser-style `online`/`offline` semantics: subscribers are notified
//! only when the state actually flips, never on redundant sets. One
//! monitor per process, injected explicitly and torn down on shutdown.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use ytk_core::TraceId;
use ytk_telemetry::{EventName, TelemetryEvent};

type Listener = Box<dyn Fn(bool) + Send + Sync>;

struct MonitorInner {
    online: AtomicBool,
    next_id: AtomicU64,
    listeners: Mutex<BTreeMap<u64, Listener>>,
}

/// Shared connectivity state. Clones observe the same monitor.
#[derive(Clone)]
pub struct NetworkMonitor {
    inner: Arc<MonitorInner>,
}

impl NetworkMonitor {
    /// New monitor, initially online.
    pub fn new() -> Self {
        Self::with_state(true)
    }

    /// New monitor with an explicit initial state.
    pub fn with_state(online: bool) -> Self {
        Self {
            inner: Arc::new(MonitorInner {
                online: AtomicBool::new(online),
                next_id: AtomicU64::new(1),
                listeners: Mutex::new(BTreeMap::new()),
            }),
        }
    }

    /// Current connectivity.
    pub fn is_online(&self) -> bool {
        self.inner.online.load(Ordering::SeqCst)
    }

    /// Register a listener fired on every edge transition. Dropping the
    /// returned [`Subscription`] unsubscribes.
    pub fn subscribe(&self, listener: impl Fn(bool) + Send + Sync + 'static) -> Subscription {
        let id = self.inner.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner
            .listeners
            .lock()
            .expect("listener lock poisoned")
            .insert(id, Box::new(listener));
        Subscription {
            monitor: self.inner.clone(),
            id,
        }
    }

    /// Report connectivity. Notifies subscribers only on a state change.
    pub fn set_online(&self, online: bool) {
        let previous = self.inner.online.swap(online, Ordering::SeqCst);
        if previous == online {
            return;
        }

        let event = if online {
            EventName::NetworkOnline
        } else {
            EventName::NetworkOffline
        };
        TelemetryEvent::new(event, TraceId::random()).emit();

        let guard = self
            .inner
            .listeners
            .lock()
            .expect("listener lock poisoned");
        for listener in guard.values() {
            listener(online);
        }
    }
}

impl Default for NetworkMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Handle to an active subscription; dropping it unsubscribes.
pub struct Subscription {
    monitor: Arc<MonitorInner>,
    id: u64,
}

impl Subscription {
    /// Explicitly unsubscribe. Equivalent to dropping the handle.
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.monitor.listeners.lock() {
            guard.remove(&self.id);
        }
    }
}

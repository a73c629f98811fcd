//! Progress observers.
//!
//! Two ways to follow a scan:
//!
//! - Registered [`ProgressObserver`]s, called synchronously from the scan
//!   task. Each call is isolated: an observer that fails or panics is logged
//!   and the remaining observers are still notified.
//! - A `tokio::sync::broadcast` channel of [`StatusSnapshot`]s via
//!   [`ProgressHub::subscribe`]. Slow subscribers lag instead of blocking the
//!   scan.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use scan_core::ObserverHandle;
use tokio::sync::broadcast;
use tracing::warn;

use crate::result::StatusSnapshot;

/// Receives progress snapshots from the scan task.
///
/// Called on the scan task; implementations must return quickly.
pub trait ProgressObserver: Send + Sync {
    /// Handle one snapshot. Errors are logged and otherwise ignored.
    fn on_progress(&self, snapshot: &StatusSnapshot) -> anyhow::Result<()>;
}

impl<F> ProgressObserver for F
where
    F: Fn(&StatusSnapshot) -> anyhow::Result<()> + Send + Sync,
{
    fn on_progress(&self, snapshot: &StatusSnapshot) -> anyhow::Result<()> {
        self(snapshot)
    }
}

type ObserverList = Vec<(ObserverHandle, Arc<dyn ProgressObserver>)>;

/// Observer registry plus broadcast channel.
pub struct ProgressHub {
    observers: RwLock<ObserverList>,
    next_id: AtomicU64,
    sender: broadcast::Sender<StatusSnapshot>,
}

impl ProgressHub {
    /// Empty registry with a broadcast channel of `channel_capacity`.
    pub fn new(channel_capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(channel_capacity.max(1));
        Self {
            observers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            sender,
        }
    }

    /// Register an observer.
    pub fn add(&self, observer: Arc<dyn ProgressObserver>) -> ObserverHandle {
        let handle = ObserverHandle::new(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.observers.write().push((handle, observer));
        handle
    }

    /// Returns false if the handle was not registered.
    pub fn remove(&self, handle: ObserverHandle) -> bool {
        let mut observers = self.observers.write();
        let before = observers.len();
        observers.retain(|(h, _)| *h != handle);
        observers.len() != before
    }

    /// New broadcast receiver.
    pub fn subscribe(&self) -> broadcast::Receiver<StatusSnapshot> {
        self.sender.subscribe()
    }

    /// Registered observers.
    pub fn observer_count(&self) -> usize {
        self.observers.read().len()
    }

    /// Deliver `snapshot` to every observer and subscriber.
    ///
    /// Returns how many observers failed.
    pub fn notify(&self, snapshot: &StatusSnapshot) -> usize {
        // Call outside the lock so observers may (un)register.
        let observers: ObserverList = self.observers.read().clone();
        let mut failures = 0;

        for (handle, observer) in observers {
            match catch_unwind(AssertUnwindSafe(|| observer.on_progress(snapshot))) {
                Ok(Ok(())) => {}
                Ok(Err(e)) => {
                    failures += 1;
                    warn!(observer = handle.id(), error = %e, "Progress observer failed");
                }
                Err(_) => {
                    failures += 1;
                    warn!(observer = handle.id(), "Progress observer panicked");
                }
            }
        }

        // No subscribers is not an error.
        let _ = self.sender.send(snapshot.clone());
        failures
    }
}

impl Default for ProgressHub {
    fn default() -> Self {
        Self::new(scan_core::limits::PROGRESS_CHANNEL_CAPACITY)
    }
}

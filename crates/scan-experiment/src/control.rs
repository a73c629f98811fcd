//! Pause and cancellation hand-off between callers and the scan task.
//!
//! Cancellation is a [`CancellationToken`]; pause is a `watch` channel so a
//! paused scan sleeps until the flag changes instead of polling it. The scan
//! task observes both only at its checkpoints, so an in-flight device call
//! always completes first.

use std::sync::Arc;

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// What the scan task should do after a checkpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    /// Keep going.
    Continue,
    /// Stop the traversal.
    Cancelled,
}

/// Shared pause/cancel state of one scan.
#[derive(Debug, Clone)]
pub struct ScanControl {
    cancel: CancellationToken,
    paused: Arc<watch::Sender<bool>>,
}

impl ScanControl {
    /// Running, not cancelled.
    pub fn new() -> Self {
        let (paused, _) = watch::channel(false);
        Self {
            cancel: CancellationToken::new(),
            paused: Arc::new(paused),
        }
    }

    /// Request a pause. Returns false if already paused.
    pub fn pause(&self) -> bool {
        !self.paused.send_replace(true)
    }

    /// Lift a pause. Returns false if not paused.
    pub fn resume(&self) -> bool {
        self.paused.send_replace(false)
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// True while paused.
    pub fn is_paused(&self) -> bool {
        *self.paused.borrow()
    }

    /// True once cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Token that fires when the scan is cancelled.
    pub fn token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Block while paused, then report whether to continue.
    ///
    /// Cancellation wins over pause: a paused scan that is cancelled
    /// returns immediately.
    pub async fn checkpoint(&self) -> Checkpoint {
        if self.cancel.is_cancelled() {
            return Checkpoint::Cancelled;
        }

        let mut paused = self.paused.subscribe();
        if *paused.borrow_and_update() {
            debug!("Scan paused at checkpoint");
        }

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => Checkpoint::Cancelled,
            resumed = paused.wait_for(|p| !*p) => match resumed {
                Ok(_) if !self.cancel.is_cancelled() => Checkpoint::Continue,
                _ => Checkpoint::Cancelled,
            },
        }
    }
}

impl Default for ScanControl {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_checkpoint_passes_when_running() {
        let control = ScanControl::new();
        assert_eq!(control.checkpoint().await, Checkpoint::Continue);
    }

    #[tokio::test]
    async fn test_pause_and_resume_transitions() {
        let control = ScanControl::new();
        assert!(control.pause());
        assert!(!control.pause());
        assert!(control.is_paused());
        assert!(control.resume());
        assert!(!control.resume());
    }

    #[tokio::test]
    async fn test_checkpoint_blocks_until_resume() {
        let control = ScanControl::new();
        control.pause();

        let waiter = control.clone();
        let task = tokio::spawn(async move { waiter.checkpoint().await });

        tokio::time::sleep(Duration::from_millis(30)).await;
        assert!(!task.is_finished());

        control.resume();
        let outcome = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Checkpoint::Continue);
    }

    #[tokio::test]
    async fn test_cancel_releases_paused_checkpoint() {
        let control = ScanControl::new();
        control.pause();

        let waiter = control.clone();
        let task = tokio::spawn(async move { waiter.checkpoint().await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        control.cancel();
        let outcome = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(outcome, Checkpoint::Cancelled);
        assert!(control.token().is_cancelled());
    }
}

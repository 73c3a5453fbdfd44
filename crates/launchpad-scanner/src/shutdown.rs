//! Cooperative stop signal shared between the scan loop and its owner.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Notify;

#[derive(Default)]
struct Inner {
    stopped: AtomicBool,
    notify: Notify,
}

/// Cloneable stop flag. The scan loop checks it between iterations; a
/// request never interrupts a chunk, only the sleeps between them.
#[derive(Clone, Default)]
pub struct StopHandle(Arc<Inner>);

impl StopHandle {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn stop(&self) {
        self.0.stopped.store(true, Ordering::SeqCst);
        self.0.notify.notify_waiters();
    }

    pub fn is_stopped(&self) -> bool {
        self.0.stopped.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration`, returning early if a stop is requested.
    ///
    /// Returns `true` if the sleep was cut short by a stop.
    pub async fn sleep(&self, duration: Duration) -> bool {
        let notified = self.0.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent stop() is not missed.
        notified.as_mut().enable();
        if self.is_stopped() {
            return true;
        }
        tokio::select! {
            _ = tokio::time::sleep(duration) => self.is_stopped(),
            _ = notified => true,
        }
    }
}

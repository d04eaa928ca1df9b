//! Graceful shutdown coordination utilities.
//!
//! A [`ShutdownCoordinator`] is shared between the Ctrl+C handler and every
//! suspension point of the engine (quota waits, retry backoff, inter-page
//! delay) so a stop request interrupts sleeping tasks promptly and the last
//! committed cursor can be written out before exit.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

/// Shared handle to a shutdown coordinator.
pub type SharedShutdown = Arc<ShutdownCoordinator>;

/// Coordinates graceful shutdown across async tasks.
#[derive(Debug, Default)]
pub struct ShutdownCoordinator {
    is_shutdown: AtomicBool,
    notify: Notify,
}

impl ShutdownCoordinator {
    /// Create a new coordinator.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a new shared coordinator wrapped in [`Arc`].
    pub fn shared() -> SharedShutdown {
        Arc::new(Self::new())
    }

    /// Request shutdown. Notifies all registered waiters exactly once.
    pub fn request_shutdown(&self) {
        if !self.is_shutdown.swap(true, Ordering::SeqCst) {
            self.notify.notify_waiters();
        }
    }

    /// Whether shutdown has been requested.
    pub fn is_shutdown_requested(&self) -> bool {
        self.is_shutdown.load(Ordering::SeqCst)
    }

    /// Wait until shutdown is requested. Returns immediately if already set.
    pub async fn wait_for_shutdown(&self) {
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Register before checking the flag so a concurrent request cannot slip
        // between the check and the await.
        notified.as_mut().enable();
        if self.is_shutdown_requested() {
            return;
        }
        notified.await;
    }

    /// Sleep for `duration` unless shutdown is requested first.
    ///
    /// Returns `true` when the full duration elapsed, `false` when interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        self.sleep_until(tokio::time::Instant::now() + duration).await
    }

    /// Sleep until `deadline` unless shutdown is requested first.
    pub async fn sleep_until(&self, deadline: tokio::time::Instant) -> bool {
        if self.is_shutdown_requested() {
            return false;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => true,
            _ = self.wait_for_shutdown() => false,
        }
    }
}

/// Sleep on an optional coordinator; without one the sleep always completes.
pub async fn sleep_unless_shutdown(shutdown: Option<&SharedShutdown>, duration: Duration) -> bool {
    match shutdown {
        Some(handle) => handle.sleep(duration).await,
        None => {
            tokio::time::sleep(duration).await;
            true
        }
    }
}

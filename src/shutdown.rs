//! Graceful shutdown coordination
//!
//! A watch-channel token propagated from the orchestrator into every
//! suspension point: HTTP fetches, queue sends, rate-limiter waits, breaker
//! cooldowns. Cancellation is cooperative; holders finish the current batch
//! and stop at the batch boundary.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{info, warn};

/// Default grace period before a cancelled task is considered stuck
pub const DEFAULT_GRACE_SECS: u64 = 5;

/// Cancellation token cloned into every worker
#[derive(Debug, Clone)]
pub struct ShutdownToken {
    rx: watch::Receiver<bool>,
}

impl ShutdownToken {
    /// True once shutdown has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve when shutdown is requested. Returns immediately if it already
    /// was.
    pub async fn cancelled(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        // An Err means the controller dropped, which we treat as cancellation
        while self.rx.changed().await.is_ok() {
            if *self.rx.borrow() {
                return;
            }
        }
    }
}

/// Controller held by the orchestrator / main
pub struct ShutdownController {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
    requested: Arc<AtomicBool>,
}

impl ShutdownController {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            tx,
            rx,
            requested: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Hand out a token for a worker.
    pub fn token(&self) -> ShutdownToken {
        ShutdownToken {
            rx: self.rx.clone(),
        }
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }

    /// Request cooperative shutdown. Idempotent.
    pub fn request(&self) {
        if self.requested.swap(true, Ordering::SeqCst) {
            return;
        }
        info!("shutdown requested");
        let _ = self.tx.send(true);
    }

    /// Wait up to the grace period for a draining future, then give up.
    pub async fn drain_with_grace<F>(&self, name: &str, fut: F)
    where
        F: std::future::Future<Output = ()>,
    {
        match tokio::time::timeout(Duration::from_secs(DEFAULT_GRACE_SECS), fut).await {
            Ok(()) => info!("{} drained cleanly", name),
            Err(_) => warn!("{} did not drain within grace period", name),
        }
    }

    /// Trip the controller when ctrl-c arrives.
    pub fn spawn_signal_listener(self: &Arc<Self>) {
        let controller = self.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                controller.request();
            }
        });
    }
}

impl Default for ShutdownController {
    fn default() -> Self {
        Self::new()
    }
}

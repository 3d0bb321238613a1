/// Cooperative shutdown signal shared by every blocking call in a consumer
///
/// Wraps a `tokio::sync::watch` channel carrying `true` once shutdown is requested.
/// A dropped trigger counts as shutdown so receivers never spin on a closed channel.
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Sending half, owned by whoever decides the process should stop
#[derive(Debug)]
pub struct ShutdownTrigger {
    tx: watch::Sender<bool>,
}

/// Receiving half, cloned into each worker
#[derive(Debug, Clone)]
pub struct ShutdownSignal {
    rx: watch::Receiver<bool>,
    /// Keeps the channel open for `never()` signals
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl ShutdownTrigger {
    /// Request shutdown. Idempotent.
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn subscribe(&self) -> ShutdownSignal {
        ShutdownSignal {
            rx: self.tx.subscribe(),
            _keepalive: None,
        }
    }
}

impl ShutdownSignal {
    pub fn channel() -> (ShutdownTrigger, ShutdownSignal) {
        let (tx, rx) = watch::channel(false);
        (
            ShutdownTrigger { tx },
            ShutdownSignal {
                rx,
                _keepalive: None,
            },
        )
    }

    /// A signal that never fires, for callers without a shutdown path
    pub fn never() -> ShutdownSignal {
        let (tx, rx) = watch::channel(false);
        ShutdownSignal {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow() || self.rx.has_changed().is_err()
    }

    /// Resolve once shutdown has been requested
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        // Err means the trigger was dropped
        let _ = rx.wait_for(|stop| *stop).await;
    }

    /// Sleep for `duration` unless shutdown arrives first.
    ///
    /// Returns `true` if the full duration elapsed, `false` if interrupted.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_shutdown() {
            return false;
        }

        tokio::select! {
            biased;
            _ = self.cancelled() => false,
            _ = tokio::time::sleep(duration) => true,
        }
    }
}

//! Cooperative shutdown signalling
//!
//! A single `ShutdownHandle` is cancelled once (signal, error, or normal
//! completion) and every cloned `Shutdown` observes it: the sampler stops
//! after its in-flight tick and polling loops return `BenchError::Cancelled`
//! at their next check.

use std::sync::Arc;
use tokio::sync::watch;

/// Sender half. Owned by the runner; cancelling is idempotent.
pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

/// Receiver half, cheap to clone into background tasks.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
    // Keeps a `never()` channel alive so the sender side cannot drop.
    _keep: Option<Arc<watch::Sender<bool>>>,
}

/// Create a linked handle/receiver pair.
pub fn channel() -> (ShutdownHandle, Shutdown) {
    let (tx, rx) = watch::channel(false);
    (ShutdownHandle { tx }, Shutdown { rx, _keep: None })
}

impl ShutdownHandle {
    /// Signal cancellation to every receiver.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Create an additional receiver.
    pub fn subscribe(&self) -> Shutdown {
        Shutdown {
            rx: self.tx.subscribe(),
            _keep: None,
        }
    }
}

impl Shutdown {
    /// A receiver that never fires. Used by cleanup, which must run to
    /// completion even after the run itself was cancelled.
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Shutdown {
            rx,
            _keep: Some(Arc::new(tx)),
        }
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Wait until cancellation is requested. A dropped sender counts as
    /// cancelled so orphaned tasks cannot hang.
    pub async fn cancelled(&mut self) {
        loop {
            if *self.rx.borrow_and_update() {
                return;
            }
            if self.rx.changed().await.is_err() {
                return;
            }
        }
    }
}

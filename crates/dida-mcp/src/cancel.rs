use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable handle that aborts a running session from another task.
#[derive(Debug, Clone)]
pub struct SessionCancelHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl SessionCancelHandle {
    pub(crate) fn new() -> (Self, watch::Receiver<bool>) {
        let (tx, rx) = watch::channel(false);
        (Self { tx: Arc::new(tx) }, rx)
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Completes once the signal is raised or its sender is gone.
pub(crate) async fn wait_for_cancellation(cancel_rx: &mut watch::Receiver<bool>) {
    loop {
        if *cancel_rx.borrow() {
            break;
        }
        if cancel_rx.changed().await.is_err() {
            break;
        }
    }
}

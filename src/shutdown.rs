// ShutdownWatcher: cooperative graceful-shutdown signal shared across the
// admission pipeline and the server's accept loop.
//
// Not present in the original (which relies on process termination).
// Modeled the way the donor wires `tokio::sync::watch` for broadcast-style
// cancellation in its sidecar's lifecycle management.

use tokio::sync::watch;

#[derive(Clone)]
pub struct ShutdownWatcher {
    rx: watch::Receiver<bool>,
}

pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

impl ShutdownWatcher {
    pub fn new() -> (ShutdownHandle, Self) {
        let (tx, rx) = watch::channel(false);
        (ShutdownHandle { tx }, Self { rx })
    }

    pub fn is_shutting_down(&self) -> bool {
        *self.rx.borrow()
    }

    pub async fn wait(&mut self) {
        let _ = self.rx.changed().await;
    }
}

/// Resolves once either a ctrl-c or (on unix) a SIGTERM arrives.
pub async fn listen_for_termination() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install ctrl-c handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn trigger_wakes_waiters() {
        let (handle, mut watcher) = ShutdownWatcher::new();
        assert!(!watcher.is_shutting_down());
        handle.trigger();
        watcher.wait().await;
        assert!(watcher.is_shutting_down());
    }

    #[tokio::test]
    async fn clone_observes_same_signal() {
        let (handle, watcher) = ShutdownWatcher::new();
        let clone = watcher.clone();
        handle.trigger();
        assert!(clone.is_shutting_down());
    }
}

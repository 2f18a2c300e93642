use tokio::sync::watch;

/// Cooperative shutdown signal, cloneable into every task.
#[derive(Clone)]
pub struct Shutdown {
    rx: watch::Receiver<bool>,
}

pub struct ShutdownHandle {
    tx: watch::Sender<bool>,
}

impl Shutdown {
    pub fn new() -> (ShutdownHandle, Shutdown) {
        let (tx, rx) = watch::channel(false);
        (ShutdownHandle { tx }, Shutdown { rx })
    }

    pub fn is_shutdown(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves when shutdown is signalled (immediately if it already was).
    pub async fn wait(&mut self) {
        if *self.rx.borrow() {
            return;
        }
        // The sender staying alive for the process lifetime; a closed
        // channel also means we are going down
        let _ = self.rx.wait_for(|v| *v).await;
    }
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        let _ = self.tx.send(true);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn wait_resolves_after_trigger() {
        let (handle, mut shutdown) = Shutdown::new();
        assert!(!shutdown.is_shutdown());

        let waiter = tokio::spawn(async move {
            shutdown.wait().await;
            true
        });
        handle.trigger();
        assert!(waiter.await.unwrap());
    }

    #[tokio::test]
    async fn wait_after_trigger_is_immediate() {
        let (handle, mut shutdown) = Shutdown::new();
        handle.trigger();
        shutdown.wait().await;
        assert!(shutdown.is_shutdown());
    }
}

//! A minimal cancellation scope, built on `tokio::sync::watch` rather than
//! pulling in `tokio-util` for `CancellationToken` — `watch` is already in
//! scope via `tokio`'s `full` feature set, and this is a small enough piece
//! of machinery not to justify a new dependency.

use tokio::sync::watch;

#[derive(Clone)]
pub struct CancelScope {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancelScope {
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        CancelScope { tx, rx }
    }

    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolves once [`CancelScope::cancel`] has been called.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if *rx.borrow() {
            return;
        }
        let _ = rx.wait_for(|v| *v).await;
    }
}

impl Default for CancelScope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn cancel_wakes_waiter() {
        let scope = CancelScope::new();
        assert!(!scope.is_cancelled());
        let waiter = scope.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        scope.cancel();
        handle.await.unwrap();
        assert!(scope.is_cancelled());
    }
}

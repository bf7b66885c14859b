//! Cooperative cancellation shared between the UI and running operations.

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

/// Cloneable cancellation signal. Every clone observes the same flag.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(false);
        Self { tx: Arc::new(tx) }
    }

    pub fn cancel(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.tx.borrow()
    }

    /// Resolves once `cancel` has been called on any clone.
    pub async fn cancelled(&self) {
        let mut rx = self.tx.subscribe();
        // The sender lives in `self`, so `wait_for` can only fail if it is
        // dropped, which cannot happen while we borrow it.
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// Runs `fut` unless cancellation fires first, in which case `on_cancel`
    /// produces the error.
    pub async fn run<F, T, E>(&self, fut: F, on_cancel: impl FnOnce() -> E) -> Result<T, E>
    where
        F: Future<Output = Result<T, E>>,
    {
        if self.is_cancelled() {
            return Err(on_cancel());
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(on_cancel()),
            result = fut => result,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_run_completes_when_not_cancelled() {
        let token = CancelToken::new();
        let result: Result<u32, &str> = token.run(async { Ok(7) }, || "cancelled").await;
        assert_eq!(result, Ok(7));
    }

    #[tokio::test]
    async fn test_run_short_circuits_when_cancelled() {
        let token = CancelToken::new();
        token.clone().cancel();
        assert!(token.is_cancelled());
        let result: Result<u32, &str> = token
            .run(std::future::pending(), || "cancelled")
            .await;
        assert_eq!(result, Err("cancelled"));
    }

    #[tokio::test]
    async fn test_cancel_wakes_pending_operation() {
        let token = CancelToken::new();
        let trigger = token.clone();
        let handle = tokio::spawn(async move {
            token
                .run(std::future::pending::<Result<(), &str>>(), || "cancelled")
                .await
        });
        tokio::task::yield_now().await;
        trigger.cancel();
        assert_eq!(handle.await.unwrap(), Err("cancelled"));
    }
}

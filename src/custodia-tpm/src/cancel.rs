//! Cooperative cancellation for long-running TPM and I/O work.
//!
//! TPM commands and blocking syscalls cannot be preempted. The pattern used
//! throughout the agent is to run the blocking call on a worker, then `select!`
//! between the worker's result and this token; an abandoned worker finishes on
//! its own and its result is dropped.

use tokio::sync::watch;

/// A clonable one-shot cancellation signal.
///
/// Cancellation is sticky: once [`CancelToken::cancel`] has been called every
/// clone observes it, including clones taken afterwards.
#[derive(Debug, Clone)]
pub struct CancelToken {
    tx: watch::Sender<bool>,
    rx: watch::Receiver<bool>,
}

impl CancelToken {
    /// Create a fresh, un-cancelled token.
    #[must_use]
    pub fn new() -> Self {
        let (tx, rx) = watch::channel(false);
        Self { tx, rx }
    }

    /// Signal cancellation to every clone of this token.
    pub fn cancel(&self) {
        let _ = self.tx.send(true);
    }

    /// Whether cancellation has been signalled.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        *self.rx.borrow()
    }

    /// Resolve once cancellation is signalled.
    ///
    /// Never resolves on a token that is never cancelled.
    pub async fn cancelled(&self) {
        let mut rx = self.rx.clone();
        if rx.wait_for(|cancelled| *cancelled).await.is_err() {
            // All senders dropped without cancelling; stay pending forever so
            // the other select! arm wins.
            std::future::pending::<()>().await;
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn starts_uncancelled() {
        let token = CancelToken::new();
        assert!(!token.is_cancelled());
    }

    #[tokio::test]
    async fn cancel_is_seen_by_clones() {
        let token = CancelToken::new();
        let clone = token.clone();
        token.cancel();
        assert!(clone.is_cancelled());
        clone.cancelled().await; // resolves immediately
    }

    #[tokio::test]
    async fn cancelled_future_unblocks_select() {
        let token = CancelToken::new();
        let waiter = token.clone();

        let task = tokio::spawn(async move {
            tokio::select! {
                () = waiter.cancelled() => true,
                () = tokio::time::sleep(Duration::from_secs(5)) => false,
            }
        });

        token.cancel();
        assert!(task.await.unwrap());
    }
}

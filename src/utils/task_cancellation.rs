use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::debug;

/// Token for cancelling an advisory run
#[derive(Clone, Debug)]
pub struct CancellationToken {
    inner: Arc<TokenState>,
}

#[derive(Debug)]
struct TokenState {
    cancelled: AtomicBool,
    notify: Notify,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(TokenState {
                cancelled: AtomicBool::new(false),
                notify: Notify::new(),
            }),
        }
    }

    /// Cancel this token
    pub fn cancel(&self) {
        if !self.inner.cancelled.swap(true, Ordering::AcqRel) {
            self.inner.notify.notify_waiters();
        }
    }

    /// Check if cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::Acquire)
    }

    /// Resolves once the token is cancelled
    pub async fn cancelled(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            // Register before re-checking so a concurrent cancel is not missed.
            notified.as_mut().enable();
            if self.is_cancelled() {
                return;
            }
            notified.await;
        }
    }

    /// A token that is cancelled whenever this one is. Cancelling the child
    /// leaves this token untouched and releases the link. Must be called
    /// from within a tokio runtime.
    pub fn child_token(&self) -> CancellationToken {
        let child = CancellationToken::new();
        if self.is_cancelled() {
            child.cancel();
            return child;
        }
        let parent = self.clone();
        let linked = child.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = parent.cancelled() => linked.cancel(),
                _ = linked.cancelled() => {}
            }
        });
        child
    }

    /// Cancel this token once `timeout` elapses. Aborting the returned
    /// handle disarms the timer. The task yields `true` if the deadline
    /// tripped the token.
    pub fn cancel_after(&self, timeout: Duration) -> JoinHandle<bool> {
        let token = self.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = tokio::time::sleep(timeout) => {
                    debug!(timeout_ms = timeout.as_millis() as u64, "Run deadline reached, cancelling");
                    token.cancel();
                    true
                }
                _ = token.cancelled() => false,
            }
        })
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_token() {
        let token = CancellationToken::new();
        assert!(!token.is_cancelled());

        token.cancel();
        assert!(token.is_cancelled());

        // Clones share state
        let clone = token.clone();
        assert!(clone.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancelled_future_resolves() {
        let token = CancellationToken::new();
        let waiter = {
            let token = token.clone();
            tokio::spawn(async move { token.cancelled().await })
        };

        tokio::time::sleep(Duration::from_millis(10)).await;
        token.cancel();

        tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .expect("waiter should observe cancellation")
            .unwrap();
    }

    #[tokio::test]
    async fn test_cancel_after_trips_token() {
        let token = CancellationToken::new();
        let timer = token.cancel_after(Duration::from_millis(20));

        tokio::time::timeout(Duration::from_secs(1), token.cancelled())
            .await
            .expect("deadline should cancel the token");
        assert!(token.is_cancelled());
        assert!(timer.await.unwrap());
    }

    #[tokio::test]
    async fn test_cancel_before_deadline_reports_false() {
        let token = CancellationToken::new();
        let timer = token.cancel_after(Duration::from_secs(60));
        token.cancel();
        assert!(!timer.await.unwrap());
    }

    #[tokio::test]
    async fn test_child_follows_parent() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        assert!(!child.is_cancelled());

        parent.cancel();
        tokio::time::timeout(Duration::from_secs(1), child.cancelled())
            .await
            .expect("child should observe the parent's cancellation");

        let late = parent.child_token();
        assert!(late.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_deadline_leaves_parent_alone() {
        let parent = CancellationToken::new();
        let child = parent.child_token();
        let timer = child.cancel_after(Duration::from_millis(10));

        assert!(timer.await.unwrap());
        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test]
    async fn test_already_cancelled_returns_immediately() {
        let token = CancellationToken::new();
        token.cancel();
        tokio::time::timeout(Duration::from_millis(100), token.cancelled())
            .await
            .expect("cancelled() must not block once cancelled");
    }
}

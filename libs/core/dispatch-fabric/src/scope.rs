//! Hierarchical cancellation scope.
//!
//! Every blocking operation in the fabric accepts a `Scope` and unblocks
//! with a `Cancelled` outcome when the scope (or any ancestor) is cancelled.
//! A single primitive replaces per-component stop channels and removes the
//! classic "worker leaked after shutdown" failure mode.

use std::time::Duration;
use tokio_util::sync::CancellationToken;

/// A clonable, hierarchical cancellation handle.
///
/// Cancelling a scope cancels all scopes derived from it via [`Scope::child`]
/// or [`Scope::with_timeout`]. Cancellation is idempotent and non-recoverable;
/// create a new scope to resume work.
#[derive(Debug, Clone)]
pub struct Scope {
    token: CancellationToken,
}

impl Scope {
    /// Create a new root scope in the non-cancelled state.
    pub fn new() -> Self {
        Self {
            token: CancellationToken::new(),
        }
    }

    /// Derive a child scope.
    ///
    /// Cancelling the parent cancels the child; cancelling the child leaves
    /// the parent untouched.
    pub fn child(&self) -> Self {
        Self {
            token: self.token.child_token(),
        }
    }

    /// Derive a child scope that cancels itself after `deadline`.
    ///
    /// The timer task exits as soon as the child is cancelled, so callers
    /// that finish early should [`Scope::cancel`] the returned scope to reap
    /// the timer immediately.
    pub fn with_timeout(&self, deadline: Duration) -> Self {
        let child = self.child();
        let timer = child.token.clone();
        tokio::spawn(async move {
            tokio::select! {
                _ = timer.cancelled() => {}
                _ = tokio::time::sleep(deadline) => {
                    timer.cancel();
                }
            }
        });
        child
    }

    /// Cancel this scope and all descendants. Idempotent and safe from any task.
    pub fn cancel(&self) {
        self.token.cancel();
    }

    /// Returns true once this scope or any ancestor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.token.is_cancelled()
    }

    /// Wait until the scope is cancelled.
    ///
    /// Returns immediately if cancellation already happened.
    pub async fn cancelled(&self) {
        self.token.cancelled().await;
    }
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_cancel_is_idempotent() {
        let scope = Scope::new();
        assert!(!scope.is_cancelled());

        scope.cancel();
        scope.cancel();
        assert!(scope.is_cancelled());

        // Await after the fact returns immediately.
        scope.cancelled().await;
    }

    #[tokio::test]
    async fn test_parent_cancels_children() {
        let parent = Scope::new();
        let child = parent.child();
        let grandchild = child.child();

        parent.cancel();

        assert!(child.is_cancelled());
        assert!(grandchild.is_cancelled());
    }

    #[tokio::test]
    async fn test_child_cancel_leaves_parent_alive() {
        let parent = Scope::new();
        let child = parent.child();

        child.cancel();

        assert!(child.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_fires() {
        let parent = Scope::new();
        let scoped = parent.with_timeout(Duration::from_millis(100));

        assert!(!scoped.is_cancelled());
        scoped.cancelled().await;
        assert!(scoped.is_cancelled());
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn test_with_timeout_respects_parent_cancel() {
        let parent = Scope::new();
        let scoped = parent.with_timeout(Duration::from_secs(3600));

        parent.cancel();
        scoped.cancelled().await;
        assert!(scoped.is_cancelled());
    }

    #[tokio::test]
    async fn test_cancel_wakes_waiters() {
        let scope = Scope::new();
        let waiter = scope.clone();

        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
            true
        });

        scope.cancel();
        assert!(handle.await.expect("join failed"));
    }
}

//! Cancellation and deadline propagation (`spec.md` §5).
//!
//! A single cancellation tree roots at the Supervisor; canceling the root
//! propagates to every worker, transport and stream. `ExecutionContext`
//! pairs a [`tokio_util::sync::CancellationToken`] child with an optional
//! absolute deadline, and is threaded through every async boundary that
//! does I/O — dialing, registration RPC, stream reads/writes, backoff
//! sleeps — so all of them are cancellation-aware and deadline-honoring
//! without each one re-deriving a timeout from scratch.

use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

/// Read-only-ish view passed down call chains. Cheap to clone (an `Arc`
/// bump under the hood via `CancellationToken`, plus a `Copy` deadline).
#[derive(Clone)]
pub struct ExecutionContext {
    cancellation: CancellationToken,
    deadline: Option<Instant>,
}

impl ExecutionContext {
    /// A fresh root context with no deadline. Used once, at Supervisor
    /// construction; everything else derives from it via [`Self::child`]
    /// or [`Self::with_timeout`].
    pub fn root() -> Self {
        Self {
            cancellation: CancellationToken::new(),
            deadline: None,
        }
    }

    /// Derive a child context whose cancellation is linked to the parent:
    /// canceling the parent cancels the child, but canceling the child
    /// does not affect the parent (e.g. a single stream's cancellation
    /// must not tear down the whole connection).
    pub fn child(&self) -> Self {
        Self {
            cancellation: self.cancellation.child_token(),
            deadline: self.deadline,
        }
    }

    /// Derive a child context with a deadline no later than `timeout` from
    /// now, tightened against any deadline already in effect.
    pub fn with_timeout(&self, timeout: Duration) -> Self {
        let candidate = Instant::now() + timeout;
        let deadline = match self.deadline {
            Some(existing) if existing < candidate => Some(existing),
            _ => Some(candidate),
        };
        Self {
            cancellation: self.cancellation.child_token(),
            deadline,
        }
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn cancel(&self) {
        self.cancellation.cancel();
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    /// Remaining time until the deadline, or `None` if unset. A `Some(Duration::ZERO)`
    /// means the deadline has already passed.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn is_expired(&self) -> bool {
        matches!(self.remaining(), Some(d) if d.is_zero())
    }

    /// Race `fut` against cancellation and deadline. Returns `None` on
    /// either firing first, so every I/O call site in the workspace uses
    /// one call shape instead of hand-rolling `tokio::select!`.
    pub async fn run<F, T>(&self, fut: F) -> Option<T>
    where
        F: std::future::Future<Output = T>,
    {
        match self.deadline {
            Some(deadline) => {
                let sleep = tokio::time::sleep_until(deadline.into());
                tokio::pin!(sleep);
                tokio::select! {
                    _ = self.cancellation.cancelled() => None,
                    _ = &mut sleep => None,
                    out = fut => Some(out),
                }
            }
            None => {
                tokio::select! {
                    _ = self.cancellation.cancelled() => None,
                    out = fut => Some(out),
                }
            }
        }
    }
}

impl Default for ExecutionContext {
    fn default() -> Self {
        Self::root()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn child_cancelled_by_parent() {
        let root = ExecutionContext::root();
        let child = root.child();
        assert!(!child.is_cancelled());
        root.cancel();
        assert!(child.is_cancelled());
    }

    #[tokio::test]
    async fn child_cancellation_does_not_propagate_up() {
        let root = ExecutionContext::root();
        let child = root.child();
        child.cancel();
        assert!(!root.is_cancelled());
    }

    #[tokio::test]
    async fn run_returns_none_past_deadline() {
        let ctx = ExecutionContext::root().with_timeout(Duration::from_millis(1));
        tokio::time::sleep(Duration::from_millis(20)).await;
        let result = ctx.run(async { 42 }).await;
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn run_returns_value_before_deadline() {
        let ctx = ExecutionContext::root().with_timeout(Duration::from_secs(5));
        let result = ctx.run(async { 42 }).await;
        assert_eq!(result, Some(42));
    }
}

//! Flow-control windows (`spec.md` §4.C, §5, §8 invariant 3).
//!
//! A [`FlowWindow`] models either the per-connection or per-stream side of
//! the "sender must not transmit more bytes than the smaller of the two
//! windows since the last WINDOW_UPDATE" rule. It is intentionally dumb:
//! the transport implementation is responsible for consuming from *both*
//! the stream and connection window before sending a DATA frame, and for
//! replenishing both when the application drains the corresponding read
//! side. Backpressure is expressed by `consume` blocking (and being
//! cancellation/deadline-aware via [`ExecutionContext`]) while the window
//! is too small, not by returning an error.

use std::sync::atomic::{AtomicI64, Ordering};

use ferrule_core::context::ExecutionContext;
use ferrule_core::error::{CoreError, ErrorKind};
use tokio::sync::Notify;

/// WINDOW_UPDATE deltas must be `>= 1` and must not push the window past
/// `2^31 - 1` (`spec.md` §4.C).
pub const MAX_WINDOW: i64 = (1u64 << 31) as i64 - 1;

pub struct FlowWindow {
    available: AtomicI64,
    notify: Notify,
}

impl FlowWindow {
    pub fn new(initial: u32) -> Self {
        Self {
            available: AtomicI64::new(initial as i64),
            notify: Notify::new(),
        }
    }

    pub fn available(&self) -> i64 {
        self.available.load(Ordering::Acquire)
    }

    /// Non-blocking attempt to reserve `n` bytes. Returns `false` without
    /// mutating state if the window is too small.
    pub fn try_consume(&self, n: u32) -> bool {
        let n = n as i64;
        let mut current = self.available.load(Ordering::Acquire);
        loop {
            if current < n {
                return false;
            }
            match self.available.compare_exchange_weak(
                current,
                current - n,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(observed) => current = observed,
            }
        }
    }

    /// Block (in a cancellation/deadline-aware way) until `n` bytes of
    /// window are available, then reserve them. Returns `None` if the
    /// context is cancelled or its deadline passes first.
    pub async fn consume(&self, n: u32, ctx: &ExecutionContext) -> Option<()> {
        loop {
            if self.try_consume(n) {
                return Some(());
            }
            let notified = self.notify.notified();
            if ctx.run(notified).await.is_none() {
                return None;
            }
        }
    }

    /// Apply a WINDOW_UPDATE delta, waking any blocked senders. Rejects
    /// deltas that are zero or that would overflow the 2^31 ceiling — the
    /// transport implementation should RST the stream (or fail the
    /// connection, for a connection-level window) on this error rather
    /// than silently clamp.
    pub fn replenish(&self, delta: u32) -> Result<(), CoreError> {
        if delta == 0 {
            return Err(CoreError::new(
                "transport.window_update_zero",
                ErrorKind::Stream,
                "WINDOW_UPDATE delta must be >= 1",
            ));
        }
        let delta = delta as i64;
        let mut current = self.available.load(Ordering::Acquire);
        loop {
            let updated = current.checked_add(delta).filter(|v| *v <= MAX_WINDOW);
            let Some(updated) = updated else {
                return Err(CoreError::new(
                    "transport.window_overflow",
                    ErrorKind::Stream,
                    "WINDOW_UPDATE would overflow 2^31",
                ));
            };
            match self.available.compare_exchange_weak(
                current,
                updated,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => {
                    self.notify.notify_waiters();
                    return Ok(());
                }
                Err(observed) => current = observed,
            }
        }
    }

    /// Return previously-consumed bytes to the window, e.g. when a stream
    /// is destroyed and its allotment is returned to the connection-level
    /// pool (`spec.md` §4.C stream lifecycle). Unlike `replenish`, a zero
    /// delta is a harmless no-op rather than a protocol error, since this
    /// path is driven by internal bookkeeping, not peer frames.
    pub fn give_back(&self, delta: u32) {
        if delta == 0 {
            return;
        }
        self.available.fetch_add(delta as i64, Ordering::AcqRel);
        self.notify.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[test]
    fn try_consume_respects_available() {
        let w = FlowWindow::new(10);
        assert!(w.try_consume(6));
        assert!(!w.try_consume(6));
        assert!(w.try_consume(4));
        assert_eq!(w.available(), 0);
    }

    #[test]
    fn replenish_rejects_zero_and_overflow() {
        let w = FlowWindow::new(10);
        assert!(w.replenish(0).is_err());
        assert!(w.replenish(u32::MAX).is_err());
        assert!(w.replenish(5).is_ok());
        assert_eq!(w.available(), 15);
    }

    #[tokio::test]
    async fn consume_blocks_until_replenished() {
        let w = Arc::new(FlowWindow::new(0));
        let w2 = w.clone();
        let waiter = tokio::spawn(async move {
            let ctx = ExecutionContext::root();
            w2.consume(5, &ctx).await
        });
        tokio::time::sleep(Duration::from_millis(20)).await;
        w.replenish(5).unwrap();
        assert_eq!(waiter.await.unwrap(), Some(()));
    }

    #[tokio::test]
    async fn consume_honors_cancellation() {
        let w = FlowWindow::new(0);
        let ctx = ExecutionContext::root();
        let child = ctx.child();
        ctx.cancel();
        assert_eq!(w.consume(5, &child).await, None);
    }
}

//! Heartbeat bookkeeping shared by both transport implementations
//! (`spec.md` §4.C): emit a PING-equivalent after `heartbeat-interval` of
//! silence, and transition to `closed` with reason `heartbeat-timeout`
//! after `heartbeat-count` consecutive unacknowledged heartbeats. The
//! counter resets on any received frame, not only on PING acks.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

use ferrule_core::clock::Clock;

pub struct HeartbeatMonitor<C: Clock> {
    clock: C,
    interval: Duration,
    max_unacked: u32,
    last_activity_nanos: AtomicU64,
    unacked: AtomicU32,
    epoch: Instant,
}

impl<C: Clock> HeartbeatMonitor<C> {
    pub fn new(clock: C, interval: Duration, max_unacked: u32) -> Self {
        let epoch = clock.now();
        Self {
            last_activity_nanos: AtomicU64::new(0),
            clock,
            interval,
            max_unacked,
            unacked: AtomicU32::new(0),
            epoch,
        }
    }

    fn elapsed_since_epoch(&self, instant: Instant) -> u64 {
        instant.saturating_duration_since(self.epoch).as_nanos() as u64
    }

    /// Call on every received frame, PING or otherwise.
    pub fn record_received(&self) {
        let now = self.elapsed_since_epoch(self.clock.now());
        self.last_activity_nanos.store(now, Ordering::Release);
        self.unacked.store(0, Ordering::Release);
    }

    /// Whether `interval` has elapsed since the last received frame and a
    /// PING should be emitted now. Each call that returns `true` also
    /// increments the unacked counter, matching "emits a PING after
    /// heartbeat-interval of silence" being a recurring, not one-shot,
    /// condition.
    pub fn should_ping(&self) -> bool {
        let last = self.last_activity_nanos.load(Ordering::Acquire);
        let now = self.elapsed_since_epoch(self.clock.now());
        let elapsed = Duration::from_nanos(now.saturating_sub(last));
        if elapsed >= self.interval {
            self.unacked.fetch_add(1, Ordering::AcqRel);
            // Advance the silence window so repeated polls inside the same
            // interval don't each count as a new heartbeat.
            self.last_activity_nanos.store(now, Ordering::Release);
            true
        } else {
            false
        }
    }

    /// Whether the connection should transition to `closed` with
    /// `heartbeat-timeout`.
    pub fn is_timed_out(&self) -> bool {
        self.unacked.load(Ordering::Acquire) > self.max_unacked
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::sync::{Arc, Mutex};

    struct FakeClock {
        now: Mutex<Cell<Instant>>,
    }

    impl FakeClock {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                now: Mutex::new(Cell::new(Instant::now())),
            })
        }

        fn advance(&self, d: Duration) {
            let guard = self.now.lock().unwrap();
            guard.set(guard.get() + d);
        }
    }

    impl Clock for FakeClock {
        fn now(&self) -> Instant {
            self.now.lock().unwrap().get()
        }
    }

    #[test]
    fn resets_on_received_frame() {
        let clock = FakeClock::new();
        let interval = Duration::from_secs(10);
        let monitor = HeartbeatMonitor::new(clock.clone(), interval, 2);

        clock.advance(Duration::from_secs(11));
        assert!(monitor.should_ping());
        monitor.record_received();
        assert!(!monitor.is_timed_out());

        clock.advance(Duration::from_secs(5));
        assert!(!monitor.should_ping());
    }

    #[test]
    fn times_out_after_max_unacked() {
        let clock = FakeClock::new();
        let interval = Duration::from_secs(1);
        let monitor = HeartbeatMonitor::new(clock.clone(), interval, 2);

        for _ in 0..3 {
            clock.advance(Duration::from_secs(2));
            let _ = monitor.should_ping();
        }
        assert!(monitor.is_timed_out());
    }
}

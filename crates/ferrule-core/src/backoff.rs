//! Exponential backoff shared by the Connection Worker's `backoff` state,
//! the Edge Address Book's cooldown, and the Protocol Selector's rotation
//! cooldown (`spec.md` §4.A, §4.B, §4.H; §8 invariant 7: monotonically
//! non-decreasing until a successful `live`, then resets).

use std::time::Duration;

#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    pub initial: Duration,
    pub max: Duration,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
        }
    }
}

impl BackoffPolicy {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self { initial, max }
    }

    /// Delay for the `attempt`-th consecutive failure (0-indexed):
    /// `min(initial * 2^attempt, max)`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let shift = attempt.min(31);
        let scaled = self.initial.checked_mul(1u32 << shift);
        match scaled {
            Some(d) if d < self.max => d,
            _ => self.max,
        }
    }
}

/// Mutable per-slot backoff counter. `record_failure` advances
/// monotonically; `record_success` resets to zero.
#[derive(Clone, Copy, Debug, Default)]
pub struct BackoffState {
    attempts: u32,
}

impl BackoffState {
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn next_delay(&self, policy: &BackoffPolicy) -> Duration {
        policy.delay_for(self.attempts)
    }

    pub fn record_failure(&mut self) {
        self.attempts = self.attempts.saturating_add(1);
    }

    pub fn record_success(&mut self) {
        self.attempts = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn delay_doubles_until_capped() {
        let policy = BackoffPolicy::new(Duration::from_millis(100), Duration::from_secs(1));
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(2), Duration::from_millis(400));
        assert_eq!(policy.delay_for(3), Duration::from_millis(800));
        assert_eq!(policy.delay_for(4), Duration::from_secs(1));
        assert_eq!(policy.delay_for(10), Duration::from_secs(1));
    }

    #[test]
    fn state_is_monotonic_then_resets() {
        let policy = BackoffPolicy::new(Duration::from_millis(10), Duration::from_secs(10));
        let mut state = BackoffState::default();
        let mut last = state.next_delay(&policy);
        for _ in 0..5 {
            state.record_failure();
            let next = state.next_delay(&policy);
            assert!(next >= last);
            last = next;
        }
        state.record_success();
        assert_eq!(state.attempts(), 0);
        assert_eq!(state.next_delay(&policy), policy.delay_for(0));
    }
}

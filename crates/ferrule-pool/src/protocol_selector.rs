//! Protocol Selector (`spec.md` §4.B): decides which transport protocol a
//! Connection Worker dials next. `auto` rotates to the other protocol after
//! `max_failures` consecutive failures and puts the failing protocol in
//! cooldown; an explicit request or `strict-pq` never rotates — a failure
//! is surfaced to the caller instead of silently falling back.
//!
//! Open question (`spec.md` §9): strict-PQ vs. an account-level downgrade
//! flag. Decided here: `strict_pq` always wins. A connector configured
//! strict-PQ never dials the non-PQ protocol even if the account flag
//! requests a downgrade, since the operator's local configuration is the
//! stronger signal for a security-relevant constraint.

use std::sync::Mutex;
use std::time::{Duration, Instant};

use ferrule_core::error::{codes, CoreError, ErrorKind};
use ferrule_core::protocol::{ProtocolChoice, RequestedProtocol};

struct State {
    current: ProtocolChoice,
    failures: u32,
    /// The protocol we most recently rotated away from, and when it becomes
    /// eligible to be rotated back into. `record_failure` will not rotate
    /// into this protocol before that instant even once `failures` crosses
    /// the threshold again.
    cooldown: Option<(ProtocolChoice, Instant)>,
}

pub struct ProtocolSelector {
    requested: RequestedProtocol,
    strict_pq: bool,
    max_failures: u32,
    cooldown: Duration,
    state: Mutex<State>,
}

impl ProtocolSelector {
    pub fn new(
        requested: RequestedProtocol,
        strict_pq: bool,
        max_failures: u32,
        cooldown: Duration,
    ) -> Self {
        let initial = match requested {
            RequestedProtocol::Explicit(p) => p,
            // `auto` starts on QUIC (`spec.md` §4.B point 3).
            RequestedProtocol::Auto => ProtocolChoice::Quic,
        };
        Self {
            requested,
            strict_pq,
            max_failures,
            cooldown,
            state: Mutex::new(State {
                current: initial,
                failures: 0,
                cooldown: None,
            }),
        }
    }

    fn can_rotate(&self) -> bool {
        !self.strict_pq && matches!(self.requested, RequestedProtocol::Auto)
    }

    pub fn current(&self) -> ProtocolChoice {
        self.state.lock().unwrap().current
    }

    /// Record a dial/registration failure against the current protocol.
    /// Returns the protocol to use on the next attempt.
    pub fn record_failure(&self) -> Result<ProtocolChoice, CoreError> {
        let mut state = self.state.lock().unwrap();
        state.failures += 1;

        if !self.can_rotate() {
            if self.strict_pq {
                tracing::warn!(protocol = ?state.current, "strict-pq violation: refusing to rotate");
                return Err(CoreError::new(
                    codes::STRICT_PQ_VIOLATION,
                    ErrorKind::TransportFatalForSlot,
                    "strict-pq is set; refusing to fall back to a non-PQ protocol",
                ));
            }
            return Ok(state.current);
        }

        if state.failures >= self.max_failures {
            let now = Instant::now();
            let target = state.current.other();
            let target_is_cooling = matches!(state.cooldown, Some((p, until)) if p == target && now < until);
            if !target_is_cooling {
                let leaving = state.current;
                state.cooldown = Some((leaving, now + self.cooldown));
                state.current = target;
                state.failures = 0;
                tracing::debug!(from = ?leaving, to = ?target, "rotating transport protocol after repeated failures");
            }
            // else: stay put and keep accumulating failures until the
            // target's cooldown lapses, per spec.md §4.B point 3.
        }
        Ok(state.current)
    }

    pub fn record_success(&self) {
        let mut state = self.state.lock().unwrap();
        state.failures = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_request_never_rotates() {
        let selector = ProtocolSelector::new(
            RequestedProtocol::Explicit(ProtocolChoice::Quic),
            false,
            1,
            Duration::from_secs(60),
        );
        for _ in 0..5 {
            assert_eq!(selector.record_failure().unwrap(), ProtocolChoice::Quic);
        }
    }

    #[test]
    fn auto_rotates_after_max_failures() {
        let selector = ProtocolSelector::new(RequestedProtocol::Auto, false, 2, Duration::from_secs(60));
        assert_eq!(selector.current(), ProtocolChoice::Quic);
        selector.record_failure().unwrap();
        let next = selector.record_failure().unwrap();
        assert_eq!(next, ProtocolChoice::FramedMux);
    }

    #[test]
    fn strict_pq_rejects_rotation_with_violation_error() {
        let selector = ProtocolSelector::new(RequestedProtocol::Auto, true, 1, Duration::from_secs(60));
        let err = selector.record_failure().unwrap_err();
        assert_eq!(err.code(), codes::STRICT_PQ_VIOLATION);
    }

    #[test]
    fn rotating_back_is_blocked_during_the_target_cooldown() {
        let selector = ProtocolSelector::new(RequestedProtocol::Auto, false, 1, Duration::from_secs(3600));
        // Quic fails once -> rotate to FramedMux, Quic now cooling.
        assert_eq!(selector.record_failure().unwrap(), ProtocolChoice::FramedMux);
        // FramedMux immediately fails -> would rotate back to Quic, but
        // Quic is still cooling down, so we stay on FramedMux instead.
        assert_eq!(selector.record_failure().unwrap(), ProtocolChoice::FramedMux);
        assert_eq!(selector.record_failure().unwrap(), ProtocolChoice::FramedMux);
    }

    #[test]
    fn success_resets_failure_counter() {
        let selector = ProtocolSelector::new(RequestedProtocol::Auto, false, 2, Duration::from_secs(60));
        selector.record_failure().unwrap();
        selector.record_success();
        let next = selector.record_failure().unwrap();
        assert_eq!(next, ProtocolChoice::Quic);
    }
}

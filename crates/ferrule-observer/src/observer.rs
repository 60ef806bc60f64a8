//! Observer (`spec.md` §4.J): a non-blocking pub-sub sink for connection
//! lifecycle events. Built on `tokio::sync::broadcast` — a slow subscriber
//! lags and drops its oldest unread events rather than stalling the
//! publisher, which is exactly the "coalescing" behavior `spec.md`
//! requires.

use std::sync::Mutex;
use std::time::Instant;

use ferrule_core::error::CoreError;
use ferrule_router::RejectionSink;
use tokio::sync::broadcast;

use crate::event::Event;

const CHANNEL_CAPACITY: usize = 256;

/// Publishes [`Event`]s and records the most recent pushed-ruleset
/// rejection (`spec.md` §4.F) outside the fixed event vocabulary, since
/// §4.J enumerates the pub-sub vocabulary as closed.
pub struct Observer {
    sender: broadcast::Sender<Event>,
    last_rejection: Mutex<Option<(String, Instant)>>,
}

impl Observer {
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { sender, last_rejection: Mutex::new(None) }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.sender.subscribe()
    }

    /// Publishes `event`. Never blocks; if there are no subscribers the
    /// event is simply dropped.
    pub fn publish(&self, event: Event) {
        let _ = self.sender.send(event);
    }

    pub fn connected(&self, index: usize) {
        self.publish(Event::Connected(index));
    }

    pub fn disconnected(&self, index: usize, reason: impl Into<String>) {
        self.publish(Event::Disconnected(index, reason.into()));
    }

    pub fn reconnecting(&self, index: usize) {
        self.publish(Event::Reconnecting(index));
    }

    pub fn url_assigned(&self, url: impl Into<String>) {
        self.publish(Event::UrlAssigned(url.into()));
    }

    pub fn last_rejection(&self) -> Option<(String, Instant)> {
        self.last_rejection.lock().unwrap().clone()
    }
}

impl Default for Observer {
    fn default() -> Self {
        Self::new()
    }
}

impl RejectionSink for Observer {
    fn ruleset_rejected(&self, reason: &CoreError) {
        tracing::debug!(code = reason.code(), "recording ruleset rejection");
        *self.last_rejection.lock().unwrap() = Some((reason.code().to_string(), Instant::now()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let observer = Observer::new();
        let mut rx = observer.subscribe();
        observer.connected(0);
        assert_eq!(rx.recv().await.unwrap(), Event::Connected(0));
    }

    #[tokio::test]
    async fn publishing_with_no_subscribers_does_not_panic_or_block() {
        let observer = Observer::new();
        observer.connected(0);
        observer.disconnected(0, "heartbeat-timeout");
    }

    #[tokio::test]
    async fn a_slow_subscriber_lags_instead_of_stalling_the_publisher() {
        let observer = Observer::new();
        let mut rx = observer.subscribe();
        for i in 0..CHANNEL_CAPACITY + 10 {
            observer.connected(i);
        }
        // The publisher never blocked above; the lagging receiver now
        // observes a `Lagged` error instead of every historical event.
        let err = rx.recv().await.unwrap_err();
        assert!(matches!(err, tokio::sync::broadcast::error::RecvError::Lagged(_)));
    }

    #[test]
    fn ruleset_rejection_is_recorded_outside_the_broadcast_vocabulary() {
        use ferrule_core::error::{codes, ErrorKind};
        let observer = Observer::new();
        assert!(observer.last_rejection().is_none());
        observer.ruleset_rejected(&CoreError::new(codes::INVALID_RULESET, ErrorKind::Validation, "bad"));
        let (code, _) = observer.last_rejection().unwrap();
        assert_eq!(code, codes::INVALID_RULESET);
    }
}

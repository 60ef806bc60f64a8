//! Readiness exporter (`spec.md` §4.J, §7): "ready" with a live count once
//! at least one Connection Worker is live, "not-ready" otherwise.

use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;

use crate::event::Event;
use crate::observer::Observer;

struct Shared {
    live: Mutex<HashSet<usize>>,
    count: AtomicUsize,
}

/// Tracks live-worker count by subscribing to the Observer's event stream.
pub struct ReadinessExporter {
    shared: Arc<Shared>,
}

impl ReadinessExporter {
    /// Subscribes to `observer` and spawns a task that keeps the live-worker
    /// set up to date. The returned `JoinHandle` finishes once every
    /// `Observer` clone (and its `Sender`) is dropped.
    pub fn spawn(observer: &Observer) -> (Self, JoinHandle<()>) {
        let shared = Arc::new(Shared { live: Mutex::new(HashSet::new()), count: AtomicUsize::new(0) });
        let mut rx = observer.subscribe();
        let task_shared = shared.clone();
        let handle = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(Event::Connected(index)) => {
                        task_shared.live.lock().unwrap().insert(index);
                        task_shared.count.store(task_shared.live.lock().unwrap().len(), Ordering::Release);
                    }
                    Ok(Event::Disconnected(index, _)) => {
                        task_shared.live.lock().unwrap().remove(&index);
                        task_shared.count.store(task_shared.live.lock().unwrap().len(), Ordering::Release);
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });
        (Self { shared }, handle)
    }

    pub fn live_count(&self) -> usize {
        self.shared.count.load(Ordering::Acquire)
    }

    pub fn is_ready(&self) -> bool {
        self.live_count() > 0
    }
}

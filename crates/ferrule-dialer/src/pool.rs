//! Idle-connection pool (`spec.md` §4.D): keeps up to `max_idle_per_key`
//! idle connections per destination, evicting entries once they've been
//! idle longer than `keepalive_timeout`. Generic over the connection type
//! so the HTTP and unix-socket dialers can share one implementation.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;

struct Idle<T> {
    conn: T,
    idle_since: Instant,
}

pub struct ConnectionPool<T> {
    entries: DashMap<String, Mutex<VecDeque<Idle<T>>>>,
    max_idle_per_key: usize,
    keepalive_timeout: Duration,
}

impl<T> ConnectionPool<T> {
    pub fn new(max_idle_per_key: usize, keepalive_timeout: Duration) -> Self {
        Self { entries: DashMap::new(), max_idle_per_key, keepalive_timeout }
    }

    /// Pops the most recently returned, still-fresh connection for `key`,
    /// discarding any expired entries found along the way.
    pub fn checkout(&self, key: &str) -> Option<T> {
        let bucket = self.entries.get(key)?;
        let mut queue = bucket.lock().unwrap();
        let now = Instant::now();
        while let Some(idle) = queue.pop_back() {
            if now.duration_since(idle.idle_since) < self.keepalive_timeout {
                return Some(idle.conn);
            }
        }
        None
    }

    /// Returns `conn` to the pool for `key`. Dropped silently if the
    /// destination's idle bucket is already at capacity.
    pub fn checkin(&self, key: &str, conn: T) {
        if self.max_idle_per_key == 0 {
            return;
        }
        let bucket = self.entries.entry(key.to_string()).or_insert_with(|| Mutex::new(VecDeque::new()));
        let mut queue = bucket.lock().unwrap();
        if queue.len() >= self.max_idle_per_key {
            queue.pop_front();
        }
        queue.push_back(Idle { conn, idle_since: Instant::now() });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn checkout_returns_none_for_unknown_key() {
        let pool: ConnectionPool<u32> = ConnectionPool::new(4, Duration::from_secs(60));
        assert!(pool.checkout("a").is_none());
    }

    #[test]
    fn checked_in_connection_is_checked_out() {
        let pool = ConnectionPool::new(4, Duration::from_secs(60));
        pool.checkin("a", 7u32);
        assert_eq!(pool.checkout("a"), Some(7));
        assert_eq!(pool.checkout("a"), None);
    }

    #[test]
    fn capacity_evicts_oldest_entry() {
        let pool = ConnectionPool::new(1, Duration::from_secs(60));
        pool.checkin("a", 1u32);
        pool.checkin("a", 2u32);
        assert_eq!(pool.checkout("a"), Some(2));
        assert_eq!(pool.checkout("a"), None);
    }

    #[test]
    fn expired_entry_is_not_returned() {
        let pool = ConnectionPool::new(4, Duration::from_millis(0));
        pool.checkin("a", 1u32);
        std::thread::sleep(Duration::from_millis(5));
        assert_eq!(pool.checkout("a"), None);
    }

    #[test]
    fn zero_capacity_pool_never_retains_connections() {
        let pool = ConnectionPool::new(0, Duration::from_secs(60));
        pool.checkin("a", 1u32);
        assert_eq!(pool.checkout("a"), None);
    }
}

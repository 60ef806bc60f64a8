//! Flow Table (`spec.md` §4.G): a `DashMap`-backed store correlating
//! datagram replies with their originating flow — concurrent-safe
//! create/lookup/remove keyed by a stable numeric flow-id.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use ferrule_core::error::{codes, CoreError, ErrorKind};

use crate::key::FlowKey;

/// Opaque identifier for one flow, unique among currently-live flows
/// (`spec.md` §8 property 6). Freed ids are recycled once their flow is
/// evicted, so this is not a monotonically unique value over the process
/// lifetime — only among flows alive at the same instant.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash)]
pub struct FlowId(u64);

struct FlowRecord {
    flow_id: FlowId,
    last_activity: Instant,
    upstream_stream_id: u64,
}

/// `max_active_flows == 0` disables the capacity cap entirely (`spec.md`
/// §4.G, §8 boundary behavior).
pub struct FlowTable {
    entries: DashMap<FlowKey, FlowRecord>,
    by_id: DashMap<FlowId, FlowKey>,
    free_ids: Mutex<Vec<u64>>,
    next_id: AtomicU64,
    funnel_timeout: Duration,
    max_active_flows: usize,
}

impl FlowTable {
    pub fn new(funnel_timeout: Duration, max_active_flows: usize) -> Self {
        Self {
            entries: DashMap::new(),
            by_id: DashMap::new(),
            free_ids: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(1),
            funnel_timeout,
            max_active_flows,
        }
    }

    /// Records activity on `key`, the way sending or receiving one
    /// datagram does. Creates a fresh flow if none exists yet; otherwise
    /// refreshes `last_activity` on the existing one. Fails with
    /// `no-free-flow-slot` if the table is at capacity and no entry is
    /// idle enough to evict.
    pub fn touch(&self, key: FlowKey, upstream_stream_id: u64) -> Result<FlowId, CoreError> {
        if let Some(mut entry) = self.entries.get_mut(&key) {
            entry.last_activity = Instant::now();
            return Ok(entry.flow_id);
        }

        if self.max_active_flows != 0 && self.entries.len() >= self.max_active_flows {
            self.evict_one_idle()?;
        }

        let flow_id = self.allocate_id();
        match self.entries.entry(key) {
            Entry::Occupied(occupied) => Ok(occupied.get().flow_id),
            Entry::Vacant(vacant) => {
                vacant.insert(FlowRecord { flow_id, last_activity: Instant::now(), upstream_stream_id });
                self.by_id.insert(flow_id, key);
                Ok(flow_id)
            }
        }
    }

    /// Looks up the flow key for an inbound reply's flow-id, so it can be
    /// routed back to the originating upstream stream.
    pub fn lookup(&self, flow_id: FlowId) -> Option<FlowKey> {
        self.by_id.get(&flow_id).map(|entry| *entry)
    }

    pub fn upstream_stream_id(&self, key: &FlowKey) -> Option<u64> {
        self.entries.get(key).map(|e| e.upstream_stream_id)
    }

    /// Evicts every flow idle for at least `funnel_timeout`. Call
    /// periodically from a background task.
    pub fn evict_idle(&self) {
        let now = Instant::now();
        let stale: Vec<FlowKey> = self
            .entries
            .iter()
            .filter(|entry| now.duration_since(entry.last_activity) >= self.funnel_timeout)
            .map(|entry| *entry.key())
            .collect();
        if !stale.is_empty() {
            tracing::debug!(count = stale.len(), "evicting idle flows");
        }
        for key in stale {
            self.remove(&key);
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn remove(&self, key: &FlowKey) {
        if let Some((_, entry)) = self.entries.remove(key) {
            self.by_id.remove(&entry.flow_id);
            self.free_ids.lock().unwrap().push(entry.flow_id.0);
        }
    }

    fn evict_one_idle(&self) -> Result<(), CoreError> {
        let now = Instant::now();
        let oldest = self
            .entries
            .iter()
            .filter(|entry| now.duration_since(entry.last_activity) >= self.funnel_timeout)
            .min_by_key(|entry| entry.last_activity)
            .map(|entry| *entry.key());

        match oldest {
            Some(key) => {
                tracing::debug!(key = ?key, "evicting oldest idle flow to make room");
                self.remove(&key);
                Ok(())
            }
            None => Err(CoreError::new(
                codes::FLOW_TABLE_FULL,
                ErrorKind::Stream,
                "flow table is at capacity and no flow is idle enough to evict",
            )),
        }
    }

    fn allocate_id(&self) -> FlowId {
        if let Some(reused) = self.free_ids.lock().unwrap().pop() {
            return FlowId(reused);
        }
        FlowId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    fn udp_key(port: u16) -> FlowKey {
        FlowKey::Udp {
            src_addr: Ipv4Addr::new(10, 0, 0, 1).into(),
            src_port: port,
            dst_addr: Ipv4Addr::new(10, 0, 0, 2).into(),
            dst_port: 53,
        }
    }

    #[test]
    fn touching_the_same_key_twice_returns_the_same_flow_id() {
        let table = FlowTable::new(Duration::from_secs(10), 0);
        let a = table.touch(udp_key(1000), 7).unwrap();
        let b = table.touch(udp_key(1000), 7).unwrap();
        assert_eq!(a, b);
        assert_eq!(table.len(), 1);
    }

    #[test]
    fn distinct_keys_get_distinct_flow_ids() {
        let table = FlowTable::new(Duration::from_secs(10), 0);
        let a = table.touch(udp_key(1000), 7).unwrap();
        let b = table.touch(udp_key(1001), 7).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn lookup_resolves_flow_id_back_to_its_key() {
        let table = FlowTable::new(Duration::from_secs(10), 0);
        let id = table.touch(udp_key(1000), 42).unwrap();
        assert_eq!(table.lookup(id), Some(udp_key(1000)));
        assert_eq!(table.upstream_stream_id(&udp_key(1000)), Some(42));
    }

    #[test]
    fn evict_idle_removes_stale_flows_and_frees_their_id_for_reuse() {
        let table = FlowTable::new(Duration::from_millis(0), 0);
        let first = table.touch(udp_key(1000), 1).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        table.evict_idle();
        assert!(table.is_empty());
        let second = table.touch(udp_key(1001), 1).unwrap();
        assert_eq!(first, second, "freed id should be recycled by the next allocation");
    }

    #[test]
    fn capacity_cap_rejects_new_flow_when_nothing_is_idle() {
        let table = FlowTable::new(Duration::from_secs(10), 1);
        table.touch(udp_key(1000), 1).unwrap();
        let err = table.touch(udp_key(1001), 1).unwrap_err();
        assert_eq!(err.code(), codes::FLOW_TABLE_FULL);
    }

    #[test]
    fn zero_max_active_flows_disables_the_capacity_cap() {
        let table = FlowTable::new(Duration::from_secs(10), 0);
        for port in 0..50 {
            table.touch(udp_key(port), 1).unwrap();
        }
        assert_eq!(table.len(), 50);
    }

    #[test]
    fn capacity_cap_evicts_the_oldest_idle_flow_to_make_room() {
        let table = FlowTable::new(Duration::from_millis(0), 1);
        let first = table.touch(udp_key(1000), 1).unwrap();
        std::thread::sleep(Duration::from_millis(5));
        let second = table.touch(udp_key(1001), 1).unwrap();
        assert_eq!(table.lookup(first), None);
        assert_eq!(table.lookup(second), Some(udp_key(1001)));
    }
}

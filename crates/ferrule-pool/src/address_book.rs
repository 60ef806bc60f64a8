//! Edge Address Book (`spec.md` §4.A): resolves the edge hostname, filters
//! by IP-family preference, verifies each candidate is actually bindable
//! before handing it out, and round-robins across the survivors with a
//! per-address cooldown so one bad address doesn't get retried every time.

use std::net::SocketAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::{Duration, Instant};

use ferrule_core::error::{codes, CoreError, ErrorKind};
use ferrule_core::net::{EdgeAddress, IpFamily};
use tokio::net::UdpSocket;

struct Entry {
    address: EdgeAddress,
    cooled_until: Option<Instant>,
    consecutive_failures: u32,
}

pub struct AddressBook {
    host: String,
    port: u16,
    family: IpFamily,
    cooldown: Duration,
    entries: Mutex<Vec<Entry>>,
    cursor: AtomicUsize,
}

impl AddressBook {
    pub fn new(host: impl Into<String>, port: u16, family: IpFamily, cooldown: Duration) -> Self {
        Self {
            host: host.into(),
            port,
            family,
            cooldown,
            entries: Mutex::new(Vec::new()),
            cursor: AtomicUsize::new(0),
        }
    }

    /// Re-resolve the edge hostname and rebuild the candidate set. Existing
    /// cooldowns are preserved for addresses that are still present, so a
    /// refresh doesn't give a recently-failed address a clean slate.
    pub async fn refresh(&self) -> Result<(), CoreError> {
        let resolved = tokio::net::lookup_host((self.host.as_str(), self.port))
            .await
            .map_err(|e| {
                CoreError::new(codes::NO_EDGE_ADDRESSES, ErrorKind::TransportTransient, e.to_string())
            })?;

        let mut verified = Vec::new();
        for socket_addr in resolved {
            if !self.family.accepts(&socket_addr) {
                continue;
            }
            if bind_verify(socket_addr).await.is_ok() {
                verified.push(EdgeAddress::new(self.host.clone(), socket_addr));
            }
        }

        if verified.is_empty() {
            tracing::warn!(host = %self.host, "resolution produced no bindable edge addresses");
            return Err(CoreError::new(
                codes::NO_EDGE_ADDRESSES,
                ErrorKind::TransportTransient,
                format!("no bindable edge addresses for `{}`", self.host),
            ));
        }
        tracing::debug!(host = %self.host, count = verified.len(), "refreshed edge address book");

        let mut entries = self.entries.lock().unwrap();
        let previous = std::mem::take(&mut *entries);
        *entries = verified
            .into_iter()
            .map(|address| {
                let carried = previous.iter().find(|e| e.address == address);
                Entry {
                    address,
                    cooled_until: carried.and_then(|e| e.cooled_until),
                    consecutive_failures: carried.map(|e| e.consecutive_failures).unwrap_or(0),
                }
            })
            .collect();
        Ok(())
    }

    /// Round-robin over addresses whose cooldown has elapsed. Fails with
    /// `no-edge-addresses` if the book is empty or every address is cooling
    /// down.
    pub fn next(&self) -> Result<EdgeAddress, CoreError> {
        let entries = self.entries.lock().unwrap();
        if entries.is_empty() {
            return Err(CoreError::new(
                codes::NO_EDGE_ADDRESSES,
                ErrorKind::TransportTransient,
                "address book has not been populated",
            ));
        }
        let now = Instant::now();
        let len = entries.len();
        let start = self.cursor.fetch_add(1, Ordering::Relaxed) % len;
        for offset in 0..len {
            let idx = (start + offset) % len;
            let entry = &entries[idx];
            if entry.cooled_until.map(|until| now >= until).unwrap_or(true) {
                return Ok(entry.address.clone());
            }
        }
        Err(CoreError::new(
            codes::NO_EDGE_ADDRESSES,
            ErrorKind::TransportTransient,
            "every known edge address is cooling down",
        ))
    }

    /// Put `address` into cooldown unconditionally, regardless of its
    /// failure count.
    fn mark_cooldown(&self, entry: &mut Entry) {
        entry.cooled_until = Some(Instant::now() + self.cooldown);
        entry.consecutive_failures = 0;
        tracing::debug!(address = %entry.address.socket_addr, cooldown = ?self.cooldown, "address entering cooldown");
    }

    /// Records a dial or registration failure against `address` (`spec.md`
    /// §4.A: "subject to max-retries-per-address before marking an address
    /// temporarily unusable"). Only cools the address down once
    /// `max_retries` consecutive failures have accumulated; `max_retries ==
    /// 0` cools down on the very first failure.
    pub fn record_dial_failure(&self, address: &EdgeAddress, max_retries: u32) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| &e.address == address) {
            entry.consecutive_failures += 1;
            if entry.consecutive_failures >= max_retries.max(1) {
                self.mark_cooldown(entry);
            }
        }
    }

    /// Clears the failure streak for `address` after a successful dial and
    /// registration, so a single flaky attempt years ago doesn't count
    /// toward today's cooldown threshold.
    pub fn record_dial_success(&self, address: &EdgeAddress) {
        let mut entries = self.entries.lock().unwrap();
        if let Some(entry) = entries.iter_mut().find(|e| &e.address == address) {
            entry.consecutive_failures = 0;
        }
    }

    pub fn len(&self) -> usize {
        self.entries.lock().unwrap().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

async fn bind_verify(addr: SocketAddr) -> std::io::Result<()> {
    let local: SocketAddr = if addr.is_ipv4() {
        "0.0.0.0:0".parse().unwrap()
    } else {
        "[::]:0".parse().unwrap()
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(addr).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> EdgeAddress {
        EdgeAddress::new("edge.example.internal", SocketAddr::from(([127, 0, 0, 1], port)))
    }

    #[test]
    fn next_fails_on_empty_book() {
        let book = AddressBook::new("edge.example.internal", 7844, IpFamily::Auto, Duration::from_secs(30));
        assert!(book.next().is_err());
    }

    #[test]
    fn round_robins_across_entries() {
        let book = AddressBook::new("edge.example.internal", 7844, IpFamily::Auto, Duration::from_secs(30));
        *book.entries.lock().unwrap() = vec![
            Entry { address: addr(1), cooled_until: None, consecutive_failures: 0 },
            Entry { address: addr(2), cooled_until: None, consecutive_failures: 0 },
        ];
        let first = book.next().unwrap();
        let second = book.next().unwrap();
        assert_ne!(first, second);
    }

    #[test]
    fn cooled_down_address_is_skipped() {
        let book = AddressBook::new("edge.example.internal", 7844, IpFamily::Auto, Duration::from_secs(30));
        *book.entries.lock().unwrap() = vec![
            Entry { address: addr(1), cooled_until: None, consecutive_failures: 0 },
            Entry { address: addr(2), cooled_until: None, consecutive_failures: 0 },
        ];
        book.record_dial_failure(&addr(1), 1);
        for _ in 0..4 {
            assert_eq!(book.next().unwrap(), addr(2));
        }
    }

    #[test]
    fn all_cooled_down_is_no_edge_addresses() {
        let book = AddressBook::new("edge.example.internal", 7844, IpFamily::Auto, Duration::from_secs(30));
        *book.entries.lock().unwrap() = vec![Entry { address: addr(1), cooled_until: None, consecutive_failures: 0 }];
        book.record_dial_failure(&addr(1), 1);
        assert!(book.next().is_err());
    }

    #[test]
    fn failures_below_max_retries_do_not_cool_down() {
        let book = AddressBook::new("edge.example.internal", 7844, IpFamily::Auto, Duration::from_secs(30));
        *book.entries.lock().unwrap() = vec![Entry { address: addr(1), cooled_until: None, consecutive_failures: 0 }];
        book.record_dial_failure(&addr(1), 3);
        book.record_dial_failure(&addr(1), 3);
        assert_eq!(book.next().unwrap(), addr(1));
        book.record_dial_failure(&addr(1), 3);
        assert!(book.next().is_err());
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let book = AddressBook::new("edge.example.internal", 7844, IpFamily::Auto, Duration::from_secs(30));
        *book.entries.lock().unwrap() = vec![Entry { address: addr(1), cooled_until: None, consecutive_failures: 0 }];
        book.record_dial_failure(&addr(1), 3);
        book.record_dial_failure(&addr(1), 3);
        book.record_dial_success(&addr(1));
        book.record_dial_failure(&addr(1), 3);
        assert_eq!(book.next().unwrap(), addr(1), "streak reset so one more failure shouldn't cool it down");
    }
}

//! Known peer addresses with recency-weighted sampling.

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use rand::Rng;

/// Addresses older than this are considered expired.
pub const ADDR_TTL: u32 = 3 * 60 * 60;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerAddress {
    pub addr: SocketAddr,
    /// Unix seconds the address was last reported alive.
    pub last_seen: u32,
}

impl PeerAddress {
    pub fn new(addr: SocketAddr, last_seen: u32) -> Self {
        Self { addr, last_seen }
    }

    pub fn is_alive(&self, now: u32) -> bool {
        now.saturating_sub(self.last_seen) < ADDR_TTL
    }
}

pub fn unix_now() -> u32 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as u32)
        .unwrap_or(0)
}

/// Bounded pool of candidate peers.
#[derive(Debug, Default)]
pub struct AddrBook {
    addrs: Vec<PeerAddress>,
    capacity: usize,
}

impl AddrBook {
    pub fn new(capacity: usize) -> Self {
        Self {
            addrs: Vec::new(),
            capacity,
        }
    }

    pub fn len(&self) -> usize {
        self.addrs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addrs.is_empty()
    }

    pub fn is_full(&self) -> bool {
        self.addrs.len() >= self.capacity
    }

    /// Insert or refresh an address; a full book ignores newcomers until
    /// expired entries are purged.
    pub fn insert(&mut self, addr: SocketAddr, last_seen: u32) {
        if let Some(known) = self.addrs.iter_mut().find(|a| a.addr == addr) {
            known.last_seen = known.last_seen.max(last_seen);
            return;
        }

        if self.is_full() {
            return;
        }

        self.addrs.push(PeerAddress::new(addr, last_seen));
    }

    /// Drop entries whose last sighting is beyond [`ADDR_TTL`].
    pub fn purge_expired(&mut self, now: u32) {
        self.addrs.retain(|a| a.is_alive(now));
    }

    /// Sample up to `count` distinct addresses, weighted toward recent
    /// `last_seen`, excluding any the filter rejects.
    pub fn sample(
        &self,
        count: usize,
        now: u32,
        mut accept: impl FnMut(&SocketAddr) -> bool,
        rng: &mut impl Rng,
    ) -> Vec<SocketAddr> {
        let mut pool: Vec<&PeerAddress> = self
            .addrs
            .iter()
            .filter(|a| accept(&a.addr))
            .collect();

        let mut picked = Vec::new();
        while picked.len() < count && !pool.is_empty() {
            let index = weighted_index(&pool, now, rng);
            picked.push(pool.swap_remove(index).addr);
        }

        picked
    }

    /// All addresses, most recently seen first.
    pub fn entries(&self) -> Vec<PeerAddress> {
        let mut out = self.addrs.clone();
        out.sort_by(|a, b| b.last_seen.cmp(&a.last_seen));
        out
    }
}

/// Pick an index with probability proportional to remaining lifetime.
fn weighted_index(pool: &[&PeerAddress], now: u32, rng: &mut impl Rng) -> usize {
    let weights: Vec<u64> = pool
        .iter()
        .map(|a| ADDR_TTL.saturating_sub(now.saturating_sub(a.last_seen)).max(1) as u64)
        .collect();

    let total: u64 = weights.iter().sum();
    let mut roll = rng.gen_range(0..total);

    for (index, weight) in weights.iter().enumerate() {
        if roll < *weight {
            return index;
        }
        roll -= weight;
    }

    pool.len() - 1
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::rngs::StdRng;
    use rand::SeedableRng;

    fn sock(tail: u8) -> SocketAddr {
        format!("10.0.0.{tail}:8333").parse().unwrap()
    }

    #[test]
    fn insert_dedupes_and_bounds() {
        let mut book = AddrBook::new(2);
        book.insert(sock(1), 100);
        book.insert(sock(1), 200);
        assert_eq!(book.len(), 1);
        assert_eq!(book.entries()[0].last_seen, 200);

        book.insert(sock(2), 100);
        book.insert(sock(3), 100);
        assert_eq!(book.len(), 2);
        assert!(book.is_full());
    }

    #[test]
    fn purge_drops_expired() {
        let now = 1_000_000;
        let mut book = AddrBook::new(8);
        book.insert(sock(1), now - ADDR_TTL - 1);
        book.insert(sock(2), now - 10);

        book.purge_expired(now);
        assert_eq!(book.len(), 1);
        assert_eq!(book.entries()[0].addr, sock(2));
    }

    #[test]
    fn sampling_prefers_recent() {
        let now = 1_000_000;
        let mut book = AddrBook::new(8);
        book.insert(sock(1), now - ADDR_TTL + 1); // nearly expired
        book.insert(sock(2), now); // fresh

        let mut rng = StdRng::seed_from_u64(7);
        let mut fresh_wins = 0;
        for _ in 0..200 {
            let picked = book.sample(1, now, |_| true, &mut rng);
            if picked == [sock(2)] {
                fresh_wins += 1;
            }
        }

        assert!(fresh_wins > 150, "fresh address won only {fresh_wins}/200");
    }

    #[test]
    fn sample_respects_filter_and_count() {
        let now = 1_000_000;
        let mut book = AddrBook::new(8);
        for tail in 1..=5 {
            book.insert(sock(tail), now);
        }

        let mut rng = StdRng::seed_from_u64(7);
        let picked = book.sample(10, now, |a| *a != sock(3), &mut rng);

        assert_eq!(picked.len(), 4);
        assert!(!picked.contains(&sock(3)));
    }
}

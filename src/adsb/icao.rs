//! Time-bounded ICAO address cache.
//!
//! Confirmed DF11/DF17 squitters record their address here; frames whose
//! downlink format does not self-report an address are accepted only if the
//! brute-forced candidate address is found unexpired in this table.

/// Number of hash slots. Power of two, the hash is masked against it.
const ICAO_CACHE_LEN: usize = 1024;

/// How long an address counts as recently seen, in seconds.
const ICAO_CACHE_TTL_SECS: i64 = 60;

#[derive(Clone, Copy, Default)]
struct Slot {
    addr: u32,
    seen_at: i64,
}

/// Fixed-capacity address table: one entry per slot, collisions overwrite
/// (last writer wins, no chaining). Entries age out lazily at lookup time
/// and are never swept.
pub struct IcaoCache {
    slots: Vec<Slot>,
}

impl IcaoCache {
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::default(); ICAO_CACHE_LEN],
        }
    }

    fn hash(addr: u32) -> usize {
        let mut a = addr;
        a = ((a >> 16) ^ a).wrapping_mul(0x45d9f3b);
        a = ((a >> 16) ^ a).wrapping_mul(0x45d9f3b);
        a = (a >> 16) ^ a;
        (a as usize) & (ICAO_CACHE_LEN - 1)
    }

    /// Record an address at the given unix time, overwriting whatever
    /// occupied its slot.
    pub fn insert(&mut self, addr: u32, now_secs: i64) {
        let slot = &mut self.slots[Self::hash(addr)];
        slot.addr = addr;
        slot.seen_at = now_secs;
    }

    /// True iff the slot holds exactly this address and it is no older
    /// than the TTL at the probe time.
    pub fn recently_seen(&self, addr: u32, now_secs: i64) -> bool {
        let slot = &self.slots[Self::hash(addr)];
        slot.addr != 0 && slot.addr == addr && now_secs - slot.seen_at <= ICAO_CACHE_TTL_SECS
    }
}

impl Default for IcaoCache {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ttl_boundary() {
        let mut cache = IcaoCache::new();
        let t = 1_700_000_000;
        cache.insert(0x4840D6, t);

        assert!(cache.recently_seen(0x4840D6, t));
        assert!(cache.recently_seen(0x4840D6, t + 60));
        assert!(!cache.recently_seen(0x4840D6, t + 61));
    }

    #[test]
    fn test_unknown_address_not_seen() {
        let cache = IcaoCache::new();
        assert!(!cache.recently_seen(0xABCDEF, 1_700_000_000));
    }

    #[test]
    fn test_collision_overwrite_evicts_immediately() {
        let first = 0x4840D6u32;
        let slot = IcaoCache::hash(first);

        // Find a different address landing in the same slot.
        let colliding = (1u32..)
            .find(|&a| a != first && IcaoCache::hash(a) == slot)
            .unwrap();

        let mut cache = IcaoCache::new();
        let t = 1_700_000_000;
        cache.insert(first, t);
        assert!(cache.recently_seen(first, t));

        cache.insert(colliding, t);
        assert!(cache.recently_seen(colliding, t));
        assert!(!cache.recently_seen(first, t));
    }

    #[test]
    fn test_stale_entry_is_overwritten_not_resurrected() {
        let mut cache = IcaoCache::new();
        let t = 1_700_000_000;
        cache.insert(0x123456, t);
        assert!(!cache.recently_seen(0x123456, t + 1000));

        cache.insert(0x123456, t + 1000);
        assert!(cache.recently_seen(0x123456, t + 1000));
    }
}

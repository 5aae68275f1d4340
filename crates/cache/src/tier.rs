//! Bounded in-memory tier with TTL and approximate LRU eviction

use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use tracing::debug;

use oracle_core::TierConfig;

use crate::entry::CacheEntry;

/// One in-memory tier keyed by canonical pair key.
///
/// The tier never decides where an evicted entry goes; it hands it back to
/// the caller.
#[derive(Debug)]
pub struct MemoryTier {
    name: &'static str,
    config: RwLock<TierConfig>,
    entries: Mutex<HashMap<String, CacheEntry>>,
}

impl MemoryTier {
    pub fn new(name: &'static str, config: TierConfig) -> Self {
        Self {
            name,
            config: RwLock::new(config),
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn config(&self) -> TierConfig {
        self.config.read().clone()
    }

    pub fn update_config(&self, config: TierConfig) {
        *self.config.write() = config;
    }

    pub fn is_enabled(&self) -> bool {
        self.config.read().enabled
    }

    /// Read and record a hit. Expired entries are purged and reported absent.
    pub fn get(&self, key: &str, now_ms: u64) -> Option<CacheEntry> {
        let ttl_ms = self.config.read().ttl_ms;
        let mut entries = self.entries.lock();

        let expired = entries.get(key)?.is_expired(ttl_ms, now_ms);
        if expired {
            entries.remove(key);
            debug!("{} entry {} expired", self.name, key);
            return None;
        }

        let entry = entries.get_mut(key)?;
        entry.touch(now_ms);
        Some(entry.clone())
    }

    /// Read without recording a hit; expired entries are reported absent
    pub fn peek(&self, key: &str, now_ms: u64) -> Option<CacheEntry> {
        let ttl_ms = self.config.read().ttl_ms;
        self.entries
            .lock()
            .get(key)
            .filter(|e| !e.is_expired(ttl_ms, now_ms))
            .cloned()
    }

    /// Insert or replace. When a new key arrives at capacity, the entries
    /// with the oldest `last_access_ms` are removed and returned, oldest
    /// first. More than one goes when the tier has been shrunk.
    pub fn insert(&self, key: String, entry: CacheEntry) -> Vec<(String, CacheEntry)> {
        let max_size = self.config.read().max_size;
        let mut entries = self.entries.lock();

        if entries.contains_key(&key) {
            entries.insert(key, entry);
            return Vec::new();
        }

        if max_size == 0 {
            return vec![(key, entry)];
        }

        let mut evicted = Vec::new();
        while entries.len() >= max_size {
            let lru = entries
                .iter()
                .min_by_key(|(_, e)| (e.last_access_ms, e.inserted_at_ms))
                .map(|(k, _)| k.clone());

            match lru.and_then(|k| entries.remove_entry(&k)) {
                Some(e) => evicted.push(e),
                None => break,
            }
        }

        entries.insert(key, entry);
        evicted
    }

    pub fn remove(&self, key: &str) -> Option<CacheEntry> {
        self.entries.lock().remove(key)
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// Snapshot of live entries
    pub fn entries(&self, now_ms: u64) -> Vec<(String, CacheEntry)> {
        let ttl_ms = self.config.read().ttl_ms;
        self.entries
            .lock()
            .iter()
            .filter(|(_, e)| !e.is_expired(ttl_ms, now_ms))
            .map(|(k, e)| (k.clone(), e.clone()))
            .collect()
    }

    /// Drop every expired entry, returning how many went
    pub fn purge_expired(&self, now_ms: u64) -> usize {
        let ttl_ms = self.config.read().ttl_ms;
        let mut entries = self.entries.lock();
        let before = entries.len();
        entries.retain(|_, e| !e.is_expired(ttl_ms, now_ms));
        before - entries.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use oracle_core::{ChainId, PriceObservation, TokenPair};

    fn entry(base: &str, now_ms: u64) -> (String, CacheEntry) {
        let pair = TokenPair::new(ChainId::Ethereum, base, "usd");
        let key = pair.cache_key();
        let obs = PriceObservation::new(pair, 1.0, now_ms, "test", 0.9);
        (key, CacheEntry::new(obs, now_ms))
    }

    fn tier(max_size: usize, ttl_ms: u64) -> MemoryTier {
        MemoryTier::new(
            "l1",
            TierConfig {
                enabled: true,
                max_size,
                ttl_ms,
            },
        )
    }

    #[test]
    fn test_ttl_boundary() {
        let t = tier(10, 1_000);
        let (key, e) = entry("eth", 0);
        t.insert(key.clone(), e);

        assert!(t.get(&key, 999).is_some());
        assert!(t.get(&key, 1_000).is_some());
        assert!(t.get(&key, 1_001).is_none());
        // purged on the expired read
        assert_eq!(t.len(), 0);
    }

    #[test]
    fn test_get_records_hits() {
        let t = tier(10, 1_000);
        let (key, e) = entry("eth", 0);
        t.insert(key.clone(), e);

        t.get(&key, 10);
        let hit = t.get(&key, 20).unwrap();
        assert_eq!(hit.hit_count, 2);
        assert_eq!(hit.last_access_ms, 20);

        let peeked = t.peek(&key, 30).unwrap();
        assert_eq!(peeked.hit_count, 2);
    }

    #[test]
    fn test_evicts_least_recently_accessed() {
        let t = tier(2, 10_000);
        let (a, ea) = entry("a", 0);
        let (b, eb) = entry("b", 1);
        t.insert(a.clone(), ea);
        t.insert(b.clone(), eb);
        t.get(&a, 5);

        let (c, ec) = entry("c", 6);
        let mut evicted = t.insert(c.clone(), ec);
        assert_eq!(evicted.len(), 1);
        let (evicted_key, evicted) = evicted.remove(0);

        assert_eq!(evicted_key, b);
        assert_eq!(evicted.hit_count, 0);
        assert!(t.peek(&a, 6).is_some());
        assert!(t.peek(&c, 6).is_some());
    }

    #[test]
    fn test_replace_does_not_evict() {
        let t = tier(1, 10_000);
        let (a, ea) = entry("a", 0);
        t.insert(a.clone(), ea.clone());
        assert!(t.insert(a, ea).is_empty());
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_zero_capacity_rejects() {
        let t = tier(0, 10_000);
        let (a, ea) = entry("a", 0);
        assert_eq!(t.insert(a.clone(), ea).len(), 1);
        assert!(t.is_empty());
        assert!(t.peek(&a, 0).is_none());
    }

    #[test]
    fn test_shrunk_tier_returns_every_eviction() {
        let t = tier(4, 10_000);
        for (i, base) in ["a", "b", "c", "d"].into_iter().enumerate() {
            let (k, e) = entry(base, i as u64);
            t.insert(k, e);
        }

        t.update_config(TierConfig {
            enabled: true,
            max_size: 1,
            ttl_ms: 10_000,
        });
        let (e_key, e) = entry("e", 10);
        let evicted = t.insert(e_key.clone(), e);

        let keys: Vec<&str> = evicted.iter().map(|(k, _)| k.as_str()).collect();
        assert_eq!(
            keys,
            ["ethereum:a:usd", "ethereum:b:usd", "ethereum:c:usd", "ethereum:d:usd"]
        );
        assert_eq!(t.len(), 1);
        assert!(t.peek(&e_key, 10).is_some());
    }

    #[test]
    fn test_purge_expired() {
        let t = tier(10, 100);
        let (a, ea) = entry("a", 0);
        let (b, eb) = entry("b", 150);
        t.insert(a, ea);
        t.insert(b, eb);

        assert_eq!(t.entries(200).len(), 1);
        assert_eq!(t.purge_expired(200), 1);
        assert_eq!(t.len(), 1);
    }
}

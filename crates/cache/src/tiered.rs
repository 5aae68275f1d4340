//! Three-tier price cache
//!
//! L1 (small, short TTL) and L2 (larger, longer TTL) are in-memory; the
//! durable tier is unbounded, has no TTL and syncs to a [`DurableStore`] in
//! the background. Reads try L1 -> L2 -> durable and promote hits upward.
//! Capacity evictions demote frequently-read entries one tier down instead
//! of dropping them.

use serde::Serialize;
use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use oracle_core::{CacheConfig, PriceObservation, SharedClock, StoreResult, TokenPair};

use crate::durable::DurableTier;
use crate::entry::CacheEntry;
use crate::store::DurableStore;
use crate::tier::MemoryTier;

/// An L1 eviction with more hits than this is demoted into L2
pub const L1_DEMOTION_HITS: u64 = 5;
/// An L2 eviction with more hits than this is demoted into the durable tier
pub const L2_DEMOTION_HITS: u64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tier {
    L1,
    L2,
    Durable,
}

#[derive(Debug, Default)]
struct Counters {
    l1_hits: AtomicU64,
    l2_hits: AtomicU64,
    durable_hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    demotions: AtomicU64,
    promotions: AtomicU64,
}

/// Cache statistics
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub l1_size: usize,
    pub l2_size: usize,
    pub durable_size: usize,
    pub l1_hits: u64,
    pub l2_hits: u64,
    pub durable_hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub demotions: u64,
    pub promotions: u64,
    pub durable_pending: usize,
    pub durable_sync_failures: u64,
    pub last_sync_ms: u64,
}

impl CacheStats {
    pub fn hit_rate(&self) -> f64 {
        let hits = self.l1_hits + self.l2_hits + self.durable_hits;
        let total = hits + self.misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }
}

pub struct TieredCache {
    l1: MemoryTier,
    l2: MemoryTier,
    durable: Arc<DurableTier>,
    clock: SharedClock,
    counters: Counters,
}

impl TieredCache {
    pub fn new(config: CacheConfig, store: Arc<dyn DurableStore>, clock: SharedClock) -> Self {
        Self {
            l1: MemoryTier::new("l1", config.l1),
            l2: MemoryTier::new("l2", config.l2),
            durable: Arc::new(DurableTier::new(config.durable, store, Arc::clone(&clock))),
            clock,
            counters: Counters::default(),
        }
    }

    pub fn update_config(&self, config: CacheConfig) {
        self.l1.update_config(config.l1);
        self.l2.update_config(config.l2);
        self.durable.update_config(config.durable);
    }

    pub async fn get(&self, pair: &TokenPair) -> Option<PriceObservation> {
        let key = pair.cache_key();
        let now = self.clock.now_ms();

        if self.l1.is_enabled() {
            if let Some(entry) = self.l1.get(&key, now) {
                self.counters.l1_hits.fetch_add(1, Ordering::Relaxed);
                return Some(entry.observation);
            }
        }

        if self.l2.is_enabled() {
            if let Some(entry) = self.l2.get(&key, now) {
                self.counters.l2_hits.fetch_add(1, Ordering::Relaxed);
                if self.l1.is_enabled() {
                    self.promote_into_l1(key, &entry, now);
                }
                return Some(entry.observation);
            }
        }

        if self.durable.is_enabled() {
            if let Some(entry) = self.durable.get(&key).await {
                self.counters.durable_hits.fetch_add(1, Ordering::Relaxed);
                if self.l2.is_enabled() {
                    self.counters.promotions.fetch_add(1, Ordering::Relaxed);
                    self.insert_l2(key.clone(), entry.promoted(now));
                }
                if self.l1.is_enabled() {
                    self.promote_into_l1(key, &entry, now);
                }
                return Some(entry.observation);
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// Write into every enabled tier. Triggers a background durable sync
    /// when the sync interval has elapsed; sync failures never fail `set`.
    pub async fn set(&self, pair: &TokenPair, observation: PriceObservation) {
        let key = pair.cache_key();
        let now = self.clock.now_ms();
        let entry = CacheEntry::new(observation, now);

        if self.l1.is_enabled() {
            self.insert_l1(key.clone(), entry.clone());
        }
        if self.l2.is_enabled() {
            self.insert_l2(key.clone(), entry.clone());
        }
        if self.durable.is_enabled() {
            self.durable.put(key, entry);

            if self.durable.claim_sync(now) {
                let durable = Arc::clone(&self.durable);
                tokio::spawn(async move {
                    // failures are logged inside and retried next interval
                    let _ = durable.sync().await;
                });
            }
        }
    }

    /// Remove a pair from every tier
    pub async fn invalidate(&self, pair: &TokenPair) {
        let key = pair.cache_key();
        self.l1.remove(&key);
        self.l2.remove(&key);
        self.durable.remove(&key).await;
    }

    pub async fn clear(&self) {
        self.l1.clear();
        self.l2.clear();
        self.durable.clear().await;
        debug!("Cache cleared");
    }

    /// Inspect one tier without recording a hit
    pub fn peek(&self, tier: Tier, pair: &TokenPair) -> Option<CacheEntry> {
        let key = pair.cache_key();
        let now = self.clock.now_ms();
        match tier {
            Tier::L1 => self.l1.peek(&key, now),
            Tier::L2 => self.l2.peek(&key, now),
            Tier::Durable => self.durable.peek(&key),
        }
    }

    /// Current entry from the fastest tier holding one, without recording a
    /// hit or promoting. The durable tier is consulted through its in-memory
    /// view only.
    pub fn peek_any(&self, pair: &TokenPair) -> Option<CacheEntry> {
        [Tier::L1, Tier::L2, Tier::Durable]
            .into_iter()
            .filter(|tier| self.tier_enabled(*tier))
            .find_map(|tier| self.peek(tier, pair))
    }

    fn tier_enabled(&self, tier: Tier) -> bool {
        match tier {
            Tier::L1 => self.l1.is_enabled(),
            Tier::L2 => self.l2.is_enabled(),
            Tier::Durable => self.durable.is_enabled(),
        }
    }

    /// Pairs with a live entry in L1 or L2
    pub fn cached_pairs(&self) -> Vec<TokenPair> {
        let now = self.clock.now_ms();
        let mut seen = HashSet::new();

        self.l1
            .entries(now)
            .into_iter()
            .chain(self.l2.entries(now))
            .filter(|(key, _)| seen.insert(key.clone()))
            .map(|(_, entry)| entry.observation.pair)
            .collect()
    }

    /// Drop expired L1/L2 entries
    pub fn purge_expired(&self) -> usize {
        let now = self.clock.now_ms();
        self.l1.purge_expired(now) + self.l2.purge_expired(now)
    }

    pub async fn sync_durable(&self) -> StoreResult<usize> {
        if !self.durable.is_enabled() {
            return Ok(0);
        }
        self.durable.sync().await
    }

    pub fn durable_sync_due(&self) -> bool {
        self.durable.is_enabled() && self.durable.sync_due(self.clock.now_ms())
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            l1_size: self.l1.len(),
            l2_size: self.l2.len(),
            durable_size: self.durable.len(),
            l1_hits: self.counters.l1_hits.load(Ordering::Relaxed),
            l2_hits: self.counters.l2_hits.load(Ordering::Relaxed),
            durable_hits: self.counters.durable_hits.load(Ordering::Relaxed),
            misses: self.counters.misses.load(Ordering::Relaxed),
            evictions: self.counters.evictions.load(Ordering::Relaxed),
            demotions: self.counters.demotions.load(Ordering::Relaxed),
            promotions: self.counters.promotions.load(Ordering::Relaxed),
            durable_pending: self.durable.pending(),
            durable_sync_failures: self.durable.sync_failures(),
            last_sync_ms: self.durable.last_sync_ms(),
        }
    }

    fn promote_into_l1(&self, key: String, entry: &CacheEntry, now: u64) {
        self.counters.promotions.fetch_add(1, Ordering::Relaxed);
        self.insert_l1(key, entry.promoted(now));
    }

    fn insert_l1(&self, key: String, entry: CacheEntry) {
        for (evicted_key, evicted) in self.l1.insert(key, entry) {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);

            if evicted.hit_count > L1_DEMOTION_HITS && self.l2.is_enabled() {
                debug!(
                    "Demoting {} from l1 to l2 (hits={})",
                    evicted_key, evicted.hit_count
                );
                self.counters.demotions.fetch_add(1, Ordering::Relaxed);
                self.insert_l2(evicted_key, evicted);
            } else {
                debug!("Evicted {} from l1 (hits={})", evicted_key, evicted.hit_count);
            }
        }
    }

    fn insert_l2(&self, key: String, entry: CacheEntry) {
        for (evicted_key, evicted) in self.l2.insert(key, entry) {
            self.counters.evictions.fetch_add(1, Ordering::Relaxed);

            if evicted.hit_count > L2_DEMOTION_HITS && self.durable.is_enabled() {
                debug!(
                    "Demoting {} from l2 to durable (hits={})",
                    evicted_key, evicted.hit_count
                );
                self.counters.demotions.fetch_add(1, Ordering::Relaxed);
                self.durable.put(evicted_key, evicted);
            } else if evicted.hit_count > L2_DEMOTION_HITS {
                warn!(
                    "Dropping hot entry {} from l2, durable tier disabled",
                    evicted_key
                );
            } else {
                debug!("Evicted {} from l2 (hits={})", evicted_key, evicted.hit_count);
            }
        }
    }
}

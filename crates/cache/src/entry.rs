//! Cache entries

use serde::{Deserialize, Serialize};

use oracle_core::PriceObservation;

/// One observation stored in a tier, with its access bookkeeping
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub observation: PriceObservation,
    pub inserted_at_ms: u64,
    pub hit_count: u64,
    pub last_access_ms: u64,
}

impl CacheEntry {
    pub fn new(observation: PriceObservation, now_ms: u64) -> Self {
        Self {
            observation,
            inserted_at_ms: now_ms,
            hit_count: 0,
            last_access_ms: now_ms,
        }
    }

    /// Copy for a faster tier: fresh insertion time, hit count carried over
    pub fn promoted(&self, now_ms: u64) -> Self {
        Self {
            observation: self.observation.clone(),
            inserted_at_ms: now_ms,
            hit_count: self.hit_count,
            last_access_ms: now_ms,
        }
    }

    pub fn touch(&mut self, now_ms: u64) {
        self.hit_count += 1;
        self.last_access_ms = now_ms;
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.inserted_at_ms)
    }

    pub fn is_expired(&self, ttl_ms: u64, now_ms: u64) -> bool {
        self.age_ms(now_ms) > ttl_ms
    }
}

//! Tiered price cache
//!
//! Features:
//! - Two bounded in-memory tiers with per-tier TTL
//! - Approximate LRU eviction with demotion of frequently-read entries
//! - Promotion of lower-tier hits into faster tiers
//! - Durable tier synced periodically to a pluggable key-value store

pub mod durable;
pub mod entry;
pub mod store;
pub mod tier;
pub mod tiered;

pub use durable::DurableTier;
pub use entry::CacheEntry;
pub use store::{DurableStore, JsonFileStore, MemoryStore};
pub use tier::MemoryTier;
pub use tiered::{CacheStats, Tier, TieredCache, L1_DEMOTION_HITS, L2_DEMOTION_HITS};

//! Durable tier: an in-memory view of the backing store plus the set of
//! keys written since the last successful sync.

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use oracle_core::{DurableConfig, SharedClock, StoreResult};

use crate::entry::CacheEntry;
use crate::store::DurableStore;

pub struct DurableTier {
    config: RwLock<DurableConfig>,
    view: DashMap<String, CacheEntry>,
    dirty: Mutex<HashSet<String>>,
    store: Arc<dyn DurableStore>,
    clock: SharedClock,
    last_sync_ms: AtomicU64,
    last_attempt_ms: AtomicU64,
    syncing: AtomicBool,
    sync_failures: AtomicU64,
}

impl DurableTier {
    pub fn new(config: DurableConfig, store: Arc<dyn DurableStore>, clock: SharedClock) -> Self {
        let now = clock.now_ms();
        Self {
            config: RwLock::new(config),
            view: DashMap::new(),
            dirty: Mutex::new(HashSet::new()),
            store,
            clock,
            last_sync_ms: AtomicU64::new(now),
            last_attempt_ms: AtomicU64::new(now),
            syncing: AtomicBool::new(false),
            sync_failures: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.read().enabled
    }

    pub fn update_config(&self, config: DurableConfig) {
        *self.config.write() = config;
    }

    /// Read through the view, falling back to the backing store.
    /// Store errors are logged and read as a miss.
    pub async fn get(&self, key: &str) -> Option<CacheEntry> {
        let now = self.clock.now_ms();

        if let Some(mut entry) = self.view.get_mut(key) {
            entry.touch(now);
            return Some(entry.clone());
        }

        match self.store.load(key).await {
            Ok(Some(mut entry)) => {
                entry.touch(now);
                self.view.insert(key.to_string(), entry.clone());
                Some(entry)
            }
            Ok(None) => None,
            Err(e) => {
                warn!("Durable store load failed for {}: {}", key, e);
                None
            }
        }
    }

    pub fn peek(&self, key: &str) -> Option<CacheEntry> {
        self.view.get(key).map(|e| e.value().clone())
    }

    /// Write into the view; the store sees it on the next sync
    pub fn put(&self, key: String, entry: CacheEntry) {
        self.dirty.lock().insert(key.clone());
        self.view.insert(key, entry);
    }

    pub async fn remove(&self, key: &str) {
        self.view.remove(key);
        self.dirty.lock().remove(key);
        if let Err(e) = self.store.remove(key).await {
            warn!("Durable store remove failed for {}: {}", key, e);
        }
    }

    pub async fn clear(&self) {
        self.view.clear();
        self.dirty.lock().clear();
        if let Err(e) = self.store.clear().await {
            warn!("Durable store clear failed: {}", e);
        }
    }

    pub fn len(&self) -> usize {
        self.view.len()
    }

    pub fn is_empty(&self) -> bool {
        self.view.is_empty()
    }

    pub fn pending(&self) -> usize {
        self.dirty.lock().len()
    }

    pub fn last_sync_ms(&self) -> u64 {
        self.last_sync_ms.load(Ordering::Relaxed)
    }

    pub fn sync_failures(&self) -> u64 {
        self.sync_failures.load(Ordering::Relaxed)
    }

    /// Whether the sync interval has elapsed since the last sync attempt,
    /// successful or not
    pub fn sync_due(&self, now_ms: u64) -> bool {
        let interval = self.config.read().sync_interval_ms;
        now_ms.saturating_sub(self.last_attempt_ms.load(Ordering::Acquire)) >= interval
    }

    /// Take this interval's sync slot. At most one caller per interval gets
    /// `true`; a failed attempt waits for the next interval like any other.
    pub fn claim_sync(&self, now_ms: u64) -> bool {
        let interval = self.config.read().sync_interval_ms;
        let last = self.last_attempt_ms.load(Ordering::Acquire);

        now_ms.saturating_sub(last) >= interval
            && self
                .last_attempt_ms
                .compare_exchange(last, now_ms, Ordering::AcqRel, Ordering::Acquire)
                .is_ok()
    }

    /// Push every dirty entry to the store and flush it.
    ///
    /// On failure the keys stay dirty for the next attempt. Returns the
    /// number of entries written; a sync already in progress yields `Ok(0)`.
    pub async fn sync(&self) -> StoreResult<usize> {
        if self
            .syncing
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Ok(0);
        }

        self.last_attempt_ms
            .fetch_max(self.clock.now_ms(), Ordering::AcqRel);
        let result = self.sync_inner().await;
        self.syncing.store(false, Ordering::Release);
        result
    }

    async fn sync_inner(&self) -> StoreResult<usize> {
        let keys: Vec<String> = self.dirty.lock().drain().collect();
        let mut written = 0;

        for (idx, key) in keys.iter().enumerate() {
            let Some(entry) = self.peek(key) else {
                continue;
            };
            if let Err(e) = self.store.store(key, &entry).await {
                self.requeue(&keys[idx..]);
                return Err(self.fail(e));
            }
            written += 1;
        }

        if let Err(e) = self.store.flush().await {
            self.requeue(&keys);
            return Err(self.fail(e));
        }

        self.last_sync_ms.store(self.clock.now_ms(), Ordering::Relaxed);
        debug!("Durable tier synced {} entries", written);
        Ok(written)
    }

    fn requeue(&self, keys: &[String]) {
        let mut dirty = self.dirty.lock();
        dirty.extend(keys.iter().filter(|k| self.view.contains_key(*k)).cloned());
    }

    fn fail(&self, e: oracle_core::StoreError) -> oracle_core::StoreError {
        self.sync_failures.fetch_add(1, Ordering::Relaxed);
        warn!(
            "Durable tier sync failed, {} entries pending retry: {}",
            self.pending(),
            e
        );
        e
    }
}

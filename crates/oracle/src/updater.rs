//! Cache updater - refreshes cached pairs from their sources
//!
//! Refresh requests go into a priority queue holding at most one task per
//! pair. The queue is drained in waves of `max_concurrent` pairs; each wave
//! runs concurrently and the next starts as soon as it completes, so a large
//! backlog drains without waiting for the next tick.

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use oracle_cache::TieredCache;
use oracle_core::{
    OracleError, OracleResult, PriceObservation, SharedClock, TokenPair, UpdateStrategy,
    UpdaterConfig,
};
use oracle_price_feed::{DataValidator, SourceRegistry};

use crate::non_zero;

/// Pending refresh for one pair
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateTask {
    pub pair: TokenPair,
    pub last_update_ms: u64,
    pub priority: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefreshOutcome {
    Updated,
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct UpdateStats {
    pub queue_length: usize,
    pub is_updating: bool,
    pub processed: u64,
    pub updated: u64,
    pub skipped: u64,
    pub failed: u64,
    pub last_run_ms: Option<u64>,
}

#[derive(Debug, Default)]
struct Counters {
    processed: AtomicU64,
    updated: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
    last_run_ms: AtomicU64,
}

/// Whether a cached observation should be replaced.
///
/// `changed` compares the plain mean of the fresh prices with the cached
/// price, not the weighted consensus the aggregator would produce.
pub fn should_update(
    config: &UpdaterConfig,
    cached: Option<&PriceObservation>,
    fetched: &[PriceObservation],
    now_ms: u64,
) -> bool {
    let Some(cached) = cached else {
        return true;
    };

    match config.strategy {
        UpdateStrategy::All => true,
        UpdateStrategy::Stale => cached.age_ms(now_ms) > config.stale_price_threshold_ms,
        UpdateStrategy::Changed => {
            if fetched.is_empty() || cached.price <= 0.0 {
                return !fetched.is_empty();
            }
            let mean = fetched.iter().map(|o| o.price).sum::<f64>() / fetched.len() as f64;
            (mean - cached.price).abs() / cached.price > config.price_change_threshold
        }
    }
}

pub struct CacheUpdater {
    config: RwLock<UpdaterConfig>,
    priority_pairs: RwLock<Vec<TokenPair>>,
    queue: Mutex<Vec<UpdateTask>>,
    updating: AtomicBool,
    registry: Arc<SourceRegistry>,
    validator: Arc<DataValidator>,
    cache: Arc<TieredCache>,
    clock: SharedClock,
    counters: Counters,
}

impl CacheUpdater {
    pub fn new(
        config: UpdaterConfig,
        registry: Arc<SourceRegistry>,
        validator: Arc<DataValidator>,
        cache: Arc<TieredCache>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            priority_pairs: RwLock::new(Vec::new()),
            queue: Mutex::new(Vec::new()),
            updating: AtomicBool::new(false),
            registry,
            validator,
            cache,
            clock,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> UpdaterConfig {
        self.config.read().clone()
    }

    pub fn update_config(&self, config: UpdaterConfig) {
        *self.config.write() = config;
    }

    pub fn set_priority_pairs(&self, pairs: Vec<TokenPair>) {
        *self.priority_pairs.write() = pairs;
    }

    /// Queue a refresh without starting one. An existing task for the same
    /// pair keeps its place and takes the higher priority.
    pub fn enqueue(&self, pair: TokenPair, priority: u32) {
        let now = self.clock.now_ms();
        let mut queue = self.queue.lock();

        match queue.iter_mut().find(|t| t.pair == pair) {
            Some(task) => task.priority = task.priority.max(priority),
            None => queue.push(UpdateTask {
                pair,
                last_update_ms: now,
                priority,
            }),
        }

        // stable: equal priorities stay first-come first-served
        queue.sort_by(|a, b| b.priority.cmp(&a.priority));
    }

    /// Queue a refresh and make sure the queue is being drained
    pub fn schedule_update(self: &Arc<Self>, pair: TokenPair, priority: u32) {
        self.enqueue(pair, priority);

        if !self.is_updating() {
            let updater = Arc::clone(self);
            tokio::spawn(async move {
                updater.process_queue().await;
            });
        }
    }

    pub fn queue_snapshot(&self) -> Vec<UpdateTask> {
        self.queue.lock().clone()
    }

    pub fn is_updating(&self) -> bool {
        self.updating.load(Ordering::Acquire)
    }

    /// Drain the queue wave by wave. Only one drain runs at a time; a
    /// concurrent call returns immediately with 0.
    pub async fn process_queue(&self) -> usize {
        let mut processed = 0;

        loop {
            if self
                .updating
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                return processed;
            }

            processed += self.drain().await;
            self.counters
                .last_run_ms
                .store(self.clock.now_ms(), Ordering::Relaxed);
            self.updating.store(false, Ordering::Release);

            // a task queued while the flag was still set would otherwise wait
            // for the next trigger
            if self.queue.lock().is_empty() {
                return processed;
            }
        }
    }

    async fn drain(&self) -> usize {
        let mut processed = 0;

        loop {
            let batch: Vec<UpdateTask> = {
                let max = self.config.read().max_concurrent.max(1);
                let mut queue = self.queue.lock();
                let n = max.min(queue.len());
                queue.drain(..n).collect()
            };
            if batch.is_empty() {
                return processed;
            }

            let results = join_all(batch.iter().map(|task| self.refresh_pair(&task.pair))).await;

            let mut updated = 0;
            for (task, result) in batch.iter().zip(results) {
                self.counters.processed.fetch_add(1, Ordering::Relaxed);
                match result {
                    Ok(RefreshOutcome::Updated) => {
                        updated += 1;
                        self.counters.updated.fetch_add(1, Ordering::Relaxed);
                    }
                    Ok(RefreshOutcome::Skipped) => {
                        self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        warn!(
                            "Refresh failed for {} (priority {}): {}",
                            task.pair, task.priority, e
                        );
                    }
                }
            }

            debug!("Refresh wave done: {}/{} updated", updated, batch.len());
            processed += batch.len();
        }
    }

    /// Refresh one pair: fetch from every supporting source, validate, and
    /// cache the highest-confidence observation if the strategy says so.
    pub async fn refresh_pair(&self, pair: &TokenPair) -> OracleResult<RefreshOutcome> {
        let config = self.config();
        // peek so refresh checks neither count as reads nor promote entries
        let cached = self.cache.peek_any(pair).map(|entry| entry.observation);

        // staleness does not depend on fresh data; skip the source calls
        if config.strategy == UpdateStrategy::Stale
            && !should_update(&config, cached.as_ref(), &[], self.clock.now_ms())
        {
            return Ok(RefreshOutcome::Skipped);
        }

        if self.registry.supporting(pair).is_empty() {
            return Err(OracleError::NoSourceAvailable(pair.to_string()));
        }

        let fan_out = self.registry.fetch_all(pair).await;
        let (valid, rejected) = self.validator.validate_batch(fan_out.observations);
        for (obs, report) in &rejected {
            debug!(
                "Discarding {} observation for {}: {}",
                obs.source,
                pair,
                report.error_messages().join("; ")
            );
        }

        if valid.is_empty() {
            return Err(OracleError::InsufficientSources {
                required: 1,
                available: 0,
            });
        }

        if !should_update(&config, cached.as_ref(), &valid, self.clock.now_ms()) {
            return Ok(RefreshOutcome::Skipped);
        }

        let Some(best) = valid
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        else {
            return Ok(RefreshOutcome::Skipped);
        };

        debug!(
            "Refreshed {} from {} at {} (confidence {:.3})",
            pair, best.source, best.price, best.confidence
        );
        self.cache.set(pair, best).await;
        Ok(RefreshOutcome::Updated)
    }

    /// Periodic loop: queue every cached pair plus the priority pairs, then
    /// drain. Runs until `cancel` fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let period = non_zero(self.config().update_interval());
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Cache updater started (every {:?})", period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if !self.config.read().enabled {
                        continue;
                    }

                    for pair in self.cache.cached_pairs() {
                        self.enqueue(pair, 0);
                    }
                    let priority = self.priority_pairs.read().clone();
                    for pair in priority {
                        self.enqueue(pair, 1);
                    }

                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        n = self.process_queue() => {
                            if n > 0 {
                                debug!("Updater tick processed {} pairs", n);
                            }
                        }
                    }
                }
            }
        }

        info!("Cache updater stopped");
    }

    pub fn stats(&self) -> UpdateStats {
        let last = self.counters.last_run_ms.load(Ordering::Relaxed);
        UpdateStats {
            queue_length: self.queue.lock().len(),
            is_updating: self.is_updating(),
            processed: self.counters.processed.load(Ordering::Relaxed),
            updated: self.counters.updated.load(Ordering::Relaxed),
            skipped: self.counters.skipped.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            last_run_ms: (last > 0).then_some(last),
        }
    }
}

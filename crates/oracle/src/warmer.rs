//! Cache warmer - keeps the priority pairs populated
//!
//! Runs on its own timer, independent of the updater. Pairs are warmed in
//! batches; each source call is retried with a fixed delay, and a pair whose
//! sources all fail is logged and skipped.

use futures::future::join_all;
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use oracle_cache::TieredCache;
use oracle_core::{PriceObservation, SharedClock, TokenPair, WarmerConfig};
use oracle_price_feed::{DataValidator, PriceSource, SourceRegistry};

use crate::non_zero;

/// Result of one warm-up pass
#[derive(Debug, Clone, Default, PartialEq)]
pub struct WarmupReport {
    pub warmed: Vec<TokenPair>,
    pub failed: Vec<TokenPair>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct WarmupStats {
    pub is_warming: bool,
    pub runs: u64,
    pub skipped_runs: u64,
    pub pairs_warmed: u64,
    pub pairs_failed: u64,
    pub last_run_ms: Option<u64>,
    pub priority_pairs: usize,
}

#[derive(Debug, Default)]
struct Counters {
    runs: AtomicU64,
    skipped_runs: AtomicU64,
    pairs_warmed: AtomicU64,
    pairs_failed: AtomicU64,
    last_run_ms: AtomicU64,
}

pub struct CacheWarmer {
    config: RwLock<WarmerConfig>,
    priority_pairs: RwLock<Vec<TokenPair>>,
    warming: AtomicBool,
    registry: Arc<SourceRegistry>,
    validator: Arc<DataValidator>,
    cache: Arc<TieredCache>,
    clock: SharedClock,
    counters: Counters,
}

impl CacheWarmer {
    pub fn new(
        config: WarmerConfig,
        registry: Arc<SourceRegistry>,
        validator: Arc<DataValidator>,
        cache: Arc<TieredCache>,
        clock: SharedClock,
    ) -> Self {
        Self {
            config: RwLock::new(config),
            priority_pairs: RwLock::new(Vec::new()),
            warming: AtomicBool::new(false),
            registry,
            validator,
            cache,
            clock,
            counters: Counters::default(),
        }
    }

    pub fn config(&self) -> WarmerConfig {
        self.config.read().clone()
    }

    pub fn update_config(&self, config: WarmerConfig) {
        *self.config.write() = config;
    }

    pub fn set_priority_pairs(&self, pairs: Vec<TokenPair>) {
        *self.priority_pairs.write() = pairs;
    }

    pub fn is_warming(&self) -> bool {
        self.warming.load(Ordering::Acquire)
    }

    /// Warm `pairs`, or the priority set when `None`.
    ///
    /// Returns `None` without doing anything if a pass is already running.
    pub async fn warmup(&self, pairs: Option<Vec<TokenPair>>) -> Option<WarmupReport> {
        if self
            .warming
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            self.counters.skipped_runs.fetch_add(1, Ordering::Relaxed);
            debug!("Warm-up already running, skipping");
            return None;
        }

        let pairs = pairs.unwrap_or_else(|| self.priority_pairs.read().clone());
        let report = self.warm_all(pairs).await;

        self.counters.runs.fetch_add(1, Ordering::Relaxed);
        self.counters
            .pairs_warmed
            .fetch_add(report.warmed.len() as u64, Ordering::Relaxed);
        self.counters
            .pairs_failed
            .fetch_add(report.failed.len() as u64, Ordering::Relaxed);
        self.counters
            .last_run_ms
            .store(self.clock.now_ms(), Ordering::Relaxed);
        self.warming.store(false, Ordering::Release);

        info!(
            "Warm-up finished: {} warmed, {} failed",
            report.warmed.len(),
            report.failed.len()
        );
        Some(report)
    }

    async fn warm_all(&self, pairs: Vec<TokenPair>) -> WarmupReport {
        let batch_size = self.config.read().max_concurrent.max(1);
        let mut report = WarmupReport::default();

        for batch in pairs.chunks(batch_size) {
            let results = join_all(batch.iter().map(|pair| self.warm_pair(pair))).await;

            for (pair, ok) in batch.iter().zip(results) {
                if ok {
                    report.warmed.push(pair.clone());
                } else {
                    report.failed.push(pair.clone());
                }
            }
        }

        report
    }

    /// Query every supporting source and cache the best valid answer
    async fn warm_pair(&self, pair: &TokenPair) -> bool {
        let sources = self.registry.supporting(pair);
        if sources.is_empty() {
            warn!("No source supports {}, cannot warm", pair);
            return false;
        }

        let results = join_all(
            sources
                .iter()
                .map(|source| self.fetch_with_retry(source.as_ref(), pair)),
        )
        .await;

        let (valid, _rejected) = self
            .validator
            .validate_batch(results.into_iter().flatten().collect());

        match valid
            .into_iter()
            .max_by(|a, b| a.confidence.total_cmp(&b.confidence))
        {
            Some(best) => {
                self.cache.set(pair, best).await;
                true
            }
            None => {
                error!("Warm-up failed for {}: no valid observation from any source", pair);
                false
            }
        }
    }

    async fn fetch_with_retry(
        &self,
        source: &dyn PriceSource,
        pair: &TokenPair,
    ) -> Option<PriceObservation> {
        let config = self.config();
        let attempts = config.retry_attempts.max(1);

        for attempt in 1..=attempts {
            match self.registry.fetch(source, pair).await {
                Ok(obs) => return Some(obs),
                Err(e) => {
                    warn!(
                        "Warm-up fetch {} from {} failed (attempt {}/{}): {}",
                        pair,
                        source.name(),
                        attempt,
                        attempts,
                        e
                    );
                    if attempt < attempts {
                        tokio::time::sleep(config.retry_delay()).await;
                    }
                }
            }
        }

        None
    }

    /// Periodic loop; the first tick fires immediately. Runs until `cancel`
    /// fires.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let period = non_zero(self.config().interval());
        let mut interval = tokio::time::interval(period);
        interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

        info!("Cache warmer started (every {:?})", period);

        let mut interrupted = false;
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if !self.config.read().enabled {
                        continue;
                    }
                    // a skipped pass resolves at once, so only a pass holding
                    // the flag can still be pending here
                    tokio::select! {
                        _ = cancel.cancelled() => {
                            interrupted = true;
                            break;
                        }
                        _ = self.warmup(None) => {}
                    }
                }
            }
        }

        // the dropped pass never reached its own reset
        if interrupted {
            self.warming.store(false, Ordering::Release);
        }
        info!("Cache warmer stopped");
    }

    pub fn stats(&self) -> WarmupStats {
        let last = self.counters.last_run_ms.load(Ordering::Relaxed);
        WarmupStats {
            is_warming: self.is_warming(),
            runs: self.counters.runs.load(Ordering::Relaxed),
            skipped_runs: self.counters.skipped_runs.load(Ordering::Relaxed),
            pairs_warmed: self.counters.pairs_warmed.load(Ordering::Relaxed),
            pairs_failed: self.counters.pairs_failed.load(Ordering::Relaxed),
            last_run_ms: (last > 0).then_some(last),
            priority_pairs: self.priority_pairs.read().len(),
        }
    }
}

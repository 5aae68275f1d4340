//! Oracle - public entry point
//!
//! Wires sources, validation, aggregation and the tiered cache together and
//! owns the lifecycle of the background loops (refresh, warm-up, durable
//! flush).

use futures::future::join_all;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use oracle_cache::{CacheStats, DurableStore, TieredCache};
use oracle_core::{
    AggregationPolicy, CacheConfig, ChainConfig, ChainId, Clock, OracleConfig, OracleError,
    OracleResult, PriceObservation, SharedClock, TokenPair, UpdaterConfig, ValidatorConfig,
    WarmerConfig,
};
use oracle_price_feed::{
    Aggregation, DataValidator, PriceAggregator, PriceSource, SourceRegistry,
};

use crate::non_zero;
use crate::updater::{CacheUpdater, UpdateStats};
use crate::warmer::{CacheWarmer, WarmupReport, WarmupStats};

/// Shared components the oracle is assembled from.
///
/// Hosts that need to reach a component directly (or share one between
/// several oracles) build this themselves and hand it to
/// [`Oracle::from_components`].
#[derive(Clone)]
pub struct Components {
    pub registry: Arc<SourceRegistry>,
    pub validator: Arc<DataValidator>,
    pub aggregator: Arc<PriceAggregator>,
    pub cache: Arc<TieredCache>,
    pub updater: Arc<CacheUpdater>,
    pub warmer: Arc<CacheWarmer>,
}

impl Components {
    /// Build every component from `config` around an existing registry.
    /// Configured rate limits are applied to the registry.
    pub fn build(
        config: &OracleConfig,
        registry: Arc<SourceRegistry>,
        store: Arc<dyn DurableStore>,
        clock: SharedClock,
    ) -> Self {
        for (source, limit) in &config.rate_limits {
            registry.configure_rate_limit(source, *limit);
        }

        let validator = Arc::new(DataValidator::new(&config.validator, Arc::clone(&clock)));
        let aggregator = Arc::new(PriceAggregator::new(config.aggregation.clone()));
        let cache = Arc::new(TieredCache::new(
            config.cache.clone(),
            store,
            Arc::clone(&clock),
        ));

        let updater = Arc::new(CacheUpdater::new(
            config.updater.clone(),
            Arc::clone(&registry),
            Arc::clone(&validator),
            Arc::clone(&cache),
            Arc::clone(&clock),
        ));
        updater.set_priority_pairs(config.priority_pairs.clone());

        let warmer = Arc::new(CacheWarmer::new(
            config.warmer.clone(),
            Arc::clone(&registry),
            Arc::clone(&validator),
            Arc::clone(&cache),
            clock,
        ));
        warmer.set_priority_pairs(config.priority_pairs.clone());

        Self {
            registry,
            validator,
            aggregator,
            cache,
            updater,
            warmer,
        }
    }
}

/// Running background loops
struct Background {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct Oracle {
    config: RwLock<OracleConfig>,
    components: Components,
    clock: SharedClock,
    background: Mutex<Option<Background>>,
}

impl Oracle {
    pub fn new(
        config: OracleConfig,
        registry: Arc<SourceRegistry>,
        store: Arc<dyn DurableStore>,
        clock: SharedClock,
    ) -> OracleResult<Self> {
        config.validate()?;
        let components = Components::build(&config, registry, store, Arc::clone(&clock));
        Ok(Self::from_components(config, components, clock))
    }

    pub fn from_components(config: OracleConfig, components: Components, clock: SharedClock) -> Self {
        Self {
            config: RwLock::new(config),
            components,
            clock,
            background: Mutex::new(None),
        }
    }

    pub fn components(&self) -> &Components {
        &self.components
    }

    pub fn config(&self) -> OracleConfig {
        self.config.read().clone()
    }

    // ---- sources ----

    pub fn register_source(&self, source: Arc<dyn PriceSource>) {
        self.components.registry.register(source);
    }

    pub fn unregister_source(&self, name: &str) -> bool {
        self.components.registry.unregister(name)
    }

    /// Names of every registered source, in registration order
    pub fn get_available_sources(&self) -> Vec<String> {
        self.components.registry.names()
    }

    // ---- prices ----

    /// Price for `pair`, cache first.
    ///
    /// Without an explicit `source_id` the chain's preferred source is used
    /// if one is configured; otherwise supporting sources are tried by
    /// descending declared confidence until one yields an acceptable
    /// observation.
    pub async fn get_price(
        &self,
        pair: &TokenPair,
        source_id: Option<&str>,
    ) -> OracleResult<PriceObservation> {
        let source_id = source_id.map(str::to_string).or_else(|| {
            self.config
                .read()
                .get_chain_config(pair.chain)
                .and_then(|c| c.preferred_source.clone())
        });

        if let Some(cached) = self.cached(pair, source_id.as_deref()).await {
            return Ok(cached);
        }

        match source_id {
            Some(id) => {
                let source = self
                    .components
                    .registry
                    .get(&id)
                    .ok_or_else(|| OracleError::SourceNotFound(id.clone()))?;
                self.fetch_checked(source.as_ref(), pair).await
            }
            None => self.fetch_first_acceptable(pair).await,
        }
    }

    /// Every acceptable observation for `pair`, one per responding source.
    /// Observations failing validation or the confidence floor are dropped.
    /// Nothing is cached.
    pub async fn get_price_from_all_sources(
        &self,
        pair: &TokenPair,
    ) -> OracleResult<Vec<PriceObservation>> {
        if self.components.registry.supporting(pair).is_empty() {
            return Err(OracleError::NoSourceAvailable(pair.to_string()));
        }

        let valid = self.fetch_valid(pair).await;
        let threshold = self.config.read().confidence_threshold(pair.chain);

        Ok(valid
            .into_iter()
            .filter(|obs| {
                let ok = obs.confidence >= threshold;
                if !ok {
                    debug!(
                        "Dropping {} observation for {}: confidence {:.3} < {:.3}",
                        obs.source, pair, obs.confidence, threshold
                    );
                }
                ok
            })
            .collect())
    }

    /// Consensus of every supporting source
    pub async fn get_aggregated_price(&self, pair: &TokenPair) -> OracleResult<PriceObservation> {
        self.get_aggregation(pair).await.map(|a| a.observation)
    }

    /// Like [`get_aggregated_price`](Self::get_aggregated_price), but also
    /// returns the sources flagged as outliers. A pair no source supports
    /// fails like any other shortfall, with `InsufficientSources`.
    pub async fn get_aggregation(&self, pair: &TokenPair) -> OracleResult<Aggregation> {
        let valid = self.fetch_valid(pair).await;

        let max_deviation = self
            .config
            .read()
            .get_chain_config(pair.chain)
            .and_then(|c| c.max_price_deviation);
        let aggregation = self
            .components
            .aggregator
            .aggregate_with_report(&valid, max_deviation)?;

        self.check_confidence(&aggregation.observation)?;
        self.components
            .cache
            .set(pair, aggregation.observation.clone())
            .await;

        Ok(aggregation)
    }

    pub async fn clear_cache(&self) {
        self.components.cache.clear().await;
        info!("Price cache cleared");
    }

    pub async fn invalidate(&self, pair: &TokenPair) {
        self.components.cache.invalidate(pair).await;
    }

    // ---- background work ----

    pub fn schedule_update(&self, pair: TokenPair, priority: u32) {
        self.components.updater.schedule_update(pair, priority);
    }

    pub async fn warmup(&self, pairs: Option<Vec<TokenPair>>) -> Option<WarmupReport> {
        self.components.warmer.warmup(pairs).await
    }

    pub fn is_running(&self) -> bool {
        self.background.lock().is_some()
    }

    /// Spawn the refresh, warm-up and durable flush loops. Calling `start`
    /// on a running oracle does nothing.
    pub fn start(&self) {
        let mut background = self.background.lock();
        if background.is_some() {
            debug!("Oracle already running");
            return;
        }

        let cancel = CancellationToken::new();
        let mut handles = Vec::with_capacity(3);

        handles.push(tokio::spawn(
            Arc::clone(&self.components.updater).run(cancel.child_token()),
        ));
        handles.push(tokio::spawn(
            Arc::clone(&self.components.warmer).run(cancel.child_token()),
        ));

        let period = non_zero(self.config.read().cache.durable.sync_interval());
        handles.push(tokio::spawn(flush_loop(
            Arc::clone(&self.components.cache),
            period,
            cancel.child_token(),
        )));

        *background = Some(Background { cancel, handles });
        info!(
            "Oracle started with {} sources",
            self.components.registry.len()
        );
    }

    /// Cancel the background loops, wait for them to exit and flush the
    /// durable tier one last time.
    pub async fn stop(&self) {
        let background = self.background.lock().take();
        let Some(background) = background else {
            return;
        };

        background.cancel.cancel();
        for result in join_all(background.handles).await {
            if let Err(e) = result {
                error!("Background task ended abnormally: {}", e);
            }
        }

        match self.components.cache.sync_durable().await {
            Ok(n) => debug!("Final durable flush wrote {} entries", n),
            Err(e) => error!("Final durable flush failed: {}", e),
        }
        info!(
            "Oracle stopped (cache hit rate {:.1}%)",
            self.components.cache.stats().hit_rate() * 100.0
        );
    }

    // ---- introspection ----

    pub fn get_cache_stats(&self) -> CacheStats {
        self.components.cache.stats()
    }

    pub fn get_update_stats(&self) -> UpdateStats {
        self.components.updater.stats()
    }

    pub fn get_warmup_stats(&self) -> WarmupStats {
        self.components.warmer.stats()
    }

    // ---- configuration ----

    pub fn update_cache_config(&self, config: CacheConfig) {
        self.components.cache.update_config(config.clone());
        self.config.write().cache = config;
    }

    pub fn update_aggregation_policy(&self, policy: AggregationPolicy) {
        self.components.aggregator.update_policy(policy.clone());
        self.config.write().aggregation = policy;
    }

    pub fn update_validator_config(&self, config: ValidatorConfig) {
        self.components.validator.apply_config(&config);
        self.config.write().validator = config;
    }

    /// Takes effect for the tick interval on the next `start`
    pub fn update_updater_config(&self, config: UpdaterConfig) {
        self.components.updater.update_config(config.clone());
        self.config.write().updater = config;
    }

    /// Takes effect for the tick interval on the next `start`
    pub fn update_warmer_config(&self, config: WarmerConfig) {
        self.components.warmer.update_config(config.clone());
        self.config.write().warmer = config;
    }

    pub fn update_chain_config(&self, chain: ChainId, config: ChainConfig) {
        self.config.write().chains.insert(chain, config);
    }

    pub fn set_minimum_confidence(&self, minimum_confidence: f64) {
        self.config.write().minimum_confidence = minimum_confidence;
    }

    pub fn set_priority_pairs(&self, pairs: Vec<TokenPair>) {
        self.components.updater.set_priority_pairs(pairs.clone());
        self.components.warmer.set_priority_pairs(pairs.clone());
        self.config.write().priority_pairs = pairs;
    }

    // ---- internals ----

    /// A cache hit that is still usable: from the requested source (if
    /// any), younger than the validator's max age and above the confidence
    /// floor.
    async fn cached(&self, pair: &TokenPair, source_id: Option<&str>) -> Option<PriceObservation> {
        let hit = self.components.cache.get(pair).await?;

        if source_id.is_some_and(|id| id != hit.source) {
            return None;
        }

        let (max_age_ms, threshold) = {
            let config = self.config.read();
            (config.validator.max_age_ms, config.confidence_threshold(pair.chain))
        };
        if hit.is_stale(max_age_ms, self.clock.now_ms()) || hit.confidence < threshold {
            debug!("Cached price for {} from {} no longer usable", pair, hit.source);
            return None;
        }

        Some(hit)
    }

    /// Fetch from one source, validate, check confidence and cache
    async fn fetch_checked(
        &self,
        source: &dyn PriceSource,
        pair: &TokenPair,
    ) -> OracleResult<PriceObservation> {
        let obs = self.components.registry.fetch(source, pair).await?;

        let report = self.components.validator.validate(&obs);
        if !report.is_valid {
            return Err(report.into_error(source.name()));
        }
        self.check_confidence(&obs)?;

        self.components.cache.set(pair, obs.clone()).await;
        Ok(obs)
    }

    async fn fetch_first_acceptable(&self, pair: &TokenPair) -> OracleResult<PriceObservation> {
        let mut sources = self.components.registry.supporting(pair);
        if sources.is_empty() {
            return Err(OracleError::NoSourceAvailable(pair.to_string()));
        }
        sources.sort_by(|a, b| b.confidence().total_cmp(&a.confidence()));

        let mut last_err = None;
        for source in sources {
            match self.fetch_checked(source.as_ref(), pair).await {
                Ok(obs) => return Ok(obs),
                Err(e) => {
                    warn!("Source {} unusable for {}: {}", source.name(), pair, e);
                    last_err = Some(e);
                }
            }
        }

        Err(last_err.unwrap_or_else(|| OracleError::NoSourceAvailable(pair.to_string())))
    }

    /// Fan out to every supporting source and keep the valid observations
    async fn fetch_valid(&self, pair: &TokenPair) -> Vec<PriceObservation> {
        let fan_out = self.components.registry.fetch_all(pair).await;
        let (valid, rejected) = self.components.validator.validate_batch(fan_out.observations);
        for (obs, report) in &rejected {
            warn!(
                "Rejected {} observation for {}: {}",
                obs.source,
                pair,
                report.error_messages().join("; ")
            );
        }

        valid
    }

    fn check_confidence(&self, obs: &PriceObservation) -> OracleResult<()> {
        let threshold = self.config.read().confidence_threshold(obs.pair.chain);
        if obs.confidence < threshold {
            warn!(
                "Confidence for {} from {} below threshold: {:.3} < {:.3}",
                obs.pair, obs.source, obs.confidence, threshold
            );
            return Err(OracleError::ConfidenceBelowThreshold {
                confidence: obs.confidence,
                threshold,
            });
        }
        Ok(())
    }
}

/// Push pending durable writes once per sync interval
async fn flush_loop(cache: Arc<TieredCache>, period: std::time::Duration, cancel: CancellationToken) {
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = interval.tick() => {
                let purged = cache.purge_expired();
                if purged > 0 {
                    debug!("Purged {} expired cache entries", purged);
                }
                match cache.sync_durable().await {
                    Ok(n) if n > 0 => debug!("Durable flush wrote {} entries", n),
                    Ok(_) => {}
                    // entries stay pending; the next tick retries
                    Err(e) => warn!("Durable flush failed: {}", e),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{eth_usd, StubSource, NOW_MS};
    use oracle_cache::{MemoryStore, Tier};
    use oracle_core::ManualClock;

    fn oracle(config: OracleConfig, sources: Vec<StubSource>) -> (Oracle, Arc<MemoryStore>) {
        let registry = Arc::new(SourceRegistry::new());
        for source in sources {
            registry.register(Arc::new(source));
        }
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(NOW_MS));
        let oracle = Oracle::new(config, registry, store.clone(), clock).unwrap();
        (oracle, store)
    }

    #[tokio::test]
    async fn test_cache_hit_skips_sources() {
        let source = StubSource::new("s", Some(100.0));
        let (oracle, _) = oracle(OracleConfig::default(), vec![source.clone()]);

        let first = oracle.get_price(&eth_usd(), None).await.unwrap();
        let second = oracle.get_price(&eth_usd(), None).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(source.calls(), 1);
        assert_eq!(oracle.get_cache_stats().l1_hits, 1);
    }

    #[tokio::test]
    async fn test_explicit_source_bypasses_foreign_cache_entry() {
        let a = StubSource::new("a", Some(100.0)).confidence(0.9);
        let b = StubSource::new("b", Some(101.0)).confidence(0.8);
        let (oracle, _) = oracle(OracleConfig::default(), vec![a, b.clone()]);

        assert_eq!(oracle.get_price(&eth_usd(), None).await.unwrap().source, "a");

        let from_b = oracle.get_price(&eth_usd(), Some("b")).await.unwrap();
        assert_eq!(from_b.source, "b");
        assert_eq!(b.calls(), 1);
    }

    #[tokio::test]
    async fn test_unknown_source() {
        let (oracle, _) = oracle(OracleConfig::default(), vec![]);
        let err = oracle.get_price(&eth_usd(), Some("nope")).await.unwrap_err();
        assert!(matches!(err, OracleError::SourceNotFound(ref s) if s == "nope"));
    }

    #[tokio::test]
    async fn test_aggregation_without_sources_is_insufficient() {
        let (oracle, _) = oracle(OracleConfig::default(), vec![]);
        let err = oracle.get_aggregation(&eth_usd()).await.unwrap_err();
        assert!(matches!(
            err,
            OracleError::InsufficientSources {
                required: 1,
                available: 0
            }
        ));
        assert!(oracle.get_cache_stats().l1_size == 0);
    }

    #[tokio::test]
    async fn test_falls_back_past_failing_source() {
        let down = StubSource::new("down", None).confidence(0.99);
        let up = StubSource::new("up", Some(5.0)).confidence(0.7);
        let (oracle, _) = oracle(OracleConfig::default(), vec![down.clone(), up]);

        let obs = oracle.get_price(&eth_usd(), None).await.unwrap();
        assert_eq!(obs.source, "up");
        assert_eq!(down.calls(), 1);
    }

    #[tokio::test]
    async fn test_aggregation_is_cached() {
        let (oracle, _) = oracle(
            OracleConfig::default(),
            vec![StubSource::new("a", Some(100.0)), StubSource::new("b", Some(102.0))],
        );

        let agg = oracle.get_aggregated_price(&eth_usd()).await.unwrap();
        assert!(agg.is_aggregated());
        assert_eq!(
            oracle.components().cache.peek(Tier::L1, &eth_usd()).unwrap().observation,
            agg
        );
    }

    #[test]
    fn test_setters_reach_components() {
        let (oracle, _) = oracle(OracleConfig::default(), vec![StubSource::new("s", Some(1.0))]);

        oracle.update_aggregation_policy(AggregationPolicy {
            min_sources: 2,
            ..Default::default()
        });
        assert_eq!(oracle.components().aggregator.policy().min_sources, 2);

        oracle.set_priority_pairs(vec![eth_usd()]);
        assert_eq!(oracle.get_warmup_stats().priority_pairs, 1);
        assert_eq!(oracle.config().priority_pairs, vec![eth_usd()]);

        oracle.update_chain_config(
            ChainId::Ethereum,
            ChainConfig {
                min_confidence: Some(0.95),
                ..Default::default()
            },
        );
        let err = tokio_test::block_on(oracle.get_price(&eth_usd(), None)).unwrap_err();
        assert!(matches!(err, OracleError::ConfidenceBelowThreshold { .. }));
    }

    #[tokio::test]
    async fn test_stop_flushes_durable_tier() {
        let (oracle, store) = oracle(
            OracleConfig::default(),
            vec![StubSource::new("s", Some(1.0))],
        );

        oracle.start();
        assert!(oracle.is_running());
        oracle.get_price(&eth_usd(), None).await.unwrap();

        oracle.stop().await;
        assert!(!oracle.is_running());
        assert_eq!(store.len(), 1);
        assert!(store.flush_count() >= 1);

        // idempotent
        oracle.stop().await;
    }
}

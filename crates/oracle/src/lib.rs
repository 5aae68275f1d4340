//! Price oracle service
//!
//! Features:
//! - Cache-first price lookups with per-chain preferred sources
//! - Fan-out to every supporting source with consensus aggregation
//! - Global and per-chain confidence floors
//! - Background refresh of cached pairs and warm-up of priority pairs
//! - Deterministic start/stop of the background loops

use std::time::Duration;

pub mod oracle;
pub mod updater;
pub mod warmer;

pub use oracle::Oracle;
pub use updater::{should_update, CacheUpdater, RefreshOutcome, UpdateStats, UpdateTask};
pub use warmer::{CacheWarmer, WarmupReport, WarmupStats};

/// `tokio::time::interval` panics on a zero period
pub(crate) fn non_zero(period: Duration) -> Duration {
    period.max(Duration::from_millis(1))
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;

    use oracle_cache::{MemoryStore, TieredCache};
    use oracle_core::{
        CacheConfig, ChainId, ManualClock, PriceObservation, SourceError, SourceResult,
        TokenPair, UpdaterConfig, ValidatorConfig, WarmerConfig,
    };
    use oracle_price_feed::{DataValidator, PriceSource, SourceRegistry};

    use crate::updater::CacheUpdater;
    use crate::warmer::CacheWarmer;

    /// Fixed wall-clock start for every fixture
    pub const NOW_MS: u64 = 1_700_000_000_000;

    /// Scriptable source; clones share the call counter
    #[derive(Clone)]
    pub struct StubSource {
        name: String,
        price: Option<f64>,
        confidence: f64,
        chains: Vec<ChainId>,
        fail_first: usize,
        delay: Option<Duration>,
        calls: Arc<AtomicUsize>,
    }

    impl StubSource {
        pub fn new(name: &str, price: Option<f64>) -> Self {
            Self {
                name: name.to_string(),
                price,
                confidence: 0.9,
                chains: vec![ChainId::Ethereum],
                fail_first: 0,
                delay: None,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }

        pub fn confidence(mut self, confidence: f64) -> Self {
            self.confidence = confidence;
            self
        }

        pub fn chains(mut self, chains: Vec<ChainId>) -> Self {
            self.chains = chains;
            self
        }

        pub fn fail_first(mut self, n: usize) -> Self {
            self.fail_first = n;
            self
        }

        pub fn delay(mut self, delay: Duration) -> Self {
            self.delay = Some(delay);
            self
        }

        pub fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait::async_trait]
    impl PriceSource for StubSource {
        fn name(&self) -> &str {
            &self.name
        }

        fn is_supported(&self, pair: &TokenPair) -> bool {
            self.chains.contains(&pair.chain)
        }

        fn confidence(&self) -> f64 {
            self.confidence
        }

        async fn get_price_data(&self, pair: &TokenPair) -> SourceResult<PriceObservation> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if call < self.fail_first {
                return Err(SourceError::Unavailable(self.name.clone()));
            }
            match self.price {
                Some(price) => Ok(PriceObservation::new(
                    pair.clone(),
                    price,
                    NOW_MS,
                    &self.name,
                    self.confidence,
                )),
                None => Err(SourceError::Unavailable(self.name.clone())),
            }
        }
    }

    pub struct Fixture {
        pub clock: Arc<ManualClock>,
        pub registry: Arc<SourceRegistry>,
        pub validator: Arc<DataValidator>,
        pub cache: Arc<TieredCache>,
        pub updater: Arc<CacheUpdater>,
        pub warmer: Arc<CacheWarmer>,
    }

    pub fn fixture(sources: Vec<StubSource>) -> Fixture {
        let clock = Arc::new(ManualClock::new(NOW_MS));

        let registry = Arc::new(SourceRegistry::new());
        for source in sources {
            registry.register(Arc::new(source));
        }

        let validator = Arc::new(DataValidator::new(&ValidatorConfig::default(), clock.clone()));
        let cache = Arc::new(TieredCache::new(
            CacheConfig::default(),
            Arc::new(MemoryStore::new()),
            clock.clone(),
        ));

        let updater = Arc::new(CacheUpdater::new(
            UpdaterConfig::default(),
            registry.clone(),
            validator.clone(),
            cache.clone(),
            clock.clone(),
        ));
        let warmer = Arc::new(CacheWarmer::new(
            WarmerConfig::default(),
            registry.clone(),
            validator.clone(),
            cache.clone(),
            clock.clone(),
        ));

        Fixture {
            clock,
            registry,
            validator,
            cache,
            updater,
            warmer,
        }
    }

    pub fn pair(base: &str) -> TokenPair {
        TokenPair::new(ChainId::Ethereum, base, "usd")
    }

    pub fn eth_usd() -> TokenPair {
        pair("eth")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_non_zero_period() {
        assert_eq!(non_zero(Duration::ZERO), Duration::from_millis(1));
        assert_eq!(non_zero(Duration::from_secs(5)), Duration::from_secs(5));
    }
}

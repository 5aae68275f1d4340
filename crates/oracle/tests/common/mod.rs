#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use oracle_cache::DurableStore;
use oracle_core::{
    ChainId, Clock, ManualClock, OracleConfig, PriceObservation, SourceError, SourceResult,
    TokenPair,
};
use oracle_price_feed::{PriceSource, SourceRegistry};
use oracle_service::Oracle;

pub const START_MS: u64 = 1_700_000_000_000;

/// Feed that answers with a fixed price stamped by the shared test clock
pub struct MockSource {
    name: String,
    price: Option<f64>,
    confidence: f64,
    chains: Vec<ChainId>,
    clock: Arc<ManualClock>,
    calls: Arc<AtomicUsize>,
}

impl MockSource {
    pub fn new(name: &str, price: f64, confidence: f64, clock: &Arc<ManualClock>) -> Self {
        Self {
            name: name.to_string(),
            price: Some(price),
            confidence,
            chains: vec![ChainId::Ethereum],
            clock: Arc::clone(clock),
            calls: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn down(name: &str, clock: &Arc<ManualClock>) -> Self {
        Self {
            price: None,
            ..Self::new(name, 0.0, 0.9, clock)
        }
    }

    /// Shared handle on the call counter, usable after the source is moved
    pub fn calls(&self) -> Arc<AtomicUsize> {
        Arc::clone(&self.calls)
    }
}

#[async_trait::async_trait]
impl PriceSource for MockSource {
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
        self.calls.fetch_add(1, Ordering::SeqCst);
        let price = self
            .price
            .ok_or_else(|| SourceError::Unavailable(format!("{} is down", self.name)))?;

        Ok(PriceObservation::new(
            pair.clone(),
            price,
            self.clock.now_ms(),
            &self.name,
            self.confidence,
        ))
    }
}

pub fn clock() -> Arc<ManualClock> {
    Arc::new(ManualClock::new(START_MS))
}

pub fn eth_usd() -> TokenPair {
    TokenPair::new(ChainId::Ethereum, "eth", "usd")
}

pub fn count(calls: &Arc<AtomicUsize>) -> usize {
    calls.load(Ordering::SeqCst)
}

pub fn oracle(
    config: OracleConfig,
    sources: Vec<MockSource>,
    store: Arc<dyn DurableStore>,
    clock: &Arc<ManualClock>,
) -> Oracle {
    let registry = Arc::new(SourceRegistry::new());
    for source in sources {
        registry.register(Arc::new(source));
    }
    Oracle::new(config, registry, store, clock.clone()).expect("valid config")
}

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

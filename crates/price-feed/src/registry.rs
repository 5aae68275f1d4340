//! Source registry - owns the configured price sources and fans requests
//! out to them under each source's rate limit.

use futures::future::join_all;
use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

use oracle_core::{PriceObservation, RateLimitConfig, SourceError, SourceResult, TokenPair};

use crate::rate_limiter::RateLimiter;
use crate::source::PriceSource;

/// Outcome of querying every supporting source for one pair
#[derive(Debug, Default)]
pub struct FanOut {
    pub observations: Vec<PriceObservation>,
    pub failures: Vec<(String, SourceError)>,
}

impl FanOut {
    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Registered sources, in registration order
#[derive(Default)]
pub struct SourceRegistry {
    sources: RwLock<Vec<Arc<dyn PriceSource>>>,
    limiter: RateLimiter,
}

impl SourceRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a source, replacing any source with the same name.
    /// A rate limit declared by the source itself is applied unless
    /// `configure_rate_limit` overrides it later.
    pub fn register(&self, source: Arc<dyn PriceSource>) {
        let name = source.name().to_string();
        if let Some(limit) = source.rate_limit() {
            self.limiter.configure(&name, limit);
        }

        let mut sources = self.sources.write();
        sources.retain(|s| s.name() != name);
        sources.push(source);
        debug!("Registered price source {}", name);
    }

    pub fn unregister(&self, name: &str) -> bool {
        let mut sources = self.sources.write();
        let before = sources.len();
        sources.retain(|s| s.name() != name);
        self.limiter.remove(name);
        sources.len() != before
    }

    pub fn configure_rate_limit(&self, name: &str, limit: RateLimitConfig) {
        self.limiter.configure(name, limit);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn PriceSource>> {
        self.sources.read().iter().find(|s| s.name() == name).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        self.sources.read().iter().map(|s| s.name().to_string()).collect()
    }

    pub fn len(&self) -> usize {
        self.sources.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.sources.read().is_empty()
    }

    /// Sources that can price `pair`, in registration order
    pub fn supporting(&self, pair: &TokenPair) -> Vec<Arc<dyn PriceSource>> {
        self.sources
            .read()
            .iter()
            .filter(|s| s.is_supported(pair))
            .cloned()
            .collect()
    }

    /// One rate-limited call to one source
    pub async fn fetch(
        &self,
        source: &dyn PriceSource,
        pair: &TokenPair,
    ) -> SourceResult<PriceObservation> {
        if !source.is_supported(pair) {
            return Err(SourceError::PairUnsupported {
                source_id: source.name().to_string(),
                pair: pair.to_string(),
            });
        }

        self.limiter.acquire(source.name()).await;
        source.get_price_data(pair).await
    }

    /// Query every supporting source concurrently; individual failures are
    /// collected, never propagated.
    pub async fn fetch_all(&self, pair: &TokenPair) -> FanOut {
        let sources = self.supporting(pair);

        let results = join_all(sources.iter().map(|source| async move {
            (source.name().to_string(), self.fetch(source.as_ref(), pair).await)
        }))
        .await;

        let mut out = FanOut::default();
        for (name, result) in results {
            match result {
                Ok(obs) => out.observations.push(obs),
                Err(e) => {
                    warn!("Source {} failed for {}: {}", name, pair, e);
                    out.failures.push((name, e));
                }
            }
        }
        out
    }
}

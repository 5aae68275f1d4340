//! Price source contract
//!
//! One implementation per external feed (on-chain oracle, AMM pool reader,
//! exchange REST API, aggregator API). The oracle only ever talks to feeds
//! through this trait.

use oracle_core::{PriceObservation, RateLimitConfig, SourceResult, TokenPair};

#[async_trait::async_trait]
pub trait PriceSource: Send + Sync {
    /// Stable identifier, also used as the observation `source`
    fn name(&self) -> &str;

    fn is_supported(&self, pair: &TokenPair) -> bool;

    /// Static reliability weight of the feed, in `[0, 1]`
    fn confidence(&self) -> f64;

    async fn get_price_data(&self, pair: &TokenPair) -> SourceResult<PriceObservation>;

    /// Request budget the caller must respect, if any
    fn rate_limit(&self) -> Option<RateLimitConfig> {
        None
    }
}

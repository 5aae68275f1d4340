//! Price observations and per-source metadata

use serde::{Deserialize, Serialize};

use crate::{AggregationMethod, TokenPair};

/// Source id carried by every observation the aggregator produces
pub const AGGREGATED_SOURCE: &str = "AGGREGATED";

/// Typed metadata attached by the feed that produced an observation.
///
/// Consumers match on the variant; anything not listed here is not a known
/// feed kind and has no metadata to offer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceMetadata {
    #[default]
    None,
    /// On-chain oracle round (Chainlink-style)
    OnChainOracle {
        round_id: u64,
        answered_in_round: u64,
        decimals: u8,
    },
    /// AMM pool reader
    AmmPool {
        pool_address: String,
        fee_bps: u32,
        liquidity: f64,
    },
    /// Centralised exchange ticker
    Exchange {
        venue: String,
        bid: Option<f64>,
        ask: Option<f64>,
    },
    /// Third-party aggregator API
    ApiAggregator { provider: String, route_count: u32 },
    /// Consensus produced from several observations
    Aggregated {
        sources: Vec<String>,
        method: AggregationMethod,
    },
}

impl SourceMetadata {
    pub fn is_none(&self) -> bool {
        matches!(self, SourceMetadata::None)
    }

    pub fn kind(&self) -> &'static str {
        match self {
            SourceMetadata::None => "none",
            SourceMetadata::OnChainOracle { .. } => "on_chain_oracle",
            SourceMetadata::AmmPool { .. } => "amm_pool",
            SourceMetadata::Exchange { .. } => "exchange",
            SourceMetadata::ApiAggregator { .. } => "api_aggregator",
            SourceMetadata::Aggregated { .. } => "aggregated",
        }
    }
}

/// One price reading, attributed to one source.
///
/// Observations are never mutated after creation; staleness is measured
/// against a clock rather than corrected in place.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceObservation {
    pub pair: TokenPair,
    pub price: f64,
    pub timestamp_ms: u64,
    pub source: String,
    /// Reliability in `[0, 1]`
    pub confidence: f64,
    pub volume_24h: Option<f64>,
    pub liquidity_usd: Option<f64>,
    #[serde(default)]
    pub metadata: SourceMetadata,
}

impl PriceObservation {
    pub fn new(
        pair: TokenPair,
        price: f64,
        timestamp_ms: u64,
        source: impl Into<String>,
        confidence: f64,
    ) -> Self {
        Self {
            pair,
            price,
            timestamp_ms,
            source: source.into(),
            confidence: confidence.clamp(0.0, 1.0),
            volume_24h: None,
            liquidity_usd: None,
            metadata: SourceMetadata::None,
        }
    }

    pub fn with_volume(mut self, volume_24h: f64) -> Self {
        self.volume_24h = Some(volume_24h);
        self
    }

    pub fn with_liquidity(mut self, liquidity_usd: f64) -> Self {
        self.liquidity_usd = Some(liquidity_usd);
        self
    }

    pub fn with_metadata(mut self, metadata: SourceMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn age_ms(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.timestamp_ms)
    }

    pub fn is_stale(&self, max_age_ms: u64, now_ms: u64) -> bool {
        self.age_ms(now_ms) > max_age_ms
    }

    pub fn is_aggregated(&self) -> bool {
        self.source == AGGREGATED_SOURCE
    }

    /// Input sources of an aggregated observation
    pub fn aggregated_sources(&self) -> Option<&[String]> {
        match &self.metadata {
            SourceMetadata::Aggregated { sources, .. } => Some(sources),
            _ => None,
        }
    }
}

/// Observation fields a validator can demand
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObservationField {
    Pair,
    Price,
    Timestamp,
    Source,
    Confidence,
    Volume24h,
    LiquidityUsd,
    Metadata,
}

impl ObservationField {
    pub fn name(&self) -> &'static str {
        match self {
            ObservationField::Pair => "pair",
            ObservationField::Price => "price",
            ObservationField::Timestamp => "timestamp",
            ObservationField::Source => "source",
            ObservationField::Confidence => "confidence",
            ObservationField::Volume24h => "volume_24h",
            ObservationField::LiquidityUsd => "liquidity_usd",
            ObservationField::Metadata => "metadata",
        }
    }

    /// Whether `obs` carries a usable value for this field
    pub fn is_present(&self, obs: &PriceObservation) -> bool {
        match self {
            ObservationField::Pair => !obs.pair.base.is_empty() && !obs.pair.quote.is_empty(),
            ObservationField::Price => obs.price.is_finite(),
            ObservationField::Timestamp => obs.timestamp_ms > 0,
            ObservationField::Source => !obs.source.trim().is_empty(),
            ObservationField::Confidence => obs.confidence.is_finite(),
            ObservationField::Volume24h => obs.volume_24h.is_some(),
            ObservationField::LiquidityUsd => obs.liquidity_usd.is_some(),
            ObservationField::Metadata => !obs.metadata.is_none(),
        }
    }
}

//! Configuration types

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::{AggregationMethod, ChainId, ObservationField, OracleError, OracleResult, TokenPair};

/// Weight given to a source the aggregation policy does not list
pub const DEFAULT_SOURCE_WEIGHT: f64 = 0.1;

/// One in-memory cache tier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct TierConfig {
    pub enabled: bool,
    pub max_size: usize,
    pub ttl_ms: u64,
}

impl TierConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_millis(self.ttl_ms)
    }
}

impl Default for TierConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: 1_000,
            ttl_ms: 30_000,
        }
    }
}

/// Durable tier: unbounded, no TTL, synced to the backing store periodically
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DurableConfig {
    pub enabled: bool,
    pub sync_interval_ms: u64,
}

impl DurableConfig {
    pub fn sync_interval(&self) -> Duration {
        Duration::from_millis(self.sync_interval_ms)
    }
}

impl Default for DurableConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            sync_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub l1: TierConfig,
    pub l2: TierConfig,
    pub durable: DurableConfig,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            l1: TierConfig::default(),
            l2: TierConfig {
                enabled: true,
                max_size: 10_000,
                ttl_ms: 300_000,
            },
            durable: DurableConfig::default(),
        }
    }
}

/// How several observations of one pair become one
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AggregationPolicy {
    pub method: AggregationMethod,
    pub min_sources: usize,
    /// Relative distance from consensus above which a source is flagged
    pub max_deviation: f64,
    pub source_weights: HashMap<String, f64>,
}

impl AggregationPolicy {
    pub fn weight_for(&self, source: &str) -> f64 {
        self.source_weights
            .get(source)
            .copied()
            .unwrap_or(DEFAULT_SOURCE_WEIGHT)
    }
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            method: AggregationMethod::Weighted,
            min_sources: 1,
            max_deviation: 0.05,
            source_weights: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidatorConfig {
    pub min_confidence: f64,
    pub max_age_ms: u64,
    pub required_fields: Vec<ObservationField>,
}

impl Default for ValidatorConfig {
    fn default() -> Self {
        Self {
            min_confidence: 0.5,
            max_age_ms: 300_000,
            required_fields: vec![
                ObservationField::Price,
                ObservationField::Timestamp,
                ObservationField::Source,
            ],
        }
    }
}

/// When the refresh scheduler replaces a cached price
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpdateStrategy {
    /// Always refresh
    All,
    /// Refresh once the cached price is older than the stale threshold
    Stale,
    /// Refresh when freshly fetched prices moved past the change threshold
    Changed,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct UpdaterConfig {
    pub enabled: bool,
    pub strategy: UpdateStrategy,
    pub stale_price_threshold_ms: u64,
    /// Relative move, e.g. `0.01` for 1%
    pub price_change_threshold: f64,
    pub max_concurrent: usize,
    pub update_interval_ms: u64,
}

impl UpdaterConfig {
    pub fn update_interval(&self) -> Duration {
        Duration::from_millis(self.update_interval_ms)
    }
}

impl Default for UpdaterConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            strategy: UpdateStrategy::Stale,
            stale_price_threshold_ms: 300_000,
            price_change_threshold: 0.01,
            max_concurrent: 5,
            update_interval_ms: 60_000,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WarmerConfig {
    pub enabled: bool,
    pub interval_ms: u64,
    pub max_concurrent: usize,
    /// Total attempts per source call, first try included
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
}

impl WarmerConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl Default for WarmerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            interval_ms: 300_000,
            max_concurrent: 5,
            retry_attempts: 3,
            retry_delay_ms: 1_000,
        }
    }
}

/// Per-chain overrides
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChainConfig {
    pub preferred_source: Option<String>,
    pub min_confidence: Option<f64>,
    pub max_price_deviation: Option<f64>,
}

/// Fixed-window request budget for one source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitConfig {
    pub max_requests: u32,
    pub interval_ms: u64,
}

impl RateLimitConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms)
    }
}

/// Complete oracle configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    pub minimum_confidence: f64,
    pub chains: HashMap<ChainId, ChainConfig>,
    pub priority_pairs: Vec<TokenPair>,
    pub rate_limits: HashMap<String, RateLimitConfig>,
    pub cache: CacheConfig,
    pub aggregation: AggregationPolicy,
    pub validator: ValidatorConfig,
    pub updater: UpdaterConfig,
    pub warmer: WarmerConfig,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            minimum_confidence: 0.5,
            chains: HashMap::new(),
            priority_pairs: vec![],
            rate_limits: HashMap::new(),
            cache: CacheConfig::default(),
            aggregation: AggregationPolicy::default(),
            validator: ValidatorConfig::default(),
            updater: UpdaterConfig::default(),
            warmer: WarmerConfig::default(),
        }
    }
}

impl OracleConfig {
    /// Load from an optional file layered under `ORACLE__*` environment
    /// variables (e.g. `ORACLE__UPDATER__MAX_CONCURRENT=8`).
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path).required(false));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("ORACLE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let cfg: OracleConfig = builder.build()?.try_deserialize()?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn get_chain_config(&self, chain: ChainId) -> Option<&ChainConfig> {
        self.chains.get(&chain)
    }

    /// Effective confidence floor for a chain: both the global minimum and
    /// the chain override must be met.
    pub fn confidence_threshold(&self, chain: ChainId) -> f64 {
        let chain_min = self
            .get_chain_config(chain)
            .and_then(|c| c.min_confidence)
            .unwrap_or(0.0);
        self.minimum_confidence.max(chain_min)
    }

    pub fn validate(&self) -> OracleResult<()> {
        let unit = |name: &str, v: f64| {
            if (0.0..=1.0).contains(&v) {
                Ok(())
            } else {
                Err(OracleError::InvalidConfig(format!("{name} must be in [0, 1], got {v}")))
            }
        };

        unit("minimum_confidence", self.minimum_confidence)?;
        unit("validator.min_confidence", self.validator.min_confidence)?;
        for (chain, cfg) in &self.chains {
            if let Some(min) = cfg.min_confidence {
                unit(&format!("chains.{chain}.min_confidence"), min)?;
            }
            if let Some(dev) = cfg.max_price_deviation {
                if dev < 0.0 {
                    return Err(OracleError::InvalidConfig(format!(
                        "chains.{chain}.max_price_deviation must be >= 0"
                    )));
                }
            }
        }

        if self.aggregation.min_sources == 0 {
            return Err(OracleError::InvalidConfig(
                "aggregation.min_sources must be >= 1".to_string(),
            ));
        }
        if self.aggregation.max_deviation < 0.0 {
            return Err(OracleError::InvalidConfig(
                "aggregation.max_deviation must be >= 0".to_string(),
            ));
        }
        if self.aggregation.source_weights.values().any(|w| *w < 0.0) {
            return Err(OracleError::InvalidConfig(
                "aggregation.source_weights must be >= 0".to_string(),
            ));
        }
        if self.updater.max_concurrent == 0 || self.warmer.max_concurrent == 0 {
            return Err(OracleError::InvalidConfig(
                "max_concurrent must be >= 1".to_string(),
            ));
        }
        for (source, limit) in &self.rate_limits {
            if limit.max_requests == 0 || limit.interval_ms == 0 {
                return Err(OracleError::InvalidConfig(format!(
                    "rate_limits.{source} needs max_requests and interval_ms > 0"
                )));
            }
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let cfg = OracleConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.cache.l2.ttl(), Duration::from_secs(300));
        assert_eq!(cfg.aggregation.weight_for("unlisted"), DEFAULT_SOURCE_WEIGHT);
    }

    #[test]
    fn test_confidence_threshold_uses_stricter_value() {
        let mut cfg = OracleConfig::default();
        cfg.minimum_confidence = 0.6;
        cfg.chains.insert(
            ChainId::Base,
            ChainConfig {
                min_confidence: Some(0.8),
                ..Default::default()
            },
        );
        cfg.chains.insert(
            ChainId::Polygon,
            ChainConfig {
                min_confidence: Some(0.3),
                ..Default::default()
            },
        );

        assert_eq!(cfg.confidence_threshold(ChainId::Base), 0.8);
        assert_eq!(cfg.confidence_threshold(ChainId::Polygon), 0.6);
        assert_eq!(cfg.confidence_threshold(ChainId::Ethereum), 0.6);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut cfg = OracleConfig::default();
        cfg.aggregation.min_sources = 0;
        assert!(matches!(cfg.validate(), Err(OracleError::InvalidConfig(_))));

        let mut cfg = OracleConfig::default();
        cfg.minimum_confidence = 1.5;
        assert!(cfg.validate().is_err());

        let mut cfg = OracleConfig::default();
        cfg.rate_limits.insert(
            "coingecko".to_string(),
            RateLimitConfig {
                max_requests: 0,
                interval_ms: 1_000,
            },
        );
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let cfg: OracleConfig = serde_json::from_str(
            r#"{
                "minimum_confidence": 0.7,
                "chains": { "ethereum": { "preferred_source": "chainlink" } },
                "updater": { "strategy": "changed" }
            }"#,
        )
        .unwrap();

        assert_eq!(cfg.minimum_confidence, 0.7);
        assert_eq!(cfg.updater.strategy, UpdateStrategy::Changed);
        assert_eq!(cfg.updater.max_concurrent, 5);
        assert_eq!(
            cfg.get_chain_config(ChainId::Ethereum)
                .and_then(|c| c.preferred_source.as_deref()),
            Some("chainlink")
        );
    }
}

//! Price aggregator - combines validated observations into one consensus

use parking_lot::RwLock;
use tracing::{debug, warn};

use oracle_core::{
    AggregationMethod, AggregationPolicy, OracleError, OracleResult, PriceObservation,
    SourceMetadata, AGGREGATED_SOURCE,
};

/// A source whose price sits too far from consensus
#[derive(Debug, Clone, PartialEq)]
pub struct Outlier {
    pub source: String,
    pub price: f64,
    /// `|price - consensus| / consensus`
    pub deviation: f64,
}

/// Consensus plus the sources flagged while computing it
#[derive(Debug, Clone)]
pub struct Aggregation {
    pub observation: PriceObservation,
    pub outliers: Vec<Outlier>,
}

/// Consensus calculator driven by an [`AggregationPolicy`]
#[derive(Debug, Default)]
pub struct PriceAggregator {
    policy: RwLock<AggregationPolicy>,
}

impl PriceAggregator {
    pub fn new(policy: AggregationPolicy) -> Self {
        Self {
            policy: RwLock::new(policy),
        }
    }

    pub fn policy(&self) -> AggregationPolicy {
        self.policy.read().clone()
    }

    pub fn update_policy(&self, policy: AggregationPolicy) {
        *self.policy.write() = policy;
    }

    pub fn aggregate(&self, observations: &[PriceObservation]) -> OracleResult<PriceObservation> {
        self.aggregate_with_report(observations, None)
            .map(|a| a.observation)
    }

    /// Aggregate, optionally overriding the policy's deviation tolerance
    /// (per-chain settings do this).
    pub fn aggregate_with_report(
        &self,
        observations: &[PriceObservation],
        max_deviation: Option<f64>,
    ) -> OracleResult<Aggregation> {
        let policy = self.policy.read().clone();

        if observations.is_empty() || observations.len() < policy.min_sources {
            return Err(OracleError::InsufficientSources {
                required: policy.min_sources.max(1),
                available: observations.len(),
            });
        }

        let (price, confidence) = match policy.method {
            AggregationMethod::Weighted => weighted(observations, &policy),
            AggregationMethod::Median => (
                median(observations.iter().map(|o| o.price).collect()),
                mean_confidence(observations),
            ),
            AggregationMethod::Mean => (
                observations.iter().map(|o| o.price).sum::<f64>() / observations.len() as f64,
                mean_confidence(observations),
            ),
        };

        let max_deviation = max_deviation.unwrap_or(policy.max_deviation);
        let pair = observations[0].pair.clone();
        let mut outliers = Vec::new();

        if price > 0.0 {
            for obs in observations {
                let deviation = (obs.price - price).abs() / price;
                if deviation > max_deviation {
                    warn!(
                        "Price deviation for {} from {}: {:.4} > {:.4} (price={}, consensus={})",
                        pair, obs.source, deviation, max_deviation, obs.price, price
                    );
                    outliers.push(Outlier {
                        source: obs.source.clone(),
                        price: obs.price,
                        deviation,
                    });
                }
            }
        }

        let sources: Vec<String> = observations.iter().map(|o| o.source.clone()).collect();
        let timestamp_ms = observations.iter().map(|o| o.timestamp_ms).max().unwrap_or(0);

        let mut observation =
            PriceObservation::new(pair, price, timestamp_ms, AGGREGATED_SOURCE, confidence)
                .with_metadata(SourceMetadata::Aggregated {
                    sources,
                    method: policy.method,
                });
        observation.volume_24h = sum_present(observations.iter().map(|o| o.volume_24h));
        observation.liquidity_usd = sum_present(observations.iter().map(|o| o.liquidity_usd));

        debug!(
            "Aggregated {} observations for {} via {}: price={} confidence={:.3}",
            observations.len(),
            observation.pair,
            policy.method,
            observation.price,
            observation.confidence
        );

        Ok(Aggregation {
            observation,
            outliers,
        })
    }
}

fn weighted(observations: &[PriceObservation], policy: &AggregationPolicy) -> (f64, f64) {
    let total: f64 = observations.iter().map(|o| policy.weight_for(&o.source)).sum();

    if total <= 0.0 {
        debug!("All aggregation weights are zero, falling back to mean");
        return (
            observations.iter().map(|o| o.price).sum::<f64>() / observations.len() as f64,
            mean_confidence(observations),
        );
    }

    let (price, confidence) = observations.iter().fold((0.0, 0.0), |(p, c), o| {
        let w = policy.weight_for(&o.source);
        (p + o.price * w, c + o.confidence * w)
    });

    (price / total, confidence / total)
}

fn median(mut prices: Vec<f64>) -> f64 {
    prices.sort_by(|a, b| a.total_cmp(b));
    let mid = prices.len() / 2;
    if prices.len() % 2 == 0 {
        (prices[mid - 1] + prices[mid]) / 2.0
    } else {
        prices[mid]
    }
}

fn mean_confidence(observations: &[PriceObservation]) -> f64 {
    observations.iter().map(|o| o.confidence).sum::<f64>() / observations.len() as f64
}

fn sum_present(values: impl Iterator<Item = Option<f64>>) -> Option<f64> {
    values.flatten().fold(None, |acc, v| Some(acc.unwrap_or(0.0) + v))
}

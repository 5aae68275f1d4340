//! Core type definitions

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::errors::OracleError;

/// Supported blockchain networks
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChainId {
    Ethereum,
    Arbitrum,
    Optimism,
    Base,
    Polygon,
    Bsc,
    Avalanche,
    Solana,
}

impl ChainId {
    pub const ALL: [ChainId; 8] = [
        ChainId::Ethereum,
        ChainId::Arbitrum,
        ChainId::Optimism,
        ChainId::Base,
        ChainId::Polygon,
        ChainId::Bsc,
        ChainId::Avalanche,
        ChainId::Solana,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            ChainId::Ethereum => "ethereum",
            ChainId::Arbitrum => "arbitrum",
            ChainId::Optimism => "optimism",
            ChainId::Base => "base",
            ChainId::Polygon => "polygon",
            ChainId::Bsc => "bsc",
            ChainId::Avalanche => "avalanche",
            ChainId::Solana => "solana",
        }
    }
}

impl fmt::Display for ChainId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for ChainId {
    type Err = OracleError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lower = s.trim().to_ascii_lowercase();
        ChainId::ALL
            .iter()
            .copied()
            .find(|c| c.name() == lower)
            .ok_or_else(|| OracleError::InvalidConfig(format!("unknown chain: {s}")))
    }
}

/// What is being priced: a base token quoted in a quote token on one chain.
///
/// Token identifiers are lowercased on construction so that `ETH/USD` and
/// `eth/usd` are the same pair.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TokenPair {
    pub chain: ChainId,
    pub base: String,
    pub quote: String,
}

impl TokenPair {
    pub fn new(chain: ChainId, base: impl AsRef<str>, quote: impl AsRef<str>) -> Self {
        Self {
            chain,
            base: base.as_ref().trim().to_ascii_lowercase(),
            quote: quote.as_ref().trim().to_ascii_lowercase(),
        }
    }

    /// Canonical cache key, `chain:base:quote`
    pub fn cache_key(&self) -> String {
        format!("{}:{}:{}", self.chain, self.base, self.quote)
    }

    /// Parse a key produced by [`TokenPair::cache_key`]
    pub fn from_cache_key(key: &str) -> Option<Self> {
        let mut parts = key.splitn(3, ':');
        let chain = parts.next()?.parse().ok()?;
        let base = parts.next()?;
        let quote = parts.next()?;
        if base.is_empty() || quote.is_empty() {
            return None;
        }
        Some(Self::new(chain, base, quote))
    }
}

impl fmt::Display for TokenPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}/{}", self.chain, self.base, self.quote)
    }
}

/// Consensus method used by the aggregator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AggregationMethod {
    Weighted,
    Median,
    Mean,
}

impl AggregationMethod {
    pub fn name(&self) -> &'static str {
        match self {
            AggregationMethod::Weighted => "weighted",
            AggregationMethod::Median => "median",
            AggregationMethod::Mean => "mean",
        }
    }
}

impl fmt::Display for AggregationMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pair_normalization() {
        let a = TokenPair::new(ChainId::Ethereum, "ETH", "USD");
        let b = TokenPair::new(ChainId::Ethereum, " eth", "usd ");

        assert_eq!(a, b);
        assert_eq!(a.cache_key(), "ethereum:eth:usd");
    }

    #[test]
    fn test_cache_key_round_trip() {
        let pair = TokenPair::new(ChainId::Arbitrum, "0xAbC", "usdc");
        let parsed = TokenPair::from_cache_key(&pair.cache_key()).unwrap();
        assert_eq!(parsed, pair);

        assert!(TokenPair::from_cache_key("nochain:eth:usd").is_none());
        assert!(TokenPair::from_cache_key("ethereum:eth").is_none());
    }

    #[test]
    fn test_chain_from_str() {
        assert_eq!("Base".parse::<ChainId>().unwrap(), ChainId::Base);
        assert!("fantom".parse::<ChainId>().is_err());
    }
}

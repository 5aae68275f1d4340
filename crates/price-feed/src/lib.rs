//! Price sources, validation and consensus
//!
//! Features:
//! - Narrow async contract for external price feeds
//! - Per-source fixed-window rate limiting
//! - Concurrent fan-out that tolerates individual source failures
//! - Rule-based observation validation
//! - Weighted / median / mean consensus with outlier flagging

pub mod aggregator;
pub mod rate_limiter;
pub mod registry;
pub mod source;
pub mod validator;

pub use aggregator::{Aggregation, Outlier, PriceAggregator};
pub use rate_limiter::RateLimiter;
pub use registry::{FanOut, SourceRegistry};
pub use source::PriceSource;
pub use validator::{
    ConfidenceRule, DataValidator, MaxAgeRule, PositivePriceRule, RequiredFieldsRule,
    RuleOutcome, Severity, ValidationIssue, ValidationReport, ValidationRule,
};

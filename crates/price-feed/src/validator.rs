//! Observation validation.
//!
//! A [`DataValidator`] runs an ordered, hot-swappable set of
//! [`ValidationRule`]s against one observation. Every rule runs so the
//! report is always complete; the observation is valid iff no rule reported
//! an error.

use parking_lot::RwLock;
use std::sync::Arc;
use tracing::{debug, warn};

use oracle_core::{
    ObservationField, OracleError, PriceObservation, SharedClock, ValidatorConfig,
};

/// Severity of one rule's finding
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Error,
    Warning,
    Info,
}

/// What a single rule concluded
#[derive(Debug, Clone, PartialEq)]
pub struct RuleOutcome {
    pub valid: bool,
    pub severity: Severity,
    pub message: Option<String>,
}

impl RuleOutcome {
    pub fn pass() -> Self {
        Self {
            valid: true,
            severity: Severity::Info,
            message: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self {
            valid: false,
            severity: Severity::Error,
            message: Some(message.into()),
        }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self {
            valid: true,
            severity: Severity::Warning,
            message: Some(message.into()),
        }
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self {
            valid: true,
            severity: Severity::Info,
            message: Some(message.into()),
        }
    }
}

pub trait ValidationRule: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    fn evaluate(&self, obs: &PriceObservation) -> RuleOutcome;

    /// Every finding for `obs`, each tagged with the name it is reported
    /// under. Rules that check several independent things override this.
    fn evaluate_all(&self, obs: &PriceObservation) -> Vec<(String, RuleOutcome)> {
        vec![(self.name().to_string(), self.evaluate(obs))]
    }
}

/// One finding in a report, tagged with the rule that produced it
#[derive(Debug, Clone, PartialEq)]
pub struct ValidationIssue {
    pub rule: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub infos: Vec<ValidationIssue>,
}

impl ValidationReport {
    pub fn error_messages(&self) -> Vec<String> {
        self.errors
            .iter()
            .map(|i| format!("{}: {}", i.rule, i.message))
            .collect()
    }

    pub fn into_error(self, source_id: &str) -> OracleError {
        OracleError::ValidationFailed {
            source_id: source_id.to_string(),
            messages: self.error_messages(),
        }
    }
}

/// Rejects observations below a confidence floor or outside `[0, 1]`
pub struct ConfidenceRule {
    min_confidence: f64,
}

impl ConfidenceRule {
    pub const NAME: &'static str = "confidence";

    pub fn new(min_confidence: f64) -> Self {
        Self { min_confidence }
    }
}

impl ValidationRule for ConfidenceRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Confidence must reach the configured floor"
    }

    fn evaluate(&self, obs: &PriceObservation) -> RuleOutcome {
        if !(0.0..=1.0).contains(&obs.confidence) {
            return RuleOutcome::error(format!("confidence {} outside [0, 1]", obs.confidence));
        }
        if obs.confidence < self.min_confidence {
            return RuleOutcome::error(format!(
                "confidence {:.4} below minimum {:.4}",
                obs.confidence, self.min_confidence
            ));
        }
        RuleOutcome::pass()
    }
}

/// Rejects observations older than `max_age_ms`
pub struct MaxAgeRule {
    max_age_ms: u64,
    clock: SharedClock,
}

impl MaxAgeRule {
    pub const NAME: &'static str = "max_age";

    pub fn new(max_age_ms: u64, clock: SharedClock) -> Self {
        Self { max_age_ms, clock }
    }
}

impl ValidationRule for MaxAgeRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Observation must not be older than the maximum age"
    }

    fn evaluate(&self, obs: &PriceObservation) -> RuleOutcome {
        let now = self.clock.now_ms();
        if obs.timestamp_ms > now {
            return RuleOutcome::warning(format!(
                "timestamp {}ms in the future",
                obs.timestamp_ms - now
            ));
        }
        let age = obs.age_ms(now);
        if age > self.max_age_ms {
            return RuleOutcome::error(format!("age {}ms exceeds {}ms", age, self.max_age_ms));
        }
        RuleOutcome::pass()
    }
}

/// Rejects observations missing any of the listed fields
pub struct RequiredFieldsRule {
    fields: Vec<ObservationField>,
}

impl RequiredFieldsRule {
    pub const NAME: &'static str = "required_fields";

    pub fn new(fields: Vec<ObservationField>) -> Self {
        Self { fields }
    }
}

impl ValidationRule for RequiredFieldsRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "All required fields must be present"
    }

    fn evaluate(&self, obs: &PriceObservation) -> RuleOutcome {
        let missing: Vec<&str> = self
            .fields
            .iter()
            .filter(|f| !f.is_present(obs))
            .map(|f| f.name())
            .collect();

        if missing.is_empty() {
            RuleOutcome::pass()
        } else {
            RuleOutcome::error(format!("missing required field(s): {}", missing.join(", ")))
        }
    }

    /// One error per missing field, reported as `required_fields.<field>`
    fn evaluate_all(&self, obs: &PriceObservation) -> Vec<(String, RuleOutcome)> {
        let findings: Vec<_> = self
            .fields
            .iter()
            .filter(|f| !f.is_present(obs))
            .map(|f| {
                (
                    format!("{}.{}", Self::NAME, f.name()),
                    RuleOutcome::error(format!("missing required field {}", f.name())),
                )
            })
            .collect();

        if findings.is_empty() {
            vec![(Self::NAME.to_string(), RuleOutcome::pass())]
        } else {
            findings
        }
    }
}

/// Rejects non-positive or non-finite prices
pub struct PositivePriceRule;

impl PositivePriceRule {
    pub const NAME: &'static str = "positive_price";
}

impl ValidationRule for PositivePriceRule {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn description(&self) -> &str {
        "Price must be a positive finite number"
    }

    fn evaluate(&self, obs: &PriceObservation) -> RuleOutcome {
        if obs.price.is_finite() && obs.price > 0.0 {
            RuleOutcome::pass()
        } else {
            RuleOutcome::error(format!("price {} is not positive", obs.price))
        }
    }
}

/// Ordered rule engine
pub struct DataValidator {
    rules: RwLock<Vec<Arc<dyn ValidationRule>>>,
    clock: SharedClock,
}

impl DataValidator {
    /// Validator seeded with the built-in rules: confidence floor, max age,
    /// required fields, positive price.
    pub fn new(config: &ValidatorConfig, clock: SharedClock) -> Self {
        let validator = Self {
            rules: RwLock::new(Vec::new()),
            clock,
        };
        validator.apply_config(config);
        validator
    }

    /// Replace the built-in rules with ones built from `config`; custom
    /// rules are kept in place.
    pub fn apply_config(&self, config: &ValidatorConfig) {
        self.upsert_rule(Arc::new(ConfidenceRule::new(config.min_confidence)));
        self.upsert_rule(Arc::new(MaxAgeRule::new(
            config.max_age_ms,
            Arc::clone(&self.clock),
        )));
        self.upsert_rule(Arc::new(RequiredFieldsRule::new(
            config.required_fields.clone(),
        )));
        self.upsert_rule(Arc::new(PositivePriceRule));
    }

    /// Add a rule, or replace the rule with the same name in its position
    pub fn upsert_rule(&self, rule: Arc<dyn ValidationRule>) {
        let mut rules = self.rules.write();
        match rules.iter().position(|r| r.name() == rule.name()) {
            Some(idx) => rules[idx] = rule,
            None => rules.push(rule),
        }
    }

    pub fn remove_rule(&self, name: &str) -> bool {
        let mut rules = self.rules.write();
        let before = rules.len();
        rules.retain(|r| r.name() != name);
        rules.len() != before
    }

    pub fn rule_names(&self) -> Vec<String> {
        self.rules.read().iter().map(|r| r.name().to_string()).collect()
    }

    pub fn validate(&self, obs: &PriceObservation) -> ValidationReport {
        let rules = self.rules.read().clone();
        let mut report = ValidationReport::default();

        for (name, outcome) in rules.iter().flat_map(|rule| rule.evaluate_all(obs)) {
            let issue = |message: Option<String>| ValidationIssue {
                rule: name.clone(),
                message: message.unwrap_or_default(),
            };

            if !outcome.valid {
                report.errors.push(issue(outcome.message));
                continue;
            }
            match (outcome.severity, outcome.message) {
                (_, None) => {}
                (Severity::Error, msg) => report.errors.push(issue(msg)),
                (Severity::Warning, msg) => report.warnings.push(issue(msg)),
                (Severity::Info, msg) => report.infos.push(issue(msg)),
            }
        }

        report.is_valid = report.errors.is_empty();

        if !report.is_valid {
            debug!(
                "Rejected {} observation for {}: {}",
                obs.source,
                obs.pair,
                report.error_messages().join("; ")
            );
        }
        for w in &report.warnings {
            warn!("Validation warning for {} from {}: {}", obs.pair, obs.source, w.message);
        }

        report
    }

    /// Split a batch into accepted observations and rejections
    pub fn validate_batch(
        &self,
        observations: Vec<PriceObservation>,
    ) -> (Vec<PriceObservation>, Vec<(PriceObservation, ValidationReport)>) {
        let mut valid = Vec::with_capacity(observations.len());
        let mut invalid = Vec::new();

        for obs in observations {
            let report = self.validate(&obs);
            if report.is_valid {
                valid.push(obs);
            } else {
                invalid.push((obs, report));
            }
        }

        (valid, invalid)
    }
}

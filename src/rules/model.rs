//! Model-based rule: fire when the risk model's fraud probability crosses a threshold

use super::{param, parse_f64, require};
use crate::error::RuleConfigError;
use crate::risk::features::is_known_feature;
use crate::risk::RiskModel;
use crate::types::transaction::Transaction;
use crate::types::verdict::RuleResult;
use anyhow::{bail, Result};
use serde_json::{json, Map, Value};
use tracing::{debug, error};

const KIND: &str = "ml";

/// Features reported in details when a rule does not list its own
pub const DEFAULT_MODEL_FEATURES: [&str; 3] = ["amount", "hour", "day_of_week"];

#[derive(Debug, Clone, PartialEq)]
pub struct ModelRule {
    /// Probability at or above which the rule fires, in [0, 1]
    pub threshold: f64,
    /// Features echoed into result details
    pub features: Vec<String>,
}

impl ModelRule {
    pub fn new(threshold: f64) -> Self {
        Self {
            threshold,
            features: DEFAULT_MODEL_FEATURES.iter().map(|f| f.to_string()).collect(),
        }
    }

    /// Build from `{threshold, features?}`
    pub fn from_parameters(params: &Map<String, Value>) -> Result<Self, RuleConfigError> {
        let threshold = parse_f64(require(params, KIND, "threshold")?, KIND, "threshold")?;
        if !(0.0..=1.0).contains(&threshold) {
            return Err(RuleConfigError::invalid(
                KIND,
                "threshold",
                format!("must be between 0.0 and 1.0, got {}", threshold),
            ));
        }

        let mut rule = Self::new(threshold);

        if let Some(features) = param(params, "features") {
            let names = features.as_array().ok_or_else(|| {
                RuleConfigError::invalid(KIND, "features", "expected a list of feature names")
            })?;
            rule.features = names
                .iter()
                .map(|name| match name.as_str() {
                    Some(name) if is_known_feature(name) => Ok(name.to_string()),
                    _ => Err(RuleConfigError::invalid(
                        KIND,
                        "features",
                        format!("unknown feature {}", name),
                    )),
                })
                .collect::<Result<Vec<_>, _>>()?;
        }

        Ok(rule)
    }

    /// Score the transaction. Never fails: model errors become a non-firing
    /// result with zero risk so a broken model cannot look like fraud.
    pub async fn evaluate(&self, tx: &Transaction, model: &dyn RiskModel) -> RuleResult {
        match self.score(tx, model).await {
            Ok((probability, features)) => {
                let condition_met = probability >= self.threshold;
                let reason = if condition_met {
                    format!(
                        "{} model detected fraud probability: {:.3} >= {}",
                        model.name(),
                        probability,
                        self.threshold
                    )
                } else {
                    format!(
                        "{} model fraud probability below threshold: {:.3} < {}",
                        model.name(),
                        probability,
                        self.threshold
                    )
                };
                let details = json!({
                    "reason": reason,
                    "fraud_probability": probability,
                    "threshold": self.threshold,
                    "features": features,
                    "condition_met": condition_met,
                });

                if condition_met {
                    RuleResult::fire(probability, details)
                } else {
                    RuleResult::new(true, probability, details)
                }
            }
            Err(e) => {
                error!(model = model.name(), error = %e, "Risk model evaluation failed");
                RuleResult::pass(json!({
                    "reason": format!("Risk model error: {:#}", e),
                    "error": true,
                }))
            }
        }
    }

    async fn score(&self, tx: &Transaction, model: &dyn RiskModel) -> Result<(f64, Map<String, Value>)> {
        let features = model.extract_features(tx)?;
        let probability = model.predict(&features).await?;

        if !(0.0..=1.0).contains(&probability) {
            bail!("model returned probability outside [0, 1]: {}", probability);
        }

        debug!(probability = probability, threshold = self.threshold, "Model rule scored");
        Ok((probability, features.select(&self.features)))
    }
}

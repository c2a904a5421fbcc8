//! Composite rule: combine nested rules with AND / OR

use super::{parse_i64, parse_risk_score, require, EvalContext};
use crate::error::RuleConfigError;
use crate::types::transaction::Transaction;
use crate::types::verdict::{Evaluation, RuleOutcome, RuleResult};
use anyhow::{bail, Result};
use serde_json::{json, Map, Value};
use std::fmt;
use std::str::FromStr;
use tracing::{debug, error, warn};

const KIND: &str = "composite";

/// Nesting depth past which a composite refuses to evaluate
pub const MAX_COMPOSITE_DEPTH: usize = 16;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogicalOperator {
    /// Fires when every evaluated nested rule fired
    And,
    /// Fires when at least one evaluated nested rule fired
    Or,
}

impl LogicalOperator {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogicalOperator::And => "AND",
            LogicalOperator::Or => "OR",
        }
    }

    fn combine(&self, mut fired: impl Iterator<Item = bool>) -> bool {
        match self {
            LogicalOperator::And => fired.all(|f| f),
            LogicalOperator::Or => fired.any(|f| f),
        }
    }
}

impl FromStr for LogicalOperator {
    type Err = RuleConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_uppercase().as_str() {
            "AND" => Ok(LogicalOperator::And),
            "OR" => Ok(LogicalOperator::Or),
            _ => Err(RuleConfigError::UnsupportedOperator {
                kind: KIND,
                operator: s.to_string(),
                supported: "AND, OR",
            }),
        }
    }
}

impl fmt::Display for LogicalOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CompositeRule {
    pub operator: LogicalOperator,
    /// Nested rule ids, evaluated in this order
    pub rule_ids: Vec<i64>,
    /// Score reported when firing; the mean of nested scores if unset
    pub risk_score: Option<f64>,
}

impl CompositeRule {
    pub fn new(operator: LogicalOperator, rule_ids: Vec<i64>, risk_score: Option<f64>) -> Self {
        Self {
            operator,
            rule_ids,
            risk_score,
        }
    }

    /// Build from `{operator, rules: [ids], risk_score?}`
    pub fn from_parameters(params: &Map<String, Value>) -> Result<Self, RuleConfigError> {
        let operator = match require(params, KIND, "operator")? {
            Value::String(s) => s.parse::<LogicalOperator>()?,
            other => {
                return Err(RuleConfigError::UnsupportedOperator {
                    kind: KIND,
                    operator: other.to_string(),
                    supported: "AND, OR",
                })
            }
        };

        let rule_ids = match require(params, KIND, "rules")? {
            Value::Array(items) if !items.is_empty() => items
                .iter()
                .map(|item| parse_i64(item, KIND, "rules"))
                .collect::<Result<Vec<_>, _>>()?,
            _ => {
                return Err(RuleConfigError::invalid(
                    KIND,
                    "rules",
                    "expected a non-empty list of rule ids",
                ))
            }
        };

        let risk_score = parse_risk_score(params, KIND)?;

        Ok(Self::new(operator, rule_ids, risk_score))
    }

    /// Evaluate the nested rules found in the context's registry and combine them.
    ///
    /// Missing and disabled nested rules are skipped; a nested rule that errors
    /// is recorded and excluded from the combination.
    pub async fn evaluate(
        &self,
        rule_id: i64,
        tx: &Transaction,
        ctx: &EvalContext<'_>,
    ) -> Result<RuleResult> {
        if ctx.depth > MAX_COMPOSITE_DEPTH {
            bail!(
                "composite rule {} exceeds maximum nesting depth {}",
                rule_id,
                MAX_COMPOSITE_DEPTH
            );
        }

        let nested_ctx = ctx.nested();
        let mut nested_results: Vec<RuleOutcome> = Vec::with_capacity(self.rule_ids.len());
        let mut missing = Vec::new();
        let mut disabled = Vec::new();

        for &nested_id in &self.rule_ids {
            let nested = match ctx.registry.get(&nested_id) {
                Some(rule) => rule,
                None => {
                    warn!(rule_id = rule_id, nested_rule_id = nested_id, "Nested rule not found in registry");
                    missing.push(nested_id);
                    continue;
                }
            };

            if !nested.is_enabled() {
                debug!(rule_id = rule_id, nested_rule_id = nested_id, "Nested rule is disabled, skipping");
                disabled.push(nested_id);
                continue;
            }

            let evaluation = match nested.evaluate(tx, &nested_ctx).await {
                Ok(result) => Evaluation::Result(result),
                Err(e) => {
                    error!(rule_id = rule_id, nested_rule_id = nested_id, error = %e, "Error evaluating nested rule");
                    Evaluation::Error(format!("{:#}", e))
                }
            };

            nested_results.push(RuleOutcome {
                rule_id: nested_id,
                rule_name: nested.name.clone(),
                evaluation,
            });
        }

        let evaluated: Vec<&RuleResult> = nested_results.iter().filter_map(RuleOutcome::result).collect();

        if evaluated.is_empty() {
            warn!(rule_id = rule_id, "No valid nested rules evaluated in composite rule");
            return Ok(RuleResult::pass(json!({
                "reason": "No valid nested rules",
                "operator": self.operator.as_str(),
                "nested_rule_ids": self.rule_ids,
                "missing_rule_ids": missing,
                "disabled_rule_ids": disabled,
                "nested_results": nested_results,
            })));
        }

        let condition_met = self.operator.combine(evaluated.iter().map(|r| r.fired()));

        if !condition_met {
            return Ok(RuleResult::pass(json!({
                "reason": format!("Composite rule not triggered ({})", self.operator),
                "operator": self.operator.as_str(),
                "nested_results": nested_results,
                "missing_rule_ids": missing,
                "disabled_rule_ids": disabled,
                "condition_met": false,
            })));
        }

        let aggregated = self.risk_score.unwrap_or_else(|| {
            evaluated.iter().map(|r| r.risk_score).sum::<f64>() / evaluated.len() as f64
        });

        Ok(RuleResult::fire(
            aggregated,
            json!({
                "reason": format!("Composite rule triggered ({})", self.operator),
                "operator": self.operator.as_str(),
                "nested_results": nested_results,
                "missing_rule_ids": missing,
                "disabled_rule_ids": disabled,
                "aggregated_risk_score": aggregated,
                "condition_met": true,
            }),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::MemoryCounterStore;
    use crate::risk::HeuristicRiskModel;
    use crate::rules::{ComparisonOperator, Rule, RuleKind, RuleRegistry, ThresholdRule};
    use std::sync::Arc;

    fn threshold(id: i64, field: &str, op: ComparisonOperator, value: i64, score: f64) -> Rule {
        Rule::new(
            id,
            format!("rule_{}", id),
            RuleKind::Threshold(ThresholdRule::new(field, op, value, Some(score))),
        )
    }

    fn registry(rules: Vec<Rule>) -> RuleRegistry {
        rules.into_iter().map(|r| (r.id, Arc::new(r))).collect()
    }

    async fn run(composite: &CompositeRule, registry: &RuleRegistry, tx: &Transaction) -> RuleResult {
        let counters = MemoryCounterStore::new();
        let model = HeuristicRiskModel::with_seed(1);
        let ctx = EvalContext::new(&counters, &model, registry);
        composite.evaluate(100, tx, &ctx).await.unwrap()
    }

    fn tx() -> Transaction {
        Transaction::default()
            .with_field("amount", 20000)
            .with_field("hour", 3)
    }

    fn rules() -> RuleRegistry {
        registry(vec![
            // fires: amount > 10000
            threshold(1, "amount", ComparisonOperator::Gt, 10000, 0.8),
            // fires: hour < 6
            threshold(2, "hour", ComparisonOperator::Lt, 6, 0.4),
            // passes: amount > 50000
            threshold(3, "amount", ComparisonOperator::Gt, 50000, 0.9),
        ])
    }

    #[tokio::test]
    async fn test_and_fires_when_all_fire() {
        let composite = CompositeRule::new(LogicalOperator::And, vec![1, 2], None);
        let result = run(&composite, &rules(), &tx()).await;

        assert!(result.fired());
        assert!((result.risk_score - 0.6).abs() < 1e-9);
        assert_eq!(result.details["nested_results"].as_array().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_and_passes_when_one_passes() {
        let composite = CompositeRule::new(LogicalOperator::And, vec![1, 3], None);
        let result = run(&composite, &rules(), &tx()).await;

        assert!(result.passed);
        assert_eq!(result.risk_score, 0.0);
    }

    #[tokio::test]
    async fn test_or_fires_when_any_fires() {
        let composite = CompositeRule::new(LogicalOperator::Or, vec![3, 2], Some(0.95));
        let result = run(&composite, &rules(), &tx()).await;

        assert!(result.fired());
        assert_eq!(result.risk_score, 0.95);
    }

    #[tokio::test]
    async fn test_or_passes_when_none_fire() {
        let composite = CompositeRule::new(LogicalOperator::Or, vec![3], None);
        assert!(run(&composite, &rules(), &tx()).await.passed);
    }

    #[tokio::test]
    async fn test_unresolved_ids_are_skipped() {
        let composite = CompositeRule::new(LogicalOperator::And, vec![1, 404], None);
        let result = run(&composite, &rules(), &tx()).await;

        assert!(result.fired());
        assert_eq!(result.details["missing_rule_ids"], json!([404]));
    }

    #[tokio::test]
    async fn test_no_valid_nested_rules() {
        let composite = CompositeRule::new(LogicalOperator::And, vec![404, 405], None);
        let result = run(&composite, &rules(), &tx()).await;

        assert!(result.passed);
        assert_eq!(result.risk_score, 0.0);
        assert_eq!(result.details["reason"], "No valid nested rules");
    }

    #[tokio::test]
    async fn test_disabled_nested_rules_skipped() {
        let mut rules = vec![
            threshold(1, "amount", ComparisonOperator::Gt, 10000, 0.8),
            threshold(3, "amount", ComparisonOperator::Gt, 50000, 0.9),
        ];
        rules[1].set_enabled(false);
        let registry = registry(rules);

        let composite = CompositeRule::new(LogicalOperator::And, vec![1, 3], None);
        let result = run(&composite, &registry, &tx()).await;

        assert!(result.fired());
        assert_eq!(result.details["disabled_rule_ids"], json!([3]));
    }

    #[tokio::test]
    async fn test_nested_composites() {
        let mut registry = rules();
        let inner = Rule::new(
            10,
            "inner",
            RuleKind::Composite(CompositeRule::new(LogicalOperator::Or, vec![2, 3], Some(0.7))),
        );
        registry.insert(10, Arc::new(inner));

        let outer = CompositeRule::new(LogicalOperator::And, vec![1, 10], None);
        let result = run(&outer, &registry, &tx()).await;

        assert!(result.fired());
        assert!((result.risk_score - 0.75).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_self_reference_terminates() {
        let mut registry = rules();
        let looping = Rule::new(
            20,
            "looping",
            RuleKind::Composite(CompositeRule::new(LogicalOperator::Or, vec![20], None)),
        );
        registry.insert(20, Arc::new(looping));

        let composite = CompositeRule::new(LogicalOperator::Or, vec![20], None);
        let result = run(&composite, &registry, &tx()).await;

        assert!(result.passed);
    }

    #[test]
    fn test_construction_validation() {
        let params = |v: Value| v.as_object().cloned().unwrap();

        let rule =
            CompositeRule::from_parameters(&params(json!({"operator": "or", "rules": [1, "2"]})))
                .unwrap();
        assert_eq!(rule.operator, LogicalOperator::Or);
        assert_eq!(rule.rule_ids, vec![1, 2]);

        assert!(CompositeRule::from_parameters(&params(json!({"operator": "XOR", "rules": [1]}))).is_err());
        assert!(CompositeRule::from_parameters(&params(json!({"operator": "AND", "rules": []}))).is_err());
        assert!(CompositeRule::from_parameters(&params(json!({"operator": "AND", "rules": 1}))).is_err());
        assert!(CompositeRule::from_parameters(&params(json!({"rules": [1]}))).is_err());
    }
}

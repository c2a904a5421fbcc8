//! Threshold rule: compare one transaction field with a literal

use super::{parse_risk_score, require};
use crate::error::RuleConfigError;
use crate::types::transaction::{type_name, value_as_f64, Transaction};
use crate::types::verdict::RuleResult;
use serde_json::{json, Map, Value};
use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;
use tracing::warn;

const KIND: &str = "threshold";

/// Risk score used when the rule does not configure one
pub const DEFAULT_THRESHOLD_RISK_SCORE: f64 = 0.8;

/// Comparison applied as `transaction[field] <op> value`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonOperator {
    Gt,
    Lt,
    Ge,
    Le,
    Eq,
    Ne,
}

impl ComparisonOperator {
    pub const SUPPORTED: &'static str = ">, <, >=, <=, ==, !=";

    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonOperator::Gt => ">",
            ComparisonOperator::Lt => "<",
            ComparisonOperator::Ge => ">=",
            ComparisonOperator::Le => "<=",
            ComparisonOperator::Eq => "==",
            ComparisonOperator::Ne => "!=",
        }
    }

    fn holds(&self, ordering: Ordering) -> bool {
        match self {
            ComparisonOperator::Gt => ordering == Ordering::Greater,
            ComparisonOperator::Lt => ordering == Ordering::Less,
            ComparisonOperator::Ge => ordering != Ordering::Less,
            ComparisonOperator::Le => ordering != Ordering::Greater,
            ComparisonOperator::Eq => ordering == Ordering::Equal,
            ComparisonOperator::Ne => ordering != Ordering::Equal,
        }
    }

    /// Apply the operator; `None` when the operands cannot be compared
    pub fn apply(&self, actual: &Value, expected: &Value) -> Option<bool> {
        if let Some(ordering) = compare_values(actual, expected) {
            return Some(self.holds(ordering));
        }

        // Arrays and objects support equality only
        let same_type = std::mem::discriminant(actual) == std::mem::discriminant(expected);
        match self {
            ComparisonOperator::Eq if same_type => Some(actual == expected),
            ComparisonOperator::Ne if same_type => Some(actual != expected),
            _ => None,
        }
    }
}

impl FromStr for ComparisonOperator {
    type Err = RuleConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            ">" => Ok(ComparisonOperator::Gt),
            "<" => Ok(ComparisonOperator::Lt),
            ">=" => Ok(ComparisonOperator::Ge),
            "<=" => Ok(ComparisonOperator::Le),
            "==" => Ok(ComparisonOperator::Eq),
            "!=" => Ok(ComparisonOperator::Ne),
            other => Err(RuleConfigError::UnsupportedOperator {
                kind: KIND,
                operator: other.to_string(),
                supported: Self::SUPPORTED,
            }),
        }
    }
}

impl fmt::Display for ComparisonOperator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Natural ordering of two scalar JSON values.
///
/// Numbers compare numerically, and a numeric string facing a number is read
/// as a decimal. Strings compare lexicographically, booleans as false < true.
/// Anything else is incomparable.
fn compare_values(actual: &Value, expected: &Value) -> Option<Ordering> {
    match (actual, expected) {
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
        (Value::Number(_), Value::Number(_) | Value::String(_))
        | (Value::String(_), Value::Number(_)) => {
            let a = value_as_f64(actual)?;
            let b = value_as_f64(expected)?;
            a.partial_cmp(&b)
        }
        _ => None,
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdRule {
    pub field: String,
    pub operator: ComparisonOperator,
    pub value: Value,
    pub risk_score: f64,
}

impl ThresholdRule {
    pub fn new(
        field: impl Into<String>,
        operator: ComparisonOperator,
        value: impl Into<Value>,
        risk_score: Option<f64>,
    ) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            risk_score: risk_score.unwrap_or(DEFAULT_THRESHOLD_RISK_SCORE),
        }
    }

    /// Build from `{field, operator, value, risk_score?}`
    pub fn from_parameters(params: &Map<String, Value>) -> Result<Self, RuleConfigError> {
        let field = match require(params, KIND, "field")? {
            Value::String(s) if !s.trim().is_empty() => s.trim().to_string(),
            other => {
                return Err(RuleConfigError::invalid(
                    KIND,
                    "field",
                    format!("expected a field name, got {}", other),
                ))
            }
        };

        let operator = match require(params, KIND, "operator")? {
            Value::String(s) => s.parse::<ComparisonOperator>()?,
            other => {
                return Err(RuleConfigError::UnsupportedOperator {
                    kind: KIND,
                    operator: other.to_string(),
                    supported: ComparisonOperator::SUPPORTED,
                })
            }
        };

        let value = require(params, KIND, "value")?.clone();
        let risk_score = parse_risk_score(params, KIND)?;

        Ok(Self::new(field, operator, value, risk_score))
    }

    pub fn evaluate(&self, tx: &Transaction) -> RuleResult {
        let actual = match tx.get(&self.field) {
            Some(actual) => actual,
            None => {
                warn!(field = %self.field, "Field not found in transaction");
                return RuleResult::pass(json!({
                    "reason": format!("Field '{}' not found in transaction", self.field),
                    "field": self.field,
                    "operator": self.operator.as_str(),
                    "threshold": self.value,
                }));
            }
        };

        match self.operator.apply(actual, &self.value) {
            Some(true) => RuleResult::fire(
                self.risk_score,
                json!({
                    "reason": format!("{} {} {} (actual: {})", self.field, self.operator, self.value, actual),
                    "field": self.field,
                    "operator": self.operator.as_str(),
                    "threshold": self.value,
                    "actual_value": actual,
                    "condition_met": true,
                }),
            ),
            Some(false) => RuleResult::pass(json!({
                "reason": format!("{} {} {} not met (actual: {})", self.field, self.operator, self.value, actual),
                "field": self.field,
                "operator": self.operator.as_str(),
                "threshold": self.value,
                "actual_value": actual,
                "condition_met": false,
            })),
            None => {
                warn!(
                    field = %self.field,
                    actual_type = type_name(actual),
                    expected_type = type_name(&self.value),
                    "Threshold comparison type mismatch"
                );
                RuleResult::pass(json!({
                    "reason": format!(
                        "Cannot compare {} with {} for field '{}'",
                        type_name(actual),
                        type_name(&self.value),
                        self.field
                    ),
                    "field": self.field,
                    "operator": self.operator.as_str(),
                    "threshold": self.value,
                    "actual_value": actual,
                    "type_mismatch": true,
                    "condition_met": false,
                }))
            }
        }
    }
}

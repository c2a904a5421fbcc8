//! Fraud rules.
//!
//! A [`Rule`] carries identity (id, name, priority, enabled flag) and one of a
//! fixed set of behaviours in [`RuleKind`]. Rules are built from
//! [`RuleDefinition`] documents and validated up front; evaluation reads the
//! transaction and may consult the counter store, the risk model and the
//! registry of the load generation the rule belongs to.

pub mod composite;
pub mod loader;
pub mod model;
pub mod pattern;
pub mod threshold;

pub use composite::{CompositeRule, LogicalOperator};
pub use loader::{RuleLoader, RuleRegistry, RuleSet};
pub use model::ModelRule;
pub use pattern::PatternRule;
pub use threshold::{ComparisonOperator, ThresholdRule};

use crate::counter::CounterStore;
use crate::error::RuleConfigError;
use crate::risk::RiskModel;
use crate::types::transaction::{type_name, value_as_f64, Transaction};
use crate::types::verdict::RuleResult;
use anyhow::Result;
use futures::future::{BoxFuture, FutureExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Priority reserved for critical rules: firing one ends the evaluation pass
pub const CRITICAL_PRIORITY: i32 = 1;
/// Priority given to rules that do not specify one
pub const DEFAULT_PRIORITY: i32 = 5;

/// Rule definition as stored by the rule administration side
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub id: i64,
    pub name: String,
    /// threshold, pattern, composite or ml
    #[serde(rename = "type")]
    pub rule_type: String,
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    #[serde(default = "default_priority")]
    pub priority: i32,
    #[serde(default)]
    pub parameters: Value,
}

fn default_enabled() -> bool {
    true
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

/// Variant-specific rule behaviour
#[derive(Debug, Clone, PartialEq)]
pub enum RuleKind {
    Threshold(ThresholdRule),
    Pattern(PatternRule),
    Composite(CompositeRule),
    Model(ModelRule),
}

impl RuleKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            RuleKind::Threshold(_) => "threshold",
            RuleKind::Pattern(_) => "pattern",
            RuleKind::Composite(_) => "composite",
            RuleKind::Model(_) => "ml",
        }
    }
}

/// A named, prioritized, enable-able unit of fraud logic
#[derive(Debug, Clone, PartialEq)]
pub struct Rule {
    pub id: i64,
    pub name: String,
    pub enabled: bool,
    /// Lower is evaluated first
    pub priority: i32,
    pub kind: RuleKind,
}

/// Collaborators available while evaluating one transaction
pub struct EvalContext<'a> {
    pub counters: &'a dyn CounterStore,
    pub model: &'a dyn RiskModel,
    /// Rules of the same load generation, for composite lookups
    pub registry: &'a RuleRegistry,
    /// Composite nesting depth of the rule being evaluated
    pub depth: usize,
}

impl<'a> EvalContext<'a> {
    pub fn new(
        counters: &'a dyn CounterStore,
        model: &'a dyn RiskModel,
        registry: &'a RuleRegistry,
    ) -> Self {
        Self {
            counters,
            model,
            registry,
            depth: 0,
        }
    }

    /// Context for rules nested one level deeper
    pub fn nested(&self) -> EvalContext<'a> {
        EvalContext {
            counters: self.counters,
            model: self.model,
            registry: self.registry,
            depth: self.depth + 1,
        }
    }
}

impl Rule {
    /// Enabled rule with the default priority
    pub fn new(id: i64, name: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            id,
            name: name.into(),
            enabled: true,
            priority: DEFAULT_PRIORITY,
            kind,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Validate a definition and build the rule
    pub fn from_definition(def: &RuleDefinition) -> Result<Self, RuleConfigError> {
        let empty = Map::new();
        let params = match &def.parameters {
            Value::Object(map) => map,
            Value::Null => &empty,
            _ => return Err(RuleConfigError::ParametersNotObject),
        };

        let kind = match def.rule_type.trim().to_lowercase().as_str() {
            "threshold" => RuleKind::Threshold(ThresholdRule::from_parameters(params)?),
            "pattern" => RuleKind::Pattern(PatternRule::from_parameters(params)?),
            "composite" => RuleKind::Composite(CompositeRule::from_parameters(params)?),
            "ml" | "model" => RuleKind::Model(ModelRule::from_parameters(params)?),
            other => return Err(RuleConfigError::UnknownType(other.to_string())),
        };

        Ok(Self {
            id: def.id,
            name: def.name.clone(),
            enabled: def.enabled,
            priority: def.priority,
            kind,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn set_enabled(&mut self, enabled: bool) {
        self.enabled = enabled;
    }

    pub fn is_critical(&self) -> bool {
        self.priority == CRITICAL_PRIORITY
    }

    /// Evaluate the rule against a transaction.
    ///
    /// Returns an error only for failures the rule cannot absorb itself
    /// (counter store unavailable, composite nesting too deep); callers record
    /// those as error entries and carry on.
    pub fn evaluate<'a>(
        &'a self,
        tx: &'a Transaction,
        ctx: &'a EvalContext<'a>,
    ) -> BoxFuture<'a, Result<RuleResult>> {
        match &self.kind {
            RuleKind::Threshold(rule) => futures::future::ready(Ok(rule.evaluate(tx))).boxed(),
            RuleKind::Pattern(rule) => rule.evaluate(self.id, tx, ctx.counters).boxed(),
            RuleKind::Composite(rule) => rule.evaluate(self.id, tx, ctx).boxed(),
            RuleKind::Model(rule) => rule.evaluate(tx, ctx.model).map(Ok).boxed(),
        }
    }
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "<{}(id={}, name='{}', priority={}, enabled={})>",
            self.kind.type_name(),
            self.id,
            self.name,
            self.priority,
            self.enabled
        )
    }
}

// Parameter helpers shared by the rule kinds. JSON null counts as absent.

pub(crate) fn param<'p>(params: &'p Map<String, Value>, key: &str) -> Option<&'p Value> {
    params.get(key).filter(|v| !v.is_null())
}

pub(crate) fn require<'p>(
    params: &'p Map<String, Value>,
    kind: &'static str,
    key: &'static str,
) -> Result<&'p Value, RuleConfigError> {
    param(params, key).ok_or_else(|| RuleConfigError::missing(kind, key))
}

pub(crate) fn parse_f64(
    value: &Value,
    kind: &'static str,
    key: &'static str,
) -> Result<f64, RuleConfigError> {
    value_as_f64(value).ok_or_else(|| {
        RuleConfigError::invalid(kind, key, format!("expected a number, got {}", type_name(value)))
    })
}

pub(crate) fn parse_u64(
    value: &Value,
    kind: &'static str,
    key: &'static str,
) -> Result<u64, RuleConfigError> {
    let parsed = match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse::<u64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        RuleConfigError::invalid(kind, key, format!("expected a non-negative integer, got {}", value))
    })
}

pub(crate) fn parse_i64(
    value: &Value,
    kind: &'static str,
    key: &'static str,
) -> Result<i64, RuleConfigError> {
    let parsed = match value {
        Value::Number(n) => n.as_i64(),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        RuleConfigError::invalid(kind, key, format!("expected an integer, got {}", value))
    })
}

/// Optional per-rule risk score, constrained to [0, 1]
pub(crate) fn parse_risk_score(
    params: &Map<String, Value>,
    kind: &'static str,
) -> Result<Option<f64>, RuleConfigError> {
    match param(params, "risk_score") {
        None => Ok(None),
        Some(value) => {
            let score = parse_f64(value, kind, "risk_score")?;
            if (0.0..=1.0).contains(&score) {
                Ok(Some(score))
            } else {
                Err(RuleConfigError::invalid(
                    kind,
                    "risk_score",
                    format!("must be between 0.0 and 1.0, got {}", score),
                ))
            }
        }
    }
}

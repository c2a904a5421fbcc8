//! Rule results, evaluation verdicts and final transaction statuses

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Outcome of one rule evaluated against one transaction.
///
/// `passed == true` means the rule did NOT fire.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResult {
    /// False when the rule fired
    pub passed: bool,
    /// Per-rule risk score (0.0 - 1.0)
    pub risk_score: f64,
    /// Variant-specific explanation
    pub details: Value,
    /// Evaluation timestamp
    pub timestamp: DateTime<Utc>,
}

impl RuleResult {
    /// A non-firing result with zero risk
    pub fn pass(details: Value) -> Self {
        Self::new(true, 0.0, details)
    }

    /// A firing result carrying the given risk score
    pub fn fire(risk_score: f64, details: Value) -> Self {
        Self::new(false, risk_score, details)
    }

    pub fn new(passed: bool, risk_score: f64, details: Value) -> Self {
        Self {
            passed,
            risk_score,
            details,
            timestamp: Utc::now(),
        }
    }

    /// Whether the rule fired
    pub fn fired(&self) -> bool {
        !self.passed
    }
}

/// What happened when a rule was visited: a result, or an evaluation error
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Evaluation {
    Result(RuleResult),
    Error(String),
}

/// Per-rule entry of an evaluation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleOutcome {
    pub rule_id: i64,
    pub rule_name: String,
    #[serde(flatten)]
    pub evaluation: Evaluation,
}

impl RuleOutcome {
    pub fn result(&self) -> Option<&RuleResult> {
        match &self.evaluation {
            Evaluation::Result(result) => Some(result),
            Evaluation::Error(_) => None,
        }
    }

    pub fn error(&self) -> Option<&str> {
        match &self.evaluation {
            Evaluation::Result(_) => None,
            Evaluation::Error(message) => Some(message),
        }
    }
}

/// Engine output for one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationVerdict {
    /// True iff at least one rule fired
    pub is_suspicious: bool,
    /// Mean per-rule risk score over the rules evaluated in this pass, errored rules counting as 0 (0.0 - 1.0)
    pub risk_score: f64,
    /// Names of the rules that fired, in evaluation order
    pub triggered_rules: Vec<String>,
    /// Number of rules visited in this pass
    pub checked_rules: usize,
    /// Per-rule outcomes, in evaluation order
    pub details: Vec<RuleOutcome>,
}

impl EvaluationVerdict {
    /// Verdict for a pass in which no rule was evaluated
    pub fn empty() -> Self {
        Self {
            is_suspicious: false,
            risk_score: 0.0,
            triggered_rules: Vec::new(),
            checked_rules: 0,
            details: Vec::new(),
        }
    }

    /// Aggregate risk expressed on the 0-100 scale used for status thresholds
    pub fn risk_percent(&self) -> f64 {
        self.risk_score * 100.0
    }
}

/// Lifecycle status of a transaction
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
    Approved,
    Suspicious,
    Blocked,
    Failed,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Approved => "approved",
            TransactionStatus::Suspicious => "suspicious",
            TransactionStatus::Blocked => "blocked",
            TransactionStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for TransactionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status thresholds on the 0-100 risk scale
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusThresholds {
    pub blocked: f64,
    pub suspicious: f64,
}

impl Default for StatusThresholds {
    fn default() -> Self {
        Self {
            blocked: 80.0,
            suspicious: 50.0,
        }
    }
}

impl StatusThresholds {
    /// Map a suspicion flag and a 0-100 risk score to a final status
    pub fn classify(&self, is_suspicious: bool, risk_percent: f64) -> TransactionStatus {
        if !is_suspicious {
            TransactionStatus::Approved
        } else if risk_percent >= self.blocked {
            TransactionStatus::Blocked
        } else if risk_percent >= self.suspicious {
            TransactionStatus::Suspicious
        } else {
            TransactionStatus::Approved
        }
    }

    /// Classify an engine verdict, converting its 0-1 aggregate to percent
    pub fn classify_verdict(&self, verdict: &EvaluationVerdict) -> TransactionStatus {
        self.classify(verdict.is_suspicious, verdict.risk_percent())
    }
}

//! Pattern (velocity) rule: too many transactions per subject within a window

use super::{param, parse_u64, require};
use crate::counter::CounterStore;
use crate::error::RuleConfigError;
use crate::types::transaction::{value_as_string, Transaction};
use crate::types::verdict::RuleResult;
use anyhow::{Context, Result};
use serde_json::{json, Map, Value};
use tracing::debug;

const KIND: &str = "pattern";

/// Risk score of a firing pattern rule
pub const PATTERN_RISK_SCORE: f64 = 0.5;
/// Transaction field identifying the subject when none is configured
pub const DEFAULT_PATTERN_FIELD: &str = "from_account";

#[derive(Debug, Clone, PartialEq)]
pub struct PatternRule {
    pub max_transactions: u64,
    pub time_window_minutes: u64,
    pub field: String,
}

impl PatternRule {
    pub fn new(max_transactions: u64, time_window_minutes: u64, field: Option<&str>) -> Self {
        Self {
            max_transactions,
            time_window_minutes,
            field: field.unwrap_or(DEFAULT_PATTERN_FIELD).to_string(),
        }
    }

    /// Build from `{max_transactions, time_window_minutes, field?}`
    pub fn from_parameters(params: &Map<String, Value>) -> Result<Self, RuleConfigError> {
        let max_transactions = parse_u64(
            require(params, KIND, "max_transactions")?,
            KIND,
            "max_transactions",
        )?;
        let time_window_minutes = parse_u64(
            require(params, KIND, "time_window_minutes")?,
            KIND,
            "time_window_minutes",
        )?;
        if time_window_minutes == 0 {
            return Err(RuleConfigError::invalid(
                KIND,
                "time_window_minutes",
                "window must be at least one minute",
            ));
        }

        let field = match param(params, "field") {
            None => None,
            Some(Value::String(s)) if !s.trim().is_empty() => Some(s.trim()),
            Some(other) => {
                return Err(RuleConfigError::invalid(
                    KIND,
                    "field",
                    format!("expected a field name, got {}", other),
                ))
            }
        };

        Ok(Self::new(max_transactions, time_window_minutes, field))
    }

    /// Window length in seconds, used as the counter TTL
    pub fn ttl_secs(&self) -> u64 {
        self.time_window_minutes * 60
    }

    /// Counter key, scoped to the rule so rules with different windows never share counts
    pub fn counter_key(rule_id: i64, subject: &str) -> String {
        format!("pattern:{}:{}", rule_id, subject)
    }

    /// Count this transaction for its subject and fire once the window holds
    /// more than `max_transactions`.
    ///
    /// The counter is incremented on every call, firing or not.
    pub async fn evaluate(
        &self,
        rule_id: i64,
        tx: &Transaction,
        counters: &dyn CounterStore,
    ) -> Result<RuleResult> {
        let subject = match tx.get(&self.field).and_then(value_as_string) {
            Some(subject) => subject,
            None => {
                return Ok(RuleResult::pass(json!({
                    "reason": format!("no {} field", self.field),
                    "field": self.field,
                })))
            }
        };

        let key = Self::counter_key(rule_id, &subject);
        let count = counters
            .increment_and_maybe_expire(&key, self.ttl_secs())
            .await
            .with_context(|| format!("Failed to update transaction counter for {}", key))?;

        debug!(rule_id = rule_id, key = %key, count = count, "Pattern counter updated");

        let details = json!({
            "reason": format!("{} transactions in last {} minutes", count, self.time_window_minutes),
            "field": self.field,
            "subject": subject,
            "count": count,
            "max_transactions": self.max_transactions,
            "time_window_minutes": self.time_window_minutes,
        });

        if count > self.max_transactions {
            Ok(RuleResult::fire(PATTERN_RISK_SCORE, details))
        } else {
            Ok(RuleResult::pass(details))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::MemoryCounterStore;
    use async_trait::async_trait;
    use std::time::Duration;

    struct UnavailableStore;

    #[async_trait]
    impl CounterStore for UnavailableStore {
        async fn increment_and_maybe_expire(&self, _key: &str, _ttl_secs: u64) -> Result<u64> {
            anyhow::bail!("connection refused")
        }
    }

    fn tx(account: &str) -> Transaction {
        Transaction::default()
            .with_field("from_account", account)
            .with_field("amount", 10)
    }

    #[tokio::test(start_paused = true)]
    async fn test_fires_after_max_transactions() {
        let store = MemoryCounterStore::new();
        let rule = PatternRule::new(3, 10, None);

        for call in 1..=3u64 {
            let result = rule.evaluate(7, &tx("A"), &store).await.unwrap();
            assert!(result.passed, "call {}", call);
            assert_eq!(result.details["count"], call);
            assert_eq!(result.risk_score, 0.0);
        }

        let result = rule.evaluate(7, &tx("A"), &store).await.unwrap();
        assert!(!result.passed);
        assert_eq!(result.details["count"], 4);
        assert_eq!(result.risk_score, PATTERN_RISK_SCORE);
    }

    #[tokio::test(start_paused = true)]
    async fn test_count_resets_after_window() {
        let store = MemoryCounterStore::new();
        let rule = PatternRule::new(1, 10, None);

        rule.evaluate(7, &tx("A"), &store).await.unwrap();
        assert!(rule.evaluate(7, &tx("A"), &store).await.unwrap().fired());

        tokio::time::advance(Duration::from_secs(10 * 60 + 1)).await;

        let result = rule.evaluate(7, &tx("A"), &store).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.details["count"], 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_subjects_counted_separately() {
        let store = MemoryCounterStore::new();
        let rule = PatternRule::new(1, 10, None);

        rule.evaluate(7, &tx("A"), &store).await.unwrap();
        let result = rule.evaluate(7, &tx("B"), &store).await.unwrap();

        assert!(result.passed);
        assert_eq!(result.details["count"], 1);
    }

    #[tokio::test]
    async fn test_custom_field_and_missing_subject() {
        let store = MemoryCounterStore::new();
        let rule = PatternRule::new(0, 5, Some("user_id"));

        let result = rule.evaluate(1, &tx("A"), &store).await.unwrap();
        assert!(result.passed);
        assert_eq!(result.risk_score, 0.0);
        assert!(store.is_empty());

        let keyed = Transaction::default().with_field("user_id", 99);
        assert!(rule.evaluate(1, &keyed, &store).await.unwrap().fired());
    }

    #[tokio::test]
    async fn test_empty_subject_is_absent() {
        let store = MemoryCounterStore::new();
        let rule = PatternRule::new(0, 5, None);

        assert!(rule.evaluate(1, &tx(""), &store).await.unwrap().passed);
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn test_store_failure_is_error() {
        let rule = PatternRule::new(3, 10, None);
        assert!(rule.evaluate(1, &tx("A"), &UnavailableStore).await.is_err());
    }

    #[test]
    fn test_construction_validation() {
        let params = |v: Value| v.as_object().cloned().unwrap();

        let rule = PatternRule::from_parameters(&params(
            json!({"max_transactions": "5", "time_window_minutes": 15}),
        ))
        .unwrap();
        assert_eq!(rule.field, DEFAULT_PATTERN_FIELD);
        assert_eq!(rule.ttl_secs(), 900);

        assert!(PatternRule::from_parameters(&params(json!({"max_transactions": 5}))).is_err());
        assert!(PatternRule::from_parameters(&params(
            json!({"max_transactions": -1, "time_window_minutes": 15})
        ))
        .is_err());
        assert!(PatternRule::from_parameters(&params(
            json!({"max_transactions": 5, "time_window_minutes": 0})
        ))
        .is_err());
    }
}

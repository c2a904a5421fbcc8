//! Rule engine: holds the active rule set and produces verdicts.
//!
//! The rule set is an immutable [`RuleSet`] behind an `Arc`. Every mutation
//! (load, reload, add, remove) builds a new set and swaps the pointer, and an
//! evaluation works on the snapshot it took when it started, so it never sees
//! a half-replaced list.

use crate::counter::CounterStore;
use crate::risk::RiskModel;
use crate::rules::{EvalContext, Rule, RuleSet};
use crate::types::transaction::Transaction;
use crate::types::verdict::{Evaluation, EvaluationVerdict, RuleOutcome};
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, error, info, warn};

/// Rule counts for status endpoints and logs
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RuleSummary {
    pub total: usize,
    pub active: usize,
    pub inactive: usize,
    pub generation: u64,
}

pub struct RuleEngine {
    rules: RwLock<Arc<RuleSet>>,
    generation: AtomicU64,
    counters: Arc<dyn CounterStore>,
    model: Arc<dyn RiskModel>,
}

impl RuleEngine {
    /// Create an engine with an empty rule set
    pub fn new(counters: Arc<dyn CounterStore>, model: Arc<dyn RiskModel>) -> Self {
        info!(model = model.name(), "Rule engine initialized");
        Self {
            rules: RwLock::new(Arc::new(RuleSet::default())),
            generation: AtomicU64::new(0),
            counters,
            model,
        }
    }

    /// The rule set evaluations currently start from
    pub fn snapshot(&self) -> Arc<RuleSet> {
        match self.rules.read() {
            Ok(rules) => rules.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    fn swap<F>(&self, build: F) -> Arc<RuleSet>
    where
        F: FnOnce(&RuleSet) -> RuleSet,
    {
        let mut guard = match self.rules.write() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        let next = Arc::new(build(&guard).with_generation(generation));
        *guard = next.clone();
        next
    }

    /// Replace the whole rule set; rules are re-sorted by priority
    pub fn load_rules(&self, rules: Vec<Rule>) {
        let count = rules.len();
        let set = self.swap(|_| RuleSet::new(rules));
        info!(
            rules = count,
            active = set.active().count(),
            generation = set.generation(),
            "Loaded rules, sorted by priority"
        );
    }

    /// Hot reload: same as [`load_rules`](Self::load_rules), logged as a reload
    pub fn reload_rules(&self, rules: Vec<Rule>) {
        self.load_rules(rules);
        info!("Rules hot-reloaded");
    }

    /// Add a rule, keeping priority order. A rule with the same id is replaced.
    pub fn add_rule(&self, rule: Rule) {
        let rule = Arc::new(rule);
        let added = rule.clone();
        self.swap(move |current| {
            let mut rules: Vec<Arc<Rule>> = current
                .rules()
                .iter()
                .filter(|existing| {
                    if existing.id == rule.id {
                        warn!(rule_id = rule.id, "Replacing existing rule with the same id");
                        false
                    } else {
                        true
                    }
                })
                .cloned()
                .collect();
            rules.push(rule);
            RuleSet::from_shared(rules)
        });
        info!(rule = %added, "Added rule");
    }

    /// Remove a rule by id; returns whether anything was removed
    pub fn remove_rule(&self, rule_id: i64) -> bool {
        let mut before = 0;
        let set = self.swap(|current| {
            before = current.len();
            RuleSet::from_shared(
                current
                    .rules()
                    .iter()
                    .filter(|rule| rule.id != rule_id)
                    .cloned()
                    .collect(),
            )
        });
        info!(rule_id = rule_id, before = before, after = set.len(), "Removed rule");
        set.len() < before
    }

    pub fn get_rule(&self, rule_id: i64) -> Option<Arc<Rule>> {
        self.snapshot().get(rule_id).cloned()
    }

    /// Enabled rules in evaluation order
    pub fn get_active_rules(&self) -> Vec<Arc<Rule>> {
        self.snapshot().active().cloned().collect()
    }

    pub fn summary(&self) -> RuleSummary {
        let set = self.snapshot();
        let total = set.len();
        let active = set.active().count();
        RuleSummary {
            total,
            active,
            inactive: total - active,
            generation: set.generation(),
        }
    }

    /// Evaluate a transaction against the active rules.
    ///
    /// Rules run in ascending priority. A rule error is recorded and the pass
    /// continues. A firing critical rule (priority 1) ends the pass. The
    /// aggregate score is the mean over every rule evaluated in this pass;
    /// an errored rule counts with a score of zero.
    pub async fn evaluate_transaction(&self, tx: &Transaction) -> EvaluationVerdict {
        let snapshot = self.snapshot();
        let ctx = EvalContext::new(
            self.counters.as_ref(),
            self.model.as_ref(),
            snapshot.registry(),
        );

        let active: Vec<&Arc<Rule>> = snapshot.active().collect();
        if active.is_empty() {
            debug!("No active rules, approving by default");
            return EvaluationVerdict::empty();
        }

        info!(
            rules = active.len(),
            generation = snapshot.generation(),
            "Evaluating transaction"
        );

        let mut details = Vec::with_capacity(active.len());
        let mut triggered = Vec::new();
        let mut total_score = 0.0;
        let mut checked = 0usize;

        for rule in active {
            checked += 1;

            match rule.evaluate(tx, &ctx).await {
                Ok(result) => {
                    debug!(
                        rule_id = rule.id,
                        rule_name = %rule.name,
                        passed = result.passed,
                        risk_score = result.risk_score,
                        "Rule evaluated"
                    );

                    total_score += result.risk_score;
                    let fired = result.fired();
                    details.push(RuleOutcome {
                        rule_id: rule.id,
                        rule_name: rule.name.clone(),
                        evaluation: Evaluation::Result(result),
                    });

                    if fired {
                        triggered.push(rule.name.clone());
                        if rule.is_critical() {
                            warn!(
                                rule_id = rule.id,
                                rule_name = %rule.name,
                                "Critical rule triggered, stopping evaluation"
                            );
                            break;
                        }
                    }
                }
                Err(e) => {
                    error!(rule_id = rule.id, rule_name = %rule.name, error = %e, "Error in rule");
                    details.push(RuleOutcome {
                        rule_id: rule.id,
                        rule_name: rule.name.clone(),
                        evaluation: Evaluation::Error(format!("{:#}", e)),
                    });
                }
            }
        }

        let risk_score = if checked > 0 {
            total_score / checked as f64
        } else {
            0.0
        };

        EvaluationVerdict {
            is_suspicious: !triggered.is_empty(),
            risk_score,
            triggered_rules: triggered,
            checked_rules: checked,
            details,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::MemoryCounterStore;
    use crate::risk::HeuristicRiskModel;
    use crate::rules::{
        ComparisonOperator, CompositeRule, LogicalOperator, PatternRule, RuleKind, ThresholdRule,
    };
    use anyhow::Result;
    use async_trait::async_trait;

    struct UnavailableStore;

    #[async_trait]
    impl CounterStore for UnavailableStore {
        async fn increment_and_maybe_expire(&self, _key: &str, _ttl_secs: u64) -> Result<u64> {
            anyhow::bail!("connection refused")
        }
    }

    fn engine() -> RuleEngine {
        RuleEngine::new(
            Arc::new(MemoryCounterStore::new()),
            Arc::new(HeuristicRiskModel::with_seed(3)),
        )
    }

    fn threshold(id: i64, priority: i32, value: i64, score: f64) -> Rule {
        Rule::new(
            id,
            format!("amount_over_{}", value),
            RuleKind::Threshold(ThresholdRule::new(
                "amount",
                ComparisonOperator::Gt,
                value,
                Some(score),
            )),
        )
        .with_priority(priority)
    }

    fn tx(amount: i64) -> Transaction {
        Transaction::default()
            .with_field("id", "tx_1")
            .with_field("amount", amount)
            .with_field("from_account", "A")
    }

    #[tokio::test]
    async fn test_single_threshold_fires() {
        let engine = engine();
        engine.load_rules(vec![threshold(1, 5, 10000, 0.8)]);

        let verdict = engine.evaluate_transaction(&tx(15000)).await;

        assert!(verdict.is_suspicious);
        assert!((verdict.risk_score - 0.8).abs() < 1e-9);
        assert_eq!(verdict.triggered_rules, vec!["amount_over_10000"]);
        assert_eq!(verdict.checked_rules, 1);
    }

    #[tokio::test]
    async fn test_single_threshold_passes() {
        let engine = engine();
        engine.load_rules(vec![threshold(1, 5, 10000, 0.8)]);

        let verdict = engine.evaluate_transaction(&tx(500)).await;

        assert!(!verdict.is_suspicious);
        assert_eq!(verdict.risk_score, 0.0);
        assert!(verdict.details[0].result().unwrap().passed);
    }

    #[tokio::test]
    async fn test_rules_visited_in_priority_order() {
        let engine = engine();
        engine.load_rules(vec![
            threshold(1, 9, 100, 0.1),
            threshold(2, 2, 200, 0.2),
            threshold(3, 9, 300, 0.3),
            threshold(4, 4, 400, 0.4),
        ]);

        let verdict = engine.evaluate_transaction(&tx(1000)).await;
        let order: Vec<i64> = verdict.details.iter().map(|d| d.rule_id).collect();

        assert_eq!(order, vec![2, 4, 1, 3]);
        assert!((verdict.risk_score - 0.25).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_critical_rule_short_circuits() {
        let engine = engine();
        engine.load_rules(vec![
            threshold(1, 5, 100, 0.2),
            threshold(2, 1, 10000, 1.0),
            threshold(3, 1, 50, 0.6),
        ]);

        // Rule 2 (critical) passes, rule 3 (critical) fires, rule 1 is never reached
        let verdict = engine.evaluate_transaction(&tx(500)).await;
        let visited: Vec<i64> = verdict.details.iter().map(|d| d.rule_id).collect();

        assert_eq!(visited, vec![2, 3]);
        assert_eq!(verdict.checked_rules, 2);
        assert_eq!(verdict.triggered_rules, vec!["amount_over_50"]);
        // Mean over the two evaluated rules only: (0.0 + 0.6) / 2
        assert!((verdict.risk_score - 0.3).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_disabled_rules_skipped() {
        let engine = engine();
        engine.load_rules(vec![
            threshold(1, 5, 100, 0.9).with_enabled(false),
            threshold(2, 5, 10000, 0.5),
        ]);

        let verdict = engine.evaluate_transaction(&tx(500)).await;

        assert!(!verdict.is_suspicious);
        assert_eq!(verdict.checked_rules, 1);
        assert_eq!(engine.summary().inactive, 1);
    }

    #[tokio::test]
    async fn test_rule_error_does_not_abort_pass() {
        let engine = RuleEngine::new(
            Arc::new(UnavailableStore),
            Arc::new(HeuristicRiskModel::with_seed(3)),
        );
        engine.load_rules(vec![
            Rule::new(1, "velocity", RuleKind::Pattern(PatternRule::new(1, 10, None)))
                .with_priority(2),
            threshold(2, 5, 100, 0.8),
        ]);

        let verdict = engine.evaluate_transaction(&tx(500)).await;

        assert_eq!(verdict.checked_rules, 2);
        assert!(verdict.details[0].error().unwrap().contains("connection refused"));
        assert!(verdict.is_suspicious);
        // The errored rule counts as evaluated with a zero score: (0.0 + 0.8) / 2
        assert!((verdict.risk_score - 0.4).abs() < 1e-9);
        // 40 on the status scale: an outage lowers the status instead of raising it
        assert_eq!(
            crate::types::verdict::StatusThresholds::default().classify_verdict(&verdict),
            crate::types::verdict::TransactionStatus::Approved
        );
    }

    #[tokio::test]
    async fn test_no_active_rules() {
        let verdict = engine().evaluate_transaction(&tx(500)).await;
        assert_eq!(verdict, EvaluationVerdict::empty());
    }

    #[tokio::test]
    async fn test_composite_resolves_same_generation() {
        let engine = engine();
        engine.load_rules(vec![
            threshold(1, 5, 100, 0.4).with_enabled(false),
            threshold(2, 5, 200, 0.6).with_enabled(false),
            Rule::new(
                3,
                "both",
                RuleKind::Composite(CompositeRule::new(LogicalOperator::And, vec![1, 2], None)),
            ),
        ]);

        // Disabled nested rules are skipped, so the composite has nothing to combine
        let verdict = engine.evaluate_transaction(&tx(500)).await;
        assert!(!verdict.is_suspicious);

        engine.load_rules(vec![
            threshold(1, 5, 100, 0.4),
            threshold(2, 5, 200, 0.6),
            Rule::new(
                3,
                "both",
                RuleKind::Composite(CompositeRule::new(LogicalOperator::And, vec![1, 2], None)),
            )
            .with_priority(1),
        ]);

        let verdict = engine.evaluate_transaction(&tx(500)).await;
        assert_eq!(verdict.triggered_rules, vec!["both"]);
        assert_eq!(verdict.checked_rules, 1);
        assert!((verdict.risk_score - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_rule_management() {
        let engine = engine();
        engine.load_rules(vec![threshold(1, 5, 100, 0.1), threshold(2, 3, 200, 0.2)]);
        let first = engine.summary().generation;

        engine.add_rule(threshold(3, 4, 300, 0.3));
        let order: Vec<i64> = engine.snapshot().rules().iter().map(|r| r.id).collect();
        assert_eq!(order, vec![2, 3, 1]);

        engine.add_rule(threshold(3, 9, 999, 0.9));
        assert_eq!(engine.get_rule(3).unwrap().priority, 9);
        assert_eq!(engine.summary().total, 3);

        assert!(engine.remove_rule(2));
        assert!(!engine.remove_rule(2));
        assert!(engine.get_rule(2).is_none());
        assert_eq!(engine.get_active_rules().len(), 2);
        assert!(engine.summary().generation > first);
    }

    #[test]
    fn test_load_replaces_previous_set() {
        let engine = engine();
        engine.load_rules(vec![threshold(1, 5, 100, 0.1), threshold(2, 5, 200, 0.2)]);
        engine.reload_rules(vec![threshold(9, 5, 900, 0.9)]);

        let ids: Vec<i64> = engine.get_active_rules().iter().map(|r| r.id).collect();
        assert_eq!(ids, vec![9]);
    }

    #[tokio::test]
    async fn test_snapshot_survives_reload() {
        let engine = engine();
        engine.load_rules(vec![threshold(1, 5, 100, 0.1)]);

        let held = engine.snapshot();
        engine.load_rules(vec![]);

        assert_eq!(held.len(), 1);
        assert!(engine.snapshot().is_empty());
    }
}

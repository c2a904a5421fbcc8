//! Transaction worker: drains the queue through the rule engine.
//!
//! One transaction is processed at a time. Every transaction that leaves the
//! queue ends with an explicit status write, including `failed` when
//! processing errors out or panics.

use crate::engine::RuleEngine;
use crate::metrics::PipelineMetrics;
use crate::queue::TransactionQueue;
use crate::sink::{OutcomeSink, RuleResultRecord};
use crate::types::transaction::Transaction;
use crate::types::verdict::{StatusThresholds, TransactionStatus};
use anyhow::{Context, Result};
use futures::FutureExt;
use serde::Serialize;
use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};

/// Default pause between queue polls
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WorkerStatus {
    pub is_running: bool,
    pub processed_count: u64,
    pub failed_count: u64,
}

pub struct TransactionWorker {
    engine: Arc<RuleEngine>,
    queue: Arc<dyn TransactionQueue>,
    sink: Arc<dyn OutcomeSink>,
    metrics: Arc<PipelineMetrics>,
    thresholds: StatusThresholds,
    poll_interval: Duration,
    running: AtomicBool,
    stop_requested: AtomicBool,
    wake: Notify,
    processed: AtomicU64,
    failed: AtomicU64,
}

impl TransactionWorker {
    pub fn new(
        engine: Arc<RuleEngine>,
        queue: Arc<dyn TransactionQueue>,
        sink: Arc<dyn OutcomeSink>,
        metrics: Arc<PipelineMetrics>,
    ) -> Self {
        Self {
            engine,
            queue,
            sink,
            metrics,
            thresholds: StatusThresholds::default(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            running: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            wake: Notify::new(),
            processed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
        }
    }

    pub fn with_thresholds(mut self, thresholds: StatusThresholds) -> Self {
        self.thresholds = thresholds;
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn status(&self) -> WorkerStatus {
        WorkerStatus {
            is_running: self.running.load(Ordering::SeqCst),
            processed_count: self.processed.load(Ordering::Relaxed),
            failed_count: self.failed.load(Ordering::Relaxed),
        }
    }

    /// Poll the queue until [`stop`](Self::stop) is called. Returns at once
    /// if stop was requested before the loop started.
    pub async fn run(&self) {
        if self.stop_requested.load(Ordering::SeqCst) {
            info!("Transaction worker stopped before start");
            return;
        }

        self.running.store(true, Ordering::SeqCst);
        info!(
            poll_interval_ms = self.poll_interval.as_millis() as u64,
            "Transaction worker started"
        );

        while !self.stop_requested.load(Ordering::SeqCst) {
            self.poll_once().await;

            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = self.wake.notified() => {}
            }
        }

        self.running.store(false, Ordering::SeqCst);
        let status = self.status();
        info!(
            processed = status.processed_count,
            failed = status.failed_count,
            "Transaction worker stopped"
        );
    }

    /// Ask the loop to exit after its current cycle
    pub fn stop(&self) {
        info!("Stopping transaction worker");
        self.stop_requested.store(true, Ordering::SeqCst);
        // notify_one keeps a permit if the loop is not waiting yet
        self.wake.notify_one();
    }

    /// Pop and process at most one transaction; returns whether one was taken
    pub async fn poll_once(&self) -> bool {
        match self.queue.pop().await {
            Ok(Some(tx)) => {
                self.process_transaction(&tx).await;
                true
            }
            Ok(None) => false,
            Err(e) => {
                self.metrics.record_queue_error();
                error!(error = %format!("{:#}", e), "Failed to pop from queue, retrying next cycle");
                false
            }
        }
    }

    /// Evaluate one transaction and persist its outcome. Always ends with a
    /// status write attempt; errors and panics become `failed`.
    pub async fn process_transaction(&self, tx: &Transaction) -> TransactionStatus {
        let transaction_id = tx.external_id();
        let start = Instant::now();
        info!(transaction_id = %transaction_id, "Processing transaction");

        let outcome = AssertUnwindSafe(self.evaluate_and_persist(&transaction_id, tx))
            .catch_unwind()
            .await;

        let (status, risk_score) = match outcome {
            Ok(Ok(done)) => done,
            Ok(Err(e)) => {
                error!(
                    transaction_id = %transaction_id,
                    error = %format!("{:#}", e),
                    "Error processing transaction"
                );
                (self.mark_failed(&transaction_id).await, 0.0)
            }
            Err(panic) => {
                error!(
                    transaction_id = %transaction_id,
                    panic = %panic_message(panic.as_ref()),
                    "Panic while processing transaction"
                );
                (self.mark_failed(&transaction_id).await, 0.0)
            }
        };

        self.processed.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .record_transaction(start.elapsed(), risk_score, status);

        info!(
            transaction_id = %transaction_id,
            status = %status,
            processing_time_us = start.elapsed().as_micros() as u64,
            "Transaction processed"
        );
        status
    }

    async fn evaluate_and_persist(
        &self,
        transaction_id: &str,
        tx: &Transaction,
    ) -> Result<(TransactionStatus, f64)> {
        let verdict = self.engine.evaluate_transaction(tx).await;
        self.metrics.record_triggered_rules(&verdict.triggered_rules);

        for outcome in &verdict.details {
            let Some(result) = outcome.result() else {
                continue;
            };
            let record = RuleResultRecord::from_result(outcome.rule_id, result);
            if let Err(e) = self.sink.save_rule_result(transaction_id, &record).await {
                self.metrics.record_persistence_error();
                warn!(
                    transaction_id = %transaction_id,
                    rule_id = outcome.rule_id,
                    error = %format!("{:#}", e),
                    "Failed to save rule result"
                );
            }
        }

        let status = self.thresholds.classify_verdict(&verdict);
        debug!(
            transaction_id = %transaction_id,
            is_suspicious = verdict.is_suspicious,
            risk_percent = verdict.risk_percent(),
            checked_rules = verdict.checked_rules,
            status = %status,
            "Verdict classified"
        );

        self.sink
            .update_transaction_status(transaction_id, status)
            .await
            .with_context(|| format!("Failed to update status of {}", transaction_id))?;

        Ok((status, verdict.risk_score))
    }

    async fn mark_failed(&self, transaction_id: &str) -> TransactionStatus {
        self.failed.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = self
            .sink
            .update_transaction_status(transaction_id, TransactionStatus::Failed)
            .await
        {
            self.metrics.record_persistence_error();
            error!(
                transaction_id = %transaction_id,
                error = %format!("{:#}", e),
                "Failed to mark transaction as failed"
            );
        }
        TransactionStatus::Failed
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::counter::{CounterStore, MemoryCounterStore};
    use crate::queue::MemoryQueue;
    use crate::risk::{FeatureExtractor, HeuristicRiskModel, RiskModel, TransactionFeatures};
    use crate::rules::{ComparisonOperator, ModelRule, PatternRule, Rule, RuleKind, ThresholdRule};
    use crate::sink::MemorySink;
    use async_trait::async_trait;

    struct PanickingModel;

    #[async_trait]
    impl RiskModel for PanickingModel {
        fn extract_features(&self, tx: &Transaction) -> Result<TransactionFeatures> {
            FeatureExtractor::new().extract(tx)
        }

        async fn predict(&self, _features: &TransactionFeatures) -> Result<f64> {
            panic!("model weights corrupted")
        }
    }

    struct DownCounterStore;

    #[async_trait]
    impl CounterStore for DownCounterStore {
        async fn increment_and_maybe_expire(&self, _key: &str, _ttl_secs: u64) -> Result<u64> {
            anyhow::bail!("redis down")
        }
    }

    /// Fails result saves for one rule id and every status except `failed`
    struct FlakySink {
        inner: MemorySink,
        bad_rule: i64,
        reject_statuses: bool,
    }

    #[async_trait]
    impl OutcomeSink for FlakySink {
        async fn save_rule_result(&self, transaction_id: &str, record: &RuleResultRecord) -> Result<()> {
            if record.rule_id == self.bad_rule {
                anyhow::bail!("deadlock detected");
            }
            self.inner.save_rule_result(transaction_id, record).await
        }

        async fn update_transaction_status(
            &self,
            transaction_id: &str,
            status: TransactionStatus,
        ) -> Result<()> {
            if self.reject_statuses && status != TransactionStatus::Failed {
                anyhow::bail!("status table unavailable");
            }
            self.inner.update_transaction_status(transaction_id, status).await
        }
    }

    fn amount_rule(id: i64, score: f64) -> Rule {
        Rule::new(
            id,
            format!("amount_rule_{}", id),
            RuleKind::Threshold(ThresholdRule::new(
                "amount",
                ComparisonOperator::Gt,
                1000,
                Some(score),
            )),
        )
    }

    fn worker_with(
        rules: Vec<Rule>,
        model: Arc<dyn RiskModel>,
        sink: Arc<dyn OutcomeSink>,
    ) -> (TransactionWorker, Arc<MemoryQueue>) {
        let engine = Arc::new(RuleEngine::new(Arc::new(MemoryCounterStore::new()), model));
        engine.load_rules(rules);
        let queue = Arc::new(MemoryQueue::new());
        let worker = TransactionWorker::new(
            engine,
            queue.clone(),
            sink,
            Arc::new(PipelineMetrics::new()),
        )
        .with_poll_interval(Duration::from_millis(10));
        (worker, queue)
    }

    fn tx(id: &str, amount: i64) -> Transaction {
        Transaction::default()
            .with_field("id", id)
            .with_field("amount", amount)
    }

    #[tokio::test]
    async fn test_status_classification() {
        let sink = Arc::new(MemorySink::new());
        let model: Arc<dyn RiskModel> = Arc::new(HeuristicRiskModel::with_seed(1));

        let (worker, _) = worker_with(vec![amount_rule(1, 0.85)], model.clone(), sink.clone());
        assert_eq!(worker.process_transaction(&tx("tx_b", 5000)).await, TransactionStatus::Blocked);
        assert_eq!(worker.process_transaction(&tx("tx_a", 10)).await, TransactionStatus::Approved);

        let (worker, _) = worker_with(vec![amount_rule(1, 0.6)], model.clone(), sink.clone());
        assert_eq!(worker.process_transaction(&tx("tx_s", 5000)).await, TransactionStatus::Suspicious);

        // Fired but below the suspicious threshold
        let (worker, _) = worker_with(vec![amount_rule(1, 0.3)], model, sink.clone());
        assert_eq!(worker.process_transaction(&tx("tx_l", 5000)).await, TransactionStatus::Approved);

        assert_eq!(sink.status_of("tx_b"), Some(TransactionStatus::Blocked));
        assert_eq!(sink.status_of("tx_s"), Some(TransactionStatus::Suspicious));
        assert_eq!(sink.status_of("tx_a"), Some(TransactionStatus::Approved));

        let saved = sink.results_for("tx_b");
        assert_eq!(saved.len(), 1);
        assert!(saved[0].fired);
        assert_eq!(saved[0].risk_score, 0.85);
    }

    #[tokio::test]
    async fn test_panic_marks_transaction_failed() {
        let sink = Arc::new(MemorySink::new());
        let rules = vec![Rule::new(1, "model", RuleKind::Model(ModelRule::new(0.5)))];
        let (worker, _) = worker_with(rules, Arc::new(PanickingModel), sink.clone());

        let status = worker.process_transaction(&tx("tx_p", 100)).await;

        assert_eq!(status, TransactionStatus::Failed);
        assert_eq!(sink.status_of("tx_p"), Some(TransactionStatus::Failed));
        assert_eq!(worker.status().failed_count, 1);
        assert_eq!(worker.status().processed_count, 1);
    }

    #[tokio::test]
    async fn test_result_save_failures_are_isolated() {
        let sink = Arc::new(FlakySink {
            inner: MemorySink::new(),
            bad_rule: 1,
            reject_statuses: false,
        });
        let (worker, _) = worker_with(
            vec![amount_rule(1, 0.9), amount_rule(2, 0.9), amount_rule(3, 0.9)],
            Arc::new(HeuristicRiskModel::with_seed(1)),
            sink.clone(),
        );

        let status = worker.process_transaction(&tx("tx_f", 5000)).await;

        assert_eq!(status, TransactionStatus::Blocked);
        let ids: Vec<i64> = sink.inner.results_for("tx_f").iter().map(|r| r.rule_id).collect();
        assert_eq!(ids, vec![2, 3]);
        assert_eq!(sink.inner.status_of("tx_f"), Some(TransactionStatus::Blocked));
    }

    #[tokio::test]
    async fn test_status_write_failure_marks_failed() {
        let sink = Arc::new(FlakySink {
            inner: MemorySink::new(),
            bad_rule: -1,
            reject_statuses: true,
        });
        let (worker, _) = worker_with(
            vec![amount_rule(1, 0.9)],
            Arc::new(HeuristicRiskModel::with_seed(1)),
            sink.clone(),
        );

        let status = worker.process_transaction(&tx("tx_w", 5000)).await;

        assert_eq!(status, TransactionStatus::Failed);
        assert_eq!(sink.inner.status_of("tx_w"), Some(TransactionStatus::Failed));
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_drains_queue_until_stopped() {
        let sink = Arc::new(MemorySink::new());
        let (worker, queue) = worker_with(
            vec![amount_rule(1, 0.9)],
            Arc::new(HeuristicRiskModel::with_seed(1)),
            sink.clone(),
        );
        let worker = Arc::new(worker);

        queue.push(&tx("tx_1", 5000)).await.unwrap();
        queue.push(&tx("tx_2", 10)).await.unwrap();

        let handle = tokio::spawn({
            let worker = worker.clone();
            async move { worker.run().await }
        });

        while worker.status().processed_count < 2 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert!(worker.status().is_running);

        worker.stop();
        handle.await.unwrap();

        assert!(!worker.status().is_running);
        assert_eq!(sink.status_of("tx_1"), Some(TransactionStatus::Blocked));
        assert_eq!(sink.status_of("tx_2"), Some(TransactionStatus::Approved));
        assert_eq!(queue.len().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_stop_before_run_returns() {
        let (worker, queue) = worker_with(
            vec![amount_rule(1, 0.9)],
            Arc::new(HeuristicRiskModel::with_seed(1)),
            Arc::new(MemorySink::new()),
        );
        queue.push(&tx("tx_1", 5000)).await.unwrap();

        worker.stop();
        let finished = tokio::time::timeout(Duration::from_secs(2), worker.run()).await;

        assert!(finished.is_ok());
        assert!(!worker.status().is_running);
        assert_eq!(worker.status().processed_count, 0);
        assert_eq!(queue.len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_errored_rule_lowers_status() {
        let engine = Arc::new(RuleEngine::new(
            Arc::new(DownCounterStore),
            Arc::new(HeuristicRiskModel::with_seed(1)),
        ));
        engine.load_rules(vec![
            Rule::new(1, "velocity", RuleKind::Pattern(PatternRule::new(5, 10, None)))
                .with_priority(2),
            Rule::new(
                2,
                "large_amount",
                RuleKind::Threshold(ThresholdRule::new(
                    "amount",
                    ComparisonOperator::Gt,
                    10000,
                    Some(0.8),
                )),
            )
            .with_priority(3),
        ]);
        let sink = Arc::new(MemorySink::new());
        let worker = TransactionWorker::new(
            engine,
            Arc::new(MemoryQueue::new()),
            sink.clone(),
            Arc::new(PipelineMetrics::new()),
        );

        let payment = tx("tx_e", 15000).with_field("from_account", "A");
        let status = worker.process_transaction(&payment).await;

        // (0.0 + 0.8) / 2 is 40 on the status scale
        assert_eq!(status, TransactionStatus::Approved);
        assert_eq!(sink.status_of("tx_e"), Some(TransactionStatus::Approved));
        let ids: Vec<i64> = sink.results_for("tx_e").iter().map(|r| r.rule_id).collect();
        assert_eq!(ids, vec![2]);
        assert_eq!(worker.status().failed_count, 0);
    }
}

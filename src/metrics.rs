//! Performance metrics and statistics tracking for the transaction worker.

use crate::types::verdict::TransactionStatus;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};
use tracing::info;

/// Metrics collector for worker throughput and outcomes
pub struct PipelineMetrics {
    /// Total transactions processed (any final status)
    pub transactions_processed: AtomicU64,
    /// Queue pops that failed
    pub queue_errors: AtomicU64,
    /// Rule result or status writes that failed
    pub persistence_errors: AtomicU64,
    statuses: RwLock<HashMap<TransactionStatus, u64>>,
    /// How often each rule fired, by name
    triggered_rules: RwLock<HashMap<String, u64>>,
    /// Processing times (in microseconds)
    processing_times: RwLock<Vec<u64>>,
    /// Aggregate risk score buckets (tenths of the 0-1 range)
    score_buckets: RwLock<[u64; 10]>,
    start_time: Instant,
}

impl PipelineMetrics {
    pub fn new() -> Self {
        Self {
            transactions_processed: AtomicU64::new(0),
            queue_errors: AtomicU64::new(0),
            persistence_errors: AtomicU64::new(0),
            statuses: RwLock::new(HashMap::new()),
            triggered_rules: RwLock::new(HashMap::new()),
            processing_times: RwLock::new(Vec::with_capacity(1000)),
            score_buckets: RwLock::new([0; 10]),
            start_time: Instant::now(),
        }
    }

    /// Record a processed transaction and its final status
    pub fn record_transaction(
        &self,
        processing_time: Duration,
        risk_score: f64,
        status: TransactionStatus,
    ) {
        self.transactions_processed.fetch_add(1, Ordering::Relaxed);

        if let Ok(mut times) = self.processing_times.write() {
            times.push(processing_time.as_micros() as u64);
            // Keep only the most recent samples
            if times.len() > 10000 {
                times.drain(0..5000);
            }
        }

        let bucket = (risk_score.clamp(0.0, 1.0) * 10.0).min(9.0) as usize;
        if let Ok(mut buckets) = self.score_buckets.write() {
            buckets[bucket] += 1;
        }

        if let Ok(mut statuses) = self.statuses.write() {
            *statuses.entry(status).or_insert(0) += 1;
        }
    }

    pub fn record_triggered_rules(&self, rule_names: &[String]) {
        if rule_names.is_empty() {
            return;
        }
        if let Ok(mut triggered) = self.triggered_rules.write() {
            for name in rule_names {
                *triggered.entry(name.clone()).or_insert(0) += 1;
            }
        }
    }

    pub fn record_queue_error(&self) {
        self.queue_errors.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_persistence_error(&self) {
        self.persistence_errors.fetch_add(1, Ordering::Relaxed);
    }

    /// Get processing time statistics
    pub fn get_processing_stats(&self) -> ProcessingStats {
        let mut sorted: Vec<u64> = match self.processing_times.read() {
            Ok(times) if !times.is_empty() => times.clone(),
            _ => return ProcessingStats::default(),
        };
        sorted.sort_unstable();

        let sum: u64 = sorted.iter().sum();
        let count = sorted.len();
        let percentile = |p: f64| sorted[((count as f64 * p) as usize).min(count - 1)];

        ProcessingStats {
            count: count as u64,
            mean_us: sum / count as u64,
            p50_us: sorted[count / 2],
            p95_us: percentile(0.95),
            p99_us: percentile(0.99),
            max_us: sorted[count - 1],
        }
    }

    /// Count of transactions that ended in `status`
    pub fn status_count(&self, status: TransactionStatus) -> u64 {
        self.statuses
            .read()
            .ok()
            .and_then(|statuses| statuses.get(&status).copied())
            .unwrap_or(0)
    }

    /// Rules by fire count, most frequent first
    pub fn top_triggered_rules(&self, limit: usize) -> Vec<(String, u64)> {
        let mut rules: Vec<(String, u64)> = self
            .triggered_rules
            .read()
            .map(|t| t.iter().map(|(name, count)| (name.clone(), *count)).collect())
            .unwrap_or_default();
        rules.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
        rules.truncate(limit);
        rules
    }

    /// Current throughput (transactions per second)
    pub fn get_throughput(&self) -> f64 {
        let elapsed = self.start_time.elapsed().as_secs_f64();
        if elapsed > 0.0 {
            self.transactions_processed.load(Ordering::Relaxed) as f64 / elapsed
        } else {
            0.0
        }
    }

    pub fn get_score_distribution(&self) -> [u64; 10] {
        self.score_buckets.read().map(|b| *b).unwrap_or([0; 10])
    }

    /// Print summary statistics
    pub fn print_summary(&self) {
        let tx_count = self.transactions_processed.load(Ordering::Relaxed);
        let processing = self.get_processing_stats();
        let throughput = self.get_throughput();
        let score_dist = self.get_score_distribution();

        info!("╔══════════════════════════════════════════════════════════════╗");
        info!("║              FRAUD RULE ENGINE - METRICS SUMMARY             ║");
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Transactions Processed: {:>8}  │  Throughput: {:>6.1} tx/s ║",
            tx_count, throughput
        );
        info!(
            "║ Queue Errors:           {:>8}  │  Write Errors: {:>8}   ║",
            self.queue_errors.load(Ordering::Relaxed),
            self.persistence_errors.load(Ordering::Relaxed)
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!(
            "║ Processing Time (μs): mean={:>5} p50={:>5} p95={:>5} p99={:>5} ║",
            processing.mean_us, processing.p50_us, processing.p95_us, processing.p99_us
        );
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Final Statuses:                                              ║");
        for status in [
            TransactionStatus::Approved,
            TransactionStatus::Suspicious,
            TransactionStatus::Blocked,
            TransactionStatus::Failed,
        ] {
            let count = self.status_count(status);
            let pct = if tx_count > 0 {
                (count as f64 / tx_count as f64) * 100.0
            } else {
                0.0
            };
            info!("║   {:10}: {:>6} ({:>5.1}%)", status.as_str(), count, pct);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Most Triggered Rules:                                        ║");
        for (name, count) in self.top_triggered_rules(5) {
            info!("║   {:30} {:>8}", name, count);
        }
        info!("╠══════════════════════════════════════════════════════════════╣");
        info!("║ Aggregate Risk Distribution:                                 ║");
        let total: u64 = score_dist.iter().sum();
        for (i, &count) in score_dist.iter().enumerate() {
            let pct = if total > 0 { (count as f64 / total as f64) * 100.0 } else { 0.0 };
            let bar: String = "█".repeat(((pct / 2.0) as usize).min(20));
            info!(
                "║   {:.1}-{:.1}: {:>6} ({:>5.1}%) {}",
                i as f64 / 10.0,
                (i + 1) as f64 / 10.0,
                count,
                pct,
                bar
            );
        }
        info!("╚══════════════════════════════════════════════════════════════╝");
    }
}

impl Default for PipelineMetrics {
    fn default() -> Self {
        Self::new()
    }
}

/// Processing time statistics
#[derive(Debug, Default)]
pub struct ProcessingStats {
    pub count: u64,
    pub mean_us: u64,
    pub p50_us: u64,
    pub p95_us: u64,
    pub p99_us: u64,
    pub max_us: u64,
}

/// Prints a metrics summary on a fixed interval
pub struct MetricsReporter {
    metrics: Arc<PipelineMetrics>,
    interval_secs: u64,
}

impl MetricsReporter {
    pub fn new(metrics: Arc<PipelineMetrics>, interval_secs: u64) -> Self {
        Self {
            metrics,
            interval_secs: interval_secs.max(1),
        }
    }

    /// Start the periodic reporting task
    pub async fn start(self) {
        let mut interval = tokio::time::interval(Duration::from_secs(self.interval_secs));
        // The first tick completes immediately
        interval.tick().await;
        loop {
            interval.tick().await;
            self.metrics.print_summary();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_recording() {
        let metrics = PipelineMetrics::new();

        metrics.record_transaction(Duration::from_micros(100), 0.5, TransactionStatus::Suspicious);
        metrics.record_transaction(Duration::from_micros(200), 0.9, TransactionStatus::Blocked);
        metrics.record_transaction(Duration::from_micros(300), 0.0, TransactionStatus::Approved);
        metrics.record_queue_error();

        assert_eq!(metrics.transactions_processed.load(Ordering::Relaxed), 3);
        assert_eq!(metrics.status_count(TransactionStatus::Blocked), 1);
        assert_eq!(metrics.status_count(TransactionStatus::Failed), 0);
        assert_eq!(metrics.queue_errors.load(Ordering::Relaxed), 1);
        assert_eq!(metrics.get_score_distribution()[9], 1);

        let stats = metrics.get_processing_stats();
        assert_eq!(stats.count, 3);
        assert_eq!(stats.mean_us, 200);
        assert_eq!(stats.max_us, 300);
    }

    #[test]
    fn test_top_triggered_rules() {
        let metrics = PipelineMetrics::new();
        metrics.record_triggered_rules(&["velocity".to_string(), "large_amount".to_string()]);
        metrics.record_triggered_rules(&["velocity".to_string()]);

        let top = metrics.top_triggered_rules(1);
        assert_eq!(top, vec![("velocity".to_string(), 2)]);
    }

    #[test]
    fn test_empty_stats() {
        let stats = PipelineMetrics::new().get_processing_stats();
        assert_eq!(stats.count, 0);
    }
}

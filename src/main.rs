//! Fraud Rule Engine - Main Entry Point
//!
//! Pops transactions from the queue, screens them against the configured rules
//! and publishes per-rule results and final statuses.

use anyhow::{Context, Result};
use fraud_rule_engine::{
    config::{AppConfig, LoggingConfig},
    counter::{CounterStore, MemoryCounterStore, RedisCounterStore},
    engine::RuleEngine,
    metrics::{MetricsReporter, PipelineMetrics},
    queue::{MemoryQueue, RedisQueue, TransactionQueue},
    risk::{HeuristicRiskModel, RiskModel},
    rules::RuleLoader,
    sink::{LogSink, NatsOutcomePublisher, OutcomeSink},
    worker::TransactionWorker,
};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AppConfig::load()?;
    init_logging(&config.logging)?;

    info!("Starting Fraud Rule Engine");
    info!(
        blocked = config.detection.blocked_threshold,
        suspicious = config.detection.suspicious_threshold,
        "Status thresholds (0-100 scale)"
    );

    let (counters, queue): (Arc<dyn CounterStore>, Arc<dyn TransactionQueue>) =
        if config.redis.enabled {
            info!(url = %config.redis.url, queue = %config.redis.queue_key, "Using Redis queue and counters");
            (
                Arc::new(RedisCounterStore::new(&config.redis.url)?),
                Arc::new(RedisQueue::new(&config.redis.url, &config.redis.queue_key)?),
            )
        } else {
            warn!("Redis disabled, using in-process queue and counters");
            (Arc::new(MemoryCounterStore::new()), Arc::new(MemoryQueue::new()))
        };

    let sink: Arc<dyn OutcomeSink> = if config.nats.enabled {
        let client = async_nats::connect(&config.nats.url)
            .await
            .with_context(|| format!("Failed to connect to NATS at {}", config.nats.url))?;
        info!(
            url = %config.nats.url,
            results = %config.nats.result_subject,
            statuses = %config.nats.status_subject,
            "Publishing outcomes to NATS"
        );
        Arc::new(NatsOutcomePublisher::new(
            client,
            &config.nats.result_subject,
            &config.nats.status_subject,
        ))
    } else {
        warn!("NATS disabled, outcomes are logged only");
        Arc::new(LogSink::new())
    };

    let model: Arc<dyn RiskModel> = match config.detection.model_seed {
        Some(seed) => Arc::new(HeuristicRiskModel::with_seed(seed)),
        None => Arc::new(HeuristicRiskModel::new()),
    };

    let engine = Arc::new(RuleEngine::new(counters, model));
    load_rules(&engine, &config.rules.path)?;

    let metrics = Arc::new(PipelineMetrics::new());
    let reporter = MetricsReporter::new(metrics.clone(), config.worker.metrics_interval_secs);
    tokio::spawn(reporter.start());

    #[cfg(unix)]
    spawn_reload_on_hangup(engine.clone(), config.rules.path.clone())?;

    let worker = Arc::new(
        TransactionWorker::new(engine, queue, sink, metrics.clone())
            .with_thresholds(config.detection.status_thresholds())
            .with_poll_interval(Duration::from_millis(config.worker.poll_interval_ms)),
    );

    let handle = tokio::spawn({
        let worker = worker.clone();
        async move { worker.run().await }
    });

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl+C")?;
    info!("Termination signal received");

    worker.stop();
    if let Err(e) = handle.await {
        error!(error = %e, "Worker task ended abnormally");
    }

    info!("Fraud Rule Engine shutting down...");
    metrics.print_summary();

    Ok(())
}

fn init_logging(config: &LoggingConfig) -> Result<()> {
    let filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(format!("fraud_rule_engine={}", config.level))
            .with_context(|| format!("Invalid log level: {}", config.level))?,
    };

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    match config.format.as_str() {
        "json" => builder.json().init(),
        _ => builder.init(),
    }
    Ok(())
}

fn load_rules(engine: &RuleEngine, path: impl AsRef<Path>) -> Result<()> {
    let report = RuleLoader::new().load_file(path)?;
    if !report.rejected.is_empty() {
        warn!(rejected = report.rejected.len(), "Some rule definitions were rejected");
    }
    engine.reload_rules(report.rules);

    let summary = engine.summary();
    info!(
        total = summary.total,
        active = summary.active,
        inactive = summary.inactive,
        generation = summary.generation,
        "Rule set ready"
    );
    Ok(())
}

/// Reload the rules file on SIGHUP; a failed reload keeps the current set
#[cfg(unix)]
fn spawn_reload_on_hangup(engine: Arc<RuleEngine>, rules_path: String) -> Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangups = signal(SignalKind::hangup()).context("Failed to install SIGHUP handler")?;
    tokio::spawn(async move {
        while hangups.recv().await.is_some() {
            info!(path = %rules_path, "SIGHUP received, reloading rules");
            if let Err(e) = load_rules(&engine, &rules_path) {
                error!(error = %format!("{:#}", e), "Rule reload failed, keeping current rules");
            }
        }
    });
    Ok(())
}

//! Configuration management for the fraud rule engine

use crate::queue::DEFAULT_QUEUE_KEY;
use crate::types::verdict::StatusThresholds;
use anyhow::{Context, Result};
use config::{Config, Environment, File};
use serde::Deserialize;
use std::path::Path;

/// Default configuration file, overridable with `FRAUD_CONFIG`
pub const DEFAULT_CONFIG_PATH: &str = "config/config.toml";

/// Main application configuration
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub redis: RedisConfig,
    pub nats: NatsConfig,
    pub rules: RulesConfig,
    pub worker: WorkerConfig,
    pub detection: DetectionConfig,
    pub logging: LoggingConfig,
}

/// Redis backs the transaction queue and the pattern counters
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RedisConfig {
    /// When false, both use in-process stores
    pub enabled: bool,
    pub url: String,
    /// List holding pending transactions
    pub queue_key: String,
}

impl Default for RedisConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "redis://127.0.0.1:6379".to_string(),
            queue_key: DEFAULT_QUEUE_KEY.to_string(),
        }
    }
}

/// NATS receives rule results and status changes
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct NatsConfig {
    /// When false, outcomes are kept in memory only
    pub enabled: bool,
    pub url: String,
    pub result_subject: String,
    pub status_subject: String,
}

impl Default for NatsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            url: "nats://localhost:4222".to_string(),
            result_subject: "fraud.rule_results".to_string(),
            status_subject: "fraud.transaction_status".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RulesConfig {
    /// JSON array of rule definitions
    pub path: String,
}

impl Default for RulesConfig {
    fn default() -> Self {
        Self {
            path: "config/rules.json".to_string(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    /// Pause between queue polls in milliseconds
    pub poll_interval_ms: u64,
    /// Seconds between metrics summaries
    pub metrics_interval_secs: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 1000,
            metrics_interval_secs: 30,
        }
    }
}

/// Final status thresholds on the 0-100 scale
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DetectionConfig {
    pub blocked_threshold: f64,
    pub suspicious_threshold: f64,
    /// Fixed seed for the heuristic risk model; random when unset
    pub model_seed: Option<u64>,
}

impl Default for DetectionConfig {
    fn default() -> Self {
        let thresholds = StatusThresholds::default();
        Self {
            blocked_threshold: thresholds.blocked,
            suspicious_threshold: thresholds.suspicious,
            model_seed: None,
        }
    }
}

impl DetectionConfig {
    pub fn status_thresholds(&self) -> StatusThresholds {
        StatusThresholds {
            blocked: self.blocked_threshold,
            suspicious: self.suspicious_threshold,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
    /// Log format (json, pretty)
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "json".to_string(),
        }
    }
}

impl AppConfig {
    /// Load from `FRAUD_CONFIG` or the default path
    pub fn load() -> Result<Self> {
        let path = std::env::var("FRAUD_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.to_string());
        Self::load_from_path(path)
    }

    /// Load a file, then apply `FRAUD__SECTION__KEY` environment overrides
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self> {
        let config = Config::builder()
            .add_source(File::from(path.as_ref()))
            .add_source(
                Environment::with_prefix("FRAUD")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()
            .with_context(|| {
                format!("Failed to build configuration from {}", path.as_ref().display())
            })?;

        let config: Self = config
            .try_deserialize()
            .context("Failed to deserialize configuration")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let detection = &self.detection;
        if detection.suspicious_threshold > detection.blocked_threshold {
            anyhow::bail!(
                "suspicious_threshold ({}) must not exceed blocked_threshold ({})",
                detection.suspicious_threshold,
                detection.blocked_threshold
            );
        }
        if self.worker.poll_interval_ms == 0 {
            anyhow::bail!("worker.poll_interval_ms must be greater than zero");
        }
        Ok(())
    }
}

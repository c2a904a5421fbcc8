//! Outcome persistence: per-rule results and final transaction statuses.
//!
//! The relational store lives downstream. This process publishes outcomes as
//! JSON events on NATS, or only logs them when NATS is disabled. `MemorySink`
//! retains everything and is meant for tests.

use crate::types::verdict::{RuleResult, TransactionStatus};
use anyhow::{Context, Result};
use async_nats::Client;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;
use tracing::{debug, info};

/// Stored form of one rule's result for one transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleResultRecord {
    pub rule_id: i64,
    /// True when the rule fired (`passed == false`)
    pub fired: bool,
    pub risk_score: f64,
    pub details: Value,
}

impl RuleResultRecord {
    pub fn from_result(rule_id: i64, result: &RuleResult) -> Self {
        Self {
            rule_id,
            fired: result.fired(),
            risk_score: result.risk_score,
            details: result.details.clone(),
        }
    }
}

#[async_trait]
pub trait OutcomeSink: Send + Sync {
    async fn save_rule_result(&self, transaction_id: &str, record: &RuleResultRecord) -> Result<()>;

    async fn update_transaction_status(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
    ) -> Result<()>;
}

/// Keeps every outcome in memory, without bound
#[derive(Default)]
pub struct MemorySink {
    results: Mutex<Vec<(String, RuleResultRecord)>>,
    statuses: Mutex<Vec<(String, TransactionStatus)>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Saved rule results for one transaction
    pub fn results_for(&self, transaction_id: &str) -> Vec<RuleResultRecord> {
        self.results
            .lock()
            .map(|results| {
                results
                    .iter()
                    .filter(|(id, _)| id == transaction_id)
                    .map(|(_, record)| record.clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Latest status written for a transaction
    pub fn status_of(&self, transaction_id: &str) -> Option<TransactionStatus> {
        self.statuses.lock().ok().and_then(|statuses| {
            statuses
                .iter()
                .rev()
                .find(|(id, _)| id == transaction_id)
                .map(|(_, status)| *status)
        })
    }

    /// Every status update, in write order
    pub fn status_updates(&self) -> Vec<(String, TransactionStatus)> {
        self.statuses
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

#[async_trait]
impl OutcomeSink for MemorySink {
    async fn save_rule_result(&self, transaction_id: &str, record: &RuleResultRecord) -> Result<()> {
        self.results
            .lock()
            .map_err(|_| anyhow::anyhow!("result store lock poisoned"))?
            .push((transaction_id.to_string(), record.clone()));
        Ok(())
    }

    async fn update_transaction_status(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
    ) -> Result<()> {
        self.statuses
            .lock()
            .map_err(|_| anyhow::anyhow!("status store lock poisoned"))?
            .push((transaction_id.to_string(), status));
        Ok(())
    }
}

/// Rule result event
#[derive(Debug, Serialize)]
struct RuleResultEvent<'a> {
    transaction_id: &'a str,
    #[serde(flatten)]
    record: &'a RuleResultRecord,
    timestamp: DateTime<Utc>,
}

/// Status change event
#[derive(Debug, Serialize)]
struct StatusEvent<'a> {
    transaction_id: &'a str,
    status: TransactionStatus,
    timestamp: DateTime<Utc>,
}

/// Logs each outcome as a JSON event and retains nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl LogSink {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl OutcomeSink for LogSink {
    async fn save_rule_result(&self, transaction_id: &str, record: &RuleResultRecord) -> Result<()> {
        let event = RuleResultEvent {
            transaction_id,
            record,
            timestamp: Utc::now(),
        };
        info!(event = %serde_json::to_string(&event)?, "Rule result");
        Ok(())
    }

    async fn update_transaction_status(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
    ) -> Result<()> {
        let event = StatusEvent {
            transaction_id,
            status,
            timestamp: Utc::now(),
        };
        info!(event = %serde_json::to_string(&event)?, "Transaction status");
        Ok(())
    }
}

/// Publishes outcomes to NATS for downstream persistence
#[derive(Clone)]
pub struct NatsOutcomePublisher {
    client: Client,
    result_subject: String,
    status_subject: String,
}

impl NatsOutcomePublisher {
    pub fn new(client: Client, result_subject: &str, status_subject: &str) -> Self {
        Self {
            client,
            result_subject: result_subject.to_string(),
            status_subject: status_subject.to_string(),
        }
    }

    async fn publish<T: Serialize>(&self, subject: &str, event: &T) -> Result<()> {
        let payload = serde_json::to_vec(event)?;
        self.client
            .publish(subject.to_string(), payload.into())
            .await
            .with_context(|| format!("Failed to publish to {}", subject))?;
        Ok(())
    }
}

#[async_trait]
impl OutcomeSink for NatsOutcomePublisher {
    async fn save_rule_result(&self, transaction_id: &str, record: &RuleResultRecord) -> Result<()> {
        let event = RuleResultEvent {
            transaction_id,
            record,
            timestamp: Utc::now(),
        };
        self.publish(&self.result_subject, &event).await?;

        debug!(
            transaction_id = %transaction_id,
            rule_id = record.rule_id,
            fired = record.fired,
            "Published rule result"
        );
        Ok(())
    }

    async fn update_transaction_status(
        &self,
        transaction_id: &str,
        status: TransactionStatus,
    ) -> Result<()> {
        let event = StatusEvent {
            transaction_id,
            status,
            timestamp: Utc::now(),
        };
        self.publish(&self.status_subject, &event).await?;

        debug!(transaction_id = %transaction_id, status = %status, "Published transaction status");
        Ok(())
    }
}

//! Fraud Rule Engine Library
//!
//! Screens queued payment transactions against a configurable, prioritized
//! set of fraud rules (thresholds, velocity patterns, composites and a risk
//! model) and records a final status for each one.

pub mod config;
pub mod counter;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod queue;
pub mod risk;
pub mod rules;
pub mod sink;
pub mod types;
pub mod worker;

pub use config::AppConfig;
pub use counter::{CounterStore, MemoryCounterStore, RedisCounterStore};
pub use engine::{RuleEngine, RuleSummary};
pub use error::RuleConfigError;
pub use queue::{MemoryQueue, RedisQueue, TransactionQueue};
pub use risk::{HeuristicRiskModel, RiskModel};
pub use rules::{Rule, RuleDefinition, RuleKind, RuleLoader};
pub use sink::{LogSink, MemorySink, NatsOutcomePublisher, OutcomeSink, RuleResultRecord};
pub use types::{EvaluationVerdict, RuleResult, Transaction, TransactionStatus};
pub use worker::{TransactionWorker, WorkerStatus};

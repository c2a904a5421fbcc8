//! Type definitions shared by the engine and the worker

pub mod transaction;
pub mod verdict;

pub use transaction::Transaction;
pub use verdict::{
    Evaluation, EvaluationVerdict, RuleOutcome, RuleResult, StatusThresholds, TransactionStatus,
};

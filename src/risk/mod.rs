//! Risk model capability used by model-based rules

pub mod features;
pub mod heuristic;

pub use features::{FeatureExtractor, TransactionFeatures};
pub use heuristic::HeuristicRiskModel;

use crate::types::transaction::Transaction;
use anyhow::Result;
use async_trait::async_trait;

/// Pluggable fraud scorer.
///
/// The engine treats implementations as opaque: any scorer that can derive
/// features from a transaction and map them to a probability in [0, 1] fits.
#[async_trait]
pub trait RiskModel: Send + Sync {
    /// Short name used in logs and rule details
    fn name(&self) -> &str {
        "risk_model"
    }

    /// Derive model input from a transaction
    fn extract_features(&self, tx: &Transaction) -> Result<TransactionFeatures>;

    /// Fraud probability in [0, 1]
    async fn predict(&self, features: &TransactionFeatures) -> Result<f64>;
}

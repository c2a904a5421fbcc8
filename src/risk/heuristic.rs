//! Heuristic fraud-probability simulator.
//!
//! Stands in for a trained model: a random base probability nudged up for
//! large amounts and night-time activity.

use super::features::{FeatureExtractor, TransactionFeatures};
use super::RiskModel;
use crate::types::transaction::Transaction;
use anyhow::Result;
use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use std::sync::Mutex;
use tracing::{debug, info};

const BASE_RISK_MIN: f64 = 0.1;
const BASE_RISK_MAX: f64 = 0.4;

const LARGE_AMOUNT: f64 = 100_000.0;
const LARGE_AMOUNT_BOOST: f64 = 0.3;
const ELEVATED_AMOUNT: f64 = 50_000.0;
const ELEVATED_AMOUNT_BOOST: f64 = 0.15;
const NIGHT_BOOST: f64 = 0.2;

/// Simulated risk model
pub struct HeuristicRiskModel {
    extractor: FeatureExtractor,
    rng: Mutex<StdRng>,
}

impl HeuristicRiskModel {
    /// Create a simulator seeded from OS entropy
    pub fn new() -> Self {
        info!("Heuristic risk model initialized (simulation mode)");
        Self {
            extractor: FeatureExtractor::new(),
            rng: Mutex::new(StdRng::from_entropy()),
        }
    }

    /// Create a simulator with a fixed seed for reproducible scores
    pub fn with_seed(seed: u64) -> Self {
        info!(seed = seed, "Heuristic risk model initialized (seeded)");
        Self {
            extractor: FeatureExtractor::new(),
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    /// Deterministic part of the score: amount and time-of-day adjustments
    pub fn adjustment(features: &TransactionFeatures) -> f64 {
        let mut boost = 0.0;

        if features.amount > LARGE_AMOUNT {
            boost += LARGE_AMOUNT_BOOST;
        } else if features.amount > ELEVATED_AMOUNT {
            boost += ELEVATED_AMOUNT_BOOST;
        }

        if features.hour >= 22 || features.hour <= 5 {
            boost += NIGHT_BOOST;
        }

        boost
    }
}

impl Default for HeuristicRiskModel {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RiskModel for HeuristicRiskModel {
    fn name(&self) -> &str {
        "heuristic"
    }

    fn extract_features(&self, tx: &Transaction) -> Result<TransactionFeatures> {
        self.extractor.extract(tx)
    }

    async fn predict(&self, features: &TransactionFeatures) -> Result<f64> {
        let base = {
            let mut rng = self
                .rng
                .lock()
                .map_err(|e| anyhow::anyhow!("Lock error: {}", e))?;
            rng.gen_range(BASE_RISK_MIN..=BASE_RISK_MAX)
        };

        let probability = (base + Self::adjustment(features)).clamp(0.0, 1.0);

        debug!(
            amount = features.amount,
            hour = features.hour,
            probability = probability,
            "Heuristic prediction"
        );

        Ok(probability)
    }
}

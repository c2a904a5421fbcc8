//! Feature extraction for risk model scoring.
//!
//! Turns a raw transaction into the small feature set the risk model
//! consumes: amount, time-of-day and day-of-week signals, merchant and currency.

use crate::types::transaction::Transaction;
use anyhow::Result;
use chrono::{DateTime, Datelike, FixedOffset, NaiveDate, NaiveDateTime, Timelike};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::warn;

/// Hour used when the timestamp is absent or unparsable
pub const DEFAULT_HOUR: u32 = 12;
/// Day of week (Monday = 0) used when the timestamp is absent or unparsable
pub const DEFAULT_DAY_OF_WEEK: u32 = 0;

/// Names of the features produced by [`FeatureExtractor`], in order
pub const FEATURE_NAMES: [&str; 6] = [
    "amount",
    "hour",
    "day_of_week",
    "is_weekend",
    "merchant",
    "currency",
];

/// Model input derived from a transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionFeatures {
    pub amount: f64,
    /// Hour of day (0-23)
    pub hour: u32,
    /// Day of week, Monday = 0
    pub day_of_week: u32,
    pub is_weekend: bool,
    pub merchant: String,
    pub currency: String,
}

impl TransactionFeatures {
    /// Look up a single feature by name
    pub fn get(&self, name: &str) -> Option<Value> {
        let value = match name {
            "amount" => Value::from(self.amount),
            "hour" => Value::from(self.hour),
            "day_of_week" => Value::from(self.day_of_week),
            "is_weekend" => Value::from(u8::from(self.is_weekend)),
            "merchant" => Value::from(self.merchant.clone()),
            "currency" => Value::from(self.currency.clone()),
            _ => return None,
        };
        Some(value)
    }

    /// All features as a JSON object
    pub fn to_map(&self) -> Map<String, Value> {
        FEATURE_NAMES
            .iter()
            .filter_map(|name| self.get(name).map(|v| (name.to_string(), v)))
            .collect()
    }

    /// The named subset of features as a JSON object; unknown names are skipped
    pub fn select(&self, names: &[String]) -> Map<String, Value> {
        names
            .iter()
            .filter_map(|name| self.get(name).map(|v| (name.clone(), v)))
            .collect()
    }
}

/// Whether `name` is a feature the extractor produces
pub fn is_known_feature(name: &str) -> bool {
    FEATURE_NAMES.contains(&name)
}

/// Feature extractor that transforms transactions into model input features
#[derive(Debug, Default, Clone, Copy)]
pub struct FeatureExtractor;

impl FeatureExtractor {
    pub fn new() -> Self {
        Self
    }

    /// Extract features from a transaction.
    ///
    /// Fails only if `amount` is present but not numeric.
    pub fn extract(&self, tx: &Transaction) -> Result<TransactionFeatures> {
        let amount = tx.amount()?.unwrap_or(0.0);

        let (hour, day_of_week) = match tx.get("timestamp") {
            Some(raw) => match parse_timestamp(raw) {
                Some(ts) => (ts.hour(), ts.weekday().num_days_from_monday()),
                None => {
                    warn!(timestamp = %raw, "Failed to parse timestamp, using defaults");
                    (DEFAULT_HOUR, DEFAULT_DAY_OF_WEEK)
                }
            },
            None => (DEFAULT_HOUR, DEFAULT_DAY_OF_WEEK),
        };

        Ok(TransactionFeatures {
            amount,
            hour,
            day_of_week,
            is_weekend: day_of_week >= 5,
            merchant: tx.get_str("merchant").unwrap_or("unknown").to_string(),
            currency: tx.get_str("currency").unwrap_or("USD").to_string(),
        })
    }

    pub fn feature_count(&self) -> usize {
        FEATURE_NAMES.len()
    }
}

/// Parse RFC 3339, naive ISO-8601, plain dates and unix seconds.
///
/// Offsets are kept so hour/day reflect the local time of the transaction;
/// naive values are taken as UTC.
pub fn parse_timestamp(raw: &Value) -> Option<DateTime<FixedOffset>> {
    let utc = FixedOffset::east_opt(0)?;

    match raw {
        Value::String(s) => {
            let s = s.trim();
            if let Ok(ts) = DateTime::parse_from_rfc3339(s) {
                return Some(ts);
            }
            for format in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f", "%Y-%m-%dT%H:%M"] {
                if let Ok(naive) = NaiveDateTime::parse_from_str(s, format) {
                    return Some(naive.and_utc().with_timezone(&utc));
                }
            }
            NaiveDate::parse_from_str(s, "%Y-%m-%d")
                .ok()
                .and_then(|date| date.and_hms_opt(0, 0, 0))
                .map(|naive| naive.and_utc().with_timezone(&utc))
        }
        Value::Number(n) => n
            .as_i64()
            .and_then(|secs| DateTime::from_timestamp(secs, 0))
            .map(|ts| ts.with_timezone(&utc)),
        _ => None,
    }
}

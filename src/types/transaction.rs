//! Transaction payload as it travels through the queue and into the rule engine

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Identifier used when a payload carries neither `id` nor `transaction_id`.
pub const UNKNOWN_TRANSACTION_ID: &str = "unknown";

/// A transaction to be screened.
///
/// Rules address fields by name (`amount`, `currency`, `merchant`,
/// `from_account`, `user_id`, `timestamp`, `description`, ...), so the payload
/// is kept as a JSON object rather than a fixed struct. The engine only reads it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transaction(Map<String, Value>);

impl Transaction {
    /// Wrap an existing JSON object
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Build a transaction from any JSON value; only objects are accepted
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(fields) => Ok(Self(fields)),
            other => bail!("transaction payload must be a JSON object, got {}", type_name(&other)),
        }
    }

    /// Parse a queue payload
    pub fn from_json(payload: &str) -> Result<Self> {
        let value: Value = serde_json::from_str(payload)?;
        Self::from_value(value)
    }

    /// Get a field, treating JSON `null` as absent
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.0.get(field).filter(|v| !v.is_null())
    }

    /// Whether the field is present and non-null
    pub fn contains(&self, field: &str) -> bool {
        self.get(field).is_some()
    }

    /// Set a field (builder style, mostly used by producers and tests)
    pub fn with_field(mut self, field: &str, value: impl Into<Value>) -> Self {
        self.0.insert(field.to_string(), value.into());
        self
    }

    /// External identifier used for status and result persistence
    pub fn external_id(&self) -> String {
        ["id", "transaction_id"]
            .iter()
            .find_map(|key| self.get(key).and_then(value_as_string))
            .unwrap_or_else(|| UNKNOWN_TRANSACTION_ID.to_string())
    }

    /// Transaction amount, accepting numbers and numeric strings
    ///
    /// Returns `Ok(None)` if the field is absent and an error if it is present
    /// but not numeric.
    pub fn amount(&self) -> Result<Option<f64>> {
        match self.get("amount") {
            None => Ok(None),
            Some(value) => match value_as_f64(value) {
                Some(amount) => Ok(Some(amount)),
                None => bail!("amount is not numeric: {}", value),
            },
        }
    }

    /// Read a string field
    pub fn get_str(&self, field: &str) -> Option<&str> {
        self.get(field).and_then(Value::as_str)
    }

    /// Underlying JSON object
    pub fn fields(&self) -> &Map<String, Value> {
        &self.0
    }

    /// Serialize back to a queue payload
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(&self.0)?)
    }
}

impl From<Map<String, Value>> for Transaction {
    fn from(fields: Map<String, Value>) -> Self {
        Self(fields)
    }
}

/// Numeric view of a JSON value: numbers, and strings holding a decimal
pub fn value_as_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
        _ => None,
    }
}

/// String view of a scalar JSON value; empty strings count as absent
pub fn value_as_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

pub(crate) fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

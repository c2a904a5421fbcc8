//! Rule configuration errors.
//!
//! Raised while turning a rule definition into a [`Rule`](crate::rules::Rule).
//! A rule that fails construction is never registered, so a malformed
//! definition cannot degrade into a silent no-op at evaluation time.

/// Why a rule definition was rejected
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RuleConfigError {
    /// A required parameter is absent
    #[error("{kind} rule requires '{parameter}' in parameters")]
    MissingParameter {
        kind: &'static str,
        parameter: &'static str,
    },

    /// A parameter is present but has the wrong type or an invalid value
    #[error("{kind} rule parameter '{parameter}' is invalid: {reason}")]
    InvalidParameter {
        kind: &'static str,
        parameter: &'static str,
        reason: String,
    },

    /// Comparison or logical operator outside the supported set
    #[error("unsupported operator '{operator}' for {kind} rule (supported: {supported})")]
    UnsupportedOperator {
        kind: &'static str,
        operator: String,
        supported: &'static str,
    },

    /// The `type` field names no known rule kind
    #[error("unknown rule type '{0}'")]
    UnknownType(String),

    /// Parameters must be a structured key/value document
    #[error("rule parameters must be a JSON object")]
    ParametersNotObject,

    /// Another rule in the same load generation already uses this id
    #[error("duplicate rule id {0}")]
    DuplicateId(i64),

    /// Rule names are unique within a load generation
    #[error("duplicate rule name '{0}'")]
    DuplicateName(String),

    /// Composite rule participates in a reference cycle
    #[error("composite rule {0} is part of a reference cycle")]
    CompositeCycle(i64),
}

impl RuleConfigError {
    pub(crate) fn missing(kind: &'static str, parameter: &'static str) -> Self {
        Self::MissingParameter { kind, parameter }
    }

    pub(crate) fn invalid(
        kind: &'static str,
        parameter: &'static str,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidParameter {
            kind,
            parameter,
            reason: reason.into(),
        }
    }
}

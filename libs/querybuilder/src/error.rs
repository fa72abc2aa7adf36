use thiserror::Error;

/// Filter compilation errors, surfaced to API callers as bad requests
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FilterError {
    /// Clause matches none of the known selector forms
    #[error("unrecognized filter clause: '{clause}'")]
    UnrecognizedClause { clause: String },

    /// Known selector used with an operator it does not support
    #[error("operator '{operator}' is not supported for {selector}")]
    InvalidOperator { selector: String, operator: String },

    /// Operand missing or malformed
    #[error("invalid value in clause '{clause}': {reason}")]
    InvalidValue { clause: String, reason: String },
}

impl FilterError {
    pub(crate) fn unrecognized(clause: &str) -> Self {
        Self::UnrecognizedClause {
            clause: clause.to_string(),
        }
    }

    pub(crate) fn invalid_value(clause: &str, reason: impl Into<String>) -> Self {
        Self::InvalidValue {
            clause: clause.to_string(),
            reason: reason.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, FilterError>;

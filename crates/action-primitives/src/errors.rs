//! Error types for action translation

use handoff_core_types::ActionKind;
use thiserror::Error;

/// Why an action could not be turned into a command.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ActionError {
    /// A field the action kind needs was empty
    #[error("{action} action requires a non-empty {field}")]
    MissingField {
        action: ActionKind,
        field: &'static str,
    },

    /// A field was present but could not be interpreted
    #[error("{action} action has invalid {field}: {reason}")]
    InvalidValue {
        action: ActionKind,
        field: &'static str,
        reason: String,
    },

    /// `login` without a complete username/password pair
    #[error("login action requires credentials with username and password")]
    MissingCredentials,
}

impl ActionError {
    pub fn missing(action: ActionKind, field: &'static str) -> Self {
        ActionError::MissingField { action, field }
    }

    pub fn invalid(action: ActionKind, field: &'static str, reason: impl Into<String>) -> Self {
        ActionError::InvalidValue {
            action,
            field,
            reason: reason.into(),
        }
    }

    /// Name of the offending field.
    pub fn field(&self) -> &'static str {
        match self {
            ActionError::MissingField { field, .. } | ActionError::InvalidValue { field, .. } => {
                field
            }
            ActionError::MissingCredentials => "credentials",
        }
    }
}

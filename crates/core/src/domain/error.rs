// Domain Error Types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid status transition: {from} -> {to}")]
    InvalidStateTransition { from: String, to: String },

    #[error("Invalid job parameter '{key}': {reason}")]
    InvalidParameter { key: String, reason: String },

    #[error("Execution context value for '{key}' is not a {expected}")]
    ContextTypeMismatch { key: String, expected: &'static str },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

pub type Result<T> = std::result::Result<T, DomainError>;

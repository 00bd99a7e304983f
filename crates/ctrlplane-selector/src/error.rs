//! Selector validation errors

use thiserror::Error;

/// Errors raised when a condition tree fails schema validation
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SelectorError {
    #[error("Metadata condition has an empty key")]
    EmptyMetadataKey,

    #[error("Condition on {field} requires a non-empty value")]
    MissingValue { field: &'static str },

    #[error("Invalid regex '{pattern}': {reason}")]
    InvalidRegex { pattern: String, reason: String },

    #[error("Comparison nested {depth} levels deep, maximum is {max}")]
    TooDeep { depth: usize, max: usize },
}

/// Result type for selector operations
pub type Result<T> = std::result::Result<T, SelectorError>;

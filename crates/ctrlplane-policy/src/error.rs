//! Error types for policy configuration

use ctrlplane_selector::SelectorError;
use thiserror::Error;

/// Errors raised when a policy or rule configuration is malformed
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RuleError {
    #[error("Invalid version pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid semver requirement '{requirement}': {reason}")]
    InvalidRequirement { requirement: String, reason: String },

    #[error("Invalid selector: {0}")]
    InvalidSelector(#[from] SelectorError),

    #[error("Invalid {rule} rule: {reason}")]
    InvalidConfig { rule: &'static str, reason: String },

    #[error("Policy name must not be empty")]
    EmptyName,
}

/// Result type for policy operations
pub type Result<T> = std::result::Result<T, RuleError>;

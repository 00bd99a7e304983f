//! Error types for ctrlplane-lock

use thiserror::Error;

/// Lock errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LockError {
    /// Lock backend failure
    #[error("Lock backend error: {0}")]
    Backend(String),

    /// Waited too long to acquire
    #[error("Timed out after {waited_ms}ms waiting for lock '{key}'")]
    Timeout { key: String, waited_ms: u64 },

    /// The token does not hold the lock (expired or never acquired)
    #[error("Lock '{key}' not held or expired")]
    NotHeld { key: String },
}

/// Result type for lock operations
pub type Result<T> = std::result::Result<T, LockError>;

//! Error types for ctrlplane-store

use thiserror::Error;

/// Storage errors
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StoreError {
    /// Item not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Conflict (e.g., already exists)
    #[error("Conflict: {0}")]
    Conflict(String),

    /// A row needed by the operation is locked by another transaction
    #[error("Lock contention: {0}")]
    LockContention(String),

    /// Invalid data
    #[error("Invalid data: {0}")]
    InvalidData(String),

    /// Connection error
    #[error("Connection error: {0}")]
    Connection(String),

    /// Query error
    #[error("Query error: {0}")]
    Query(String),
}

impl StoreError {
    /// Whether retrying the whole unit of work later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, StoreError::LockContention(_) | StoreError::Connection(_))
    }
}

/// Result type for storage operations
pub type StoreResult<T> = Result<T, StoreError>;

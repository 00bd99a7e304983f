//! Error types for ctrlplane-release

use ctrlplane_store::StoreError;
use thiserror::Error;

/// Errors raised while resolving variables or writing releases
#[derive(Debug, Error)]
pub enum ReleaseError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Invalid encryption key: {0}")]
    InvalidKey(String),

    #[error("Cipher error: {0}")]
    Cipher(String),

    #[error("Variable '{0}' is encrypted but no encryption key is configured")]
    MissingKey(String),
}

impl ReleaseError {
    /// Whether retrying the whole unit of work later may succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, ReleaseError::Store(e) if e.is_transient())
    }
}

/// Result type for release operations
pub type Result<T> = std::result::Result<T, ReleaseError>;

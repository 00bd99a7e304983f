//! Error types for ctrlplane-targets

use ctrlplane_lock::LockError;
use ctrlplane_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ResolverError {
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    #[error("Lock error: {0}")]
    Lock(#[from] LockError),
}

/// Result type for resolver operations
pub type Result<T> = std::result::Result<T, ResolverError>;

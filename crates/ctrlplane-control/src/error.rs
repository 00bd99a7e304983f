//! Error types for the control plane

use ctrlplane_lock::LockError;
use ctrlplane_policy::RuleError;
use ctrlplane_release::ReleaseError;
use ctrlplane_store::StoreError;
use ctrlplane_targets::ResolverError;
use ctrlplane_types::{JobId, ReleaseTargetId};
use thiserror::Error;

/// Control plane error type
#[derive(Debug, Error)]
pub enum ControlPlaneError {
    /// Storage error
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),

    /// Lock backend error
    #[error("Lock error: {0}")]
    Lock(#[from] LockError),

    /// Release manager error
    #[error("Release error: {0}")]
    Release(#[from] ReleaseError),

    /// Target resolver error
    #[error("Resolver error: {0}")]
    Resolver(#[from] ResolverError),

    /// Policy rejected at write time
    #[error("Invalid policy: {0}")]
    InvalidPolicy(#[from] RuleError),

    /// Entity not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Builder is missing a required dependency
    #[error("Not initialized: {0}")]
    NotInitialized(&'static str),
}

/// Result type for control plane operations
pub type Result<T> = std::result::Result<T, ControlPlaneError>;

impl ControlPlaneError {
    pub fn target_not_found(target_id: &ReleaseTargetId) -> Self {
        Self::NotFound(format!("Release target {}", target_id))
    }

    pub fn job_not_found(job_id: &JobId) -> Self {
        Self::NotFound(format!("Job {}", job_id))
    }

    /// Whether re-enqueuing the unit of work may succeed
    pub fn is_transient(&self) -> bool {
        match self {
            ControlPlaneError::Store(e) => e.is_transient(),
            ControlPlaneError::Lock(LockError::Timeout { .. }) => true,
            ControlPlaneError::Lock(LockError::Backend(_)) => true,
            ControlPlaneError::Release(e) => e.is_transient(),
            ControlPlaneError::Resolver(ResolverError::Store(e)) => e.is_transient(),
            ControlPlaneError::Resolver(ResolverError::Lock(_)) => true,
            _ => false,
        }
    }
}

//! Daemon errors

use ctrlplane_control::ControlPlaneError;
use ctrlplane_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DaemonError {
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] StoreError),

    #[error("control plane error: {0}")]
    ControlPlane(#[from] ControlPlaneError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("worker task failed: {0}")]
    Worker(String),
}

pub type DaemonResult<T> = Result<T, DaemonError>;

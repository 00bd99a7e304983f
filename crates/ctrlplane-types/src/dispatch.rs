//! Job dispatcher collaborator interface
//!
//! The engine never executes deployments. It hands jobs to a dispatcher and
//! learns about their progress through `job.updated` control events.

use crate::decision::EvaluationDecision;
use crate::job::Job;
use crate::release::{Release, ReleaseTarget};
use async_trait::async_trait;
use thiserror::Error;

/// Acknowledgement from the job agent
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DispatchReceipt {
    pub external_run_id: Option<String>,
}

#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DispatchError {
    /// The agent could not be reached or refused the job
    #[error("agent unavailable: {0}")]
    Unavailable(String),

    /// The agent accepted the call but has no record of the run
    #[error("external run not found: {0}")]
    RunNotFound(String),

    #[error("dispatch rejected: {0}")]
    Rejected(String),
}

/// Outbound side of the engine
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    /// Hand a job to its agent
    async fn dispatch(
        &self,
        target: &ReleaseTarget,
        release: &Release,
        job: &Job,
    ) -> Result<DispatchReceipt, DispatchError>;

    /// Called exactly once per deleted release target
    async fn target_removed(&self, target: &ReleaseTarget);

    /// Called for every evaluation pass
    async fn decision_recorded(&self, target: &ReleaseTarget, decision: &EvaluationDecision);
}

//! Default job dispatcher

use async_trait::async_trait;
use ctrlplane_types::{
    DispatchError, DispatchReceipt, EvaluationDecision, Job, JobDispatcher, Release,
    ReleaseTarget,
};
use tracing::{debug, info};

/// Dispatcher that only logs
///
/// Used when no job agent integration is wired in. Jobs stay `pending`
/// until a `job.updated` event moves them along.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingDispatcher;

#[async_trait]
impl JobDispatcher for LoggingDispatcher {
    async fn dispatch(
        &self,
        target: &ReleaseTarget,
        release: &Release,
        job: &Job,
    ) -> Result<DispatchReceipt, DispatchError> {
        info!(
            job_id = %job.id,
            target_id = %target.id,
            release_id = %release.id,
            version_id = %release.version_id,
            "Job dispatched"
        );
        Ok(DispatchReceipt::default())
    }

    async fn target_removed(&self, target: &ReleaseTarget) {
        info!(target_id = %target.id, key = %target.key(), "Release target removed");
    }

    async fn decision_recorded(&self, target: &ReleaseTarget, decision: &EvaluationDecision) {
        debug!(
            target_id = %target.id,
            decision_id = %decision.id,
            allowed = decision.allowed,
            reason = decision.reason.as_deref().unwrap_or_default(),
            rules = decision.records.len(),
            "Decision recorded"
        );
    }
}

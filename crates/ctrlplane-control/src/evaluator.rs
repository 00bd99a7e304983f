//! Per-target evaluation
//!
//! One pass: take an evaluation permit for the system and the target's
//! mutex, snapshot approvals and job history, run the policy engine, write
//! the release and the desired pointer, then create and dispatch a job when
//! the desired release changed.

use crate::error::Result;
use crate::events::EventAggregator;
use chrono::Utc;
use ctrlplane_lock::{MutexGuard, SystemCoordinator, TargetLocks};
use ctrlplane_policy::{EvaluationRequest, EvaluationSnapshot, PolicyEngine};
use ctrlplane_release::ReleaseManager;
use ctrlplane_store::Store;
use ctrlplane_types::{
    Deployment, DeploymentVersion, DispatchError, EngineEvent, EvaluationDecision, EventSource,
    Job, JobDispatcher, JobStatus, Policy, Release, ReleaseTarget, ReleaseTargetId, RuleConfig,
    VersionId,
};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of one evaluation attempt
#[derive(Debug, Clone)]
pub enum EvaluationOutcome {
    Completed(EvaluationReport),

    /// A lock was unavailable; run again later
    Requeue(String),

    /// The target or one of its entities no longer exists
    Skipped(String),
}

/// What a completed pass decided and wrote
#[derive(Debug, Clone)]
pub struct EvaluationReport {
    pub decision: EvaluationDecision,

    /// Release the chosen version resolved to
    pub release: Option<Release>,

    /// Whether the desired pointer moved
    pub desired_changed: bool,

    pub job: Option<Job>,
}

impl EvaluationReport {
    fn denied(decision: EvaluationDecision) -> Self {
        Self {
            decision,
            release: None,
            desired_changed: false,
            job: None,
        }
    }
}

#[derive(Clone)]
pub struct Evaluator {
    store: Arc<dyn Store>,
    engine: PolicyEngine,
    releases: ReleaseManager,
    coordinator: SystemCoordinator,
    target_locks: TargetLocks,
    dispatcher: Arc<dyn JobDispatcher>,
    events: EventAggregator,
}

impl Evaluator {
    pub fn new(
        store: Arc<dyn Store>,
        releases: ReleaseManager,
        coordinator: SystemCoordinator,
        target_locks: TargetLocks,
        dispatcher: Arc<dyn JobDispatcher>,
        events: EventAggregator,
    ) -> Self {
        Self {
            store,
            engine: PolicyEngine::new(),
            releases,
            coordinator,
            target_locks,
            dispatcher,
            events,
        }
    }

    pub fn releases(&self) -> &ReleaseManager {
        &self.releases
    }

    /// Evaluate one target
    ///
    /// `force` dispatches a job even when the desired release is unchanged,
    /// which is how a redeploy is requested.
    pub async fn evaluate(
        &self,
        target_id: &ReleaseTargetId,
        desired_version_id: Option<VersionId>,
        force: bool,
    ) -> Result<EvaluationOutcome> {
        let Some(target) = self.store.get_release_target(target_id).await? else {
            debug!(target_id = %target_id, "Release target gone, skipping evaluation");
            return Ok(EvaluationOutcome::Skipped(format!("{} not found", target_id)));
        };
        let Some(deployment) = self.store.get_deployment(&target.deployment_id).await? else {
            return Ok(EvaluationOutcome::Skipped(format!(
                "{} not found",
                target.deployment_id
            )));
        };

        let Some(permit) = self
            .coordinator
            .try_begin_evaluation(&deployment.system_id)
            .await?
        else {
            return Ok(EvaluationOutcome::Requeue(format!(
                "system {} is busy",
                deployment.system_id
            )));
        };

        let mutex = self.target_locks.mutex(target_id);
        let guard = match mutex.try_lock().await {
            Ok(Some(guard)) => guard,
            Ok(None) => {
                release_permit(permit).await;
                return Ok(EvaluationOutcome::Requeue(format!("{} is locked", target_id)));
            }
            Err(e) => {
                release_permit(permit).await;
                return Err(e.into());
            }
        };

        let result = self
            .evaluate_locked(&guard, target_id, &deployment, desired_version_id, force)
            .await;

        if let Err(e) = guard.release().await {
            warn!(target_id = %target_id, error = %e, "Failed to release target lock");
        }
        release_permit(permit).await;
        result
    }

    async fn evaluate_locked(
        &self,
        guard: &MutexGuard,
        target_id: &ReleaseTargetId,
        deployment: &Deployment,
        desired_version_id: Option<VersionId>,
        force: bool,
    ) -> Result<EvaluationOutcome> {
        // Re-read under the lock; a concurrent replace may have removed it.
        let Some(target) = self.store.get_release_target(target_id).await? else {
            return Ok(EvaluationOutcome::Skipped(format!("{} not found", target_id)));
        };
        let resource = match self.store.get_resource(&target.resource_id).await? {
            Some(resource) if !resource.is_deleted() => resource,
            _ => {
                return Ok(EvaluationOutcome::Skipped(format!(
                    "{} not found",
                    target.resource_id
                )))
            }
        };
        let Some(environment) = self.store.get_environment(&target.environment_id).await? else {
            return Ok(EvaluationOutcome::Skipped(format!(
                "{} not found",
                target.environment_id
            )));
        };

        let policies = self.store.list_policies(&resource.workspace_id).await?;
        let candidates = self.releases.candidate_versions(&target).await?;
        let snapshot = self.snapshot(&target, &candidates, &policies).await?;

        let decision = self.engine.evaluate(
            EvaluationRequest {
                resource: &resource,
                environment: &environment,
                deployment,
                policies: &policies,
                candidates,
                desired_version_id,
            },
            &snapshot,
        );

        self.dispatcher.decision_recorded(&target, &decision).await;
        self.events.emit(
            EventSource::Policy,
            EngineEvent::DecisionRecorded {
                target_id: target.id,
                allowed: decision.allowed,
                reason: decision.reason.clone(),
            },
        );

        let Some(version_id) = decision.chosen_version_id.filter(|_| decision.allowed) else {
            debug!(
                target_id = %target.id,
                reason = decision.reason.as_deref().unwrap_or_default(),
                "Release denied"
            );
            return Ok(EvaluationOutcome::Completed(EvaluationReport::denied(decision)));
        };

        let variables = self.releases.resolve_variables(&target).await?;
        if let Some(lost) = lock_lost(guard, target_id).await? {
            return Ok(lost);
        }
        let ensured = self.releases.ensure_release(&target, version_id, variables).await?;
        let release = ensured.release;
        if ensured.created {
            self.events.emit(
                EventSource::Release,
                EngineEvent::ReleaseCreated {
                    target_id: target.id,
                    release_id: release.id,
                    version_id,
                },
            );
        }

        if let Some(lost) = lock_lost(guard, target_id).await? {
            return Ok(lost);
        }
        let desired_changed = self
            .releases
            .set_desired_release(&target.id, &release.id)
            .await?;
        if desired_changed {
            info!(
                target_id = %target.id,
                release_id = %release.id,
                version_id = %version_id,
                "Desired release changed"
            );
            self.events.emit(
                EventSource::Release,
                EngineEvent::DesiredReleaseChanged {
                    target_id: target.id,
                    release_id: release.id,
                },
            );
        }

        let job = if desired_changed || force {
            if let Some(lost) = lock_lost(guard, target_id).await? {
                return Ok(lost);
            }
            Some(self.create_job(&target, deployment, &release).await?)
        } else {
            None
        };

        Ok(EvaluationOutcome::Completed(EvaluationReport {
            decision,
            release: Some(release),
            desired_changed,
            job,
        }))
    }

    /// Read approvals and job history once for the whole pass
    async fn snapshot(
        &self,
        target: &ReleaseTarget,
        candidates: &[DeploymentVersion],
        policies: &[Policy],
    ) -> Result<EvaluationSnapshot> {
        let mut snapshot = EvaluationSnapshot::new(target.clone(), Utc::now());
        let version_ids: Vec<VersionId> = candidates.iter().map(|v| v.id).collect();

        for record in self
            .store
            .list_approvals(&target.environment_id, &version_ids)
            .await?
        {
            snapshot.add_approval(record);
        }

        let needs_history = policies
            .iter()
            .filter(|p| p.enabled)
            .flat_map(|p| p.rules.iter())
            .any(|r| matches!(r, RuleConfig::Cooldown { .. }));
        if needs_history {
            for version_id in &version_ids {
                let last = self
                    .store
                    .last_successful_job(&target.resource_id, version_id)
                    .await?;
                if let Some(completed_at) = last.and_then(|job| job.completed_at) {
                    snapshot = snapshot.with_last_success(*version_id, completed_at);
                }
            }
        }

        let for_deployment = self
            .store
            .list_in_progress_jobs_for_deployment(&target.deployment_id)
            .await?
            .len();
        let for_resource = self
            .store
            .list_in_progress_jobs_for_resource(&target.resource_id)
            .await?
            .len();
        let non_terminal = self
            .store
            .list_non_terminal_jobs(&target.environment_id, &target.deployment_id)
            .await?
            .len();

        Ok(snapshot
            .with_in_progress(for_deployment, for_resource)
            .with_non_terminal_jobs(non_terminal))
    }

    /// Create the job for a release and hand it to the dispatcher
    ///
    /// Dispatch failures are recorded on the job and never fail the pass.
    async fn create_job(
        &self,
        target: &ReleaseTarget,
        deployment: &Deployment,
        release: &Release,
    ) -> Result<Job> {
        let agent = match deployment.job_agent_id {
            Some(id) => self.store.get_job_agent(&id).await?,
            None => None,
        };

        let mut job = Job::new(
            target,
            release,
            agent.as_ref().map(|a| a.id),
            deployment.job_agent_config.clone(),
        );

        if agent.is_none() {
            job.transition(JobStatus::InvalidJobAgent, Utc::now());
            job.message = Some(format!(
                "No job agent configured for deployment '{}'",
                deployment.slug
            ));
            warn!(
                target_id = %target.id,
                deployment = %deployment.slug,
                "No job agent; job marked invalid"
            );
            self.store.insert_job(job.clone()).await?;
        } else {
            self.store.insert_job(job.clone()).await?;
            match self.dispatcher.dispatch(target, release, &job).await {
                Ok(receipt) => {
                    if receipt.external_run_id.is_some() {
                        job.external_run_id = receipt.external_run_id;
                        job.updated_at = Utc::now();
                        self.store.update_job(job.clone()).await?;
                    }
                }
                Err(e) => {
                    let status = match e {
                        DispatchError::RunNotFound(_) => JobStatus::ExternalRunNotFound,
                        DispatchError::Unavailable(_) | DispatchError::Rejected(_) => {
                            JobStatus::Failure
                        }
                    };
                    warn!(job_id = %job.id, status = %status, error = %e, "Dispatch failed");
                    job.transition(status, Utc::now());
                    job.message = Some(e.to_string());
                    self.store.update_job(job.clone()).await?;
                }
            }
        }

        self.events.emit(
            EventSource::Jobs,
            EngineEvent::JobCreated {
                job_id: job.id,
                target_id: target.id,
                status: job.status,
            },
        );
        Ok(job)
    }
}

/// `Requeue` when the target lock expired since it was taken
///
/// Checked before every write of a pass.
async fn lock_lost(
    guard: &MutexGuard,
    target_id: &ReleaseTargetId,
) -> Result<Option<EvaluationOutcome>> {
    if guard.is_held().await? {
        return Ok(None);
    }
    warn!(target_id = %target_id, "Target lock lost mid-evaluation, discarding result");
    Ok(Some(EvaluationOutcome::Requeue(format!(
        "lock on {} was lost",
        target_id
    ))))
}

async fn release_permit(permit: ctrlplane_lock::EvaluationPermit) {
    if let Err(e) = permit.release().await {
        warn!(error = %e, "Failed to release evaluation permit");
    }
}

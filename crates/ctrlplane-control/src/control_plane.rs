//! Control plane facade
//!
//! Turns inbound [`ControlEvent`]s into queued work and runs that work: target
//! recomputation through the resolver, evaluation through the evaluator.
//! Every unit of work re-reads current state from the store, so replaying
//! an item is harmless.

use crate::config::EngineConfig;
use crate::error::{ControlPlaneError, Result};
use crate::evaluator::{EvaluationOutcome, EvaluationReport, Evaluator};
use crate::events::EventAggregator;
use crate::queue::{QueuedWork, WorkItem, WorkQueue};
use crate::trace::traced;
use chrono::Utc;
use ctrlplane_policy::validate_policy;
use ctrlplane_release::ReleaseManager;
use ctrlplane_store::{Store, TargetDiff};
use ctrlplane_targets::{ReleaseTargetResolver, ReplaceOutcome};
use ctrlplane_types::{
    ControlEvent, EngineEvent, EngineEventEnvelope, EventSource, Job, JobId, JobStatus, Policy,
    ReleaseTargetId,
};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tracing::{debug, error, info, warn};

/// What happened to one unit of work
#[derive(Debug, Clone)]
pub enum WorkOutcome {
    /// Work done; follow-up items may have been queued
    Completed,

    /// An evaluation pass finished
    Evaluated(Box<EvaluationReport>),

    /// Put back on the queue with backoff
    Requeued(String),

    /// Subject no longer exists
    Skipped(String),
}

/// Unified entry point for the release engine
pub struct ControlPlane {
    config: EngineConfig,
    store: Arc<dyn Store>,
    queue: Arc<dyn WorkQueue>,
    resolver: ReleaseTargetResolver,
    evaluator: Evaluator,
    events: EventAggregator,
}

impl ControlPlane {
    pub(crate) fn new(
        config: EngineConfig,
        store: Arc<dyn Store>,
        queue: Arc<dyn WorkQueue>,
        resolver: ReleaseTargetResolver,
        evaluator: Evaluator,
        events: EventAggregator,
    ) -> Self {
        Self {
            config,
            store,
            queue,
            resolver,
            evaluator,
            events,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn Store> {
        &self.store
    }

    pub fn queue(&self) -> &Arc<dyn WorkQueue> {
        &self.queue
    }

    pub fn releases(&self) -> &ReleaseManager {
        self.evaluator.releases()
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<EngineEventEnvelope> {
        self.events.subscribe()
    }

    // ========== Inbound events ==========

    /// Accept a change notification
    ///
    /// Job updates are applied right away; everything else becomes queued
    /// work.
    pub async fn ingest(&self, event: ControlEvent) -> Result<()> {
        debug!(event = event.name(), "Control event received");
        let item = match event {
            ControlEvent::ResourceUpserted { resource_id }
            | ControlEvent::ResourceDeleted { resource_id } => {
                WorkItem::ReplaceForResource(resource_id)
            }
            ControlEvent::EnvironmentChanged { environment_id } => {
                WorkItem::ReplaceForEnvironment(environment_id)
            }
            ControlEvent::DeploymentChanged { deployment_id } => {
                WorkItem::ReplaceForDeployment(deployment_id)
            }
            ControlEvent::PolicyChanged { policy_id } => WorkItem::ReplaceForPolicy(policy_id),
            ControlEvent::VersionPublished { version_id } => WorkItem::VersionPublished(version_id),
            ControlEvent::RedeployRequested {
                target_id,
                desired_version_id,
            } => WorkItem::Evaluate {
                target_id,
                desired_version_id,
                force: true,
            },
            ControlEvent::JobUpdated {
                job_id,
                status,
                external_run_id,
                message,
            } => {
                traced(
                    "job_updated",
                    self.update_job(&job_id, status, external_run_id, message),
                )
                .await?;
                return Ok(());
            }
        };
        self.queue.enqueue(item).await;
        Ok(())
    }

    /// Validate and store a policy, then recompute what it governs
    ///
    /// A policy with an unusable selector or rule config is rejected before
    /// it reaches the store.
    pub async fn upsert_policy(&self, policy: Policy) -> Result<()> {
        if let Err(e) = validate_policy(&policy) {
            warn!(policy_id = %policy.id, error = %e, "Policy rejected");
            return Err(e.into());
        }
        let policy_id = policy.id;
        self.store.upsert_policy(policy).await?;
        self.ingest(ControlEvent::PolicyChanged { policy_id }).await
    }

    /// Apply a job agent callback
    ///
    /// Returns `None` for an unknown job. Updates to a job that already
    /// reached a terminal status are ignored. When a job finishes, every
    /// target of its environment + deployment is re-evaluated.
    pub async fn update_job(
        &self,
        job_id: &JobId,
        status: JobStatus,
        external_run_id: Option<String>,
        message: Option<String>,
    ) -> Result<Option<Job>> {
        let Some(mut job) = self.store.get_job(job_id).await? else {
            warn!(job_id = %job_id, "Update for unknown job");
            return Ok(None);
        };
        if job.status.is_terminal() {
            debug!(
                job_id = %job_id,
                current = %job.status,
                ignored = %status,
                "Job already finished"
            );
            return Ok(Some(job));
        }

        job.transition(status, Utc::now());
        if external_run_id.is_some() {
            job.external_run_id = external_run_id;
        }
        if message.is_some() {
            job.message = message;
        }
        self.store.update_job(job.clone()).await?;
        info!(job_id = %job.id, status = %job.status, "Job updated");
        self.events.emit(
            EventSource::Jobs,
            EngineEvent::JobUpdated {
                job_id: job.id,
                status: job.status,
            },
        );

        if job.status.is_terminal() {
            for target in self
                .store
                .list_targets_for_pair(&job.environment_id, &job.deployment_id)
                .await?
            {
                self.queue.enqueue(WorkItem::evaluate(target.id)).await;
            }
        }
        Ok(Some(job))
    }

    // ========== Work processing ==========

    /// Run one dequeued unit of work
    ///
    /// Lock contention and transient store failures put the work back on
    /// the queue with backoff; a missing subject is logged and skipped.
    pub async fn process(&self, work: QueuedWork) -> Result<WorkOutcome> {
        let result = traced(work.item.kind(), self.run(&work.item)).await;
        let outcome = match result {
            Ok(WorkOutcome::Requeued(reason)) => {
                debug!(
                    work = %work.item,
                    attempt = work.attempt,
                    reason = %reason,
                    "Requeueing work"
                );
                self.queue.requeue(work).await;
                WorkOutcome::Requeued(reason)
            }
            Ok(outcome) => outcome,
            Err(e) if e.is_transient() => {
                warn!(
                    work = %work.item,
                    attempt = work.attempt,
                    error = %e,
                    "Transient failure, requeueing"
                );
                let reason = e.to_string();
                self.queue.requeue(work).await;
                WorkOutcome::Requeued(reason)
            }
            Err(ControlPlaneError::NotFound(what)) => {
                warn!(work = %work.item, missing = %what, "Skipping work");
                WorkOutcome::Skipped(what)
            }
            Err(e) => {
                error!(work = %work.item, error = %e, "Work failed");
                return Err(e);
            }
        };
        Ok(outcome)
    }

    /// Process one ready item, if any
    pub async fn run_once(&self) -> Result<Option<WorkOutcome>> {
        match self.queue.try_dequeue().await {
            Some(work) => self.process(work).await.map(Some),
            None => Ok(None),
        }
    }

    /// Process ready items until none are left; returns how many ran
    ///
    /// Delayed (requeued) items that are not yet due stay queued.
    pub async fn drain(&self) -> Result<usize> {
        let mut processed = 0;
        while self.run_once().await?.is_some() {
            processed += 1;
        }
        Ok(processed)
    }

    /// Worker loop; returns once `shutdown` flips to `true`
    pub async fn run_worker(&self, worker_id: usize, mut shutdown: watch::Receiver<bool>) {
        debug!(worker_id, "Worker started");
        loop {
            if *shutdown.borrow() {
                break;
            }
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() {
                        break;
                    }
                }
                work = self.queue.dequeue() => {
                    if let Err(e) = self.process(work).await {
                        error!(worker_id, error = %e, "Unit of work failed");
                    }
                }
            }
        }
        debug!(worker_id, "Worker stopped");
    }

    async fn run(&self, item: &WorkItem) -> Result<WorkOutcome> {
        match item {
            WorkItem::ReplaceForResource(id) => {
                let outcome = self.resolver.replace_for_resource(id).await?;
                self.after_replace(outcome, item).await
            }
            WorkItem::ReplaceForDeployment(id) => {
                let outcome = self.resolver.replace_for_deployment(id).await?;
                self.after_replace(outcome, item).await
            }
            WorkItem::ReplaceForEnvironment(id) => {
                let outcome = self.resolver.replace_for_environment(id).await?;
                self.after_replace(outcome, item).await
            }
            WorkItem::ReplaceForPolicy(id) => match self.resolver.replace_for_policy(id).await? {
                ReplaceOutcome::Applied(diff) => {
                    self.enqueue_evaluations(diff.affected()).await;
                    Ok(WorkOutcome::Completed)
                }
                ReplaceOutcome::Requeue(reason) => Ok(WorkOutcome::Requeued(reason)),
            },
            WorkItem::VersionPublished(id) => {
                let Some(version) = self.store.get_version(id).await? else {
                    return Ok(WorkOutcome::Skipped(format!("{} not found", id)));
                };
                let targets = self
                    .store
                    .list_targets_for_deployment(&version.deployment_id)
                    .await?;
                self.enqueue_evaluations(targets.iter().map(|t| &t.id)).await;
                Ok(WorkOutcome::Completed)
            }
            WorkItem::Evaluate {
                target_id,
                desired_version_id,
                force,
            } => {
                let outcome = self
                    .evaluator
                    .evaluate(target_id, *desired_version_id, *force)
                    .await?;
                Ok(match outcome {
                    EvaluationOutcome::Completed(report) => {
                        WorkOutcome::Evaluated(Box::new(report))
                    }
                    EvaluationOutcome::Requeue(reason) => WorkOutcome::Requeued(reason),
                    EvaluationOutcome::Skipped(reason) => WorkOutcome::Skipped(reason),
                })
            }
        }
    }

    /// Publish target changes and queue evaluation of every surviving target
    async fn after_replace(
        &self,
        outcome: ReplaceOutcome<TargetDiff>,
        item: &WorkItem,
    ) -> Result<WorkOutcome> {
        let diff = match outcome {
            ReplaceOutcome::Applied(diff) => diff,
            ReplaceOutcome::Requeue(reason) => return Ok(WorkOutcome::Requeued(reason)),
        };

        let correlation = item.to_string();
        for target in &diff.inserted {
            self.events.emit_correlated(
                EventSource::Targets,
                EngineEvent::TargetCreated {
                    target_id: target.id,
                    key: target.key(),
                },
                &correlation,
            );
        }
        for target in &diff.removed {
            self.events.emit_correlated(
                EventSource::Targets,
                EngineEvent::TargetRemoved {
                    target_id: target.id,
                    key: target.key(),
                },
                &correlation,
            );
        }

        self.enqueue_evaluations(diff.inserted.iter().chain(diff.unchanged.iter()).map(|t| &t.id))
            .await;
        Ok(WorkOutcome::Completed)
    }

    async fn enqueue_evaluations<'a>(&self, targets: impl Iterator<Item = &'a ReleaseTargetId>) {
        for target_id in targets {
            self.queue.enqueue(WorkItem::evaluate(*target_id)).await;
        }
    }
}

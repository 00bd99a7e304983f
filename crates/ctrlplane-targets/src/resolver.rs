//! Release target resolver
//!
//! Recomputes which (resource, environment, deployment) triples should exist
//! after a resource, environment or deployment changes, and which targets a
//! policy governs after it changes. Each call is one atomic store operation
//! scoped to its subject. Anything that would block (a locked target, a busy
//! system, a row held by another transaction) turns the call into
//! [`ReplaceOutcome::Requeue`] instead of waiting.

use crate::error::{ResolverError, Result};
use ctrlplane_lock::{MutexGuard, SystemCoordinator, TargetLocks};
use ctrlplane_store::{PolicyTargetDiff, Store, StoreError, TargetDiff};
use ctrlplane_types::{
    Deployment, DeploymentId, Environment, EnvironmentId, JobDispatcher, PolicyId, ReleaseTarget,
    ReleaseTargetKey, Resource, ResourceId, SystemId,
};
use futures::future::try_join_all;
use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a replace call
#[derive(Debug, Clone, PartialEq)]
pub enum ReplaceOutcome<T> {
    /// The new set was written
    Applied(T),

    /// Nothing was written; retry the whole call later
    Requeue(String),
}

impl<T> ReplaceOutcome<T> {
    pub fn is_requeue(&self) -> bool {
        matches!(self, ReplaceOutcome::Requeue(_))
    }

    pub fn applied(self) -> Option<T> {
        match self {
            ReplaceOutcome::Applied(value) => Some(value),
            ReplaceOutcome::Requeue(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Subject {
    Resource(ResourceId),
    Deployment(DeploymentId),
    Environment(EnvironmentId),
}

/// Keeps the release target table in line with selectors
#[derive(Clone)]
pub struct ReleaseTargetResolver {
    store: Arc<dyn Store>,
    target_locks: TargetLocks,
    coordinator: SystemCoordinator,
    dispatcher: Arc<dyn JobDispatcher>,
}

impl std::fmt::Debug for ReleaseTargetResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ReleaseTargetResolver").finish_non_exhaustive()
    }
}

impl ReleaseTargetResolver {
    pub fn new(
        store: Arc<dyn Store>,
        target_locks: TargetLocks,
        coordinator: SystemCoordinator,
        dispatcher: Arc<dyn JobDispatcher>,
    ) -> Self {
        Self {
            store,
            target_locks,
            coordinator,
            dispatcher,
        }
    }

    /// Recompute the targets of one resource
    ///
    /// A missing or soft-deleted resource matches nothing, so all of its
    /// targets are removed.
    pub async fn replace_for_resource(
        &self,
        resource_id: &ResourceId,
    ) -> Result<ReplaceOutcome<TargetDiff>> {
        let desired = match self.store.get_resource(resource_id).await? {
            Some(resource) if !resource.is_deleted() => self.desired_for_resource(&resource).await?,
            _ => Vec::new(),
        };
        let current = self.store.list_targets_for_resource(resource_id).await?;
        self.apply(Subject::Resource(*resource_id), current, desired)
            .await
    }

    /// Recompute the targets of one deployment across the workspace
    pub async fn replace_for_deployment(
        &self,
        deployment_id: &DeploymentId,
    ) -> Result<ReplaceOutcome<TargetDiff>> {
        let Some(deployment) = self.store.get_deployment(deployment_id).await? else {
            let current = self.store.list_targets_for_deployment(deployment_id).await?;
            return self.apply(Subject::Deployment(*deployment_id), current, Vec::new()).await;
        };

        let Some(_computation) = self.begin_computation(&deployment.system_id).await? else {
            return Ok(ReplaceOutcome::Requeue(format!(
                "system {} is busy",
                deployment.system_id
            )));
        };

        let environments = self.store.list_environments(&deployment.system_id).await?;
        let resources = self.system_resources(&deployment.system_id).await?;
        let desired = pairings(&resources, &environments, std::slice::from_ref(&deployment));

        let current = self.store.list_targets_for_deployment(deployment_id).await?;
        self.apply(Subject::Deployment(*deployment_id), current, desired)
            .await
    }

    /// Recompute the targets of one environment across the workspace
    pub async fn replace_for_environment(
        &self,
        environment_id: &EnvironmentId,
    ) -> Result<ReplaceOutcome<TargetDiff>> {
        let Some(environment) = self.store.get_environment(environment_id).await? else {
            let current = self.store.list_targets_for_environment(environment_id).await?;
            return self.apply(Subject::Environment(*environment_id), current, Vec::new()).await;
        };

        let Some(_computation) = self.begin_computation(&environment.system_id).await? else {
            return Ok(ReplaceOutcome::Requeue(format!(
                "system {} is busy",
                environment.system_id
            )));
        };

        let deployments = self.store.list_deployments(&environment.system_id).await?;
        let resources = self.system_resources(&environment.system_id).await?;
        let desired = pairings(&resources, std::slice::from_ref(&environment), &deployments);

        let current = self.store.list_targets_for_environment(environment_id).await?;
        self.apply(Subject::Environment(*environment_id), current, desired)
            .await
    }

    /// Recompute the set of targets a policy governs
    ///
    /// Returns the targets that entered, left and stayed in the set; all of
    /// them need re-evaluation since the rules may have changed. A missing or
    /// disabled policy governs nothing.
    pub async fn replace_for_policy(
        &self,
        policy_id: &PolicyId,
    ) -> Result<ReplaceOutcome<PolicyTargetDiff>> {
        let governed = match self.store.get_policy(policy_id).await? {
            Some(policy) if policy.enabled => {
                let targets = self
                    .store
                    .list_targets_for_workspace(&policy.workspace_id)
                    .await?;
                let mut cache = EntityCache::default();
                let mut governed = Vec::new();
                for target in targets {
                    let Some((resource, environment, deployment)) =
                        cache.load(self.store.as_ref(), &target).await?
                    else {
                        continue;
                    };
                    if policy.governs(&resource, &environment, &deployment) {
                        governed.push(target.id);
                    }
                }
                governed
            }
            _ => Vec::new(),
        };

        match self.store.replace_policy_targets(policy_id, governed).await {
            Ok(diff) => {
                debug!(
                    policy_id = %policy_id,
                    added = diff.added.len(),
                    removed = diff.removed.len(),
                    "Policy targets replaced"
                );
                Ok(ReplaceOutcome::Applied(diff))
            }
            Err(StoreError::LockContention(reason)) => Ok(ReplaceOutcome::Requeue(reason)),
            Err(e) => Err(e.into()),
        }
    }

    /// Desired keys for one resource across every system of its workspace
    async fn desired_for_resource(&self, resource: &Resource) -> Result<Vec<ReleaseTargetKey>> {
        let mut desired = Vec::new();
        for system in self.store.list_systems(&resource.workspace_id).await? {
            let environments = self.store.list_environments(&system.id).await?;
            let deployments = self.store.list_deployments(&system.id).await?;
            desired.extend(pairings(
                std::slice::from_ref(resource),
                &environments,
                &deployments,
            ));
        }
        Ok(desired)
    }

    async fn system_resources(&self, system_id: &SystemId) -> Result<Vec<Resource>> {
        match self.store.get_system(system_id).await? {
            Some(system) => Ok(self.store.list_active_resources(&system.workspace_id).await?),
            None => Ok(Vec::new()),
        }
    }

    async fn begin_computation(&self, system_id: &SystemId) -> Result<Option<MutexGuard>> {
        Ok(self.coordinator.try_begin_computation(system_id).await?)
    }

    async fn apply(
        &self,
        subject: Subject,
        current: Vec<ReleaseTarget>,
        desired: Vec<ReleaseTargetKey>,
    ) -> Result<ReplaceOutcome<TargetDiff>> {
        let keep: BTreeSet<ReleaseTargetKey> = desired.iter().copied().collect();
        let leaving: Vec<&ReleaseTarget> = current
            .iter()
            .filter(|t| !keep.contains(&t.key()))
            .collect();

        // Targets about to be deleted must not be mid-evaluation.
        let mutexes: Vec<_> = leaving
            .iter()
            .map(|t| self.target_locks.mutex(&t.id))
            .collect();
        let guards = try_join_all(mutexes.iter().map(|m| m.try_lock())).await?;
        if guards.iter().any(Option::is_none) {
            release_all(guards.into_iter().flatten().collect()).await;
            return Ok(ReplaceOutcome::Requeue(
                "a release target being removed is locked".to_string(),
            ));
        }
        let guards: Vec<MutexGuard> = guards.into_iter().flatten().collect();

        let result = match subject {
            Subject::Resource(id) => self.store.replace_targets_for_resource(&id, desired).await,
            Subject::Deployment(id) => {
                self.store.replace_targets_for_deployment(&id, desired).await
            }
            Subject::Environment(id) => {
                self.store.replace_targets_for_environment(&id, desired).await
            }
        };
        release_all(guards).await;

        let diff = match result {
            Ok(diff) => diff,
            Err(StoreError::LockContention(reason)) => {
                debug!(subject = ?subject, reason = %reason, "Row lock contention, requeueing");
                return Ok(ReplaceOutcome::Requeue(reason));
            }
            Err(e) => return Err(ResolverError::Store(e)),
        };

        for removed in &diff.removed {
            self.dispatcher.target_removed(removed).await;
        }

        if !diff.is_empty() {
            info!(
                subject = ?subject,
                inserted = diff.inserted.len(),
                removed = diff.removed.len(),
                "Release targets replaced"
            );
        }
        Ok(ReplaceOutcome::Applied(diff))
    }
}

/// Every (resource, environment, deployment) whose selectors line up
///
/// Environments and deployments must belong to the same system; callers
/// only pass entities of one system at a time.
pub fn pairings(
    resources: &[Resource],
    environments: &[Environment],
    deployments: &[Deployment],
) -> Vec<ReleaseTargetKey> {
    let mut keys = Vec::new();
    for resource in resources {
        for environment in environments.iter().filter(|e| e.matches_resource(resource)) {
            for deployment in deployments
                .iter()
                .filter(|d| d.system_id == environment.system_id && d.matches_resource(resource))
            {
                keys.push(ReleaseTargetKey::new(resource.id, environment.id, deployment.id));
            }
        }
    }
    keys
}

async fn release_all(guards: Vec<MutexGuard>) {
    for guard in guards {
        let key = guard.key().to_string();
        if let Err(e) = guard.release().await {
            warn!(key = %key, error = %e, "Failed to release target lock");
        }
    }
}

/// Per-call cache so a policy recompute loads each entity once
#[derive(Default)]
struct EntityCache {
    resources: HashMap<ResourceId, Option<Resource>>,
    environments: HashMap<EnvironmentId, Option<Environment>>,
    deployments: HashMap<DeploymentId, Option<Deployment>>,
}

impl EntityCache {
    async fn load(
        &mut self,
        store: &dyn Store,
        target: &ReleaseTarget,
    ) -> Result<Option<(Resource, Environment, Deployment)>> {
        if !self.resources.contains_key(&target.resource_id) {
            let loaded = store.get_resource(&target.resource_id).await?;
            self.resources.insert(target.resource_id, loaded);
        }
        if !self.environments.contains_key(&target.environment_id) {
            let loaded = store.get_environment(&target.environment_id).await?;
            self.environments.insert(target.environment_id, loaded);
        }
        if !self.deployments.contains_key(&target.deployment_id) {
            let loaded = store.get_deployment(&target.deployment_id).await?;
            self.deployments.insert(target.deployment_id, loaded);
        }

        let resource = self.resources.get(&target.resource_id).cloned().flatten();
        let environment = self.environments.get(&target.environment_id).cloned().flatten();
        let deployment = self.deployments.get(&target.deployment_id).cloned().flatten();
        Ok(match (resource, environment, deployment) {
            (Some(r), Some(e), Some(d)) => Some((r, e, d)),
            _ => None,
        })
    }
}

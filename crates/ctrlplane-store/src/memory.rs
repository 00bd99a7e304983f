//! In-memory storage implementation
//!
//! Row locks are simulated: tests can hold a row lock through
//! [`InMemoryStore::hold_row_lock`] to make scoped writes fail with
//! `LockContention`, the way `FOR UPDATE NOWAIT` does against PostgreSQL.

use crate::error::{StoreError, StoreResult};
use crate::traits::*;
use async_trait::async_trait;
use ctrlplane_types::{
    ApprovalRecord, Deployment, DeploymentId, DeploymentVariable, DeploymentVersion, Environment,
    EnvironmentId, Job, JobAgent, JobAgentId, JobId, JobStatus, Policy, PolicyId, Release,
    ReleaseId, ReleaseTarget, ReleaseTargetId, ReleaseTargetKey, Resource, ResourceId,
    ResourceVariable, System, SystemId, VariableRelease, VariableReleaseId, VariableSet,
    VersionId, VersionRelease, WorkspaceId,
};
use std::collections::{BTreeSet, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use tokio::sync::RwLock;
use tracing::debug;

/// Keys used for simulated row locks
pub mod row_key {
    use ctrlplane_types::{DeploymentId, EnvironmentId, ReleaseTargetId, ResourceId};

    pub fn resource(id: &ResourceId) -> String {
        format!("resource:{}", id.as_uuid())
    }

    pub fn deployment(id: &DeploymentId) -> String {
        format!("deployment:{}", id.as_uuid())
    }

    pub fn environment(id: &EnvironmentId) -> String {
        format!("environment:{}", id.as_uuid())
    }

    pub fn target(id: &ReleaseTargetId) -> String {
        format!("release_target:{}", id.as_uuid())
    }
}

/// Held simulated row lock; released on drop
#[derive(Debug)]
pub struct RowLockHandle {
    key: String,
    locks: Arc<Mutex<HashSet<String>>>,
}

impl Drop for RowLockHandle {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.remove(&self.key);
    }
}

#[derive(Debug, Clone, Copy)]
enum TargetScope {
    Resource(ResourceId),
    Deployment(DeploymentId),
    Environment(EnvironmentId),
}

impl TargetScope {
    fn contains(&self, key: &ReleaseTargetKey) -> bool {
        match self {
            TargetScope::Resource(id) => &key.resource_id == id,
            TargetScope::Deployment(id) => &key.deployment_id == id,
            TargetScope::Environment(id) => &key.environment_id == id,
        }
    }

    fn row_key(&self) -> String {
        match self {
            TargetScope::Resource(id) => row_key::resource(id),
            TargetScope::Deployment(id) => row_key::deployment(id),
            TargetScope::Environment(id) => row_key::environment(id),
        }
    }
}

/// In-memory storage for development and testing
#[derive(Debug, Clone, Default)]
pub struct InMemoryStore {
    resources: Arc<RwLock<HashMap<ResourceId, Resource>>>,
    systems: Arc<RwLock<HashMap<SystemId, System>>>,
    environments: Arc<RwLock<HashMap<EnvironmentId, Environment>>>,
    deployments: Arc<RwLock<HashMap<DeploymentId, Deployment>>>,
    job_agents: Arc<RwLock<HashMap<JobAgentId, JobAgent>>>,
    versions: Arc<RwLock<HashMap<VersionId, DeploymentVersion>>>,
    resource_variables: Arc<RwLock<Vec<ResourceVariable>>>,
    deployment_variables: Arc<RwLock<Vec<DeploymentVariable>>>,
    variable_sets: Arc<RwLock<Vec<VariableSet>>>,
    policies: Arc<RwLock<HashMap<PolicyId, Policy>>>,
    policy_targets: Arc<RwLock<HashMap<PolicyId, BTreeSet<ReleaseTargetId>>>>,
    approvals: Arc<RwLock<Vec<ApprovalRecord>>>,
    targets: Arc<RwLock<HashMap<ReleaseTargetId, ReleaseTarget>>>,
    version_releases: Arc<RwLock<Vec<VersionRelease>>>,
    variable_releases: Arc<RwLock<Vec<VariableRelease>>>,
    releases: Arc<RwLock<Vec<Release>>>,
    jobs: Arc<RwLock<Vec<Job>>>,
    row_locks: Arc<Mutex<HashSet<String>>>,
}

impl InMemoryStore {
    /// Create a new in-memory store
    pub fn new() -> Self {
        Self::default()
    }

    /// Hold a simulated row lock until the handle is dropped
    pub fn hold_row_lock(&self, key: impl Into<String>) -> RowLockHandle {
        let key = key.into();
        let mut locks = self.row_locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.insert(key.clone());
        RowLockHandle {
            key,
            locks: self.row_locks.clone(),
        }
    }

    fn check_row_lock(&self, key: &str) -> StoreResult<()> {
        let locks = self.row_locks.lock().unwrap_or_else(|e| e.into_inner());
        if locks.contains(key) {
            debug!(row = key, "Row lock held, refusing scoped write");
            return Err(StoreError::LockContention(format!(
                "could not obtain lock on row {}",
                key
            )));
        }
        Ok(())
    }

    async fn replace_targets(
        &self,
        scope: TargetScope,
        desired: Vec<ReleaseTargetKey>,
    ) -> StoreResult<TargetDiff> {
        if let Some(stray) = desired.iter().find(|key| !scope.contains(key)) {
            return Err(StoreError::InvalidData(format!(
                "target {} is outside the replaced scope",
                stray
            )));
        }
        self.check_row_lock(&scope.row_key())?;

        let mut targets = self.targets.write().await;
        let current: Vec<ReleaseTarget> = targets
            .values()
            .filter(|t| scope.contains(&t.key()))
            .cloned()
            .collect();
        for target in &current {
            self.check_row_lock(&row_key::target(&target.id))?;
        }

        let desired: BTreeSet<ReleaseTargetKey> = desired.into_iter().collect();
        let current_keys: HashSet<ReleaseTargetKey> = current.iter().map(|t| t.key()).collect();

        let mut diff = TargetDiff::default();
        for target in current {
            if desired.contains(&target.key()) {
                diff.unchanged.push(target);
            } else {
                diff.removed.push(target);
            }
        }

        for key in desired {
            if current_keys.contains(&key) {
                continue;
            }
            if targets.values().any(|t| t.key() == key) {
                continue;
            }
            let target = ReleaseTarget::new(key);
            targets.insert(target.id, target.clone());
            diff.inserted.push(target);
        }

        for target in &diff.removed {
            targets.remove(&target.id);
        }
        drop(targets);

        if !diff.removed.is_empty() {
            let removed: HashSet<ReleaseTargetId> = diff.removed.iter().map(|t| t.id).collect();
            let mut index = self.policy_targets.write().await;
            for governed in index.values_mut() {
                governed.retain(|id| !removed.contains(id));
            }
        }

        Ok(diff)
    }
}

#[async_trait]
impl ResourceStore for InMemoryStore {
    async fn get_resource(&self, id: &ResourceId) -> StoreResult<Option<Resource>> {
        let resources = self.resources.read().await;
        Ok(resources.get(id).cloned())
    }

    async fn list_active_resources(
        &self,
        workspace_id: &WorkspaceId,
    ) -> StoreResult<Vec<Resource>> {
        let resources = self.resources.read().await;
        let mut active: Vec<Resource> = resources
            .values()
            .filter(|r| &r.workspace_id == workspace_id && !r.is_deleted())
            .cloned()
            .collect();
        active.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        Ok(active)
    }

    async fn upsert_resource(&self, resource: Resource) -> StoreResult<()> {
        let mut resources = self.resources.write().await;
        let duplicate = resources.values().any(|r| {
            r.workspace_id == resource.workspace_id
                && r.identifier == resource.identifier
                && r.id != resource.id
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "resource identifier '{}' already exists in {}",
                resource.identifier, resource.workspace_id
            )));
        }
        resources.insert(resource.id, resource);
        Ok(())
    }
}

#[async_trait]
impl SystemStore for InMemoryStore {
    async fn get_system(&self, id: &SystemId) -> StoreResult<Option<System>> {
        let systems = self.systems.read().await;
        Ok(systems.get(id).cloned())
    }

    async fn list_systems(&self, workspace_id: &WorkspaceId) -> StoreResult<Vec<System>> {
        let systems = self.systems.read().await;
        Ok(systems
            .values()
            .filter(|s| &s.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn upsert_system(&self, system: System) -> StoreResult<()> {
        let mut systems = self.systems.write().await;
        systems.insert(system.id, system);
        Ok(())
    }

    async fn get_environment(&self, id: &EnvironmentId) -> StoreResult<Option<Environment>> {
        let environments = self.environments.read().await;
        Ok(environments.get(id).cloned())
    }

    async fn list_environments(&self, system_id: &SystemId) -> StoreResult<Vec<Environment>> {
        let environments = self.environments.read().await;
        Ok(environments
            .values()
            .filter(|e| &e.system_id == system_id)
            .cloned()
            .collect())
    }

    async fn upsert_environment(&self, environment: Environment) -> StoreResult<()> {
        let mut environments = self.environments.write().await;
        environments.insert(environment.id, environment);
        Ok(())
    }

    async fn get_deployment(&self, id: &DeploymentId) -> StoreResult<Option<Deployment>> {
        let deployments = self.deployments.read().await;
        Ok(deployments.get(id).cloned())
    }

    async fn list_deployments(&self, system_id: &SystemId) -> StoreResult<Vec<Deployment>> {
        let deployments = self.deployments.read().await;
        Ok(deployments
            .values()
            .filter(|d| &d.system_id == system_id)
            .cloned()
            .collect())
    }

    async fn upsert_deployment(&self, deployment: Deployment) -> StoreResult<()> {
        let mut deployments = self.deployments.write().await;
        deployments.insert(deployment.id, deployment);
        Ok(())
    }

    async fn get_job_agent(&self, id: &JobAgentId) -> StoreResult<Option<JobAgent>> {
        let agents = self.job_agents.read().await;
        Ok(agents.get(id).cloned())
    }

    async fn upsert_job_agent(&self, agent: JobAgent) -> StoreResult<()> {
        let mut agents = self.job_agents.write().await;
        agents.insert(agent.id, agent);
        Ok(())
    }
}

#[async_trait]
impl VersionStore for InMemoryStore {
    async fn get_version(&self, id: &VersionId) -> StoreResult<Option<DeploymentVersion>> {
        let versions = self.versions.read().await;
        Ok(versions.get(id).cloned())
    }

    async fn upsert_version(&self, version: DeploymentVersion) -> StoreResult<()> {
        let mut versions = self.versions.write().await;
        versions.insert(version.id, version);
        Ok(())
    }

    async fn list_ready_versions(
        &self,
        deployment_id: &DeploymentId,
        limit: usize,
    ) -> StoreResult<Vec<DeploymentVersion>> {
        let versions = self.versions.read().await;
        let mut ready: Vec<DeploymentVersion> = versions
            .values()
            .filter(|v| &v.deployment_id == deployment_id && v.is_ready())
            .cloned()
            .collect();
        ready.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        ready.truncate(limit);
        Ok(ready)
    }
}

#[async_trait]
impl VariableStore for InMemoryStore {
    async fn list_resource_variables(
        &self,
        resource_id: &ResourceId,
    ) -> StoreResult<Vec<ResourceVariable>> {
        let variables = self.resource_variables.read().await;
        Ok(variables
            .iter()
            .filter(|v| &v.resource_id == resource_id)
            .cloned()
            .collect())
    }

    async fn upsert_resource_variable(&self, variable: ResourceVariable) -> StoreResult<()> {
        let mut variables = self.resource_variables.write().await;
        variables.retain(|v| !(v.resource_id == variable.resource_id && v.key == variable.key));
        variables.push(variable);
        Ok(())
    }

    async fn list_deployment_variables(
        &self,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<DeploymentVariable>> {
        let variables = self.deployment_variables.read().await;
        Ok(variables
            .iter()
            .filter(|v| &v.deployment_id == deployment_id)
            .cloned()
            .collect())
    }

    async fn upsert_deployment_variable(&self, variable: DeploymentVariable) -> StoreResult<()> {
        let mut variables = self.deployment_variables.write().await;
        variables.retain(|v| !(v.deployment_id == variable.deployment_id && v.key == variable.key));
        variables.push(variable);
        Ok(())
    }

    async fn list_variable_sets(&self, system_id: &SystemId) -> StoreResult<Vec<VariableSet>> {
        let sets = self.variable_sets.read().await;
        let mut matching: Vec<VariableSet> = sets
            .iter()
            .filter(|s| &s.system_id == system_id)
            .cloned()
            .collect();
        matching.sort_by_key(|s| s.position);
        Ok(matching)
    }

    async fn upsert_variable_set(&self, set: VariableSet) -> StoreResult<()> {
        let mut sets = self.variable_sets.write().await;
        sets.retain(|s| s.id != set.id);
        sets.push(set);
        Ok(())
    }
}

#[async_trait]
impl PolicyStore for InMemoryStore {
    async fn get_policy(&self, id: &PolicyId) -> StoreResult<Option<Policy>> {
        let policies = self.policies.read().await;
        Ok(policies.get(id).cloned())
    }

    async fn list_policies(&self, workspace_id: &WorkspaceId) -> StoreResult<Vec<Policy>> {
        let policies = self.policies.read().await;
        Ok(policies
            .values()
            .filter(|p| &p.workspace_id == workspace_id)
            .cloned()
            .collect())
    }

    async fn upsert_policy(&self, policy: Policy) -> StoreResult<()> {
        let mut policies = self.policies.write().await;
        policies.insert(policy.id, policy);
        Ok(())
    }

    async fn list_policy_targets(&self, policy_id: &PolicyId) -> StoreResult<Vec<ReleaseTargetId>> {
        let index = self.policy_targets.read().await;
        Ok(index
            .get(policy_id)
            .map(|set| set.iter().copied().collect())
            .unwrap_or_default())
    }

    async fn replace_policy_targets(
        &self,
        policy_id: &PolicyId,
        targets: Vec<ReleaseTargetId>,
    ) -> StoreResult<PolicyTargetDiff> {
        let mut index = self.policy_targets.write().await;
        let desired: BTreeSet<ReleaseTargetId> = targets.into_iter().collect();
        let current = index.remove(policy_id).unwrap_or_default();

        let diff = PolicyTargetDiff {
            added: desired.difference(&current).copied().collect(),
            removed: current.difference(&desired).copied().collect(),
            unchanged: current.intersection(&desired).copied().collect(),
        };
        index.insert(*policy_id, desired);
        Ok(diff)
    }
}

#[async_trait]
impl ApprovalStore for InMemoryStore {
    async fn record_approval(&self, record: ApprovalRecord) -> StoreResult<()> {
        let mut approvals = self.approvals.write().await;
        let duplicate = approvals.iter().any(|a| {
            a.version_id == record.version_id
                && a.environment_id == record.environment_id
                && a.user_id == record.user_id
        });
        if duplicate {
            return Err(StoreError::Conflict(format!(
                "{} already recorded a decision for {} in {}",
                record.user_id, record.version_id, record.environment_id
            )));
        }
        approvals.push(record);
        Ok(())
    }

    async fn list_approvals(
        &self,
        environment_id: &EnvironmentId,
        version_ids: &[VersionId],
    ) -> StoreResult<Vec<ApprovalRecord>> {
        let approvals = self.approvals.read().await;
        Ok(approvals
            .iter()
            .filter(|a| &a.environment_id == environment_id && version_ids.contains(&a.version_id))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl ReleaseTargetStore for InMemoryStore {
    async fn get_release_target(&self, id: &ReleaseTargetId) -> StoreResult<Option<ReleaseTarget>> {
        let targets = self.targets.read().await;
        Ok(targets.get(id).cloned())
    }

    async fn find_release_target(
        &self,
        key: &ReleaseTargetKey,
    ) -> StoreResult<Option<ReleaseTarget>> {
        let targets = self.targets.read().await;
        Ok(targets.values().find(|t| &t.key() == key).cloned())
    }

    async fn list_targets_for_resource(
        &self,
        resource_id: &ResourceId,
    ) -> StoreResult<Vec<ReleaseTarget>> {
        let targets = self.targets.read().await;
        Ok(targets
            .values()
            .filter(|t| &t.resource_id == resource_id)
            .cloned()
            .collect())
    }

    async fn list_targets_for_deployment(
        &self,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<ReleaseTarget>> {
        let targets = self.targets.read().await;
        Ok(targets
            .values()
            .filter(|t| &t.deployment_id == deployment_id)
            .cloned()
            .collect())
    }

    async fn list_targets_for_environment(
        &self,
        environment_id: &EnvironmentId,
    ) -> StoreResult<Vec<ReleaseTarget>> {
        let targets = self.targets.read().await;
        Ok(targets
            .values()
            .filter(|t| &t.environment_id == environment_id)
            .cloned()
            .collect())
    }

    async fn list_targets_for_pair(
        &self,
        environment_id: &EnvironmentId,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<ReleaseTarget>> {
        let targets = self.targets.read().await;
        Ok(targets
            .values()
            .filter(|t| &t.environment_id == environment_id && &t.deployment_id == deployment_id)
            .cloned()
            .collect())
    }

    async fn list_targets_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> StoreResult<Vec<ReleaseTarget>> {
        let resources = self.resources.read().await;
        let targets = self.targets.read().await;
        Ok(targets
            .values()
            .filter(|t| {
                resources
                    .get(&t.resource_id)
                    .map(|r| &r.workspace_id == workspace_id)
                    .unwrap_or(false)
            })
            .cloned()
            .collect())
    }

    async fn replace_targets_for_resource(
        &self,
        resource_id: &ResourceId,
        desired: Vec<ReleaseTargetKey>,
    ) -> StoreResult<TargetDiff> {
        self.replace_targets(TargetScope::Resource(*resource_id), desired)
            .await
    }

    async fn replace_targets_for_deployment(
        &self,
        deployment_id: &DeploymentId,
        desired: Vec<ReleaseTargetKey>,
    ) -> StoreResult<TargetDiff> {
        self.replace_targets(TargetScope::Deployment(*deployment_id), desired)
            .await
    }

    async fn replace_targets_for_environment(
        &self,
        environment_id: &EnvironmentId,
        desired: Vec<ReleaseTargetKey>,
    ) -> StoreResult<TargetDiff> {
        self.replace_targets(TargetScope::Environment(*environment_id), desired)
            .await
    }

    async fn set_desired_release(
        &self,
        target_id: &ReleaseTargetId,
        release_id: &ReleaseId,
    ) -> StoreResult<bool> {
        self.check_row_lock(&row_key::target(target_id))?;
        let mut targets = self.targets.write().await;
        let target = targets
            .get_mut(target_id)
            .ok_or_else(|| StoreError::NotFound(target_id.to_string()))?;

        if target.desired_release_id.as_ref() == Some(release_id) {
            return Ok(false);
        }
        target.desired_release_id = Some(*release_id);
        Ok(true)
    }
}

#[async_trait]
impl ReleaseStore for InMemoryStore {
    async fn latest_version_release(
        &self,
        target_id: &ReleaseTargetId,
    ) -> StoreResult<Option<VersionRelease>> {
        let rows = self.version_releases.read().await;
        Ok(rows
            .iter()
            .rev()
            .find(|r| &r.release_target_id == target_id)
            .cloned())
    }

    async fn insert_version_release(&self, release: VersionRelease) -> StoreResult<()> {
        let mut rows = self.version_releases.write().await;
        rows.push(release);
        Ok(())
    }

    async fn latest_variable_release(
        &self,
        target_id: &ReleaseTargetId,
    ) -> StoreResult<Option<VariableRelease>> {
        let rows = self.variable_releases.read().await;
        Ok(rows
            .iter()
            .rev()
            .find(|r| &r.release_target_id == target_id)
            .cloned())
    }

    async fn insert_variable_release(&self, release: VariableRelease) -> StoreResult<()> {
        let mut rows = self.variable_releases.write().await;
        rows.push(release);
        Ok(())
    }

    async fn get_release(&self, id: &ReleaseId) -> StoreResult<Option<Release>> {
        let rows = self.releases.read().await;
        Ok(rows.iter().find(|r| &r.id == id).cloned())
    }

    async fn latest_release(&self, target_id: &ReleaseTargetId) -> StoreResult<Option<Release>> {
        let rows = self.releases.read().await;
        Ok(rows
            .iter()
            .rev()
            .find(|r| &r.release_target_id == target_id)
            .cloned())
    }

    async fn insert_release(&self, release: Release) -> StoreResult<()> {
        let mut rows = self.releases.write().await;
        rows.push(release);
        Ok(())
    }

    async fn get_variable_release(
        &self,
        id: &VariableReleaseId,
    ) -> StoreResult<Option<VariableRelease>> {
        let rows = self.variable_releases.read().await;
        Ok(rows.iter().find(|r| &r.id == id).cloned())
    }
}

#[async_trait]
impl JobStore for InMemoryStore {
    async fn get_job(&self, id: &JobId) -> StoreResult<Option<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs.iter().find(|j| &j.id == id).cloned())
    }

    async fn insert_job(&self, job: Job) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        if jobs.iter().any(|j| j.id == job.id) {
            return Err(StoreError::Conflict(format!("{} already exists", job.id)));
        }
        jobs.push(job);
        Ok(())
    }

    async fn update_job(&self, job: Job) -> StoreResult<()> {
        let mut jobs = self.jobs.write().await;
        let existing = jobs
            .iter_mut()
            .find(|j| j.id == job.id)
            .ok_or_else(|| StoreError::NotFound(job.id.to_string()))?;
        *existing = job;
        Ok(())
    }

    async fn list_jobs_for_target(&self, target_id: &ReleaseTargetId) -> StoreResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .iter()
            .rev()
            .filter(|j| &j.release_target_id == target_id)
            .cloned()
            .collect())
    }

    async fn list_in_progress_jobs_for_deployment(
        &self,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .iter()
            .filter(|j| &j.deployment_id == deployment_id && j.status == JobStatus::InProgress)
            .cloned()
            .collect())
    }

    async fn list_in_progress_jobs_for_resource(
        &self,
        resource_id: &ResourceId,
    ) -> StoreResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .iter()
            .filter(|j| &j.resource_id == resource_id && j.status == JobStatus::InProgress)
            .cloned()
            .collect())
    }

    async fn list_non_terminal_jobs(
        &self,
        environment_id: &EnvironmentId,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .iter()
            .filter(|j| {
                &j.environment_id == environment_id
                    && &j.deployment_id == deployment_id
                    && !j.status.is_terminal()
            })
            .cloned()
            .collect())
    }

    async fn last_successful_job(
        &self,
        resource_id: &ResourceId,
        version_id: &VersionId,
    ) -> StoreResult<Option<Job>> {
        let jobs = self.jobs.read().await;
        Ok(jobs
            .iter()
            .filter(|j| {
                &j.resource_id == resource_id
                    && &j.version_id == version_id
                    && j.status == JobStatus::Successful
            })
            .max_by_key(|j| j.completed_at.unwrap_or(j.updated_at))
            .cloned())
    }
}

impl Store for InMemoryStore {}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrlplane_types::{ApprovalStatus, VersionStatus};

    fn key(resource_id: ResourceId) -> ReleaseTargetKey {
        ReleaseTargetKey::new(
            resource_id,
            EnvironmentId::generate(),
            DeploymentId::generate(),
        )
    }

    #[tokio::test]
    async fn test_replace_targets_diff() {
        let store = InMemoryStore::new();
        let resource_id = ResourceId::generate();
        let k1 = key(resource_id);
        let k2 = key(resource_id);

        let first = store
            .replace_targets_for_resource(&resource_id, vec![k1, k2])
            .await
            .unwrap();
        assert_eq!(first.inserted.len(), 2);
        assert!(first.removed.is_empty());

        let second = store
            .replace_targets_for_resource(&resource_id, vec![k1])
            .await
            .unwrap();
        assert!(second.inserted.is_empty());
        assert_eq!(second.removed.len(), 1);
        assert_eq!(second.removed[0].key(), k2);
        assert_eq!(second.unchanged.len(), 1);

        let targets = store.list_targets_for_resource(&resource_id).await.unwrap();
        assert_eq!(targets.len(), 1);
        assert_eq!(targets[0].key(), k1);
    }

    #[tokio::test]
    async fn test_replace_is_idempotent() {
        let store = InMemoryStore::new();
        let resource_id = ResourceId::generate();
        let k1 = key(resource_id);

        let first = store
            .replace_targets_for_resource(&resource_id, vec![k1])
            .await
            .unwrap();
        let again = store
            .replace_targets_for_resource(&resource_id, vec![k1, k1])
            .await
            .unwrap();
        assert!(again.is_empty());
        assert_eq!(again.unchanged[0].id, first.inserted[0].id);
    }

    #[tokio::test]
    async fn test_replace_rejects_out_of_scope_keys() {
        let store = InMemoryStore::new();
        let err = store
            .replace_targets_for_resource(
                &ResourceId::generate(),
                vec![key(ResourceId::generate())],
            )
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::InvalidData(_)));
    }

    #[tokio::test]
    async fn test_row_lock_contention() {
        let store = InMemoryStore::new();
        let resource_id = ResourceId::generate();
        let diff = store
            .replace_targets_for_resource(&resource_id, vec![key(resource_id)])
            .await
            .unwrap();
        let target_id = diff.inserted[0].id;

        let handle = store.hold_row_lock(row_key::target(&target_id));
        let err = store
            .replace_targets_for_resource(&resource_id, vec![])
            .await
            .unwrap_err();
        assert!(err.is_transient());
        assert!(matches!(err, StoreError::LockContention(_)));

        drop(handle);
        let diff = store
            .replace_targets_for_resource(&resource_id, vec![])
            .await
            .unwrap();
        assert_eq!(diff.removed.len(), 1);
    }

    #[tokio::test]
    async fn test_set_desired_release_reports_change() {
        let store = InMemoryStore::new();
        let resource_id = ResourceId::generate();
        let diff = store
            .replace_targets_for_resource(&resource_id, vec![key(resource_id)])
            .await
            .unwrap();
        let target_id = diff.inserted[0].id;
        let release_id = ReleaseId::generate();

        assert!(store.set_desired_release(&target_id, &release_id).await.unwrap());
        assert!(!store.set_desired_release(&target_id, &release_id).await.unwrap());
        assert!(store
            .set_desired_release(&ReleaseTargetId::generate(), &release_id)
            .await
            .is_err());
    }

    #[tokio::test]
    async fn test_removed_targets_leave_policy_index() {
        let store = InMemoryStore::new();
        let resource_id = ResourceId::generate();
        let diff = store
            .replace_targets_for_resource(&resource_id, vec![key(resource_id)])
            .await
            .unwrap();
        let policy_id = PolicyId::generate();
        store
            .replace_policy_targets(&policy_id, vec![diff.inserted[0].id])
            .await
            .unwrap();

        store
            .replace_targets_for_resource(&resource_id, vec![])
            .await
            .unwrap();
        assert!(store.list_policy_targets(&policy_id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_policy_target_diff_reports_unchanged() {
        let store = InMemoryStore::new();
        let policy_id = PolicyId::generate();
        let kept = ReleaseTargetId::generate();
        let dropped = ReleaseTargetId::generate();
        let fresh = ReleaseTargetId::generate();

        store
            .replace_policy_targets(&policy_id, vec![kept, dropped])
            .await
            .unwrap();
        let diff = store
            .replace_policy_targets(&policy_id, vec![kept, fresh])
            .await
            .unwrap();

        assert_eq!(diff.added, vec![fresh]);
        assert_eq!(diff.removed, vec![dropped]);
        assert_eq!(diff.unchanged, vec![kept]);
        assert_eq!(diff.affected().count(), 3);
    }

    #[tokio::test]
    async fn test_ready_versions_newest_first() {
        let store = InMemoryStore::new();
        let deployment_id = DeploymentId::generate();
        let now = chrono::Utc::now();

        for (i, tag) in ["v1", "v2", "v3"].iter().enumerate() {
            store
                .upsert_version(
                    DeploymentVersion::new(deployment_id, *tag)
                        .with_created_at(now + chrono::Duration::minutes(i as i64)),
                )
                .await
                .unwrap();
        }
        store
            .upsert_version(
                DeploymentVersion::new(deployment_id, "v4")
                    .with_status(VersionStatus::Building)
                    .with_created_at(now + chrono::Duration::minutes(10)),
            )
            .await
            .unwrap();

        let ready = store.list_ready_versions(&deployment_id, 2).await.unwrap();
        let tags: Vec<&str> = ready.iter().map(|v| v.tag.as_str()).collect();
        assert_eq!(tags, vec!["v3", "v2"]);
    }

    #[tokio::test]
    async fn test_approval_unique_per_user() {
        let store = InMemoryStore::new();
        let version_id = VersionId::generate();
        let env_id = EnvironmentId::generate();

        store
            .record_approval(ApprovalRecord::new(
                version_id,
                env_id,
                "alice",
                ApprovalStatus::Approved,
            ))
            .await
            .unwrap();
        let err = store
            .record_approval(ApprovalRecord::new(
                version_id,
                env_id,
                "alice",
                ApprovalStatus::Rejected,
            ))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        let records = store.list_approvals(&env_id, &[version_id]).await.unwrap();
        assert_eq!(records.len(), 1);
    }

    #[tokio::test]
    async fn test_resource_identifier_unique_per_workspace() {
        let store = InMemoryStore::new();
        let ws = WorkspaceId::generate();
        store
            .upsert_resource(Resource::new(ws, "cluster-1", "c1", "Cluster", "v1"))
            .await
            .unwrap();
        let err = store
            .upsert_resource(Resource::new(ws, "cluster-1", "c1", "Cluster", "v1"))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));

        store
            .upsert_resource(Resource::new(
                WorkspaceId::generate(),
                "cluster-1",
                "c1",
                "Cluster",
                "v1",
            ))
            .await
            .unwrap();
    }
}

//! Storage trait definitions

use crate::error::StoreResult;
use async_trait::async_trait;
use ctrlplane_types::{
    ApprovalRecord, Deployment, DeploymentId, DeploymentVariable, DeploymentVersion, Environment,
    EnvironmentId, Job, JobAgent, JobAgentId, JobId, Policy, PolicyId, Release, ReleaseId,
    ReleaseTarget, ReleaseTargetId, ReleaseTargetKey, Resource, ResourceId, ResourceVariable,
    System, SystemId, VariableRelease, VariableReleaseId, VariableSet, VersionId, VersionRelease,
    WorkspaceId,
};

/// Outcome of replacing a subject's release target set
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TargetDiff {
    /// Rows created by this call
    pub inserted: Vec<ReleaseTarget>,

    /// Rows deleted by this call, with their desired pointer torn down
    pub removed: Vec<ReleaseTarget>,

    /// Rows that matched before and still match
    pub unchanged: Vec<ReleaseTarget>,
}

impl TargetDiff {
    pub fn is_empty(&self) -> bool {
        self.inserted.is_empty() && self.removed.is_empty()
    }

    /// Every target whose membership changed
    pub fn changed(&self) -> impl Iterator<Item = &ReleaseTarget> {
        self.inserted.iter().chain(self.removed.iter())
    }
}

/// Outcome of replacing a policy's governed target set
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PolicyTargetDiff {
    pub added: Vec<ReleaseTargetId>,
    pub removed: Vec<ReleaseTargetId>,

    /// Governed before and after
    pub unchanged: Vec<ReleaseTargetId>,
}

impl PolicyTargetDiff {
    /// Every target whose governing rules may have changed
    pub fn affected(&self) -> impl Iterator<Item = &ReleaseTargetId> {
        self.added
            .iter()
            .chain(self.removed.iter())
            .chain(self.unchanged.iter())
    }
}

/// Combined storage trait
#[async_trait]
pub trait Store:
    ResourceStore
    + SystemStore
    + VersionStore
    + VariableStore
    + PolicyStore
    + ApprovalStore
    + ReleaseTargetStore
    + ReleaseStore
    + JobStore
    + Send
    + Sync
{
}

/// Storage for resources
#[async_trait]
pub trait ResourceStore: Send + Sync {
    /// Get a resource by ID, including soft-deleted ones
    async fn get_resource(&self, id: &ResourceId) -> StoreResult<Option<Resource>>;

    /// List resources of a workspace that are not soft-deleted
    async fn list_active_resources(&self, workspace_id: &WorkspaceId) -> StoreResult<Vec<Resource>>;

    /// Create or update a resource; identifiers are unique per workspace
    async fn upsert_resource(&self, resource: Resource) -> StoreResult<()>;
}

/// Storage for systems, environments, deployments and job agents
#[async_trait]
pub trait SystemStore: Send + Sync {
    async fn get_system(&self, id: &SystemId) -> StoreResult<Option<System>>;

    async fn list_systems(&self, workspace_id: &WorkspaceId) -> StoreResult<Vec<System>>;

    async fn upsert_system(&self, system: System) -> StoreResult<()>;

    async fn get_environment(&self, id: &EnvironmentId) -> StoreResult<Option<Environment>>;

    async fn list_environments(&self, system_id: &SystemId) -> StoreResult<Vec<Environment>>;

    async fn upsert_environment(&self, environment: Environment) -> StoreResult<()>;

    async fn get_deployment(&self, id: &DeploymentId) -> StoreResult<Option<Deployment>>;

    async fn list_deployments(&self, system_id: &SystemId) -> StoreResult<Vec<Deployment>>;

    async fn upsert_deployment(&self, deployment: Deployment) -> StoreResult<()>;

    async fn get_job_agent(&self, id: &JobAgentId) -> StoreResult<Option<JobAgent>>;

    async fn upsert_job_agent(&self, agent: JobAgent) -> StoreResult<()>;
}

/// Storage for deployment versions
#[async_trait]
pub trait VersionStore: Send + Sync {
    async fn get_version(&self, id: &VersionId) -> StoreResult<Option<DeploymentVersion>>;

    async fn upsert_version(&self, version: DeploymentVersion) -> StoreResult<()>;

    /// Ready versions of a deployment, newest first, at most `limit`
    async fn list_ready_versions(
        &self,
        deployment_id: &DeploymentId,
        limit: usize,
    ) -> StoreResult<Vec<DeploymentVersion>>;
}

/// Storage for variable declarations
#[async_trait]
pub trait VariableStore: Send + Sync {
    async fn list_resource_variables(
        &self,
        resource_id: &ResourceId,
    ) -> StoreResult<Vec<ResourceVariable>>;

    /// Create or replace the variable with the same (resource, key)
    async fn upsert_resource_variable(&self, variable: ResourceVariable) -> StoreResult<()>;

    async fn list_deployment_variables(
        &self,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<DeploymentVariable>>;

    /// Create or replace the variable with the same (deployment, key)
    async fn upsert_deployment_variable(&self, variable: DeploymentVariable) -> StoreResult<()>;

    /// Variable sets of a system ordered by position
    async fn list_variable_sets(&self, system_id: &SystemId) -> StoreResult<Vec<VariableSet>>;

    async fn upsert_variable_set(&self, set: VariableSet) -> StoreResult<()>;
}

/// Storage for policies and their governed-target index
#[async_trait]
pub trait PolicyStore: Send + Sync {
    async fn get_policy(&self, id: &PolicyId) -> StoreResult<Option<Policy>>;

    /// All policies of a workspace, enabled or not
    async fn list_policies(&self, workspace_id: &WorkspaceId) -> StoreResult<Vec<Policy>>;

    async fn upsert_policy(&self, policy: Policy) -> StoreResult<()>;

    /// Release targets currently recorded as governed by the policy
    async fn list_policy_targets(&self, policy_id: &PolicyId) -> StoreResult<Vec<ReleaseTargetId>>;

    /// Atomically replace the governed-target set of a policy
    async fn replace_policy_targets(
        &self,
        policy_id: &PolicyId,
        targets: Vec<ReleaseTargetId>,
    ) -> StoreResult<PolicyTargetDiff>;
}

/// Storage for approval records
#[async_trait]
pub trait ApprovalStore: Send + Sync {
    /// Append a record; a second record by the same user for the same
    /// (version, environment) is a conflict
    async fn record_approval(&self, record: ApprovalRecord) -> StoreResult<()>;

    async fn list_approvals(
        &self,
        environment_id: &EnvironmentId,
        version_ids: &[VersionId],
    ) -> StoreResult<Vec<ApprovalRecord>>;
}

/// Storage for release targets
#[async_trait]
pub trait ReleaseTargetStore: Send + Sync {
    async fn get_release_target(&self, id: &ReleaseTargetId) -> StoreResult<Option<ReleaseTarget>>;

    async fn find_release_target(
        &self,
        key: &ReleaseTargetKey,
    ) -> StoreResult<Option<ReleaseTarget>>;

    async fn list_targets_for_resource(
        &self,
        resource_id: &ResourceId,
    ) -> StoreResult<Vec<ReleaseTarget>>;

    async fn list_targets_for_deployment(
        &self,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<ReleaseTarget>>;

    async fn list_targets_for_environment(
        &self,
        environment_id: &EnvironmentId,
    ) -> StoreResult<Vec<ReleaseTarget>>;

    /// Targets sharing an environment and deployment
    async fn list_targets_for_pair(
        &self,
        environment_id: &EnvironmentId,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<ReleaseTarget>>;

    /// Targets whose resource belongs to the workspace
    async fn list_targets_for_workspace(
        &self,
        workspace_id: &WorkspaceId,
    ) -> StoreResult<Vec<ReleaseTarget>>;

    /// Make the resource's target set equal to `desired`
    ///
    /// Runs atomically. New keys are inserted (an existing row with the same
    /// triple is kept), rows whose key is no longer desired are deleted.
    /// Fails with `LockContention` if any affected row is locked.
    async fn replace_targets_for_resource(
        &self,
        resource_id: &ResourceId,
        desired: Vec<ReleaseTargetKey>,
    ) -> StoreResult<TargetDiff>;

    async fn replace_targets_for_deployment(
        &self,
        deployment_id: &DeploymentId,
        desired: Vec<ReleaseTargetKey>,
    ) -> StoreResult<TargetDiff>;

    async fn replace_targets_for_environment(
        &self,
        environment_id: &EnvironmentId,
        desired: Vec<ReleaseTargetKey>,
    ) -> StoreResult<TargetDiff>;

    /// Point the target at a release; returns whether the pointer changed
    async fn set_desired_release(
        &self,
        target_id: &ReleaseTargetId,
        release_id: &ReleaseId,
    ) -> StoreResult<bool>;
}

/// Storage for immutable release rows
#[async_trait]
pub trait ReleaseStore: Send + Sync {
    async fn latest_version_release(
        &self,
        target_id: &ReleaseTargetId,
    ) -> StoreResult<Option<VersionRelease>>;

    async fn insert_version_release(&self, release: VersionRelease) -> StoreResult<()>;

    async fn latest_variable_release(
        &self,
        target_id: &ReleaseTargetId,
    ) -> StoreResult<Option<VariableRelease>>;

    async fn insert_variable_release(&self, release: VariableRelease) -> StoreResult<()>;

    async fn get_release(&self, id: &ReleaseId) -> StoreResult<Option<Release>>;

    async fn latest_release(&self, target_id: &ReleaseTargetId) -> StoreResult<Option<Release>>;

    async fn insert_release(&self, release: Release) -> StoreResult<()>;

    async fn get_variable_release(
        &self,
        id: &VariableReleaseId,
    ) -> StoreResult<Option<VariableRelease>>;
}

/// Storage for jobs
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn get_job(&self, id: &JobId) -> StoreResult<Option<Job>>;

    async fn insert_job(&self, job: Job) -> StoreResult<()>;

    async fn update_job(&self, job: Job) -> StoreResult<()>;

    /// Jobs of a target, newest first
    async fn list_jobs_for_target(&self, target_id: &ReleaseTargetId) -> StoreResult<Vec<Job>>;

    /// `in_progress` jobs for a deployment across all targets
    async fn list_in_progress_jobs_for_deployment(
        &self,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<Job>>;

    /// `in_progress` jobs touching a resource across all deployments
    async fn list_in_progress_jobs_for_resource(
        &self,
        resource_id: &ResourceId,
    ) -> StoreResult<Vec<Job>>;

    /// Non-terminal jobs for an environment + deployment
    async fn list_non_terminal_jobs(
        &self,
        environment_id: &EnvironmentId,
        deployment_id: &DeploymentId,
    ) -> StoreResult<Vec<Job>>;

    /// Most recently completed successful job for (resource, version)
    async fn last_successful_job(
        &self,
        resource_id: &ResourceId,
        version_id: &VersionId,
    ) -> StoreResult<Option<Job>>;
}

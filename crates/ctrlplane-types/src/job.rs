//! Jobs: one dispatch attempt of a release to a target

use crate::ids::{
    DeploymentId, EnvironmentId, JobAgentId, JobId, ReleaseId, ReleaseTargetId, ResourceId,
    VersionId, WorkspaceId,
};
use crate::release::{Release, ReleaseTarget};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Registered executor jobs are handed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct JobAgent {
    pub id: JobAgentId,
    pub workspace_id: WorkspaceId,
    pub name: String,

    /// Agent type, e.g. `kubernetes-job` or `github-app`
    pub kind: String,

    #[serde(default)]
    pub config: serde_json::Value,
}

impl JobAgent {
    pub fn new(
        workspace_id: WorkspaceId,
        name: impl Into<String>,
        kind: impl Into<String>,
    ) -> Self {
        Self {
            id: JobAgentId::generate(),
            workspace_id,
            name: name.into(),
            kind: kind.into(),
            config: serde_json::Value::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Pending,
    InProgress,
    ActionRequired,
    Successful,
    Cancelled,
    Skipped,
    Failure,
    InvalidJobAgent,
    InvalidIntegration,
    ExternalRunNotFound,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            JobStatus::Pending | JobStatus::InProgress | JobStatus::ActionRequired
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            JobStatus::Pending => "pending",
            JobStatus::InProgress => "in_progress",
            JobStatus::ActionRequired => "action_required",
            JobStatus::Successful => "successful",
            JobStatus::Cancelled => "cancelled",
            JobStatus::Skipped => "skipped",
            JobStatus::Failure => "failure",
            JobStatus::InvalidJobAgent => "invalid_job_agent",
            JobStatus::InvalidIntegration => "invalid_integration",
            JobStatus::ExternalRunNotFound => "external_run_not_found",
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution attempt for a release
///
/// Carries the target triple and version so job history can be queried
/// without joining through releases.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Job {
    pub id: JobId,
    pub release_id: ReleaseId,
    pub release_target_id: ReleaseTargetId,
    pub resource_id: ResourceId,
    pub environment_id: EnvironmentId,
    pub deployment_id: DeploymentId,
    pub version_id: VersionId,

    pub job_agent_id: Option<JobAgentId>,
    #[serde(default)]
    pub job_agent_config: serde_json::Value,

    pub status: JobStatus,
    pub external_run_id: Option<String>,
    pub message: Option<String>,

    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl Job {
    /// Create a pending job for a release
    pub fn new(
        target: &ReleaseTarget,
        release: &Release,
        job_agent_id: Option<JobAgentId>,
        job_agent_config: serde_json::Value,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: JobId::generate(),
            release_id: release.id,
            release_target_id: target.id,
            resource_id: target.resource_id,
            environment_id: target.environment_id,
            deployment_id: target.deployment_id,
            version_id: release.version_id,
            job_agent_id,
            job_agent_config,
            status: JobStatus::Pending,
            external_run_id: None,
            message: None,
            created_at: now,
            started_at: None,
            completed_at: None,
            updated_at: now,
        }
    }

    /// Apply a status transition, maintaining the lifecycle timestamps
    pub fn transition(&mut self, status: JobStatus, at: DateTime<Utc>) {
        if status == JobStatus::InProgress && self.started_at.is_none() {
            self.started_at = Some(at);
        }
        if status.is_terminal() && self.completed_at.is_none() {
            self.completed_at = Some(at);
        }
        self.status = status;
        self.updated_at = at;
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::{VariableReleaseId, VersionReleaseId};
    use crate::release::ReleaseTargetKey;

    fn job() -> Job {
        let target = ReleaseTarget::new(ReleaseTargetKey::new(
            ResourceId::generate(),
            EnvironmentId::generate(),
            DeploymentId::generate(),
        ));
        let release = Release {
            id: ReleaseId::generate(),
            release_target_id: target.id,
            version_release_id: VersionReleaseId::generate(),
            variable_release_id: VariableReleaseId::generate(),
            version_id: VersionId::generate(),
            created_at: Utc::now(),
        };
        Job::new(&target, &release, None, serde_json::Value::Null)
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(!JobStatus::Pending.is_terminal());
        assert!(!JobStatus::InProgress.is_terminal());
        assert!(!JobStatus::ActionRequired.is_terminal());
        assert!(JobStatus::Successful.is_terminal());
        assert!(JobStatus::InvalidJobAgent.is_terminal());
        assert!(JobStatus::ExternalRunNotFound.is_terminal());
    }

    #[test]
    fn test_transition_timestamps() {
        let mut job = job();
        let t1 = Utc::now();
        job.transition(JobStatus::InProgress, t1);
        assert_eq!(job.started_at, Some(t1));
        assert!(job.completed_at.is_none());

        let t2 = t1 + chrono::Duration::minutes(5);
        job.transition(JobStatus::Successful, t2);
        assert_eq!(job.started_at, Some(t1));
        assert_eq!(job.completed_at, Some(t2));
    }

    #[test]
    fn test_status_serde_snake_case() {
        let json = serde_json::to_string(&JobStatus::InvalidJobAgent).unwrap();
        assert_eq!(json, "\"invalid_job_agent\"");
        assert_eq!(JobStatus::ExternalRunNotFound.to_string(), "external_run_not_found");
    }
}

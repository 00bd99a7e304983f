//! Release targets and immutable release snapshots

use crate::ids::{
    DeploymentId, EnvironmentId, ReleaseId, ReleaseTargetId, ResourceId, VariableReleaseId,
    VersionId, VersionReleaseId,
};
use crate::variables::VariableValue;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity triple of a release target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ReleaseTargetKey {
    pub resource_id: ResourceId,
    pub environment_id: EnvironmentId,
    pub deployment_id: DeploymentId,
}

impl ReleaseTargetKey {
    pub fn new(
        resource_id: ResourceId,
        environment_id: EnvironmentId,
        deployment_id: DeploymentId,
    ) -> Self {
        Self {
            resource_id,
            environment_id,
            deployment_id,
        }
    }
}

impl fmt::Display for ReleaseTargetKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "({}, {}, {})",
            self.resource_id, self.environment_id, self.deployment_id
        )
    }
}

/// A (resource, environment, deployment) triple that can receive releases
///
/// The triple never changes after creation; the target is created and
/// deleted purely by selector recomputation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReleaseTarget {
    pub id: ReleaseTargetId,
    pub resource_id: ResourceId,
    pub environment_id: EnvironmentId,
    pub deployment_id: DeploymentId,
    pub created_at: DateTime<Utc>,

    /// Release the policy engine last chose
    pub desired_release_id: Option<ReleaseId>,
}

impl ReleaseTarget {
    pub fn new(key: ReleaseTargetKey) -> Self {
        Self {
            id: ReleaseTargetId::generate(),
            resource_id: key.resource_id,
            environment_id: key.environment_id,
            deployment_id: key.deployment_id,
            created_at: Utc::now(),
            desired_release_id: None,
        }
    }

    pub fn key(&self) -> ReleaseTargetKey {
        ReleaseTargetKey::new(self.resource_id, self.environment_id, self.deployment_id)
    }
}

/// A version chosen for a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VersionRelease {
    pub id: VersionReleaseId,
    pub release_target_id: ReleaseTargetId,
    pub version_id: VersionId,
    pub created_at: DateTime<Utc>,
}

impl VersionRelease {
    pub fn new(release_target_id: ReleaseTargetId, version_id: VersionId) -> Self {
        Self {
            id: VersionReleaseId::generate(),
            release_target_id,
            version_id,
            created_at: Utc::now(),
        }
    }
}

/// One resolved variable of a release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolvedVariable {
    pub key: String,

    /// Ciphertext when `sensitive` is set
    pub value: VariableValue,

    #[serde(default)]
    pub sensitive: bool,
}

/// Resolved variable set for a target
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableRelease {
    pub id: VariableReleaseId,
    pub release_target_id: ReleaseTargetId,

    /// Sorted by key
    pub values: Vec<ResolvedVariable>,

    /// Hex SHA-256 over the plaintext key/value set
    pub digest: String,

    pub created_at: DateTime<Utc>,
}

/// Pairing of a version release and a variable release
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Release {
    pub id: ReleaseId,
    pub release_target_id: ReleaseTargetId,
    pub version_release_id: VersionReleaseId,
    pub variable_release_id: VariableReleaseId,
    pub version_id: VersionId,
    pub created_at: DateTime<Utc>,
}

impl Release {
    pub fn new(version_release: &VersionRelease, variable_release: &VariableRelease) -> Self {
        Self {
            id: ReleaseId::generate(),
            release_target_id: version_release.release_target_id,
            version_release_id: version_release.id,
            variable_release_id: variable_release.id,
            version_id: version_release.version_id,
            created_at: Utc::now(),
        }
    }
}

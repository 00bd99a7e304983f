//! Strongly-typed identifiers for Ctrlplane entities
//!
//! All IDs are UUID-based but wrapped in newtype structs for type safety.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

macro_rules! uuid_id {
    ($(#[$meta:meta])* $name:ident, $prefix:literal) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        pub struct $name(Uuid);

        impl $name {
            pub fn generate() -> Self {
                Self(Uuid::new_v4())
            }

            pub fn from_uuid(uuid: Uuid) -> Self {
                Self(uuid)
            }

            pub fn as_uuid(&self) -> &Uuid {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!($prefix, ":{}"), self.0)
            }
        }

        impl From<Uuid> for $name {
            fn from(uuid: Uuid) -> Self {
                Self(uuid)
            }
        }
    };
}

uuid_id!(
    /// Unique identifier for a workspace
    WorkspaceId,
    "workspace"
);
uuid_id!(
    /// Unique identifier for a resource
    ResourceId,
    "resource"
);
uuid_id!(
    /// Unique identifier for a system
    SystemId,
    "system"
);
uuid_id!(
    /// Unique identifier for an environment
    EnvironmentId,
    "env"
);
uuid_id!(
    /// Unique identifier for a deployment
    DeploymentId,
    "deploy"
);
uuid_id!(
    /// Unique identifier for a release target
    ReleaseTargetId,
    "target"
);
uuid_id!(
    /// Unique identifier for a deployment version
    VersionId,
    "version"
);
uuid_id!(
    /// Unique identifier for a version release row
    VersionReleaseId,
    "version-release"
);
uuid_id!(
    /// Unique identifier for a variable release row
    VariableReleaseId,
    "variable-release"
);
uuid_id!(
    /// Unique identifier for a release
    ReleaseId,
    "release"
);
uuid_id!(
    /// Unique identifier for a policy
    PolicyId,
    "policy"
);
uuid_id!(
    /// Unique identifier for a job
    JobId,
    "job"
);
uuid_id!(
    /// Unique identifier for an approval record
    ApprovalId,
    "approval"
);
uuid_id!(
    /// Unique identifier for a job agent
    JobAgentId,
    "agent"
);
uuid_id!(
    /// Unique identifier for a system variable set
    VariableSetId,
    "variable-set"
);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_generation() {
        let id1 = ReleaseTargetId::generate();
        let id2 = ReleaseTargetId::generate();
        assert_ne!(id1, id2);
    }

    #[test]
    fn test_id_display() {
        let id = DeploymentId::generate();
        assert!(id.to_string().starts_with("deploy:"));
        assert!(EnvironmentId::generate().to_string().starts_with("env:"));
    }

    #[test]
    fn test_id_serializes_as_bare_uuid() {
        let uuid = Uuid::new_v4();
        let id = ResourceId::from_uuid(uuid);
        let json = serde_json::to_string(&id).unwrap();
        assert_eq!(json, format!("\"{}\"", uuid));
    }
}

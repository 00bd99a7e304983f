//! Ctrlplane Types - Core types for release resolution
//!
//! Ctrlplane maps infrastructure resources to deployment targets and decides,
//! for every (resource, environment, deployment) triple, which versioned and
//! variable-resolved release should be active.
//!
//! ## Key Concepts
//!
//! - **Resource**: A piece of infrastructure (cluster, VM, namespace)
//! - **Environment / Deployment**: Carry resource selectors; together they
//!   decide which resources become release targets
//! - **ReleaseTarget**: An immutable (resource, environment, deployment) triple
//! - **Release**: An immutable version + variable snapshot for one target
//! - **Policy**: Ordered rules narrowing candidate versions to one release
//! - **Job**: One dispatch of a release to a job agent
//! - **Events**: Inbound triggers and the outbound observability stream

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod decision;
pub mod dispatch;
pub mod events;
pub mod ids;
pub mod job;
pub mod policy;
pub mod release;
pub mod resource;
pub mod variables;
pub mod version;

// Re-export main types
pub use decision::{CandidateRejection, EvaluationDecision, RuleEvaluationRecord};
pub use dispatch::{DispatchError, DispatchReceipt, JobDispatcher};
pub use events::{ControlEvent, EngineEvent, EngineEventEnvelope, EventSource};
pub use ids::{
    ApprovalId, DeploymentId, EnvironmentId, JobAgentId, JobId, PolicyId, ReleaseId,
    ReleaseTargetId, ResourceId, SystemId, VariableReleaseId, VariableSetId, VersionId,
    VersionReleaseId, WorkspaceId,
};
pub use job::{Job, JobAgent, JobStatus};
pub use policy::{
    ApprovalRecord, ApprovalStatus, ConcurrencyScope, MaintenanceWindow, Policy, PolicyTarget,
    RuleConfig,
};
pub use release::{
    Release, ReleaseTarget, ReleaseTargetKey, ResolvedVariable, VariableRelease, VersionRelease,
};
pub use resource::{Deployment, Environment, Resource, System};
pub use variables::{
    DeploymentVariable, DeploymentVariableValue, ResourceVariable, VariableSet, VariableSetValue,
    VariableValue,
};
pub use version::{DeploymentVersion, VersionStatus};

pub use ctrlplane_selector::Condition;

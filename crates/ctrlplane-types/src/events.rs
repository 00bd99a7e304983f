//! Inbound triggers and outbound engine events
//!
//! [`ControlEvent`]s carry identities only; workers always re-read current
//! state from the store. [`EngineEvent`]s form the observability stream.

use crate::ids::{
    DeploymentId, EnvironmentId, JobId, PolicyId, ReleaseId, ReleaseTargetId, ResourceId,
    VersionId,
};
use crate::job::JobStatus;
use crate::release::ReleaseTargetKey;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Change notifications that drive the engine
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ControlEvent {
    ResourceUpserted {
        resource_id: ResourceId,
    },
    ResourceDeleted {
        resource_id: ResourceId,
    },
    EnvironmentChanged {
        environment_id: EnvironmentId,
    },
    DeploymentChanged {
        deployment_id: DeploymentId,
    },
    PolicyChanged {
        policy_id: PolicyId,
    },
    VersionPublished {
        version_id: VersionId,
    },
    RedeployRequested {
        target_id: ReleaseTargetId,
        desired_version_id: Option<VersionId>,
    },
    /// Callback from the job agent
    JobUpdated {
        job_id: JobId,
        status: JobStatus,
        external_run_id: Option<String>,
        message: Option<String>,
    },
}

impl ControlEvent {
    /// Dotted event name used in logs
    pub fn name(&self) -> &'static str {
        match self {
            ControlEvent::ResourceUpserted { .. } => "resource.upserted",
            ControlEvent::ResourceDeleted { .. } => "resource.deleted",
            ControlEvent::EnvironmentChanged { .. } => "environment.changed",
            ControlEvent::DeploymentChanged { .. } => "deployment.changed",
            ControlEvent::PolicyChanged { .. } => "policy.changed",
            ControlEvent::VersionPublished { .. } => "version.published",
            ControlEvent::RedeployRequested { .. } => "redeploy.requested",
            ControlEvent::JobUpdated { .. } => "job.updated",
        }
    }
}

/// Event sources
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EventSource {
    /// Release target resolver
    Targets,
    /// Release manager
    Release,
    /// Policy engine
    Policy,
    /// Job lifecycle
    Jobs,
    /// Control plane
    ControlPlane,
}

/// Envelope wrapping all engine events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineEventEnvelope {
    pub id: Uuid,
    pub timestamp: DateTime<Utc>,
    pub source: EventSource,

    /// Correlation ID for tracing
    pub correlation_id: Option<String>,

    pub event: EngineEvent,
}

impl EngineEventEnvelope {
    pub fn new(source: EventSource, event: EngineEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            timestamp: Utc::now(),
            source,
            correlation_id: None,
            event,
        }
    }

    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }
}

/// Engine events
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum EngineEvent {
    TargetCreated {
        target_id: ReleaseTargetId,
        key: ReleaseTargetKey,
    },
    TargetRemoved {
        target_id: ReleaseTargetId,
        key: ReleaseTargetKey,
    },
    ReleaseCreated {
        target_id: ReleaseTargetId,
        release_id: ReleaseId,
        version_id: VersionId,
    },
    DesiredReleaseChanged {
        target_id: ReleaseTargetId,
        release_id: ReleaseId,
    },
    DecisionRecorded {
        target_id: ReleaseTargetId,
        allowed: bool,
        reason: Option<String>,
    },
    JobCreated {
        job_id: JobId,
        target_id: ReleaseTargetId,
        status: JobStatus,
    },
    JobUpdated {
        job_id: JobId,
        status: JobStatus,
    },

    /// A lock's TTL ran out while its holder was still working
    LockLost {
        key: String,
    },
}

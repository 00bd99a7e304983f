//! Resources, systems, environments and deployments
//!
//! Environments and deployments carry resource selectors; the pair of them
//! decides which resources become release targets.

use crate::ids::{DeploymentId, EnvironmentId, JobAgentId, ResourceId, SystemId, WorkspaceId};
use chrono::{DateTime, Utc};
use ctrlplane_selector::{Condition, DateField, Selectable, TextField};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;

/// A piece of infrastructure something can be deployed to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resource {
    pub id: ResourceId,
    pub workspace_id: WorkspaceId,

    /// Unique per workspace
    pub identifier: String,
    pub name: String,
    pub kind: String,
    pub version: String,
    pub provider_id: Option<String>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    #[serde(default)]
    pub config: serde_json::Value,

    pub created_at: DateTime<Utc>,

    /// Doubles as the last-sync timestamp
    pub updated_at: DateTime<Utc>,

    /// Soft delete marker
    pub deleted_at: Option<DateTime<Utc>>,
}

impl Resource {
    pub fn new(
        workspace_id: WorkspaceId,
        identifier: impl Into<String>,
        name: impl Into<String>,
        kind: impl Into<String>,
        version: impl Into<String>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: ResourceId::generate(),
            workspace_id,
            identifier: identifier.into(),
            name: name.into(),
            kind: kind.into(),
            version: version.into(),
            provider_id: None,
            metadata: BTreeMap::new(),
            config: serde_json::Value::Null,
            created_at: now,
            updated_at: now,
            deleted_at: None,
        }
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
        self.provider_id = Some(provider_id.into());
        self
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted_at.is_some()
    }

    /// Mark the resource deleted
    pub fn soft_delete(&mut self, at: DateTime<Utc>) {
        self.deleted_at = Some(at);
        self.updated_at = at;
    }
}

impl Selectable for Resource {
    fn text(&self, field: TextField) -> Option<Cow<'_, str>> {
        match field {
            TextField::Name => Some(Cow::Borrowed(&self.name)),
            TextField::Identifier => Some(Cow::Borrowed(&self.identifier)),
            TextField::Kind => Some(Cow::Borrowed(&self.kind)),
            TextField::Version => Some(Cow::Borrowed(&self.version)),
            TextField::Provider => self.provider_id.as_deref().map(Cow::Borrowed),
            TextField::Id => Some(Cow::Owned(self.id.as_uuid().to_string())),
            TextField::Tag => None,
        }
    }

    fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    fn date(&self, field: DateField) -> Option<DateTime<Utc>> {
        match field {
            DateField::CreatedAt => Some(self.created_at),
            DateField::LastSync => Some(self.updated_at),
        }
    }
}

/// Grouping of environments and deployments
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct System {
    pub id: SystemId,
    pub workspace_id: WorkspaceId,
    pub name: String,
}

impl System {
    pub fn new(workspace_id: WorkspaceId, name: impl Into<String>) -> Self {
        Self {
            id: SystemId::generate(),
            workspace_id,
            name: name.into(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Environment {
    pub id: EnvironmentId,
    pub system_id: SystemId,
    pub name: String,

    /// Absent selector matches no resources
    pub resource_selector: Option<Condition>,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    pub created_at: DateTime<Utc>,
}

impl Environment {
    pub fn new(system_id: SystemId, name: impl Into<String>) -> Self {
        Self {
            id: EnvironmentId::generate(),
            system_id,
            name: name.into(),
            resource_selector: None,
            metadata: BTreeMap::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_selector(mut self, selector: Condition) -> Self {
        self.resource_selector = Some(selector);
        self
    }

    /// Whether this environment covers the resource
    pub fn matches_resource(&self, resource: &Resource) -> bool {
        if resource.is_deleted() {
            return false;
        }
        ctrlplane_selector::matches_optional(self.resource_selector.as_ref(), resource, false)
    }
}

impl Selectable for Environment {
    fn text(&self, field: TextField) -> Option<Cow<'_, str>> {
        match field {
            TextField::Name => Some(Cow::Borrowed(&self.name)),
            TextField::Id => Some(Cow::Owned(self.id.as_uuid().to_string())),
            _ => None,
        }
    }

    fn metadata(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    fn date(&self, field: DateField) -> Option<DateTime<Utc>> {
        match field {
            DateField::CreatedAt => Some(self.created_at),
            DateField::LastSync => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Deployment {
    pub id: DeploymentId,
    pub system_id: SystemId,
    pub name: String,
    pub slug: String,

    /// Absent selector matches every resource the environment matches
    pub resource_selector: Option<Condition>,

    pub job_agent_id: Option<JobAgentId>,

    #[serde(default)]
    pub job_agent_config: serde_json::Value,

    pub created_at: DateTime<Utc>,
}

impl Deployment {
    pub fn new(system_id: SystemId, name: impl Into<String>, slug: impl Into<String>) -> Self {
        Self {
            id: DeploymentId::generate(),
            system_id,
            name: name.into(),
            slug: slug.into(),
            resource_selector: None,
            job_agent_id: None,
            job_agent_config: serde_json::Value::Null,
            created_at: Utc::now(),
        }
    }

    pub fn with_selector(mut self, selector: Condition) -> Self {
        self.resource_selector = Some(selector);
        self
    }

    pub fn with_job_agent(mut self, job_agent_id: JobAgentId, config: serde_json::Value) -> Self {
        self.job_agent_id = Some(job_agent_id);
        self.job_agent_config = config;
        self
    }

    pub fn matches_resource(&self, resource: &Resource) -> bool {
        if resource.is_deleted() {
            return false;
        }
        ctrlplane_selector::matches_optional(self.resource_selector.as_ref(), resource, true)
    }
}

impl Selectable for Deployment {
    fn text(&self, field: TextField) -> Option<Cow<'_, str>> {
        match field {
            TextField::Name => Some(Cow::Borrowed(&self.name)),
            TextField::Identifier => Some(Cow::Borrowed(&self.slug)),
            TextField::Id => Some(Cow::Owned(self.id.as_uuid().to_string())),
            _ => None,
        }
    }

    fn metadata(&self, _key: &str) -> Option<&str> {
        None
    }

    fn date(&self, field: DateField) -> Option<DateTime<Utc>> {
        match field {
            DateField::CreatedAt => Some(self.created_at),
            DateField::LastSync => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn resource() -> Resource {
        Resource::new(WorkspaceId::generate(), "r1", "r1", "Cluster", "v1")
            .with_metadata("env", "prod")
    }

    #[test]
    fn test_environment_without_selector_matches_nothing() {
        let env = Environment::new(SystemId::generate(), "e1");
        assert!(!env.matches_resource(&resource()));
    }

    #[test]
    fn test_deployment_without_selector_matches_everything() {
        let deployment = Deployment::new(SystemId::generate(), "d1", "d1");
        assert!(deployment.matches_resource(&resource()));
    }

    #[test]
    fn test_deleted_resource_matches_nothing() {
        let env = Environment::new(SystemId::generate(), "e1")
            .with_selector(Condition::metadata_equals("env", "prod"));
        let deployment = Deployment::new(SystemId::generate(), "d1", "d1");

        let mut r = resource();
        assert!(env.matches_resource(&r));
        r.soft_delete(Utc::now());
        assert!(!env.matches_resource(&r));
        assert!(!deployment.matches_resource(&r));
    }

    #[test]
    fn test_resource_last_sync_is_updated_at() {
        let r = resource();
        assert_eq!(r.date(DateField::LastSync), Some(r.updated_at));
        assert!(r.text(TextField::Tag).is_none());
        assert!(r.text(TextField::Provider).is_none());
    }
}

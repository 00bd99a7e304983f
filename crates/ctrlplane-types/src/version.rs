//! Deployment versions

use crate::ids::{DeploymentId, VersionId};
use chrono::{DateTime, Utc};
use ctrlplane_selector::{DateField, Selectable, TextField};
use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::collections::BTreeMap;
use std::fmt;

/// Build status of a version
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VersionStatus {
    Building,
    Ready,
    Failed,
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionStatus::Building => write!(f, "building"),
            VersionStatus::Ready => write!(f, "ready"),
            VersionStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Immutable deployable artifact scoped to a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentVersion {
    pub id: VersionId,
    pub deployment_id: DeploymentId,
    pub tag: String,
    pub name: String,

    #[serde(default)]
    pub config: serde_json::Value,

    #[serde(default)]
    pub metadata: BTreeMap<String, String>,

    pub status: VersionStatus,
    pub created_at: DateTime<Utc>,
}

impl DeploymentVersion {
    /// Create a ready version
    pub fn new(deployment_id: DeploymentId, tag: impl Into<String>) -> Self {
        let tag = tag.into();
        Self {
            id: VersionId::generate(),
            deployment_id,
            name: tag.clone(),
            tag,
            config: serde_json::Value::Null,
            metadata: BTreeMap::new(),
            status: VersionStatus::Ready,
            created_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: VersionStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_created_at(mut self, created_at: DateTime<Utc>) -> Self {
        self.created_at = created_at;
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn is_ready(&self) -> bool {
        self.status == VersionStatus::Ready
    }
}

impl Selectable for DeploymentVersion {
    fn text(&self, field: TextField) -> Option<Cow<'_, str>> {
        match field {
            TextField::Name => Some(Cow::Borrowed(&self.name)),
            TextField::Tag | TextField::Version => Some(Cow::Borrowed(&self.tag)),
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

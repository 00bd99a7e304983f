//! Variable declarations at resource, deployment and system level

use crate::ids::{DeploymentId, ResourceId, SystemId, VariableSetId};
use ctrlplane_selector::Condition;
use serde::{Deserialize, Serialize};

/// A stored variable value
///
/// Sensitive values are kept as ciphertext and only decrypted when a release
/// is resolved.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "value", rename_all = "snake_case")]
pub enum VariableValue {
    Plain(serde_json::Value),
    Encrypted(String),
}

impl VariableValue {
    pub fn plain(value: impl Into<serde_json::Value>) -> Self {
        Self::Plain(value.into())
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, Self::Encrypted(_))
    }
}

/// Per-resource override
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceVariable {
    pub resource_id: ResourceId,
    pub key: String,
    pub value: VariableValue,
    #[serde(default)]
    pub sensitive: bool,
}

/// One candidate value of a deployment variable
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentVariableValue {
    pub value: VariableValue,

    /// Resources this value applies to; absent applies to none
    pub resource_selector: Option<Condition>,

    #[serde(default)]
    pub sensitive: bool,
}

/// A variable declared by a deployment
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeploymentVariable {
    pub deployment_id: DeploymentId,
    pub key: String,
    #[serde(default)]
    pub description: String,

    pub default_value: Option<VariableValue>,

    /// Checked in order; first matching selector wins
    #[serde(default)]
    pub values: Vec<DeploymentVariableValue>,

    #[serde(default)]
    pub sensitive: bool,
}

impl DeploymentVariable {
    pub fn new(deployment_id: DeploymentId, key: impl Into<String>) -> Self {
        Self {
            deployment_id,
            key: key.into(),
            description: String::new(),
            default_value: None,
            values: Vec::new(),
            sensitive: false,
        }
    }

    pub fn with_default(mut self, value: VariableValue) -> Self {
        self.default_value = Some(value);
        self
    }

    pub fn with_value(mut self, value: VariableValue, selector: Condition) -> Self {
        self.values.push(DeploymentVariableValue {
            value,
            resource_selector: Some(selector),
            sensitive: false,
        });
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSetValue {
    pub key: String,
    pub value: VariableValue,
    #[serde(default)]
    pub sensitive: bool,
}

/// Ordered key/value set attached to a system
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VariableSet {
    pub id: VariableSetId,
    pub system_id: SystemId,
    pub name: String,

    /// Lower sorts first
    pub position: i32,

    pub values: Vec<VariableSetValue>,
}

impl VariableSet {
    pub fn new(system_id: SystemId, name: impl Into<String>, position: i32) -> Self {
        Self {
            id: VariableSetId::generate(),
            system_id,
            name: name.into(),
            position,
            values: Vec::new(),
        }
    }

    pub fn with_value(mut self, key: impl Into<String>, value: VariableValue) -> Self {
        self.values.push(VariableSetValue {
            key: key.into(),
            value,
            sensitive: false,
        });
        self
    }

    pub fn get(&self, key: &str) -> Option<&VariableSetValue> {
        self.values.iter().find(|v| v.key == key)
    }
}

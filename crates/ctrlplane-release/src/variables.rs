//! Variable resolution and release digests

use crate::cipher::VariableCipher;
use crate::error::{ReleaseError, Result};
use ctrlplane_selector::matches_optional;
use ctrlplane_types::{
    DeploymentVariable, Resource, ResolvedVariable, ResourceVariable, VariableSet, VariableValue,
};
use serde_json::Value;
use sha2::{Digest, Sha256};

/// Everything variable resolution reads for one release target
#[derive(Debug, Clone, Copy)]
pub struct VariableSources<'a> {
    pub resource: &'a Resource,
    pub resource_variables: &'a [ResourceVariable],
    pub deployment_variables: &'a [DeploymentVariable],

    /// Ordered by position
    pub variable_sets: &'a [VariableSet],
}

/// Resolve every variable the deployment declares
///
/// For each key the first defined value wins, in this order: the resource's
/// own override, the first deployment value whose selector matches the
/// resource, the deployment default, then the system variable sets in order.
/// Keys with no value anywhere are left out. The result is sorted by key.
pub fn resolve_variables(sources: &VariableSources<'_>) -> Vec<ResolvedVariable> {
    let mut resolved: Vec<ResolvedVariable> = sources
        .deployment_variables
        .iter()
        .filter_map(|declared| resolve_one(sources, declared))
        .collect();
    resolved.sort_by(|a, b| a.key.cmp(&b.key));
    resolved.dedup_by(|a, b| a.key == b.key);
    resolved
}

fn resolve_one(
    sources: &VariableSources<'_>,
    declared: &DeploymentVariable,
) -> Option<ResolvedVariable> {
    let key = declared.key.as_str();
    let resolved = |value: &VariableValue, sensitive: bool| ResolvedVariable {
        key: key.to_string(),
        value: value.clone(),
        sensitive: sensitive || declared.sensitive,
    };

    if let Some(own) = sources.resource_variables.iter().find(|v| v.key == key) {
        return Some(resolved(&own.value, own.sensitive));
    }

    if let Some(guarded) = declared
        .values
        .iter()
        .find(|v| matches_optional(v.resource_selector.as_ref(), sources.resource, false))
    {
        return Some(resolved(&guarded.value, guarded.sensitive));
    }

    if let Some(default) = &declared.default_value {
        return Some(resolved(default, false));
    }

    sources
        .variable_sets
        .iter()
        .find_map(|set| set.get(key))
        .map(|v| resolved(&v.value, v.sensitive))
}

/// Plaintext of a stored value
pub fn reveal(value: &VariableValue, key: &str, cipher: Option<&VariableCipher>) -> Result<Value> {
    match value {
        VariableValue::Plain(v) => Ok(v.clone()),
        VariableValue::Encrypted(sealed) => cipher
            .ok_or_else(|| ReleaseError::MissingKey(key.to_string()))?
            .decrypt(sealed),
    }
}

/// Hex SHA-256 over the sorted plaintext key/value pairs
pub fn digest(plaintext: &[(String, Value)]) -> String {
    let mut pairs: Vec<&(String, Value)> = plaintext.iter().collect();
    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    let mut hasher = Sha256::new();
    for (key, value) in pairs {
        hasher.update(key.as_bytes());
        hasher.update([0u8]);
        hasher.update(value.to_string().as_bytes());
        hasher.update([0u8]);
    }
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrlplane_selector::Condition;
    use ctrlplane_types::{DeploymentId, SystemId, WorkspaceId};
    use serde_json::json;

    fn resource() -> Resource {
        Resource::new(WorkspaceId::generate(), "cluster-1", "cluster-1", "Cluster", "v1")
            .with_metadata("region", "eu")
    }

    #[test]
    fn test_resource_override_beats_system_default() {
        let resource = resource();
        let deployment = DeploymentId::generate();
        let overrides = vec![ResourceVariable {
            resource_id: resource.id,
            key: "replicas".into(),
            value: VariableValue::plain(5),
            sensitive: false,
        }];
        let declared = vec![DeploymentVariable::new(deployment, "replicas")];
        let sets = vec![VariableSet::new(SystemId::generate(), "defaults", 0)
            .with_value("replicas", VariableValue::plain(1))];

        let resolved = resolve_variables(&VariableSources {
            resource: &resource,
            resource_variables: &overrides,
            deployment_variables: &declared,
            variable_sets: &sets,
        });
        assert_eq!(resolved.len(), 1);
        assert_eq!(resolved[0].value, VariableValue::plain(5));

        let resolved = resolve_variables(&VariableSources {
            resource: &resource,
            resource_variables: &[],
            deployment_variables: &declared,
            variable_sets: &sets,
        });
        assert_eq!(resolved[0].value, VariableValue::plain(1));
    }

    #[test]
    fn test_guarded_value_then_default() {
        let resource = resource();
        let declared = vec![DeploymentVariable::new(DeploymentId::generate(), "endpoint")
            .with_default(VariableValue::plain("https://global"))
            .with_value(
                VariableValue::plain("https://us"),
                Condition::metadata_equals("region", "us"),
            )
            .with_value(
                VariableValue::plain("https://eu"),
                Condition::metadata_equals("region", "eu"),
            )];

        let sources = VariableSources {
            resource: &resource,
            resource_variables: &[],
            deployment_variables: &declared,
            variable_sets: &[],
        };
        assert_eq!(resolve_variables(&sources)[0].value, VariableValue::plain("https://eu"));

        let elsewhere = Resource::new(WorkspaceId::generate(), "c2", "c2", "Cluster", "v1");
        let sources = VariableSources {
            resource: &elsewhere,
            ..sources
        };
        assert_eq!(
            resolve_variables(&sources)[0].value,
            VariableValue::plain("https://global")
        );
    }

    #[test]
    fn test_variable_sets_in_order_and_missing_keys_dropped() {
        let resource = resource();
        let system = SystemId::generate();
        let declared = vec![
            DeploymentVariable::new(DeploymentId::generate(), "b"),
            DeploymentVariable::new(DeploymentId::generate(), "a"),
            DeploymentVariable::new(DeploymentId::generate(), "undefined"),
        ];
        let sets = vec![
            VariableSet::new(system, "first", 0).with_value("a", VariableValue::plain("first")),
            VariableSet::new(system, "second", 1)
                .with_value("a", VariableValue::plain("second"))
                .with_value("b", VariableValue::plain("second")),
        ];

        let resolved = resolve_variables(&VariableSources {
            resource: &resource,
            resource_variables: &[],
            deployment_variables: &declared,
            variable_sets: &sets,
        });
        let keys: Vec<&str> = resolved.iter().map(|v| v.key.as_str()).collect();
        assert_eq!(keys, vec!["a", "b"]);
        assert_eq!(resolved[0].value, VariableValue::plain("first"));
        assert_eq!(resolved[1].value, VariableValue::plain("second"));
    }

    #[test]
    fn test_sensitivity_inherited_from_declaration() {
        let resource = resource();
        let mut declared = DeploymentVariable::new(DeploymentId::generate(), "token")
            .with_default(VariableValue::plain("abc"));
        declared.sensitive = true;

        let resolved = resolve_variables(&VariableSources {
            resource: &resource,
            resource_variables: &[],
            deployment_variables: &[declared],
            variable_sets: &[],
        });
        assert!(resolved[0].sensitive);
    }

    #[test]
    fn test_digest_is_order_independent() {
        let a = vec![("x".to_string(), json!(1)), ("y".to_string(), json!("two"))];
        let b = vec![("y".to_string(), json!("two")), ("x".to_string(), json!(1))];
        assert_eq!(digest(&a), digest(&b));
        assert_eq!(digest(&a).len(), 64);

        let c = vec![("x".to_string(), json!(2)), ("y".to_string(), json!("two"))];
        assert_ne!(digest(&a), digest(&c));
    }

    #[test]
    fn test_reveal_requires_key_for_ciphertext() {
        let cipher = VariableCipher::new([3u8; 32]);
        let sealed = VariableValue::Encrypted(cipher.encrypt(&json!("s3cret")).unwrap());

        assert_eq!(reveal(&sealed, "token", Some(&cipher)).unwrap(), json!("s3cret"));
        assert!(matches!(
            reveal(&sealed, "token", None),
            Err(ReleaseError::MissingKey(_))
        ));
    }
}

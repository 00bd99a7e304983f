//! Condition tree types
//!
//! A condition is either a leaf comparing one field of a candidate against a
//! value, or a comparison combining child conditions with AND/OR. Trees are
//! serialized as tagged JSON objects:
//!
//! ```json
//! { "type": "comparison", "operator": "and", "conditions": [
//!     { "type": "metadata", "key": "env", "operator": "equals", "value": "prod" },
//!     { "type": "kind", "operator": "equals", "value": "Cluster" }
//! ] }
//! ```

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Maximum nesting depth of comparison conditions (root comparison is depth 0)
pub const MAX_COMPARISON_DEPTH: usize = 2;

/// A selector condition tree
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum Condition {
    /// Match on the candidate's display name
    Name(TextCondition),

    /// Match on a resource identifier
    Identifier(TextCondition),

    /// Match on a resource kind
    Kind(TextCondition),

    /// Match on a resource (API) version
    Version(TextCondition),

    /// Match on the provider that owns a resource
    Provider(TextCondition),

    /// Match on the candidate's id
    Id(TextCondition),

    /// Match on a deployment version tag
    Tag(TextCondition),

    /// Match on a metadata entry
    Metadata(MetadataCondition),

    /// Match on creation time
    CreatedAt(DateCondition),

    /// Match on the time the candidate was last synced
    LastSync(DateCondition),

    /// Combine child conditions
    Comparison(ComparisonCondition),
}

/// Operators for text fields
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TextOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
}

/// Leaf condition on a text field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TextCondition {
    pub operator: TextOperator,
    pub value: String,
}

/// Operators for metadata entries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum MetadataOperator {
    Equals,
    Contains,
    StartsWith,
    EndsWith,
    Regex,
    /// Matches when the key is absent
    Null,
}

/// Leaf condition on a metadata entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataCondition {
    pub key: String,
    pub operator: MetadataOperator,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub value: Option<String>,
}

/// Operators for timestamps
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum DateOperator {
    Before,
    After,
    BeforeOrOn,
    AfterOrOn,
}

/// Leaf condition on a timestamp field
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateCondition {
    pub operator: DateOperator,
    pub value: DateTime<Utc>,
}

/// Logical operator of a comparison
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogicalOperator {
    And,
    Or,
}

/// Composite condition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComparisonCondition {
    pub operator: LogicalOperator,
    #[serde(default)]
    pub not: bool,
    #[serde(default)]
    pub conditions: Vec<Condition>,
}

/// Text fields a candidate may expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TextField {
    Name,
    Identifier,
    Kind,
    Version,
    Provider,
    Id,
    Tag,
}

impl TextField {
    pub fn as_str(&self) -> &'static str {
        match self {
            TextField::Name => "name",
            TextField::Identifier => "identifier",
            TextField::Kind => "kind",
            TextField::Version => "version",
            TextField::Provider => "provider",
            TextField::Id => "id",
            TextField::Tag => "tag",
        }
    }
}

/// Timestamp fields a candidate may expose
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DateField {
    CreatedAt,
    LastSync,
}

impl Condition {
    /// `metadata[key] == value`
    pub fn metadata_equals(key: impl Into<String>, value: impl Into<String>) -> Self {
        Condition::Metadata(MetadataCondition {
            key: key.into(),
            operator: MetadataOperator::Equals,
            value: Some(value.into()),
        })
    }

    /// `metadata[key]` is absent
    pub fn metadata_null(key: impl Into<String>) -> Self {
        Condition::Metadata(MetadataCondition {
            key: key.into(),
            operator: MetadataOperator::Null,
            value: None,
        })
    }

    pub fn name(operator: TextOperator, value: impl Into<String>) -> Self {
        Condition::Name(TextCondition {
            operator,
            value: value.into(),
        })
    }

    pub fn kind_equals(value: impl Into<String>) -> Self {
        Condition::Kind(TextCondition {
            operator: TextOperator::Equals,
            value: value.into(),
        })
    }

    pub fn identifier(operator: TextOperator, value: impl Into<String>) -> Self {
        Condition::Identifier(TextCondition {
            operator,
            value: value.into(),
        })
    }

    pub fn tag(operator: TextOperator, value: impl Into<String>) -> Self {
        Condition::Tag(TextCondition {
            operator,
            value: value.into(),
        })
    }

    pub fn created_at(operator: DateOperator, value: DateTime<Utc>) -> Self {
        Condition::CreatedAt(DateCondition { operator, value })
    }

    pub fn and(conditions: Vec<Condition>) -> Self {
        Condition::Comparison(ComparisonCondition {
            operator: LogicalOperator::And,
            not: false,
            conditions,
        })
    }

    pub fn or(conditions: Vec<Condition>) -> Self {
        Condition::Comparison(ComparisonCondition {
            operator: LogicalOperator::Or,
            not: false,
            conditions,
        })
    }

    /// Negate a comparison; leaves are wrapped in a single-child AND first
    pub fn negate(self) -> Self {
        match self {
            Condition::Comparison(mut comparison) => {
                comparison.not = !comparison.not;
                Condition::Comparison(comparison)
            }
            leaf => Condition::Comparison(ComparisonCondition {
                operator: LogicalOperator::And,
                not: true,
                conditions: vec![leaf],
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_condition_json_shape() {
        let condition = Condition::and(vec![
            Condition::metadata_equals("env", "prod"),
            Condition::kind_equals("Cluster"),
        ]);

        let json = serde_json::to_value(&condition).unwrap();
        assert_eq!(json["type"], "comparison");
        assert_eq!(json["operator"], "and");
        assert_eq!(json["conditions"][0]["type"], "metadata");
        assert_eq!(json["conditions"][0]["key"], "env");
        assert_eq!(json["conditions"][1]["operator"], "equals");

        let parsed: Condition = serde_json::from_value(json).unwrap();
        assert_eq!(parsed, condition);
    }

    #[test]
    fn test_parse_kebab_case_operators() {
        let json = r#"{
            "type": "created-at",
            "operator": "before-or-on",
            "value": "2024-01-01T00:00:00Z"
        }"#;
        let parsed: Condition = serde_json::from_str(json).unwrap();
        assert!(matches!(
            parsed,
            Condition::CreatedAt(DateCondition {
                operator: DateOperator::BeforeOrOn,
                ..
            })
        ));
    }

    #[test]
    fn test_negate_leaf_wraps_in_comparison() {
        let negated = Condition::kind_equals("Pod").negate();
        match negated {
            Condition::Comparison(c) => {
                assert!(c.not);
                assert_eq!(c.conditions.len(), 1);
            }
            other => panic!("expected comparison, got {:?}", other),
        }
    }
}

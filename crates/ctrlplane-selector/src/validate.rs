//! Write-time validation of condition trees
//!
//! Evaluation never fails, so anything that would make a tree meaningless is
//! rejected here before the tree is stored.

use crate::condition::{
    Condition, MetadataOperator, TextCondition, TextOperator, MAX_COMPARISON_DEPTH,
};
use crate::error::{Result, SelectorError};
use regex::Regex;

impl Condition {
    /// Validate the tree, returning the first problem found
    pub fn validate(&self) -> Result<()> {
        validate_at(self, 0)
    }
}

fn validate_at(condition: &Condition, depth: usize) -> Result<()> {
    match condition {
        Condition::Name(c) => validate_text("name", c),
        Condition::Identifier(c) => validate_text("identifier", c),
        Condition::Kind(c) => validate_text("kind", c),
        Condition::Version(c) => validate_text("version", c),
        Condition::Provider(c) => validate_text("provider", c),
        Condition::Id(c) => validate_text("id", c),
        Condition::Tag(c) => validate_text("tag", c),
        Condition::Metadata(c) => {
            if c.key.trim().is_empty() {
                return Err(SelectorError::EmptyMetadataKey);
            }
            if c.operator == MetadataOperator::Null {
                return Ok(());
            }
            let value = match c.value.as_deref() {
                Some(v) if !v.is_empty() => v,
                _ => return Err(SelectorError::MissingValue { field: "metadata" }),
            };
            if c.operator == MetadataOperator::Regex {
                compile(value)?;
            }
            Ok(())
        }
        Condition::CreatedAt(_) | Condition::LastSync(_) => Ok(()),
        Condition::Comparison(c) => {
            if depth > MAX_COMPARISON_DEPTH {
                return Err(SelectorError::TooDeep {
                    depth,
                    max: MAX_COMPARISON_DEPTH,
                });
            }
            c.conditions
                .iter()
                .try_for_each(|child| validate_at(child, depth + 1))
        }
    }
}

fn validate_text(field: &'static str, c: &TextCondition) -> Result<()> {
    if c.value.is_empty() {
        return Err(SelectorError::MissingValue { field });
    }
    if c.operator == TextOperator::Regex {
        compile(&c.value)?;
    }
    Ok(())
}

fn compile(pattern: &str) -> Result<Regex> {
    Regex::new(pattern).map_err(|e| SelectorError::InvalidRegex {
        pattern: pattern.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_valid_tree() {
        let tree = Condition::and(vec![
            Condition::metadata_equals("env", "prod"),
            Condition::or(vec![
                Condition::kind_equals("Cluster"),
                Condition::name(TextOperator::Regex, "^api-.*$"),
            ]),
        ]);
        assert!(tree.validate().is_ok());
    }

    #[test]
    fn test_depth_limit() {
        // Three nested comparisons below the root is too deep.
        let deep = Condition::and(vec![Condition::or(vec![Condition::and(vec![
            Condition::or(vec![Condition::kind_equals("Pod")]),
        ])])]);
        assert!(matches!(
            deep.validate(),
            Err(SelectorError::TooDeep { depth: 3, max: 2 })
        ));

        let ok = Condition::and(vec![Condition::or(vec![Condition::and(vec![
            Condition::kind_equals("Pod"),
        ])])]);
        assert!(ok.validate().is_ok());
    }

    #[test]
    fn test_empty_metadata_key() {
        assert_eq!(
            Condition::metadata_equals("  ", "x").validate(),
            Err(SelectorError::EmptyMetadataKey)
        );
    }

    #[test]
    fn test_missing_values() {
        assert_eq!(
            Condition::kind_equals("").validate(),
            Err(SelectorError::MissingValue { field: "kind" })
        );

        let no_value = Condition::Metadata(crate::condition::MetadataCondition {
            key: "env".into(),
            operator: MetadataOperator::Equals,
            value: None,
        });
        assert_eq!(
            no_value.validate(),
            Err(SelectorError::MissingValue { field: "metadata" })
        );

        assert!(Condition::metadata_null("env").validate().is_ok());
    }

    #[test]
    fn test_invalid_regex() {
        let err = Condition::tag(TextOperator::Regex, "v(1").validate().unwrap_err();
        assert!(matches!(err, SelectorError::InvalidRegex { .. }));
    }
}

//! Condition evaluation
//!
//! Evaluation is pure and total. A leaf whose field is missing on the
//! candidate evaluates to false; an invalid regex (which validation should
//! already have rejected) also evaluates to false.

use crate::condition::{
    ComparisonCondition, Condition, DateCondition, DateField, DateOperator, LogicalOperator,
    MetadataCondition, MetadataOperator, TextCondition, TextField, TextOperator,
};
use chrono::{DateTime, Utc};
use regex::Regex;
use std::borrow::Cow;
use std::collections::HashMap;
use std::sync::{LazyLock, Mutex};

/// Patterns compiled so far; `None` marks a pattern that failed to compile
static REGEX_CACHE: LazyLock<Mutex<HashMap<String, Option<Regex>>>> =
    LazyLock::new(|| Mutex::new(HashMap::new()));

/// Entries kept before the cache is cleared
const REGEX_CACHE_CAPACITY: usize = 1024;

/// Anything a condition tree can be evaluated against
pub trait Selectable {
    /// Text field value, `None` when the candidate has no such field
    fn text(&self, field: TextField) -> Option<Cow<'_, str>>;

    /// Metadata lookup
    fn metadata(&self, key: &str) -> Option<&str>;

    /// Timestamp field value
    fn date(&self, field: DateField) -> Option<DateTime<Utc>>;
}

impl Condition {
    /// Evaluate this condition against a candidate
    pub fn matches<T: Selectable + ?Sized>(&self, candidate: &T) -> bool {
        match self {
            Condition::Name(c) => text_matches(c, candidate.text(TextField::Name)),
            Condition::Identifier(c) => text_matches(c, candidate.text(TextField::Identifier)),
            Condition::Kind(c) => text_matches(c, candidate.text(TextField::Kind)),
            Condition::Version(c) => text_matches(c, candidate.text(TextField::Version)),
            Condition::Provider(c) => text_matches(c, candidate.text(TextField::Provider)),
            Condition::Id(c) => text_matches(c, candidate.text(TextField::Id)),
            Condition::Tag(c) => text_matches(c, candidate.text(TextField::Tag)),
            Condition::Metadata(c) => metadata_matches(c, candidate),
            Condition::CreatedAt(c) => date_matches(c, candidate.date(DateField::CreatedAt)),
            Condition::LastSync(c) => date_matches(c, candidate.date(DateField::LastSync)),
            Condition::Comparison(c) => comparison_matches(c, candidate),
        }
    }

    /// Keep only the candidates this condition matches
    pub fn filter<'a, T, I>(&self, candidates: I) -> Vec<&'a T>
    where
        T: Selectable + 'a,
        I: IntoIterator<Item = &'a T>,
    {
        candidates.into_iter().filter(|c| self.matches(*c)).collect()
    }
}

/// Evaluate an optional selector, using `when_absent` if there is none
pub fn matches_optional<T: Selectable + ?Sized>(
    selector: Option<&Condition>,
    candidate: &T,
    when_absent: bool,
) -> bool {
    match selector {
        Some(condition) => condition.matches(candidate),
        None => when_absent,
    }
}

fn comparison_matches<T: Selectable + ?Sized>(c: &ComparisonCondition, candidate: &T) -> bool {
    // Empty composites are false for both operators, regardless of `not`.
    if c.conditions.is_empty() {
        return false;
    }

    let result = match c.operator {
        LogicalOperator::And => c.conditions.iter().all(|child| child.matches(candidate)),
        LogicalOperator::Or => c.conditions.iter().any(|child| child.matches(candidate)),
    };

    result != c.not
}

fn text_matches(c: &TextCondition, field: Option<Cow<'_, str>>) -> bool {
    match field {
        Some(value) => apply_text_operator(c.operator, &value, &c.value),
        None => false,
    }
}

fn apply_text_operator(operator: TextOperator, actual: &str, expected: &str) -> bool {
    match operator {
        TextOperator::Equals => actual == expected,
        TextOperator::Contains => actual.contains(expected),
        TextOperator::StartsWith => actual.starts_with(expected),
        TextOperator::EndsWith => actual.ends_with(expected),
        TextOperator::Regex => cached_regex(expected).is_some_and(|re| re.is_match(actual)),
    }
}

/// Compile a pattern once and share it between evaluations
fn cached_regex(pattern: &str) -> Option<Regex> {
    let mut cache = REGEX_CACHE.lock().unwrap_or_else(|e| e.into_inner());
    if let Some(compiled) = cache.get(pattern) {
        return compiled.clone();
    }
    if cache.len() >= REGEX_CACHE_CAPACITY {
        cache.clear();
    }
    let compiled = Regex::new(pattern).ok();
    cache.insert(pattern.to_string(), compiled.clone());
    compiled
}

fn metadata_matches<T: Selectable + ?Sized>(c: &MetadataCondition, candidate: &T) -> bool {
    let actual = candidate.metadata(&c.key);

    let operator = match c.operator {
        MetadataOperator::Null => return actual.is_none(),
        MetadataOperator::Equals => TextOperator::Equals,
        MetadataOperator::Contains => TextOperator::Contains,
        MetadataOperator::StartsWith => TextOperator::StartsWith,
        MetadataOperator::EndsWith => TextOperator::EndsWith,
        MetadataOperator::Regex => TextOperator::Regex,
    };

    match (actual, c.value.as_deref()) {
        (Some(actual), Some(expected)) => apply_text_operator(operator, actual, expected),
        _ => false,
    }
}

fn date_matches(c: &DateCondition, field: Option<DateTime<Utc>>) -> bool {
    let Some(actual) = field else {
        return false;
    };

    match c.operator {
        DateOperator::Before => actual < c.value,
        DateOperator::After => actual > c.value,
        DateOperator::BeforeOrOn => actual <= c.value,
        DateOperator::AfterOrOn => actual >= c.value,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::condition::{ComparisonCondition, LogicalOperator};
    use chrono::TimeZone;
    use std::collections::HashMap;

    #[derive(Debug, Default)]
    struct Candidate {
        name: Option<String>,
        kind: Option<String>,
        tag: Option<String>,
        metadata: HashMap<String, String>,
        created_at: Option<DateTime<Utc>>,
    }

    impl Selectable for Candidate {
        fn text(&self, field: TextField) -> Option<Cow<'_, str>> {
            match field {
                TextField::Name => self.name.as_deref().map(Cow::Borrowed),
                TextField::Kind => self.kind.as_deref().map(Cow::Borrowed),
                TextField::Tag => self.tag.as_deref().map(Cow::Borrowed),
                _ => None,
            }
        }

        fn metadata(&self, key: &str) -> Option<&str> {
            self.metadata.get(key).map(String::as_str)
        }

        fn date(&self, field: DateField) -> Option<DateTime<Utc>> {
            match field {
                DateField::CreatedAt => self.created_at,
                DateField::LastSync => None,
            }
        }
    }

    fn prod_cluster() -> Candidate {
        Candidate {
            name: Some("api-cluster-1".into()),
            kind: Some("Cluster".into()),
            metadata: HashMap::from([("env".to_string(), "prod".to_string())]),
            created_at: Some(Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap()),
            ..Default::default()
        }
    }

    #[test]
    fn test_metadata_equals() {
        let candidate = prod_cluster();
        assert!(Condition::metadata_equals("env", "prod").matches(&candidate));
        assert!(!Condition::metadata_equals("env", "staging").matches(&candidate));
        assert!(!Condition::metadata_equals("region", "eu").matches(&candidate));
    }

    #[test]
    fn test_metadata_null_matches_absent_key_only() {
        let candidate = prod_cluster();
        assert!(Condition::metadata_null("region").matches(&candidate));
        assert!(!Condition::metadata_null("env").matches(&candidate));
    }

    #[test]
    fn test_text_operators() {
        let candidate = prod_cluster();
        assert!(Condition::name(TextOperator::StartsWith, "api-").matches(&candidate));
        assert!(Condition::name(TextOperator::EndsWith, "-1").matches(&candidate));
        assert!(Condition::name(TextOperator::Contains, "cluster").matches(&candidate));
        assert!(Condition::name(TextOperator::Regex, r"^api-cluster-\d+$").matches(&candidate));
        assert!(!Condition::name(TextOperator::Equals, "api").matches(&candidate));
    }

    #[test]
    fn test_missing_field_is_false() {
        let candidate = prod_cluster();
        assert!(!Condition::tag(TextOperator::StartsWith, "").matches(&candidate));
        assert!(!Condition::Identifier(TextCondition {
            operator: TextOperator::Contains,
            value: "x".into()
        })
        .matches(&candidate));
    }

    #[test]
    fn test_invalid_regex_is_false_not_panic() {
        let candidate = prod_cluster();
        assert!(!Condition::name(TextOperator::Regex, "(unclosed").matches(&candidate));
    }

    #[test]
    fn test_regex_compiled_once_per_pattern() {
        let pattern = r"^cache-test-\d+$";
        let condition = Condition::name(TextOperator::Regex, pattern);
        let named = |name: &str| Candidate {
            name: Some(name.into()),
            ..Default::default()
        };
        assert!(condition.matches(&named("cache-test-1")));
        assert!(!condition.matches(&named("cache-test-x")));

        let cache = REGEX_CACHE.lock().unwrap();
        assert!(cache.get(pattern).is_some_and(|compiled| compiled.is_some()));
    }

    #[test]
    fn test_date_operators() {
        let candidate = prod_cluster();
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 0, 0).unwrap();
        assert!(Condition::created_at(DateOperator::BeforeOrOn, at).matches(&candidate));
        assert!(Condition::created_at(DateOperator::AfterOrOn, at).matches(&candidate));
        assert!(!Condition::created_at(DateOperator::Before, at).matches(&candidate));
        assert!(!Condition::created_at(DateOperator::After, at).matches(&candidate));
    }

    #[test]
    fn test_and_or_not() {
        let candidate = prod_cluster();
        let prod = Condition::metadata_equals("env", "prod");
        let pod = Condition::kind_equals("Pod");

        assert!(!Condition::and(vec![prod.clone(), pod.clone()]).matches(&candidate));
        assert!(Condition::or(vec![prod.clone(), pod.clone()]).matches(&candidate));
        assert!(Condition::and(vec![prod, pod]).negate().matches(&candidate));
    }

    #[test]
    fn test_empty_composite_is_false_for_and_and_or() {
        let candidate = prod_cluster();
        assert!(!Condition::and(vec![]).matches(&candidate));
        assert!(!Condition::or(vec![]).matches(&candidate));

        let negated_empty = Condition::Comparison(ComparisonCondition {
            operator: LogicalOperator::And,
            not: true,
            conditions: vec![],
        });
        assert!(!negated_empty.matches(&candidate));
    }

    #[test]
    fn test_filter_and_optional() {
        let a = prod_cluster();
        let b = Candidate {
            kind: Some("Pod".into()),
            ..Default::default()
        };
        let candidates = vec![a, b];

        let clusters = Condition::kind_equals("Cluster").filter(candidates.iter());
        assert_eq!(clusters.len(), 1);

        assert!(matches_optional(None, &candidates[1], true));
        assert!(!matches_optional(None, &candidates[1], false));
    }
}

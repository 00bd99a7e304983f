//! Version restriction rules: selector, regex pattern and semver range

use super::{ReleaseRule, RuleOutcome};
use crate::error::{Result, RuleError};
use crate::snapshot::EvaluationSnapshot;
use ctrlplane_selector::Condition;
use ctrlplane_types::DeploymentVersion;
use regex::Regex;
use semver::{Version, VersionReq};
use std::sync::OnceLock;

const PRERELEASE_PATTERN: &str = r"(?i)-(alpha|beta|rc|dev|test)";

/// Whether a tag carries a pre-release marker
pub fn is_prerelease(tag: &str) -> bool {
    static PATTERN: OnceLock<Option<Regex>> = OnceLock::new();
    PATTERN
        .get_or_init(|| Regex::new(PRERELEASE_PATTERN).ok())
        .as_ref()
        .map_or(false, |re| re.is_match(tag))
}

fn prerelease_rejection(version: &DeploymentVersion) -> String {
    format!("PrereleaseExcluded: {} is a pre-release", version.tag)
}

/// Restricts candidates to versions matching a condition tree
#[derive(Debug, Clone)]
pub struct VersionSelectorRule {
    condition: Condition,
}

impl VersionSelectorRule {
    pub fn new(condition: Condition) -> Result<Self> {
        condition.validate()?;
        Ok(Self { condition })
    }
}

impl ReleaseRule for VersionSelectorRule {
    fn kind(&self) -> &'static str {
        "version-selector"
    }

    fn filter(
        &self,
        _snapshot: &EvaluationSnapshot,
        candidates: Vec<DeploymentVersion>,
    ) -> RuleOutcome {
        RuleOutcome::partition(candidates, |version| {
            (!self.condition.matches(version)).then(|| {
                format!("VersionSelectorMismatch: {} does not match the selector", version.tag)
            })
        })
    }
}

/// Restricts candidates to tags matching a regex
#[derive(Debug, Clone)]
pub struct VersionPatternRule {
    pattern: Regex,
    exclude_prerelease: bool,
}

impl VersionPatternRule {
    pub fn new(pattern: &str, exclude_prerelease: bool) -> Result<Self> {
        let pattern = Regex::new(pattern).map_err(|e| RuleError::InvalidPattern {
            pattern: pattern.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            pattern,
            exclude_prerelease,
        })
    }
}

impl ReleaseRule for VersionPatternRule {
    fn kind(&self) -> &'static str {
        "version-pattern"
    }

    fn filter(
        &self,
        _snapshot: &EvaluationSnapshot,
        candidates: Vec<DeploymentVersion>,
    ) -> RuleOutcome {
        RuleOutcome::partition(candidates, |version| {
            if !self.pattern.is_match(&version.tag) {
                return Some(format!(
                    "VersionPatternMismatch: {} does not match /{}/",
                    version.tag,
                    self.pattern.as_str()
                ));
            }
            (self.exclude_prerelease && is_prerelease(&version.tag))
                .then(|| prerelease_rejection(version))
        })
    }
}

/// Restricts candidates to tags satisfying a semver requirement
///
/// A leading `v` on the tag is ignored. Tags that do not parse as semver
/// are rejected.
#[derive(Debug, Clone)]
pub struct SemverRangeRule {
    requirement: VersionReq,
    exclude_prerelease: bool,
}

impl SemverRangeRule {
    pub fn new(requirement: &str, exclude_prerelease: bool) -> Result<Self> {
        let parsed = VersionReq::parse(requirement).map_err(|e| RuleError::InvalidRequirement {
            requirement: requirement.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self {
            requirement: parsed,
            exclude_prerelease,
        })
    }
}

impl ReleaseRule for SemverRangeRule {
    fn kind(&self) -> &'static str {
        "semver-range"
    }

    fn filter(
        &self,
        _snapshot: &EvaluationSnapshot,
        candidates: Vec<DeploymentVersion>,
    ) -> RuleOutcome {
        RuleOutcome::partition(candidates, |version| {
            let raw = version.tag.strip_prefix('v').unwrap_or(&version.tag);
            let parsed = match Version::parse(raw) {
                Ok(parsed) => parsed,
                Err(_) => {
                    return Some(format!(
                        "SemverRangeMismatch: {} is not a semver version",
                        version.tag
                    ))
                }
            };
            if self.exclude_prerelease && (!parsed.pre.is_empty() || is_prerelease(&version.tag)) {
                return Some(prerelease_rejection(version));
            }
            (!self.requirement.matches(&parsed)).then(|| {
                format!(
                    "SemverRangeMismatch: {} does not satisfy {}",
                    version.tag, self.requirement
                )
            })
        })
    }
}

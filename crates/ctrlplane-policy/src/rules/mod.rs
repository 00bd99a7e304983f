//! Release rules
//!
//! Each [`RuleConfig`] kind maps to one [`ReleaseRule`] implementation.
//! Rules are synchronous and side-effect free: they read only the
//! [`EvaluationSnapshot`] and the candidate list they are handed.

mod approval;
mod cooldown;
mod concurrency;
mod maintenance;
mod sequencing;
mod version;

pub use approval::ApprovalRule;
pub use concurrency::ConcurrencyLimitRule;
pub use cooldown::CooldownRule;
pub use maintenance::MaintenanceWindowRule;
pub use sequencing::ReleaseSequencingRule;
pub use version::{SemverRangeRule, VersionPatternRule, VersionSelectorRule};

use crate::error::Result;
use crate::snapshot::EvaluationSnapshot;
use ctrlplane_types::{CandidateRejection, DeploymentVersion, RuleConfig};

/// Result of running one rule over a candidate list
#[derive(Debug, Clone, Default)]
pub struct RuleOutcome {
    /// Surviving candidates, in input order
    pub allowed: Vec<DeploymentVersion>,

    pub rejections: Vec<CandidateRejection>,

    /// Set when no candidate survived
    pub reason: Option<String>,
}

impl RuleOutcome {
    /// Split candidates by a per-candidate check returning a rejection reason
    pub fn partition<F>(candidates: Vec<DeploymentVersion>, mut check: F) -> Self
    where
        F: FnMut(&DeploymentVersion) -> Option<String>,
    {
        let mut outcome = RuleOutcome::default();
        for candidate in candidates {
            match check(&candidate) {
                Some(reason) => outcome.rejections.push(CandidateRejection {
                    version_id: candidate.id,
                    reason,
                }),
                None => outcome.allowed.push(candidate),
            }
        }
        if outcome.allowed.is_empty() {
            outcome.reason = summarize(&outcome.rejections);
        }
        outcome
    }

    /// Reject every candidate for the same reason
    pub fn reject_all(candidates: Vec<DeploymentVersion>, reason: impl Into<String>) -> Self {
        let reason = reason.into();
        RuleOutcome {
            allowed: Vec::new(),
            rejections: candidates
                .iter()
                .map(|c| CandidateRejection {
                    version_id: c.id,
                    reason: reason.clone(),
                })
                .collect(),
            reason: Some(reason),
        }
    }

    pub fn allow_all(candidates: Vec<DeploymentVersion>) -> Self {
        RuleOutcome {
            allowed: candidates,
            ..Default::default()
        }
    }

    pub fn is_halted(&self) -> bool {
        self.allowed.is_empty()
    }
}

fn summarize(rejections: &[CandidateRejection]) -> Option<String> {
    let first = rejections.first()?;
    Some(match rejections.len() {
        1 => first.reason.clone(),
        n => format!("{} (and {} more candidates rejected)", first.reason, n - 1),
    })
}

/// A rule narrowing the candidate version list
pub trait ReleaseRule: Send + Sync + std::fmt::Debug {
    /// Rule kind, matching [`RuleConfig::kind`]
    fn kind(&self) -> &'static str;

    fn filter(
        &self,
        snapshot: &EvaluationSnapshot,
        candidates: Vec<DeploymentVersion>,
    ) -> RuleOutcome;
}

/// Turn a rule configuration into a rule object
pub fn build_rule(config: &RuleConfig) -> Result<Box<dyn ReleaseRule>> {
    Ok(match config {
        RuleConfig::Approval { min_approvals } => Box::new(ApprovalRule::new(*min_approvals)),
        RuleConfig::Cooldown { minutes } => Box::new(CooldownRule::new(*minutes)?),
        RuleConfig::ConcurrencyLimit { limit, scope } => {
            Box::new(ConcurrencyLimitRule::new(*limit, *scope)?)
        }
        RuleConfig::MaintenanceWindow { windows } => {
            Box::new(MaintenanceWindowRule::new(windows.clone()))
        }
        RuleConfig::VersionSelector { condition } => {
            Box::new(VersionSelectorRule::new(condition.clone())?)
        }
        RuleConfig::VersionPattern {
            pattern,
            exclude_prerelease,
        } => Box::new(VersionPatternRule::new(pattern, *exclude_prerelease)?),
        RuleConfig::SemverRange {
            requirement,
            exclude_prerelease,
        } => Box::new(SemverRangeRule::new(requirement, *exclude_prerelease)?),
        RuleConfig::ReleaseSequencing => Box::new(ReleaseSequencingRule),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use chrono::{DateTime, Duration, Utc};
    use ctrlplane_types::{DeploymentId, EnvironmentId, ReleaseTarget, ReleaseTargetKey, ResourceId};

    pub fn target() -> ReleaseTarget {
        ReleaseTarget::new(ReleaseTargetKey::new(
            ResourceId::generate(),
            EnvironmentId::generate(),
            DeploymentId::generate(),
        ))
    }

    pub fn snapshot_at(now: DateTime<Utc>) -> EvaluationSnapshot {
        EvaluationSnapshot::new(target(), now)
    }

    /// Versions created one minute apart, oldest first
    pub fn versions(tags: &[&str]) -> Vec<DeploymentVersion> {
        let deployment = DeploymentId::generate();
        let base = Utc::now() - Duration::hours(1);
        tags.iter()
            .enumerate()
            .map(|(i, tag)| {
                DeploymentVersion::new(deployment, *tag)
                    .with_created_at(base + Duration::minutes(i as i64))
            })
            .collect()
    }

    pub fn tags(versions: &[DeploymentVersion]) -> Vec<&str> {
        versions.iter().map(|v| v.tag.as_str()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use ctrlplane_types::ConcurrencyScope;

    #[test]
    fn test_build_rule_kinds() {
        let configs = vec![
            RuleConfig::Approval { min_approvals: 1 },
            RuleConfig::Cooldown { minutes: 30 },
            RuleConfig::ConcurrencyLimit {
                limit: 2,
                scope: ConcurrencyScope::Deployment,
            },
            RuleConfig::MaintenanceWindow { windows: vec![] },
            RuleConfig::VersionPattern {
                pattern: "^v1\\.".into(),
                exclude_prerelease: true,
            },
            RuleConfig::SemverRange {
                requirement: ">=1.0.0".into(),
                exclude_prerelease: false,
            },
            RuleConfig::ReleaseSequencing,
        ];

        for config in &configs {
            let rule = build_rule(config).unwrap();
            assert_eq!(rule.kind(), config.kind());
        }
    }

    #[test]
    fn test_build_rule_rejects_bad_pattern() {
        let err = build_rule(&RuleConfig::VersionPattern {
            pattern: "(".into(),
            exclude_prerelease: false,
        })
        .unwrap_err();
        assert!(err.to_string().contains("Invalid version pattern"));
    }

    #[test]
    fn test_partition_summarizes_rejections() {
        let outcome = RuleOutcome::partition(versions(&["a", "b", "c"]), |v| {
            Some(format!("no {}", v.tag))
        });
        assert!(outcome.is_halted());
        assert_eq!(outcome.rejections.len(), 3);
        assert_eq!(
            outcome.reason.as_deref(),
            Some("no a (and 2 more candidates rejected)")
        );
    }
}

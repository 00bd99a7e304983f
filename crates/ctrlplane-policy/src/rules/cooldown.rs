//! Cooldown between successful deployments of the same version

use super::{ReleaseRule, RuleOutcome};
use crate::error::{Result, RuleError};
use crate::snapshot::EvaluationSnapshot;
use chrono::Duration;
use ctrlplane_types::DeploymentVersion;

/// A (resource, version) pair is ineligible until the cooldown has elapsed
/// since its last successful job
#[derive(Debug, Clone)]
pub struct CooldownRule {
    minutes: i64,
}

impl CooldownRule {
    pub fn new(minutes: i64) -> Result<Self> {
        if minutes < 0 {
            return Err(RuleError::InvalidConfig {
                rule: "cooldown",
                reason: format!("minutes must not be negative, got {}", minutes),
            });
        }
        Ok(Self { minutes })
    }

    fn period(&self) -> Duration {
        Duration::minutes(self.minutes)
    }
}

impl ReleaseRule for CooldownRule {
    fn kind(&self) -> &'static str {
        "cooldown"
    }

    fn filter(
        &self,
        snapshot: &EvaluationSnapshot,
        candidates: Vec<DeploymentVersion>,
    ) -> RuleOutcome {
        RuleOutcome::partition(candidates, |version| {
            let completed_at = snapshot.last_success(&version.id)?;
            let elapsed = snapshot.now - completed_at;
            (elapsed < self.period()).then(|| {
                let remaining = self.period() - elapsed;
                format!(
                    "CooldownActive: {} succeeded {}m ago, cooldown of {}m ends in {}m",
                    version.tag,
                    elapsed.num_minutes(),
                    self.minutes,
                    remaining.num_minutes().max(1)
                )
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_cooldown_window() {
        let candidates = versions(&["v1"]);
        let succeeded_at = Utc::now();
        let rule = CooldownRule::new(30).unwrap();

        let early = snapshot_at(succeeded_at + Duration::minutes(10))
            .with_last_success(candidates[0].id, succeeded_at);
        let outcome = rule.filter(&early, candidates.clone());
        assert!(outcome.is_halted());
        assert!(outcome.reason.unwrap().contains("cooldown"));

        let late = snapshot_at(succeeded_at + Duration::minutes(31))
            .with_last_success(candidates[0].id, succeeded_at);
        let outcome = rule.filter(&late, candidates);
        assert_eq!(outcome.allowed.len(), 1);
    }

    #[test]
    fn test_never_deployed_versions_pass() {
        let rule = CooldownRule::new(30).unwrap();
        let outcome = rule.filter(&snapshot_at(Utc::now()), versions(&["v1", "v2"]));
        assert_eq!(outcome.allowed.len(), 2);
    }

    #[test]
    fn test_negative_minutes_rejected() {
        assert!(CooldownRule::new(-1).is_err());
    }
}

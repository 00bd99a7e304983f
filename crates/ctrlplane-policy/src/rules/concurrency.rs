//! Concurrency limit on running jobs

use super::{ReleaseRule, RuleOutcome};
use crate::error::{Result, RuleError};
use crate::snapshot::EvaluationSnapshot;
use ctrlplane_types::{ConcurrencyScope, DeploymentVersion};

/// Bounds simultaneously `in_progress` jobs per deployment or per resource
#[derive(Debug, Clone)]
pub struct ConcurrencyLimitRule {
    limit: u32,
    scope: ConcurrencyScope,
}

impl ConcurrencyLimitRule {
    pub fn new(limit: u32, scope: ConcurrencyScope) -> Result<Self> {
        if limit == 0 {
            return Err(RuleError::InvalidConfig {
                rule: "concurrency-limit",
                reason: "limit must be at least 1".into(),
            });
        }
        Ok(Self { limit, scope })
    }
}

impl ReleaseRule for ConcurrencyLimitRule {
    fn kind(&self) -> &'static str {
        "concurrency-limit"
    }

    fn filter(
        &self,
        snapshot: &EvaluationSnapshot,
        candidates: Vec<DeploymentVersion>,
    ) -> RuleOutcome {
        let running = match self.scope {
            ConcurrencyScope::Deployment => snapshot.in_progress_for_deployment,
            ConcurrencyScope::Resource => snapshot.in_progress_for_resource,
        };

        if running >= self.limit as usize {
            RuleOutcome::reject_all(
                candidates,
                format!("ConcurrencyLimitExceeded: {}/{} running", running, self.limit),
            )
        } else {
            RuleOutcome::allow_all(candidates)
        }
    }
}

//! Approval gate

use super::{ReleaseRule, RuleOutcome};
use crate::snapshot::EvaluationSnapshot;
use ctrlplane_types::DeploymentVersion;

/// Requires a minimum number of approvals per (version, environment)
///
/// A single rejection vetoes the version regardless of approval count.
#[derive(Debug, Clone)]
pub struct ApprovalRule {
    min_approvals: u32,
}

impl ApprovalRule {
    pub fn new(min_approvals: u32) -> Self {
        Self { min_approvals }
    }
}

impl ReleaseRule for ApprovalRule {
    fn kind(&self) -> &'static str {
        "approval"
    }

    fn filter(
        &self,
        snapshot: &EvaluationSnapshot,
        candidates: Vec<DeploymentVersion>,
    ) -> RuleOutcome {
        let required = self.min_approvals as usize;
        RuleOutcome::partition(candidates, |version| {
            if let Some(rejection) = snapshot.rejection(&version.id) {
                return Some(format!(
                    "ApprovalRejected: {} rejected by {}",
                    version.tag, rejection.user_id
                ));
            }
            let approvals = snapshot.approval_count(&version.id);
            (approvals < required).then(|| {
                format!(
                    "ApprovalRequired: {} has {}/{} approvals",
                    version.tag, approvals, required
                )
            })
        })
    }
}

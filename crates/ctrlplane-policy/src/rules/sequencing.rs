//! Release sequencing

use super::{ReleaseRule, RuleOutcome};
use crate::snapshot::EvaluationSnapshot;
use ctrlplane_types::DeploymentVersion;

/// Holds releases back while a job for the same environment + deployment
/// has not reached a terminal state
#[derive(Debug, Clone, Copy, Default)]
pub struct ReleaseSequencingRule;

impl ReleaseRule for ReleaseSequencingRule {
    fn kind(&self) -> &'static str {
        "release-sequencing"
    }

    fn filter(
        &self,
        snapshot: &EvaluationSnapshot,
        candidates: Vec<DeploymentVersion>,
    ) -> RuleOutcome {
        match snapshot.non_terminal_for_pair {
            0 => RuleOutcome::allow_all(candidates),
            n => RuleOutcome::reject_all(
                candidates,
                format!(
                    "ReleaseSequencing: {} unfinished job(s) for this environment and deployment",
                    n
                ),
            ),
        }
    }
}

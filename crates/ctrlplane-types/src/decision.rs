//! Evaluation decision cards
//!
//! Every policy evaluation pass for a release target produces one
//! [`EvaluationDecision`] recording what each rule did to the candidate set.

use crate::ids::{PolicyId, ReleaseTargetId, VersionId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Why a rule removed a candidate
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateRejection {
    pub version_id: VersionId,
    pub reason: String,
}

/// Record of a single rule run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RuleEvaluationRecord {
    pub policy_id: PolicyId,
    pub policy_name: String,

    /// Rule kind, e.g. `cooldown`
    pub rule: String,

    pub candidates_in: usize,
    pub candidates_out: usize,

    #[serde(default)]
    pub rejections: Vec<CandidateRejection>,

    /// Rule-level reason, set when the rule emptied the candidate set
    pub reason: Option<String>,

    pub duration_us: u64,
}

impl RuleEvaluationRecord {
    pub fn halted(&self) -> bool {
        self.candidates_out == 0
    }
}

/// Audit card for one evaluation pass
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationDecision {
    pub id: Uuid,
    pub release_target_id: ReleaseTargetId,
    pub allowed: bool,
    pub chosen_version_id: Option<VersionId>,

    /// Human-readable reason for a denial
    pub reason: Option<String>,

    /// Version the caller asked for, if any
    pub desired_version_id: Option<VersionId>,

    pub policies_evaluated: Vec<PolicyId>,
    pub records: Vec<RuleEvaluationRecord>,
    pub evaluated_at: DateTime<Utc>,
}

impl EvaluationDecision {
    pub fn allow(
        release_target_id: ReleaseTargetId,
        chosen_version_id: VersionId,
        evaluated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            release_target_id,
            allowed: true,
            chosen_version_id: Some(chosen_version_id),
            reason: None,
            desired_version_id: None,
            policies_evaluated: Vec::new(),
            records: Vec::new(),
            evaluated_at,
        }
    }

    pub fn deny(
        release_target_id: ReleaseTargetId,
        reason: impl Into<String>,
        evaluated_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            release_target_id,
            allowed: false,
            chosen_version_id: None,
            reason: Some(reason.into()),
            desired_version_id: None,
            policies_evaluated: Vec::new(),
            records: Vec::new(),
            evaluated_at,
        }
    }

    pub fn with_desired_version(mut self, desired: Option<VersionId>) -> Self {
        self.desired_version_id = desired;
        self
    }

    pub fn add_record(&mut self, record: RuleEvaluationRecord) {
        if !self.policies_evaluated.contains(&record.policy_id) {
            self.policies_evaluated.push(record.policy_id);
        }
        self.records.push(record);
    }

    pub fn was_allowed(&self) -> bool {
        self.allowed
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_card() {
        let target = ReleaseTargetId::generate();
        let mut card = EvaluationDecision::deny(target, "CooldownActive", Utc::now());
        assert!(!card.was_allowed());

        let policy_id = PolicyId::generate();
        for rule in ["approval", "cooldown"] {
            card.add_record(RuleEvaluationRecord {
                policy_id,
                policy_name: "prod".into(),
                rule: rule.into(),
                candidates_in: 1,
                candidates_out: 0,
                rejections: Vec::new(),
                reason: None,
                duration_us: 10,
            });
        }
        assert_eq!(card.policies_evaluated, vec![policy_id]);
        assert_eq!(card.records.len(), 2);
        assert!(card.records[1].halted());
    }
}

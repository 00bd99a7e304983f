//! Evaluation snapshot
//!
//! Everything a rule may read from the outside world is captured once per
//! evaluation pass, so every rule in the pass sees the same approvals, job
//! history and clock.

use chrono::{DateTime, Utc};
use ctrlplane_types::{ApprovalRecord, ApprovalStatus, ReleaseTarget, VersionId};
use std::collections::HashMap;

/// Point-in-time view of the state rules depend on
#[derive(Debug, Clone)]
pub struct EvaluationSnapshot {
    /// Clock reading shared by every rule in the pass
    pub now: DateTime<Utc>,

    /// Target being evaluated
    pub target: ReleaseTarget,

    approvals: HashMap<VersionId, Vec<ApprovalRecord>>,
    last_success: HashMap<VersionId, DateTime<Utc>>,

    /// `in_progress` jobs for the target's deployment across all resources
    pub in_progress_for_deployment: usize,

    /// `in_progress` jobs touching the target's resource
    pub in_progress_for_resource: usize,

    /// Non-terminal jobs for the target's environment + deployment
    pub non_terminal_for_pair: usize,
}

impl EvaluationSnapshot {
    pub fn new(target: ReleaseTarget, now: DateTime<Utc>) -> Self {
        Self {
            now,
            target,
            approvals: HashMap::new(),
            last_success: HashMap::new(),
            in_progress_for_deployment: 0,
            in_progress_for_resource: 0,
            non_terminal_for_pair: 0,
        }
    }

    /// Record an approval or rejection scoped to the target's environment
    pub fn with_approval(mut self, record: ApprovalRecord) -> Self {
        self.add_approval(record);
        self
    }

    pub fn add_approval(&mut self, record: ApprovalRecord) {
        if record.environment_id != self.target.environment_id {
            return;
        }
        self.approvals
            .entry(record.version_id)
            .or_default()
            .push(record);
    }

    /// Completion time of the last successful job for (target resource, version)
    pub fn with_last_success(mut self, version_id: VersionId, completed_at: DateTime<Utc>) -> Self {
        self.last_success
            .entry(version_id)
            .and_modify(|at| *at = (*at).max(completed_at))
            .or_insert(completed_at);
        self
    }

    pub fn with_in_progress(mut self, for_deployment: usize, for_resource: usize) -> Self {
        self.in_progress_for_deployment = for_deployment;
        self.in_progress_for_resource = for_resource;
        self
    }

    pub fn with_non_terminal_jobs(mut self, count: usize) -> Self {
        self.non_terminal_for_pair = count;
        self
    }

    pub fn approvals_for(&self, version_id: &VersionId) -> &[ApprovalRecord] {
        self.approvals
            .get(version_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Distinct users who approved the version
    pub fn approval_count(&self, version_id: &VersionId) -> usize {
        let mut users: Vec<&str> = self
            .approvals_for(version_id)
            .iter()
            .filter(|r| r.status == ApprovalStatus::Approved)
            .map(|r| r.user_id.as_str())
            .collect();
        users.sort_unstable();
        users.dedup();
        users.len()
    }

    /// First rejection recorded for the version, if any
    pub fn rejection(&self, version_id: &VersionId) -> Option<&ApprovalRecord> {
        self.approvals_for(version_id)
            .iter()
            .find(|r| r.status == ApprovalStatus::Rejected)
    }

    pub fn last_success(&self, version_id: &VersionId) -> Option<DateTime<Utc>> {
        self.last_success.get(version_id).copied()
    }
}

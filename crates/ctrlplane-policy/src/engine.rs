//! Policy engine
//!
//! Runs every rule of every applicable policy over the candidate versions of
//! one release target. Policies run by priority (higher first, ties broken
//! by creation time); rules run in declared order. The first rule that
//! leaves no candidate halts the pass with a denial.

use crate::rules::{build_rule, RuleOutcome};
use crate::snapshot::EvaluationSnapshot;
use ctrlplane_types::{
    Deployment, DeploymentVersion, Environment, EvaluationDecision, Policy, Resource,
    RuleEvaluationRecord, VersionId,
};
use std::time::Instant;
use tracing::{debug, warn};

/// Input for one evaluation pass
#[derive(Debug, Clone)]
pub struct EvaluationRequest<'a> {
    pub resource: &'a Resource,
    pub environment: &'a Environment,
    pub deployment: &'a Deployment,

    /// Every policy of the workspace; the engine picks the applicable ones
    pub policies: &'a [Policy],

    /// Ready versions, any order
    pub candidates: Vec<DeploymentVersion>,

    /// Version the caller would like, chosen if it survives
    pub desired_version_id: Option<VersionId>,
}

/// Stateless rule engine
#[derive(Debug, Clone, Copy, Default)]
pub struct PolicyEngine;

impl PolicyEngine {
    pub fn new() -> Self {
        Self
    }

    /// Enabled policies governing the triple, in evaluation order
    pub fn applicable_policies<'p>(
        &self,
        policies: &'p [Policy],
        resource: &Resource,
        environment: &Environment,
        deployment: &Deployment,
    ) -> Vec<&'p Policy> {
        let mut applicable: Vec<&Policy> = policies
            .iter()
            .filter(|p| p.enabled && p.governs(resource, environment, deployment))
            .collect();
        applicable.sort_by(|a, b| {
            b.priority
                .cmp(&a.priority)
                .then_with(|| a.created_at.cmp(&b.created_at))
        });
        applicable
    }

    /// Run one evaluation pass and produce its decision card
    pub fn evaluate(
        &self,
        request: EvaluationRequest<'_>,
        snapshot: &EvaluationSnapshot,
    ) -> EvaluationDecision {
        let target_id = snapshot.target.id;
        let desired = request.desired_version_id;

        let mut candidates = request.candidates;
        if candidates.is_empty() {
            return EvaluationDecision::deny(
                target_id,
                format!("NoCandidates: {} has no ready versions", request.deployment.slug),
                snapshot.now,
            )
            .with_desired_version(desired);
        }

        let applicable = self.applicable_policies(
            request.policies,
            request.resource,
            request.environment,
            request.deployment,
        );

        let mut records = Vec::new();
        for policy in applicable {
            for config in &policy.rules {
                let start = Instant::now();
                let candidates_in = candidates.len();

                let outcome = match build_rule(config) {
                    Ok(rule) => rule.filter(snapshot, candidates),
                    Err(e) => {
                        warn!(
                            policy_id = %policy.id,
                            rule = config.kind(),
                            error = %e,
                            "Rule failed to build"
                        );
                        let reason = format!(
                            "InvalidRule: {} in policy '{}': {}",
                            config.kind(),
                            policy.name,
                            e
                        );
                        RuleOutcome::reject_all(candidates, reason)
                    }
                };

                let reason = outcome.reason.clone().or_else(|| {
                    outcome
                        .is_halted()
                        .then(|| format!("{} rejected every candidate", config.kind()))
                });
                records.push(RuleEvaluationRecord {
                    policy_id: policy.id,
                    policy_name: policy.name.clone(),
                    rule: config.kind().to_string(),
                    candidates_in,
                    candidates_out: outcome.allowed.len(),
                    rejections: outcome.rejections,
                    reason: reason.clone(),
                    duration_us: start.elapsed().as_micros() as u64,
                });

                if outcome.allowed.is_empty() {
                    let reason = reason.unwrap_or_else(|| config.kind().to_string());
                    debug!(
                        target_id = %target_id,
                        policy = %policy.name,
                        rule = config.kind(),
                        reason = %reason,
                        "Evaluation halted"
                    );
                    let mut decision = EvaluationDecision::deny(target_id, reason, snapshot.now)
                        .with_desired_version(desired);
                    for record in records {
                        decision.add_record(record);
                    }
                    return decision;
                }
                candidates = outcome.allowed;
            }
        }

        let chosen = desired
            .and_then(|id| candidates.iter().find(|v| v.id == id))
            .or_else(|| candidates.iter().max_by_key(|v| v.created_at));

        let mut decision = match chosen {
            Some(version) => {
                debug!(target_id = %target_id, version = %version.tag, "Evaluation allowed");
                EvaluationDecision::allow(target_id, version.id, snapshot.now)
            }
            None => {
                EvaluationDecision::deny(target_id, "NoCandidates: nothing survived", snapshot.now)
            }
        }
        .with_desired_version(desired);
        for record in records {
            decision.add_record(record);
        }
        decision
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};
    use ctrlplane_types::{
        ConcurrencyScope, PolicyTarget, ReleaseTarget, ReleaseTargetKey, RuleConfig,
        SystemId, WorkspaceId,
    };
    use proptest::prelude::*;

    struct Fixture {
        workspace: WorkspaceId,
        resource: Resource,
        environment: Environment,
        deployment: Deployment,
    }

    impl Fixture {
        fn new() -> Self {
            let workspace = WorkspaceId::generate();
            let system = SystemId::generate();
            Self {
                workspace,
                resource: Resource::new(workspace, "cluster-1", "cluster-1", "Cluster", "v1"),
                environment: Environment::new(system, "prod"),
                deployment: Deployment::new(system, "api", "api"),
            }
        }

        fn snapshot(&self, now: chrono::DateTime<Utc>) -> EvaluationSnapshot {
            let target = ReleaseTarget::new(ReleaseTargetKey::new(
                self.resource.id,
                self.environment.id,
                self.deployment.id,
            ));
            EvaluationSnapshot::new(target, now)
        }

        fn versions(&self, tags: &[&str]) -> Vec<DeploymentVersion> {
            let base = Utc::now() - Duration::hours(1);
            tags.iter()
                .enumerate()
                .map(|(i, tag)| {
                    DeploymentVersion::new(self.deployment.id, *tag)
                        .with_created_at(base + Duration::minutes(i as i64))
                })
                .collect()
        }

        fn policy(&self, name: &str) -> Policy {
            Policy::new(self.workspace, name).with_target(PolicyTarget::all())
        }

        fn request<'a>(
            &'a self,
            policies: &'a [Policy],
            candidates: Vec<DeploymentVersion>,
        ) -> EvaluationRequest<'a> {
            EvaluationRequest {
                resource: &self.resource,
                environment: &self.environment,
                deployment: &self.deployment,
                policies,
                candidates,
                desired_version_id: None,
            }
        }
    }

    #[test]
    fn test_no_policies_picks_newest() {
        let f = Fixture::new();
        let versions = f.versions(&["v1", "v2", "v3"]);
        let newest = versions[2].id;

        let decision =
            PolicyEngine::new().evaluate(f.request(&[], versions), &f.snapshot(Utc::now()));
        assert!(decision.allowed);
        assert_eq!(decision.chosen_version_id, Some(newest));
        assert!(decision.records.is_empty());
    }

    #[test]
    fn test_no_candidates_denied() {
        let f = Fixture::new();
        let decision =
            PolicyEngine::new().evaluate(f.request(&[], vec![]), &f.snapshot(Utc::now()));
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().starts_with("NoCandidates"));
    }

    #[test]
    fn test_desired_version_preferred_when_it_survives() {
        let f = Fixture::new();
        let versions = f.versions(&["v1.0", "v1.1", "v2.0"]);
        let policies = vec![f.policy("v1 only").with_rule(RuleConfig::VersionPattern {
            pattern: r"^v1\.".into(),
            exclude_prerelease: false,
        })];

        let mut request = f.request(&policies, versions.clone());
        request.desired_version_id = Some(versions[0].id);
        let decision = PolicyEngine::new().evaluate(request, &f.snapshot(Utc::now()));
        assert_eq!(decision.chosen_version_id, Some(versions[0].id));

        let mut request = f.request(&policies, versions.clone());
        request.desired_version_id = Some(versions[2].id);
        let decision = PolicyEngine::new().evaluate(request, &f.snapshot(Utc::now()));
        assert_eq!(decision.chosen_version_id, Some(versions[1].id));
        assert_eq!(decision.desired_version_id, Some(versions[2].id));
    }

    #[test]
    fn test_policy_order_and_halting() {
        let f = Fixture::new();
        let low = f
            .policy("low")
            .with_priority(1)
            .with_rule(RuleConfig::ReleaseSequencing);
        let high = f
            .policy("high")
            .with_priority(10)
            .with_rule(RuleConfig::ConcurrencyLimit {
                limit: 1,
                scope: ConcurrencyScope::Deployment,
            });
        let policies = vec![low, high];

        let snapshot = f.snapshot(Utc::now()).with_in_progress(1, 0).with_non_terminal_jobs(1);
        let decision =
            PolicyEngine::new().evaluate(f.request(&policies, f.versions(&["v1"])), &snapshot);

        assert!(!decision.allowed);
        assert_eq!(decision.records.len(), 1);
        assert_eq!(decision.records[0].policy_name, "high");
        assert_eq!(decision.reason.as_deref(), Some("ConcurrencyLimitExceeded: 1/1 running"));
    }

    #[test]
    fn test_disabled_and_ungoverning_policies_skipped() {
        let f = Fixture::new();
        let mut disabled = f.policy("disabled").with_rule(RuleConfig::ReleaseSequencing);
        disabled.enabled = false;
        let elsewhere = Policy::new(f.workspace, "elsewhere")
            .with_target(PolicyTarget::environments(ctrlplane_selector::Condition::name(
                ctrlplane_selector::TextOperator::Equals,
                "staging",
            )))
            .with_rule(RuleConfig::ReleaseSequencing);
        let untargeted =
            Policy::new(f.workspace, "untargeted").with_rule(RuleConfig::ReleaseSequencing);
        let policies = vec![disabled, elsewhere, untargeted];

        let snapshot = f.snapshot(Utc::now()).with_non_terminal_jobs(3);
        let decision =
            PolicyEngine::new().evaluate(f.request(&policies, f.versions(&["v1"])), &snapshot);
        assert!(decision.allowed);
        assert!(decision.policies_evaluated.is_empty());
    }

    #[test]
    fn test_cooldown_scenario() {
        let f = Fixture::new();
        let versions = f.versions(&["v1"]);
        let policies = vec![f.policy("cooldown").with_rule(RuleConfig::Cooldown { minutes: 30 })];
        let succeeded_at = Utc::now();

        let early = f
            .snapshot(succeeded_at + Duration::minutes(10))
            .with_last_success(versions[0].id, succeeded_at);
        let decision = PolicyEngine::new().evaluate(f.request(&policies, versions.clone()), &early);
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().contains("cooldown"));

        let late = f
            .snapshot(succeeded_at + Duration::minutes(31))
            .with_last_success(versions[0].id, succeeded_at);
        let decision = PolicyEngine::new().evaluate(f.request(&policies, versions.clone()), &late);
        assert!(decision.allowed);
        assert_eq!(decision.chosen_version_id, Some(versions[0].id));
    }

    #[test]
    fn test_concurrency_scenario() {
        let f = Fixture::new();
        let policies = vec![f.policy("limit").with_rule(RuleConfig::ConcurrencyLimit {
            limit: 2,
            scope: ConcurrencyScope::Deployment,
        })];

        let busy = f.snapshot(Utc::now()).with_in_progress(2, 0);
        let decision = PolicyEngine::new()
            .evaluate(f.request(&policies, f.versions(&["v1", "v2"])), &busy);
        assert!(!decision.allowed);
        assert_eq!(decision.reason.as_deref(), Some("ConcurrencyLimitExceeded: 2/2 running"));

        let quiet = f.snapshot(Utc::now()).with_in_progress(1, 0);
        let decision = PolicyEngine::new()
            .evaluate(f.request(&policies, f.versions(&["v1", "v2"])), &quiet);
        assert!(decision.allowed);
    }

    #[test]
    fn test_invalid_stored_rule_denies() {
        let f = Fixture::new();
        let policies = vec![f.policy("broken").with_rule(RuleConfig::SemverRange {
            requirement: "???".into(),
            exclude_prerelease: false,
        })];
        let decision = PolicyEngine::new().evaluate(
            f.request(&policies, f.versions(&["1.0.0"])),
            &f.snapshot(Utc::now()),
        );
        assert!(!decision.allowed);
        assert!(decision.reason.unwrap().starts_with("InvalidRule"));
    }

    fn rule_strategy() -> impl Strategy<Value = RuleConfig> {
        prop_oneof![
            (0u32..3).prop_map(|min_approvals| RuleConfig::Approval { min_approvals }),
            (1u32..4).prop_map(|limit| RuleConfig::ConcurrencyLimit {
                limit,
                scope: ConcurrencyScope::Deployment,
            }),
            prop::sample::select(vec![r"^v1", r"^v\d\.0", r"rc", r"."]).prop_map(|p| {
                RuleConfig::VersionPattern {
                    pattern: p.to_string(),
                    exclude_prerelease: false,
                }
            }),
            any::<bool>().prop_map(|exclude_prerelease| RuleConfig::SemverRange {
                requirement: ">=1.0.0".into(),
                exclude_prerelease,
            }),
            Just(RuleConfig::ReleaseSequencing),
        ]
    }

    proptest! {
        #[test]
        fn prop_pipeline_is_monotonic(
            tags in prop::collection::vec(
                prop::sample::select(vec!["v1.0.0", "v1.1.0-rc.1", "v2.0.0", "1.5.0", "latest"]),
                0..6,
            ),
            rules in prop::collection::vec(rule_strategy(), 0..5),
            running in 0usize..4,
            pending in 0usize..2,
        ) {
            let f = Fixture::new();
            let mut policy = f.policy("generated");
            for rule in rules {
                policy = policy.with_rule(rule);
            }
            let policies = vec![policy];
            let versions = f.versions(&tags);
            let input_ids: Vec<_> = versions.iter().map(|v| v.id).collect();

            let snapshot = f.snapshot(Utc::now())
                .with_in_progress(running, 0)
                .with_non_terminal_jobs(pending);
            let decision = PolicyEngine::new().evaluate(f.request(&policies, versions), &snapshot);

            let mut previous = input_ids.len();
            for (i, record) in decision.records.iter().enumerate() {
                prop_assert_eq!(record.candidates_in, previous);
                prop_assert!(record.candidates_out <= record.candidates_in);
                if record.halted() {
                    prop_assert_eq!(i, decision.records.len() - 1);
                    prop_assert!(!decision.allowed);
                }
                previous = record.candidates_out;
            }
            match decision.chosen_version_id {
                Some(id) => prop_assert!(input_ids.contains(&id)),
                None => prop_assert!(!decision.allowed),
            }
        }
    }
}

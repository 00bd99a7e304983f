//! Policies, rule configurations and approval records

use crate::ids::{ApprovalId, EnvironmentId, PolicyId, VersionId, WorkspaceId};
use crate::resource::{Deployment, Environment, Resource};
use chrono::{DateTime, Utc};
use ctrlplane_selector::Condition;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Named bundle of rules applied to the release targets it governs
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Policy {
    pub id: PolicyId,
    pub workspace_id: WorkspaceId,
    pub name: String,
    #[serde(default)]
    pub description: String,

    /// Higher runs first
    #[serde(default)]
    pub priority: i32,

    pub enabled: bool,

    /// A target is governed when any entry matches it
    #[serde(default)]
    pub targets: Vec<PolicyTarget>,

    /// Run in declared order
    #[serde(default)]
    pub rules: Vec<RuleConfig>,

    pub created_at: DateTime<Utc>,
}

impl Policy {
    pub fn new(workspace_id: WorkspaceId, name: impl Into<String>) -> Self {
        Self {
            id: PolicyId::generate(),
            workspace_id,
            name: name.into(),
            description: String::new(),
            priority: 0,
            enabled: true,
            targets: Vec::new(),
            rules: Vec::new(),
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_target(mut self, target: PolicyTarget) -> Self {
        self.targets.push(target);
        self
    }

    pub fn with_rule(mut self, rule: RuleConfig) -> Self {
        self.rules.push(rule);
        self
    }

    /// Whether this policy governs the given triple
    pub fn governs(
        &self,
        resource: &Resource,
        environment: &Environment,
        deployment: &Deployment,
    ) -> bool {
        self.targets
            .iter()
            .any(|t| t.matches(resource, environment, deployment))
    }
}

/// Selectors deciding which release targets a policy applies to
///
/// An absent selector places no restriction on that dimension.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PolicyTarget {
    pub deployment_selector: Option<Condition>,
    pub environment_selector: Option<Condition>,
    pub resource_selector: Option<Condition>,
}

impl PolicyTarget {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn environments(selector: Condition) -> Self {
        Self {
            environment_selector: Some(selector),
            ..Self::default()
        }
    }

    pub fn matches(
        &self,
        resource: &Resource,
        environment: &Environment,
        deployment: &Deployment,
    ) -> bool {
        use ctrlplane_selector::matches_optional;

        !resource.is_deleted()
            && matches_optional(self.deployment_selector.as_ref(), deployment, true)
            && matches_optional(self.environment_selector.as_ref(), environment, true)
            && matches_optional(self.resource_selector.as_ref(), resource, true)
    }
}

/// Scope a concurrency limit is counted over
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcurrencyScope {
    #[default]
    Deployment,
    Resource,
}

/// Half-open `[start, end)` interval during which releases are blocked
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MaintenanceWindow {
    #[serde(default)]
    pub name: String,
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl MaintenanceWindow {
    /// Windows whose start is after their end never match
    pub fn is_valid(&self) -> bool {
        self.start <= self.end
    }

    pub fn contains(&self, at: DateTime<Utc>) -> bool {
        self.is_valid() && self.start <= at && at < self.end
    }
}

/// Closed set of rule kinds a policy can carry
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum RuleConfig {
    Approval {
        min_approvals: u32,
    },
    Cooldown {
        minutes: i64,
    },
    ConcurrencyLimit {
        limit: u32,
        #[serde(default)]
        scope: ConcurrencyScope,
    },
    MaintenanceWindow {
        windows: Vec<MaintenanceWindow>,
    },
    VersionSelector {
        condition: Condition,
    },
    VersionPattern {
        pattern: String,
        #[serde(default)]
        exclude_prerelease: bool,
    },
    SemverRange {
        requirement: String,
        #[serde(default)]
        exclude_prerelease: bool,
    },
    ReleaseSequencing,
}

impl RuleConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            RuleConfig::Approval { .. } => "approval",
            RuleConfig::Cooldown { .. } => "cooldown",
            RuleConfig::ConcurrencyLimit { .. } => "concurrency-limit",
            RuleConfig::MaintenanceWindow { .. } => "maintenance-window",
            RuleConfig::VersionSelector { .. } => "version-selector",
            RuleConfig::VersionPattern { .. } => "version-pattern",
            RuleConfig::SemverRange { .. } => "semver-range",
            RuleConfig::ReleaseSequencing => "release-sequencing",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    Approved,
    Rejected,
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ApprovalStatus::Approved => write!(f, "approved"),
            ApprovalStatus::Rejected => write!(f, "rejected"),
        }
    }
}

/// A user's approval or rejection of a version in an environment
///
/// Append-only; unique per (version, environment, user).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApprovalRecord {
    pub id: ApprovalId,
    pub version_id: VersionId,
    pub environment_id: EnvironmentId,
    pub user_id: String,
    pub status: ApprovalStatus,
    pub reason: Option<String>,
    pub approved_at: DateTime<Utc>,
}

impl ApprovalRecord {
    pub fn new(
        version_id: VersionId,
        environment_id: EnvironmentId,
        user_id: impl Into<String>,
        status: ApprovalStatus,
    ) -> Self {
        Self {
            id: ApprovalId::generate(),
            version_id,
            environment_id,
            user_id: user_id.into(),
            status,
            reason: None,
            approved_at: Utc::now(),
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_rule_config_json() {
        let json = r#"{ "type": "concurrency-limit", "limit": 2 }"#;
        let rule: RuleConfig = serde_json::from_str(json).unwrap();
        assert_eq!(
            rule,
            RuleConfig::ConcurrencyLimit {
                limit: 2,
                scope: ConcurrencyScope::Deployment
            }
        );
        assert_eq!(rule.kind(), "concurrency-limit");

        let seq: RuleConfig = serde_json::from_str(r#"{ "type": "release-sequencing" }"#).unwrap();
        assert_eq!(seq, RuleConfig::ReleaseSequencing);
    }

    #[test]
    fn test_maintenance_window_half_open() {
        let start = Utc::now();
        let window = MaintenanceWindow {
            name: "patch".into(),
            start,
            end: start + Duration::hours(1),
        };
        assert!(window.contains(start));
        assert!(window.contains(start + Duration::minutes(59)));
        assert!(!window.contains(start + Duration::hours(1)));

        let inverted = MaintenanceWindow {
            name: "broken".into(),
            start: start + Duration::hours(1),
            end: start,
        };
        assert!(!inverted.is_valid());
        assert!(!inverted.contains(start + Duration::minutes(30)));
    }

    #[test]
    fn test_policy_target_scoping() {
        use crate::ids::{SystemId, WorkspaceId};

        let ws = WorkspaceId::generate();
        let system = SystemId::generate();
        let resource = Resource::new(ws, "r1", "r1", "Cluster", "v1");
        let prod = Environment::new(system, "production");
        let staging = Environment::new(system, "staging");
        let deployment = Deployment::new(system, "api", "api");

        let target = PolicyTarget::environments(Condition::name(
            ctrlplane_selector::TextOperator::Equals,
            "production",
        ));
        assert!(target.matches(&resource, &prod, &deployment));
        assert!(!target.matches(&resource, &staging, &deployment));
        assert!(PolicyTarget::all().matches(&resource, &staging, &deployment));

        let policy = Policy::new(ws, "prod-only").with_target(target);
        assert!(policy.governs(&resource, &prod, &deployment));
        assert!(!Policy::new(ws, "no-targets").governs(&resource, &prod, &deployment));
    }
}

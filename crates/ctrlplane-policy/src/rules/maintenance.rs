//! Maintenance windows

use super::{ReleaseRule, RuleOutcome};
use crate::snapshot::EvaluationSnapshot;
use ctrlplane_types::{DeploymentVersion, MaintenanceWindow};

/// Blocks every candidate while `now` is inside an active window
#[derive(Debug, Clone)]
pub struct MaintenanceWindowRule {
    windows: Vec<MaintenanceWindow>,
}

impl MaintenanceWindowRule {
    /// Windows whose start is after their end are dropped
    pub fn new(windows: Vec<MaintenanceWindow>) -> Self {
        let (valid, invalid): (Vec<_>, Vec<_>) = windows.into_iter().partition(|w| w.is_valid());
        for window in &invalid {
            tracing::warn!(
                window = %window.name,
                "Ignoring maintenance window with start after end"
            );
        }
        Self { windows: valid }
    }
}

impl ReleaseRule for MaintenanceWindowRule {
    fn kind(&self) -> &'static str {
        "maintenance-window"
    }

    fn filter(
        &self,
        snapshot: &EvaluationSnapshot,
        candidates: Vec<DeploymentVersion>,
    ) -> RuleOutcome {
        match self.windows.iter().find(|w| w.contains(snapshot.now)) {
            Some(window) => {
                let name = if window.name.is_empty() {
                    "unnamed window"
                } else {
                    window.name.as_str()
                };
                RuleOutcome::reject_all(
                    candidates,
                    format!(
                        "MaintenanceWindowActive: {} until {}",
                        name,
                        window.end.to_rfc3339()
                    ),
                )
            }
            None => RuleOutcome::allow_all(candidates),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::*;
    use chrono::{Duration, Utc};

    fn window(name: &str, start_offset: i64, end_offset: i64) -> MaintenanceWindow {
        let now = Utc::now();
        MaintenanceWindow {
            name: name.into(),
            start: now + Duration::minutes(start_offset),
            end: now + Duration::minutes(end_offset),
        }
    }

    #[test]
    fn test_active_window_blocks() {
        let w = window("db-upgrade", -10, 10);
        let now = w.start + Duration::minutes(5);
        let rule = MaintenanceWindowRule::new(vec![w]);

        let outcome = rule.filter(&snapshot_at(now), versions(&["v1"]));
        assert!(outcome.is_halted());
        assert!(outcome.reason.unwrap().starts_with("MaintenanceWindowActive: db-upgrade"));
    }

    #[test]
    fn test_window_end_is_exclusive() {
        let w = window("nightly", -10, 10);
        let end = w.end;
        let rule = MaintenanceWindowRule::new(vec![w]);
        assert_eq!(rule.filter(&snapshot_at(end), versions(&["v1"])).allowed.len(), 1);
    }

    #[test]
    fn test_inverted_window_ignored() {
        let w = window("broken", 10, -10);
        let now = w.end + Duration::minutes(10);
        let rule = MaintenanceWindowRule::new(vec![w]);
        assert_eq!(rule.filter(&snapshot_at(now), versions(&["v1"])).allowed.len(), 1);
    }
}

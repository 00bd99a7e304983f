//! Write-time policy validation

use crate::error::{Result, RuleError};
use crate::rules::build_rule;
use ctrlplane_types::Policy;

/// Reject a policy whose selectors or rules could not be evaluated
///
/// Maintenance windows with `start > end` are accepted; the rule ignores them.
pub fn validate_policy(policy: &Policy) -> Result<()> {
    if policy.name.trim().is_empty() {
        return Err(RuleError::EmptyName);
    }

    for target in &policy.targets {
        let selectors = [
            &target.deployment_selector,
            &target.environment_selector,
            &target.resource_selector,
        ];
        for selector in selectors.into_iter().flatten() {
            selector.validate()?;
        }
    }

    for rule in &policy.rules {
        build_rule(rule)?;
    }

    Ok(())
}

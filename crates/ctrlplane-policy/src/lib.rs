//! # Ctrlplane Policy Engine
//!
//! Decides which candidate version a release target should run.
//!
//! ## Key Components
//!
//! - [`ReleaseRule`]: Synchronous, side-effect free candidate filter
//! - [`build_rule`]: Factory from the closed [`RuleConfig`] set to rule objects
//! - [`EvaluationSnapshot`]: Approvals, job history and clock, read once per pass
//! - [`PolicyEngine`]: Runs applicable policies in priority order and
//!   produces an [`EvaluationDecision`](ctrlplane_types::EvaluationDecision)
//! - [`validate_policy`]: Write-time validation of selectors and rules
//!
//! ## Rule kinds
//!
//! | Kind | Effect |
//! |---|---|
//! | `approval` | needs N approvals for (version, environment); any rejection vetoes |
//! | `cooldown` | waits N minutes after the last success of (resource, version) |
//! | `concurrency-limit` | caps `in_progress` jobs per deployment or resource |
//! | `maintenance-window` | blocks everything inside `[start, end)` |
//! | `version-selector` / `version-pattern` / `semver-range` | restrict versions |
//! | `release-sequencing` | waits for unfinished jobs of the environment + deployment |
//!
//! [`RuleConfig`]: ctrlplane_types::RuleConfig

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod engine;
pub mod error;
pub mod rules;
pub mod snapshot;
pub mod validate;

pub use engine::{EvaluationRequest, PolicyEngine};
pub use error::{Result, RuleError};
pub use rules::{build_rule, ReleaseRule, RuleOutcome};
pub use snapshot::EvaluationSnapshot;
pub use validate::validate_policy;

//! # Ctrlplane Selectors
//!
//! Condition trees used everywhere a set of resources, environments,
//! deployments or versions has to be narrowed down: environment and
//! deployment resource selectors, deployment variable value guards, policy
//! targets and version selector rules.
//!
//! ## Key Components
//!
//! - [`Condition`]: Serializable condition tree (leaves plus AND/OR comparisons)
//! - [`Selectable`]: Field access for anything a condition can be evaluated on
//! - [`Condition::validate`]: Write-time validation (depth, keys, regexes)
//! - [`Condition::matches`]: Pure, total evaluation
//!
//! ## Example
//!
//! ```rust
//! use ctrlplane_selector::{Condition, TextOperator};
//!
//! let selector = Condition::and(vec![
//!     Condition::metadata_equals("env", "prod"),
//!     Condition::name(TextOperator::StartsWith, "api-"),
//! ]);
//! assert!(selector.validate().is_ok());
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod condition;
pub mod error;
pub mod matcher;
pub mod validate;

pub use condition::{
    ComparisonCondition, Condition, DateCondition, DateField, DateOperator, LogicalOperator,
    MetadataCondition, MetadataOperator, TextCondition, TextField, TextOperator,
    MAX_COMPARISON_DEPTH,
};
pub use error::{Result, SelectorError};
pub use matcher::{matches_optional, Selectable};

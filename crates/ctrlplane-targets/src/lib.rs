//! # Ctrlplane Targets
//!
//! Maintains the release target table: the set of (resource, environment,
//! deployment) triples whose selectors line up. Also recomputes which
//! targets each policy governs.
//!
//! ## Key Components
//!
//! - [`ReleaseTargetResolver`]: Scoped, atomic replacement of target sets
//! - [`ReplaceOutcome`]: Applied diff, or a request to retry later
//! - [`pairings`]: Pure selector join used by every replace call
//!
//! Removal of a target notifies the job dispatcher exactly once. Callers
//! enqueue evaluations for the targets a diff reports.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod resolver;

pub use error::{ResolverError, Result};
pub use resolver::{pairings, ReleaseTargetResolver, ReplaceOutcome};

//! # Ctrlplane Releases
//!
//! Variable resolution and immutable release rows.
//!
//! A [`Release`](ctrlplane_types::Release) pairs a version release (which
//! version) with a variable release (which resolved variables). Both are
//! only written when their content differs from the target's latest row;
//! the desired-release pointer is the only mutable part.
//!
//! Sensitive variables are sealed with [`VariableCipher`] and only revealed
//! at the point of use.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod cipher;
pub mod error;
pub mod manager;
pub mod variables;

pub use cipher::VariableCipher;
pub use error::{ReleaseError, Result};
pub use manager::{Ensured, ReleaseManager, DEFAULT_CANDIDATE_LIMIT};
pub use variables::{digest, resolve_variables, reveal, VariableSources};

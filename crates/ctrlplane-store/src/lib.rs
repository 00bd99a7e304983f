//! # Ctrlplane Store
//!
//! Persistence for resources, selectors, release targets, releases,
//! policies, approvals and jobs.
//!
//! The storage traits in [`traits`] are the seam every other crate talks
//! to. Two implementations ship:
//!
//! - [`InMemoryStore`] for development and tests, with simulated row locks
//! - [`PostgresStore`] backed by `sqlx`

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod error;
pub mod memory;
pub mod postgres;
pub mod traits;

pub use error::{StoreError, StoreResult};
pub use memory::{row_key, InMemoryStore, RowLockHandle};
pub use postgres::PostgresStore;
pub use traits::*;

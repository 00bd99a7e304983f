//! # Ctrlplane Locks
//!
//! Concurrency control for release computation. Only two things need
//! locking: a release target's release set and desired pointer
//! ([`TargetMutex`]), and a system's bulk target recomputation
//! ([`SystemCoordinator`]).
//!
//! All locks go through the [`LockBackend`] capability, so the same code
//! runs against a shared backend in production and
//! [`InMemoryLockBackend`] in tests.

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod backend;
pub mod coordinator;
pub mod error;
pub mod memory;
pub mod mutex;
pub mod target;

pub use backend::LockBackend;
pub use coordinator::{EvaluationPermit, SystemCoordinator, DEFAULT_EVALUATION_CAPACITY};
pub use error::{LockError, Result};
pub use memory::InMemoryLockBackend;
pub use mutex::{DistributedMutex, LockLostCallback, LockOptions, MutexGuard};
pub use target::{target_lock_key, TargetLocks, TargetMutex};

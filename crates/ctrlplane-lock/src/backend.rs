//! Lock capability interface
//!
//! Exclusive locks and counting permits keyed by string, each held under an
//! opaque token and expiring after a TTL. Production deployments back this
//! with a shared store; [`crate::InMemoryLockBackend`] serves tests and
//! single-process use.

use crate::error::Result;
use async_trait::async_trait;
use std::time::Duration;

#[async_trait]
pub trait LockBackend: Send + Sync {
    /// Take the exclusive lock if it is free or expired
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool>;

    /// Release the lock; releasing a lock held by another token fails
    async fn release(&self, key: &str, token: &str) -> Result<()>;

    /// Push the expiry of a held lock out to `ttl` from now
    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> Result<()>;

    /// Whether `token` currently holds the lock
    async fn holds(&self, key: &str, token: &str) -> Result<bool>;

    /// Whether anyone currently holds the lock
    async fn is_locked(&self, key: &str) -> Result<bool>;

    /// Take one of `limit` permits
    async fn try_acquire_permit(
        &self,
        key: &str,
        token: &str,
        limit: usize,
        ttl: Duration,
    ) -> Result<bool>;

    async fn release_permit(&self, key: &str, token: &str) -> Result<()>;

    /// Number of unexpired permits held
    async fn permit_count(&self, key: &str) -> Result<usize>;
}

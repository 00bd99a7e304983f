//! In-memory lock backend

use crate::backend::LockBackend;
use crate::error::{LockError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;

#[derive(Debug, Clone)]
struct LockEntry {
    token: String,
    expires_at: Instant,
}

#[derive(Debug, Default)]
struct LockTable {
    locks: HashMap<String, LockEntry>,
    permits: HashMap<String, HashMap<String, Instant>>,
}

impl LockTable {
    fn live_lock(&mut self, key: &str, now: Instant) -> Option<&mut LockEntry> {
        let expired = self
            .locks
            .get(key)
            .map(|entry| entry.expires_at <= now)
            .unwrap_or(false);
        if expired {
            self.locks.remove(key);
        }
        self.locks.get_mut(key)
    }

    fn live_permits(&mut self, key: &str, now: Instant) -> &mut HashMap<String, Instant> {
        let permits = self.permits.entry(key.to_string()).or_default();
        permits.retain(|_, expires_at| *expires_at > now);
        permits
    }
}

/// Lock backend honouring TTLs, shared by cloning
#[derive(Debug, Clone, Default)]
pub struct InMemoryLockBackend {
    table: Arc<Mutex<LockTable>>,
}

impl InMemoryLockBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LockBackend for InMemoryLockBackend {
    async fn try_acquire(&self, key: &str, token: &str, ttl: Duration) -> Result<bool> {
        let mut table = self.table.lock().await;
        let now = Instant::now();

        if let Some(entry) = table.live_lock(key, now) {
            return Ok(entry.token == token);
        }

        table.locks.insert(
            key.to_string(),
            LockEntry {
                token: token.to_string(),
                expires_at: now + ttl,
            },
        );
        Ok(true)
    }

    async fn release(&self, key: &str, token: &str) -> Result<()> {
        let mut table = self.table.lock().await;
        match table.live_lock(key, Instant::now()) {
            Some(entry) if entry.token == token => {
                table.locks.remove(key);
                Ok(())
            }
            Some(_) => Err(LockError::NotHeld {
                key: key.to_string(),
            }),
            None => Ok(()),
        }
    }

    async fn extend(&self, key: &str, token: &str, ttl: Duration) -> Result<()> {
        let mut table = self.table.lock().await;
        let now = Instant::now();
        match table.live_lock(key, now) {
            Some(entry) if entry.token == token => {
                entry.expires_at = now + ttl;
                Ok(())
            }
            _ => Err(LockError::NotHeld {
                key: key.to_string(),
            }),
        }
    }

    async fn holds(&self, key: &str, token: &str) -> Result<bool> {
        let mut table = self.table.lock().await;
        Ok(table
            .live_lock(key, Instant::now())
            .map(|entry| entry.token == token)
            .unwrap_or(false))
    }

    async fn is_locked(&self, key: &str) -> Result<bool> {
        let mut table = self.table.lock().await;
        Ok(table.live_lock(key, Instant::now()).is_some())
    }

    async fn try_acquire_permit(
        &self,
        key: &str,
        token: &str,
        limit: usize,
        ttl: Duration,
    ) -> Result<bool> {
        let mut table = self.table.lock().await;
        let now = Instant::now();
        let permits = table.live_permits(key, now);

        if permits.contains_key(token) {
            permits.insert(token.to_string(), now + ttl);
            return Ok(true);
        }
        if permits.len() >= limit {
            return Ok(false);
        }
        permits.insert(token.to_string(), now + ttl);
        Ok(true)
    }

    async fn release_permit(&self, key: &str, token: &str) -> Result<()> {
        let mut table = self.table.lock().await;
        if let Some(permits) = table.permits.get_mut(key) {
            permits.remove(token);
            if permits.is_empty() {
                table.permits.remove(key);
            }
        }
        Ok(())
    }

    async fn permit_count(&self, key: &str) -> Result<usize> {
        let mut table = self.table.lock().await;
        Ok(table.live_permits(key, Instant::now()).len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lock_basic_operations() {
        let backend = InMemoryLockBackend::new();
        let ttl = Duration::from_secs(30);

        assert!(backend.try_acquire("k", "a", ttl).await.unwrap());
        assert!(!backend.try_acquire("k", "b", ttl).await.unwrap());
        assert!(backend.holds("k", "a").await.unwrap());
        assert!(!backend.holds("k", "b").await.unwrap());

        assert!(backend.release("k", "b").await.is_err());
        backend.release("k", "a").await.unwrap();
        assert!(!backend.is_locked("k").await.unwrap());
        assert!(backend.try_acquire("k", "b", ttl).await.unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn lock_expiry() {
        let backend = InMemoryLockBackend::new();
        assert!(backend
            .try_acquire("k", "a", Duration::from_secs(1))
            .await
            .unwrap());

        tokio::time::advance(Duration::from_millis(1500)).await;

        assert!(!backend.holds("k", "a").await.unwrap());
        assert!(backend
            .extend("k", "a", Duration::from_secs(1))
            .await
            .is_err());
        assert!(backend
            .try_acquire("k", "b", Duration::from_secs(1))
            .await
            .unwrap());
    }

    #[tokio::test(start_paused = true)]
    async fn permits_bounded_and_expire() {
        let backend = InMemoryLockBackend::new();
        let ttl = Duration::from_secs(5);

        assert!(backend.try_acquire_permit("s", "a", 2, ttl).await.unwrap());
        assert!(backend.try_acquire_permit("s", "b", 2, ttl).await.unwrap());
        assert!(!backend.try_acquire_permit("s", "c", 2, ttl).await.unwrap());
        assert_eq!(backend.permit_count("s").await.unwrap(), 2);

        backend.release_permit("s", "a").await.unwrap();
        assert_eq!(backend.permit_count("s").await.unwrap(), 1);

        tokio::time::advance(Duration::from_secs(6)).await;
        assert_eq!(backend.permit_count("s").await.unwrap(), 0);
    }
}

//! Engine configuration

use ctrlplane_lock::LockOptions;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables for the engine; every field has a default
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Lifetime of a lock guard before it must be extended
    pub lock_ttl_secs: u64,

    /// How long blocking lock acquisition waits
    pub lock_wait_timeout_ms: u64,

    pub lock_poll_interval_ms: u64,

    /// Concurrent evaluations allowed per system
    pub evaluation_capacity: usize,

    /// Worker tasks pulling from the work queue
    pub workers: usize,

    /// Bound on ready versions considered per evaluation
    pub candidate_limit: usize,

    /// First requeue delay; doubles on every further attempt
    pub requeue_base_ms: u64,

    pub requeue_max_ms: u64,

    /// 32-byte key for sensitive variables, hex or base64
    pub encryption_key: Option<String>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            lock_ttl_secs: 30,
            lock_wait_timeout_ms: 10_000,
            lock_poll_interval_ms: 50,
            evaluation_capacity: ctrlplane_lock::DEFAULT_EVALUATION_CAPACITY,
            workers: 4,
            candidate_limit: ctrlplane_release::DEFAULT_CANDIDATE_LIMIT,
            requeue_base_ms: 250,
            requeue_max_ms: 30_000,
            encryption_key: None,
        }
    }
}

impl EngineConfig {
    pub fn lock_options(&self) -> LockOptions {
        LockOptions {
            ttl: Duration::from_secs(self.lock_ttl_secs.max(1)),
            wait_timeout: Duration::from_millis(self.lock_wait_timeout_ms),
            poll_interval: Duration::from_millis(self.lock_poll_interval_ms.max(1)),
        }
    }

    pub fn backoff(&self) -> Backoff {
        Backoff {
            base: Duration::from_millis(self.requeue_base_ms.max(1)),
            max: Duration::from_millis(self.requeue_max_ms.max(self.requeue_base_ms).max(1)),
        }
    }
}

/// Exponential requeue delay
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Backoff {
    pub base: Duration,
    pub max: Duration,
}

impl Default for Backoff {
    fn default() -> Self {
        EngineConfig::default().backoff()
    }
}

impl Backoff {
    /// Delay before the given attempt (1-based)
    pub fn delay(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        self.base
            .checked_mul(1u32 << exponent)
            .map_or(self.max, |d| d.min(self.max))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_partial_config_uses_defaults() {
        let config: EngineConfig = serde_json::from_str(r#"{"workers": 8}"#).unwrap();
        assert_eq!(config.workers, 8);
        assert_eq!(config.lock_ttl_secs, 30);
        assert_eq!(config.candidate_limit, 500);
        assert!(config.encryption_key.is_none());
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let backoff = Backoff {
            base: Duration::from_millis(100),
            max: Duration::from_secs(1),
        };
        assert_eq!(backoff.delay(1), Duration::from_millis(100));
        assert_eq!(backoff.delay(2), Duration::from_millis(200));
        assert_eq!(backoff.delay(4), Duration::from_millis(800));
        assert_eq!(backoff.delay(5), Duration::from_secs(1));
        assert_eq!(backoff.delay(u32::MAX), Duration::from_secs(1));
    }
}

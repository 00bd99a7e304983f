//! Per-release-target exclusive mutex

use crate::backend::LockBackend;
use crate::mutex::{DistributedMutex, LockLostCallback, LockOptions};
use ctrlplane_types::ReleaseTargetId;
use std::sync::Arc;

/// Lock key for a release target
pub fn target_lock_key(target_id: &ReleaseTargetId) -> String {
    format!("release-target:{}", target_id.as_uuid())
}

/// Factory for per-target mutexes sharing one backend
#[derive(Clone)]
pub struct TargetLocks {
    backend: Arc<dyn LockBackend>,
    options: LockOptions,
    on_lost: Option<LockLostCallback>,
}

impl TargetLocks {
    pub fn new(backend: Arc<dyn LockBackend>, options: LockOptions) -> Self {
        Self {
            backend,
            options,
            on_lost: None,
        }
    }

    pub fn with_on_lost(mut self, callback: LockLostCallback) -> Self {
        self.on_lost = Some(callback);
        self
    }

    /// Mutex guarding a target's release set and desired pointer
    pub fn mutex(&self, target_id: &ReleaseTargetId) -> TargetMutex {
        let mut mutex =
            DistributedMutex::new(self.backend.clone(), target_lock_key(target_id), self.options);
        if let Some(callback) = &self.on_lost {
            mutex = mutex.with_on_lost(callback.clone());
        }
        TargetMutex {
            target_id: *target_id,
            mutex,
        }
    }
}

/// Exclusive mutex for one release target
#[derive(Debug, Clone)]
pub struct TargetMutex {
    target_id: ReleaseTargetId,
    mutex: DistributedMutex,
}

impl TargetMutex {
    pub fn target_id(&self) -> ReleaseTargetId {
        self.target_id
    }
}

impl std::ops::Deref for TargetMutex {
    type Target = DistributedMutex;

    fn deref(&self) -> &Self::Target {
        &self.mutex
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLockBackend;

    #[tokio::test]
    async fn test_targets_lock_independently() {
        let locks = TargetLocks::new(Arc::new(InMemoryLockBackend::new()), LockOptions::default());
        let t1 = ReleaseTargetId::generate();
        let t2 = ReleaseTargetId::generate();

        let _g1 = locks.mutex(&t1).try_lock().await.unwrap().unwrap();
        assert!(locks.mutex(&t1).try_lock().await.unwrap().is_none());
        assert!(locks.mutex(&t2).try_lock().await.unwrap().is_some());
        assert_eq!(locks.mutex(&t1).target_id(), t1);
    }
}

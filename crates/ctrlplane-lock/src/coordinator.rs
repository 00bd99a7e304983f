//! Per-system coordination of target computation and evaluation
//!
//! Bulk target recomputation for a system holds the system's computation
//! mutex. Evaluations hold one of a bounded number of evaluation permits.
//! The two are mutually exclusive:
//!
//! - an evaluator takes a permit, then re-checks the computation mutex and
//!   gives the permit back if a computation started in between;
//! - a computation takes the mutex, then waits for outstanding permits to
//!   drain before proceeding.

use crate::backend::LockBackend;
use crate::error::{LockError, Result};
use crate::mutex::{DistributedMutex, LockOptions, MutexGuard};
use ctrlplane_types::SystemId;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::time::Instant;
use uuid::Uuid;

/// Default number of concurrent evaluations per system
pub const DEFAULT_EVALUATION_CAPACITY: usize = 10;

fn compute_key(system_id: &SystemId) -> String {
    format!("system-compute:{}", system_id.as_uuid())
}

fn evaluation_key(system_id: &SystemId) -> String {
    format!("system-evaluate:{}", system_id.as_uuid())
}

#[derive(Clone)]
pub struct SystemCoordinator {
    backend: Arc<dyn LockBackend>,
    options: LockOptions,
    evaluation_capacity: usize,
}

impl SystemCoordinator {
    pub fn new(backend: Arc<dyn LockBackend>, options: LockOptions) -> Self {
        Self {
            backend,
            options,
            evaluation_capacity: DEFAULT_EVALUATION_CAPACITY,
        }
    }

    pub fn with_evaluation_capacity(mut self, capacity: usize) -> Self {
        self.evaluation_capacity = capacity.max(1);
        self
    }

    pub fn evaluation_capacity(&self) -> usize {
        self.evaluation_capacity
    }

    fn compute_mutex(&self, system_id: &SystemId) -> DistributedMutex {
        DistributedMutex::new(self.backend.clone(), compute_key(system_id), self.options)
    }

    /// Take an evaluation permit without waiting
    ///
    /// Returns `None` while a computation holds the system or all permits
    /// are taken.
    pub async fn try_begin_evaluation(
        &self,
        system_id: &SystemId,
    ) -> Result<Option<EvaluationPermit>> {
        let compute = compute_key(system_id);
        if self.backend.is_locked(&compute).await? {
            return Ok(None);
        }

        let key = evaluation_key(system_id);
        let token = Uuid::new_v4().to_string();
        if !self
            .backend
            .try_acquire_permit(&key, &token, self.evaluation_capacity, self.options.ttl)
            .await?
        {
            return Ok(None);
        }

        // A computation may have started between the check and the permit.
        if self.backend.is_locked(&compute).await? {
            self.backend.release_permit(&key, &token).await?;
            tracing::debug!(system_id = %system_id, "Evaluation backed off for computation");
            return Ok(None);
        }

        Ok(Some(EvaluationPermit {
            backend: self.backend.clone(),
            key,
            token,
            released: AtomicBool::new(false),
        }))
    }

    /// Take an evaluation permit, waiting up to the wait timeout
    pub async fn begin_evaluation(&self, system_id: &SystemId) -> Result<EvaluationPermit> {
        let started = Instant::now();
        loop {
            if let Some(permit) = self.try_begin_evaluation(system_id).await? {
                return Ok(permit);
            }
            if started.elapsed() >= self.options.wait_timeout {
                return Err(LockError::Timeout {
                    key: evaluation_key(system_id),
                    waited_ms: started.elapsed().as_millis() as u64,
                });
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }

    /// Take the computation mutex without waiting for it
    ///
    /// Once the mutex is held this waits (up to the wait timeout) for
    /// in-flight evaluations to finish. Returns `None` if the mutex is taken
    /// or evaluations do not drain in time.
    pub async fn try_begin_computation(&self, system_id: &SystemId) -> Result<Option<MutexGuard>> {
        let Some(guard) = self.compute_mutex(system_id).try_lock().await? else {
            return Ok(None);
        };

        if self.drain_evaluations(system_id).await? {
            Ok(Some(guard))
        } else {
            tracing::debug!(
                system_id = %system_id,
                "Evaluations did not drain; releasing computation lock"
            );
            guard.release().await?;
            Ok(None)
        }
    }

    /// Take the computation mutex, waiting for it and for evaluations to drain
    pub async fn begin_computation(&self, system_id: &SystemId) -> Result<MutexGuard> {
        let guard = self.compute_mutex(system_id).lock().await?;
        if self.drain_evaluations(system_id).await? {
            Ok(guard)
        } else {
            guard.release().await?;
            Err(LockError::Timeout {
                key: evaluation_key(system_id),
                waited_ms: self.options.wait_timeout.as_millis() as u64,
            })
        }
    }

    /// Whether a computation currently holds the system
    pub async fn is_computing(&self, system_id: &SystemId) -> Result<bool> {
        self.backend.is_locked(&compute_key(system_id)).await
    }

    /// Number of evaluation permits outstanding
    pub async fn active_evaluations(&self, system_id: &SystemId) -> Result<usize> {
        self.backend.permit_count(&evaluation_key(system_id)).await
    }

    async fn drain_evaluations(&self, system_id: &SystemId) -> Result<bool> {
        let key = evaluation_key(system_id);
        let started = Instant::now();
        loop {
            if self.backend.permit_count(&key).await? == 0 {
                return Ok(true);
            }
            if started.elapsed() >= self.options.wait_timeout {
                return Ok(false);
            }
            tokio::time::sleep(self.options.poll_interval).await;
        }
    }
}

impl fmt::Debug for SystemCoordinator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SystemCoordinator")
            .field("options", &self.options)
            .field("evaluation_capacity", &self.evaluation_capacity)
            .finish()
    }
}

/// One held evaluation slot of a system
pub struct EvaluationPermit {
    backend: Arc<dyn LockBackend>,
    key: String,
    token: String,
    released: AtomicBool,
}

impl EvaluationPermit {
    pub async fn release(self) -> Result<()> {
        if self.released.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        self.backend.release_permit(&self.key, &self.token).await
    }
}

impl Drop for EvaluationPermit {
    fn drop(&mut self) {
        if self.released.swap(true, Ordering::SeqCst) {
            return;
        }
        let Ok(handle) = tokio::runtime::Handle::try_current() else {
            return;
        };
        let backend = self.backend.clone();
        let key = std::mem::take(&mut self.key);
        let token = std::mem::take(&mut self.token);
        handle.spawn(async move {
            if let Err(e) = backend.release_permit(&key, &token).await {
                tracing::warn!(key = %key, error = %e, "Failed to release permit on drop");
            }
        });
    }
}

impl fmt::Debug for EvaluationPermit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EvaluationPermit")
            .field("key", &self.key)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::InMemoryLockBackend;
    use std::time::Duration;

    fn coordinator(capacity: usize) -> SystemCoordinator {
        SystemCoordinator::new(
            Arc::new(InMemoryLockBackend::new()),
            LockOptions {
                ttl: Duration::from_secs(30),
                wait_timeout: Duration::from_millis(100),
                poll_interval: Duration::from_millis(5),
            },
        )
        .with_evaluation_capacity(capacity)
    }

    #[tokio::test]
    async fn test_evaluation_permits_bounded() {
        let coordinator = coordinator(2);
        let system = SystemId::generate();

        let p1 = coordinator.try_begin_evaluation(&system).await.unwrap();
        let p2 = coordinator.try_begin_evaluation(&system).await.unwrap();
        let p3 = coordinator.try_begin_evaluation(&system).await.unwrap();
        assert!(p1.is_some() && p2.is_some());
        assert!(p3.is_none());
        assert_eq!(coordinator.active_evaluations(&system).await.unwrap(), 2);

        p1.unwrap().release().await.unwrap();
        assert!(coordinator
            .try_begin_evaluation(&system)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_evaluation_backs_off_during_computation() {
        let coordinator = coordinator(10);
        let system = SystemId::generate();

        let guard = coordinator
            .try_begin_computation(&system)
            .await
            .unwrap()
            .expect("computation lock");
        assert!(coordinator.is_computing(&system).await.unwrap());
        assert!(coordinator
            .try_begin_evaluation(&system)
            .await
            .unwrap()
            .is_none());
        assert_eq!(coordinator.active_evaluations(&system).await.unwrap(), 0);

        guard.release().await.unwrap();
        assert!(coordinator
            .try_begin_evaluation(&system)
            .await
            .unwrap()
            .is_some());
    }

    #[tokio::test]
    async fn test_computation_waits_for_evaluations() {
        let coordinator = coordinator(10);
        let system = SystemId::generate();

        let permit = coordinator.try_begin_evaluation(&system).await.unwrap().unwrap();

        // Permit never released within the wait timeout.
        assert!(coordinator
            .try_begin_computation(&system)
            .await
            .unwrap()
            .is_none());
        assert!(!coordinator.is_computing(&system).await.unwrap());

        let releaser = tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            permit.release().await.unwrap();
        });
        let guard = coordinator.begin_computation(&system).await.unwrap();
        releaser.await.unwrap();
        assert!(guard.is_held().await.unwrap());
    }

    #[tokio::test]
    async fn test_systems_are_independent() {
        let coordinator = coordinator(1);
        let a = SystemId::generate();
        let b = SystemId::generate();

        let _computing = coordinator.try_begin_computation(&a).await.unwrap().unwrap();
        assert!(coordinator.try_begin_evaluation(&b).await.unwrap().is_some());
    }
}

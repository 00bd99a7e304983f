//! Builder for the control plane

use crate::config::EngineConfig;
use crate::control_plane::ControlPlane;
use crate::dispatch::LoggingDispatcher;
use crate::error::{ControlPlaneError, Result};
use crate::evaluator::Evaluator;
use crate::events::EventAggregator;
use crate::queue::{InMemoryWorkQueue, WorkQueue};
use ctrlplane_lock::{InMemoryLockBackend, LockBackend, SystemCoordinator, TargetLocks};
use ctrlplane_release::{ReleaseManager, VariableCipher};
use ctrlplane_store::Store;
use ctrlplane_targets::ReleaseTargetResolver;
use ctrlplane_types::{EngineEvent, EventSource, JobDispatcher};
use std::sync::Arc;
use tracing::warn;

/// Wires the store, lock backend, queue and dispatcher into a [`ControlPlane`]
///
/// Only the store is required. The lock backend and queue default to their
/// in-memory versions and the dispatcher to [`LoggingDispatcher`].
#[derive(Default)]
pub struct ControlPlaneBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn Store>>,
    lock_backend: Option<Arc<dyn LockBackend>>,
    queue: Option<Arc<dyn WorkQueue>>,
    dispatcher: Option<Arc<dyn JobDispatcher>>,
}

impl ControlPlaneBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    pub fn with_store(mut self, store: Arc<dyn Store>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn with_lock_backend(mut self, backend: Arc<dyn LockBackend>) -> Self {
        self.lock_backend = Some(backend);
        self
    }

    pub fn with_queue(mut self, queue: Arc<dyn WorkQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    pub fn build(self) -> Result<ControlPlane> {
        let config = self.config;
        let store = self.store.ok_or(ControlPlaneError::NotInitialized("store"))?;
        let backend = self
            .lock_backend
            .unwrap_or_else(|| Arc::new(InMemoryLockBackend::new()));
        let queue = self
            .queue
            .unwrap_or_else(|| Arc::new(InMemoryWorkQueue::new(config.backoff())));
        let dispatcher = self
            .dispatcher
            .unwrap_or_else(|| Arc::new(LoggingDispatcher));

        if config.workers == 0 {
            return Err(ControlPlaneError::Config("workers must be at least 1".into()));
        }

        let events = EventAggregator::new();
        let options = config.lock_options();
        let lost_events = events.clone();
        let target_locks = TargetLocks::new(backend.clone(), options).with_on_lost(Arc::new(
            move |key: &str| {
                lost_events.emit(
                    EventSource::ControlPlane,
                    EngineEvent::LockLost {
                        key: key.to_string(),
                    },
                );
            },
        ));
        let coordinator = SystemCoordinator::new(backend, options)
            .with_evaluation_capacity(config.evaluation_capacity);

        let mut releases =
            ReleaseManager::new(store.clone()).with_candidate_limit(config.candidate_limit);
        match &config.encryption_key {
            Some(key) => releases = releases.with_cipher(VariableCipher::from_key_material(key)?),
            None => {
                warn!("No encryption key configured; sensitive variables are stored in plain text")
            }
        }

        let resolver = ReleaseTargetResolver::new(
            store.clone(),
            target_locks.clone(),
            coordinator.clone(),
            dispatcher.clone(),
        );
        let evaluator = Evaluator::new(
            store.clone(),
            releases,
            coordinator,
            target_locks,
            dispatcher,
            events.clone(),
        );

        Ok(ControlPlane::new(config, store, queue, resolver, evaluator, events))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ctrlplane_store::InMemoryStore;

    #[test]
    fn test_store_is_required() {
        let err = ControlPlaneBuilder::new().build().err().unwrap();
        assert!(matches!(err, ControlPlaneError::NotInitialized("store")));
    }

    #[test]
    fn test_invalid_key_rejected() {
        let config = EngineConfig {
            encryption_key: Some("not a key".into()),
            ..EngineConfig::default()
        };
        let err = ControlPlaneBuilder::new()
            .with_config(config)
            .with_store(Arc::new(InMemoryStore::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ControlPlaneError::Release(_)));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = EngineConfig {
            workers: 0,
            ..EngineConfig::default()
        };
        let err = ControlPlaneBuilder::new()
            .with_config(config)
            .with_store(Arc::new(InMemoryStore::new()))
            .build()
            .err()
            .unwrap();
        assert!(matches!(err, ControlPlaneError::Config(_)));
    }
}

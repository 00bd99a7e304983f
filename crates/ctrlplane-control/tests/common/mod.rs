//! Shared fixtures for control plane scenarios

#![allow(dead_code)]

use async_trait::async_trait;
use ctrlplane_control::{ControlPlane, ControlPlaneBuilder, EngineConfig, WorkQueue};
use ctrlplane_selector::Condition;
use ctrlplane_store::{InMemoryStore, ResourceStore, SystemStore, VersionStore};
use ctrlplane_types::{
    Deployment, DeploymentVersion, DispatchError, DispatchReceipt, Environment,
    EvaluationDecision, Job, JobAgent, JobDispatcher, Release, ReleaseTarget, Resource, System,
    WorkspaceId,
};
use std::sync::{Arc, Mutex};
use std::time::Duration;

/// Dispatcher that records every call and can be told to fail
#[derive(Default)]
pub struct RecordingDispatcher {
    dispatched: Mutex<Vec<Job>>,
    removed: Mutex<Vec<ReleaseTarget>>,
    decisions: Mutex<Vec<EvaluationDecision>>,
    fail_with: Mutex<Option<DispatchError>>,
    stall_next_decision: Mutex<Option<Duration>>,
}

impl RecordingDispatcher {
    pub fn dispatched(&self) -> Vec<Job> {
        self.dispatched.lock().unwrap().clone()
    }

    pub fn removed(&self) -> Vec<ReleaseTarget> {
        self.removed.lock().unwrap().clone()
    }

    pub fn decisions(&self) -> Vec<EvaluationDecision> {
        self.decisions.lock().unwrap().clone()
    }

    pub fn last_decision(&self) -> EvaluationDecision {
        self.decisions().last().cloned().expect("no decision recorded")
    }

    pub fn fail_with(&self, error: Option<DispatchError>) {
        *self.fail_with.lock().unwrap() = error;
    }

    /// Make the next `decision_recorded` call sleep, holding up its evaluation
    pub fn stall_next_decision(&self, duration: Duration) {
        *self.stall_next_decision.lock().unwrap() = Some(duration);
    }
}

#[async_trait]
impl JobDispatcher for RecordingDispatcher {
    async fn dispatch(
        &self,
        _target: &ReleaseTarget,
        _release: &Release,
        job: &Job,
    ) -> Result<DispatchReceipt, DispatchError> {
        if let Some(error) = self.fail_with.lock().unwrap().clone() {
            return Err(error);
        }
        self.dispatched.lock().unwrap().push(job.clone());
        Ok(DispatchReceipt {
            external_run_id: Some(format!("run-{}", job.id.as_uuid())),
        })
    }

    async fn target_removed(&self, target: &ReleaseTarget) {
        self.removed.lock().unwrap().push(target.clone());
    }

    async fn decision_recorded(&self, _target: &ReleaseTarget, decision: &EvaluationDecision) {
        self.decisions.lock().unwrap().push(decision.clone());
        let stall = self.stall_next_decision.lock().unwrap().take();
        if let Some(duration) = stall {
            tokio::time::sleep(duration).await;
        }
    }
}

/// One workspace with one system, wired to an in-memory control plane
pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub control_plane: Arc<ControlPlane>,
    pub workspace: WorkspaceId,
    pub system: System,
    pub agent: JobAgent,
}

pub fn test_config() -> EngineConfig {
    EngineConfig {
        lock_wait_timeout_ms: 500,
        lock_poll_interval_ms: 5,
        requeue_base_ms: 1,
        requeue_max_ms: 20,
        ..EngineConfig::default()
    }
}

impl Fixture {
    pub async fn new() -> Self {
        Self::with_config(test_config()).await
    }

    pub async fn with_config(config: EngineConfig) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::default());
        let control_plane = ControlPlaneBuilder::new()
            .with_config(config)
            .with_store(store.clone())
            .with_dispatcher(dispatcher.clone())
            .build()
            .expect("control plane");

        let workspace = WorkspaceId::generate();
        let system = System::new(workspace, "checkout");
        store.upsert_system(system.clone()).await.unwrap();
        let agent = JobAgent::new(workspace, "k8s", "kubernetes-job");
        store.upsert_job_agent(agent.clone()).await.unwrap();

        Self {
            store,
            dispatcher,
            control_plane: Arc::new(control_plane),
            workspace,
            system,
            agent,
        }
    }

    pub async fn resource(&self, identifier: &str, tier: &str) -> Resource {
        let resource = Resource::new(self.workspace, identifier, identifier, "Cluster", "v1")
            .with_metadata("tier", tier);
        self.store.upsert_resource(resource.clone()).await.unwrap();
        resource
    }

    pub async fn environment(&self, name: &str, tier: &str) -> Environment {
        let environment = Environment::new(self.system.id, name)
            .with_selector(Condition::metadata_equals("tier", tier));
        self.store.upsert_environment(environment.clone()).await.unwrap();
        environment
    }

    /// Deployment wired to the fixture's job agent
    pub async fn deployment(&self, slug: &str) -> Deployment {
        let deployment = Deployment::new(self.system.id, slug, slug)
            .with_job_agent(self.agent.id, serde_json::json!({ "namespace": slug }));
        self.store.upsert_deployment(deployment.clone()).await.unwrap();
        deployment
    }

    pub async fn version(&self, deployment: &Deployment, tag: &str) -> DeploymentVersion {
        let version = DeploymentVersion::new(deployment.id, tag);
        self.store.upsert_version(version.clone()).await.unwrap();
        version
    }

    /// Run queued work, including delayed requeues, until the queue is empty
    pub async fn settle(&self) {
        for _ in 0..200 {
            self.control_plane.drain().await.expect("work failed");
            if self.control_plane.queue().is_empty().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("queue did not settle");
    }
}

//! Work queue
//!
//! At-least-once queue of units of work. Pending items are deduplicated by
//! subject: a second evaluation request for a target that is still waiting
//! merges into the first. Work that hit contention comes back through
//! [`WorkQueue::requeue`] with an exponential delay.

use crate::config::Backoff;
use async_trait::async_trait;
use ctrlplane_types::{
    DeploymentId, EnvironmentId, PolicyId, ReleaseTargetId, ResourceId, VersionId,
};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::{Mutex, Notify};
use tokio::time::Instant;

/// One unit of work
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkItem {
    ReplaceForResource(ResourceId),
    ReplaceForDeployment(DeploymentId),
    ReplaceForEnvironment(EnvironmentId),
    ReplaceForPolicy(PolicyId),

    /// Fan out evaluations to every target of the version's deployment
    VersionPublished(VersionId),

    Evaluate {
        target_id: ReleaseTargetId,
        desired_version_id: Option<VersionId>,

        /// Dispatch a job even if the desired release did not change
        force: bool,
    },
}

impl WorkItem {
    pub fn evaluate(target_id: ReleaseTargetId) -> Self {
        WorkItem::Evaluate {
            target_id,
            desired_version_id: None,
            force: false,
        }
    }

    /// Deduplication key
    pub fn key(&self) -> WorkKey {
        match self {
            WorkItem::ReplaceForResource(id) => WorkKey::Resource(*id),
            WorkItem::ReplaceForDeployment(id) => WorkKey::Deployment(*id),
            WorkItem::ReplaceForEnvironment(id) => WorkKey::Environment(*id),
            WorkItem::ReplaceForPolicy(id) => WorkKey::Policy(*id),
            WorkItem::VersionPublished(id) => WorkKey::Version(*id),
            WorkItem::Evaluate { target_id, .. } => WorkKey::Target(*target_id),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            WorkItem::ReplaceForResource(_) => "replace_for_resource",
            WorkItem::ReplaceForDeployment(_) => "replace_for_deployment",
            WorkItem::ReplaceForEnvironment(_) => "replace_for_environment",
            WorkItem::ReplaceForPolicy(_) => "replace_for_policy",
            WorkItem::VersionPublished(_) => "version_published",
            WorkItem::Evaluate { .. } => "evaluate",
        }
    }

    /// Fold a later request for the same subject into this one
    fn merge(&mut self, later: WorkItem) {
        if let (
            WorkItem::Evaluate {
                desired_version_id,
                force,
                ..
            },
            WorkItem::Evaluate {
                desired_version_id: later_desired,
                force: later_force,
                ..
            },
        ) = (self, later)
        {
            if later_desired.is_some() {
                *desired_version_id = later_desired;
            }
            *force |= later_force;
        }
    }
}

impl fmt::Display for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WorkItem::ReplaceForResource(id) => write!(f, "{}:{}", self.kind(), id),
            WorkItem::ReplaceForDeployment(id) => write!(f, "{}:{}", self.kind(), id),
            WorkItem::ReplaceForEnvironment(id) => write!(f, "{}:{}", self.kind(), id),
            WorkItem::ReplaceForPolicy(id) => write!(f, "{}:{}", self.kind(), id),
            WorkItem::VersionPublished(id) => write!(f, "{}:{}", self.kind(), id),
            WorkItem::Evaluate { target_id, .. } => write!(f, "{}:{}", self.kind(), target_id),
        }
    }
}

/// Subject a work item is deduplicated on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WorkKey {
    Resource(ResourceId),
    Deployment(DeploymentId),
    Environment(EnvironmentId),
    Policy(PolicyId),
    Version(VersionId),
    Target(ReleaseTargetId),
}

/// A dequeued item and how many times it has been requeued
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct QueuedWork {
    pub item: WorkItem,
    pub attempt: u32,
}

/// Queue capability consumed by the control plane
#[async_trait]
pub trait WorkQueue: Send + Sync {
    /// Add fresh work, ready immediately
    async fn enqueue(&self, item: WorkItem);

    /// Put back work that could not run, delayed by the backoff policy
    async fn requeue(&self, work: QueuedWork);

    /// Take the oldest ready item without waiting
    async fn try_dequeue(&self) -> Option<QueuedWork>;

    /// Wait for the next ready item
    async fn dequeue(&self) -> QueuedWork;

    /// Pending items, ready or delayed
    async fn len(&self) -> usize;

    async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[derive(Debug)]
struct Pending {
    work: QueuedWork,
    ready_at: Instant,
    seq: u64,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: HashMap<WorkKey, Pending>,
    next_seq: u64,
}

impl QueueState {
    fn insert(&mut self, work: QueuedWork, ready_at: Instant) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.pending.insert(work.item.key(), Pending { work, ready_at, seq });
    }

    fn pop_ready(&mut self, now: Instant) -> Option<QueuedWork> {
        let key = self
            .pending
            .iter()
            .filter(|(_, p)| p.ready_at <= now)
            .min_by_key(|(_, p)| p.seq)
            .map(|(key, _)| *key)?;
        self.pending.remove(&key).map(|p| p.work)
    }

    fn next_ready_at(&self) -> Option<Instant> {
        self.pending.values().map(|p| p.ready_at).min()
    }
}

/// Single-process queue
pub struct InMemoryWorkQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    backoff: Backoff,
}

impl InMemoryWorkQueue {
    pub fn new(backoff: Backoff) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            backoff,
        }
    }
}

impl Default for InMemoryWorkQueue {
    fn default() -> Self {
        Self::new(Backoff::default())
    }
}

#[async_trait]
impl WorkQueue for InMemoryWorkQueue {
    async fn enqueue(&self, item: WorkItem) {
        let now = Instant::now();
        let mut state = self.state.lock().await;
        match state.pending.get_mut(&item.key()) {
            Some(existing) => {
                existing.work.item.merge(item);
                existing.work.attempt = 0;
                existing.ready_at = existing.ready_at.min(now);
            }
            None => state.insert(QueuedWork { item, attempt: 0 }, now),
        }
        drop(state);
        self.notify.notify_one();
    }

    async fn requeue(&self, work: QueuedWork) {
        let attempt = work.attempt.saturating_add(1);
        let ready_at = Instant::now() + self.backoff.delay(attempt);
        let mut state = self.state.lock().await;
        match state.pending.get_mut(&work.item.key()) {
            // A fresh request arrived meanwhile; it already covers this one.
            Some(existing) => {
                let mut item = work.item;
                item.merge(existing.work.item.clone());
                existing.work.item = item;
            }
            None => state.insert(
                QueuedWork {
                    item: work.item,
                    attempt,
                },
                ready_at,
            ),
        }
        drop(state);
        self.notify.notify_one();
    }

    async fn try_dequeue(&self) -> Option<QueuedWork> {
        self.state.lock().await.pop_ready(Instant::now())
    }

    async fn dequeue(&self) -> QueuedWork {
        loop {
            let next_ready_at = {
                let mut state = self.state.lock().await;
                if let Some(work) = state.pop_ready(Instant::now()) {
                    return work;
                }
                state.next_ready_at()
            };

            match next_ready_at {
                Some(at) => {
                    tokio::select! {
                        _ = self.notify.notified() => {}
                        _ = tokio::time::sleep_until(at) => {}
                    }
                }
                None => self.notify.notified().await,
            }
        }
    }

    async fn len(&self) -> usize {
        self.state.lock().await.pending.len()
    }
}

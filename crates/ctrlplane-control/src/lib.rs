//! # Ctrlplane Control Plane
//!
//! Ties the release engine together behind one facade.
//!
//! ## Overview
//!
//! [`ControlPlane`] accepts identity-only change events, turns them into
//! queued work and runs that work on a pool of workers:
//!
//! - Resource, environment and deployment changes recompute release targets
//! - Policy changes recompute the targets a policy governs
//! - Published versions and redeploy requests evaluate the affected targets
//! - Job agent callbacks move jobs through their lifecycle
//!
//! Every target an operation touches is queued for evaluation. An evaluation
//! runs the policy engine, writes the release and desired pointer, and hands
//! a job to the [`JobDispatcher`](ctrlplane_types::JobDispatcher).
//!
//! ## Key Components
//!
//! - [`ControlPlane`]: Event intake and work processing
//! - [`ControlPlaneBuilder`]: Wiring of store, locks, queue and dispatcher
//! - [`WorkQueue`]: Deduplicating queue with delayed requeue
//! - [`Evaluator`]: One evaluation pass for one target
//! - [`EventAggregator`]: Broadcast stream of engine events
//! - [`EngineConfig`]: Lock timings, worker counts, backoff, encryption key
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use ctrlplane_control::ControlPlaneBuilder;
//! use ctrlplane_store::InMemoryStore;
//! use ctrlplane_types::{ControlEvent, ResourceId};
//!
//! # async fn example() -> ctrlplane_control::Result<()> {
//! let control_plane = ControlPlaneBuilder::new()
//!     .with_store(Arc::new(InMemoryStore::new()))
//!     .build()?;
//!
//! control_plane
//!     .ingest(ControlEvent::ResourceUpserted { resource_id: ResourceId::generate() })
//!     .await?;
//! control_plane.drain().await?;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod builder;
pub mod config;
pub mod control_plane;
pub mod dispatch;
pub mod error;
pub mod evaluator;
pub mod events;
pub mod queue;
pub mod trace;

// Re-exports
pub use builder::ControlPlaneBuilder;
pub use config::{Backoff, EngineConfig};
pub use control_plane::{ControlPlane, WorkOutcome};
pub use dispatch::LoggingDispatcher;
pub use error::{ControlPlaneError, Result};
pub use evaluator::{EvaluationOutcome, EvaluationReport, Evaluator};
pub use events::EventAggregator;
pub use queue::{InMemoryWorkQueue, QueuedWork, WorkItem, WorkKey, WorkQueue};
pub use trace::traced;

//! Daemon lifecycle: storage, workers, ingestion and shutdown

use crate::config::{DaemonConfig, StorageConfig};
use crate::error::{DaemonError, DaemonResult};
use ctrlplane_control::{ControlPlane, ControlPlaneBuilder, LoggingDispatcher};
use ctrlplane_store::{InMemoryStore, PostgresStore, Store};
use ctrlplane_types::ControlEvent;
use std::future::Future;
use std::sync::Arc;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

/// Ctrlplane daemon
pub struct Server {
    config: DaemonConfig,
    control_plane: Arc<ControlPlane>,
}

impl Server {
    /// Connect storage and assemble the control plane
    pub async fn new(config: DaemonConfig) -> DaemonResult<Self> {
        let store = open_store(&config.storage).await?;
        let control_plane = ControlPlaneBuilder::new()
            .with_config(config.engine.clone())
            .with_store(store)
            .with_dispatcher(Arc::new(LoggingDispatcher))
            .build()?;

        Ok(Self {
            config,
            control_plane: Arc::new(control_plane),
        })
    }

    pub fn control_plane(&self) -> &Arc<ControlPlane> {
        &self.control_plane
    }

    /// Run until ctrl-c or SIGTERM
    pub async fn run(self) -> DaemonResult<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run workers until `shutdown` resolves, then wait for them to stop
    pub async fn run_until<F>(self, shutdown: F) -> DaemonResult<()>
    where
        F: Future<Output = ()>,
    {
        let (stop_tx, stop_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        for worker_id in 0..self.config.engine.workers {
            let control_plane = self.control_plane.clone();
            let stop = stop_rx.clone();
            tasks.push(tokio::spawn(async move {
                control_plane.run_worker(worker_id, stop).await;
            }));
        }

        if self.config.logging.engine_events {
            tasks.push(spawn_event_logger(
                self.control_plane.subscribe_events(),
                stop_rx.clone(),
            ));
        }

        if self.config.ingest.stdin {
            let control_plane = self.control_plane.clone();
            let stop = stop_rx.clone();
            tasks.push(tokio::spawn(async move {
                let reader = BufReader::new(tokio::io::stdin());
                if let Err(e) = ingest_lines(&control_plane, reader, stop).await {
                    tracing::error!(error = %e, "Stdin ingestion stopped");
                }
            }));
        }

        tracing::info!(
            workers = self.config.engine.workers,
            storage = self.config.storage_kind(),
            stdin = self.config.ingest.stdin,
            "Ctrlplane daemon running"
        );

        shutdown.await;
        tracing::info!("Ctrlplane daemon shutting down");

        // Workers finish the unit of work they hold before observing the flag.
        let _ = stop_tx.send(true);
        let mut failed = None;
        for task in tasks {
            if let Err(e) = task.await {
                failed = Some(DaemonError::Worker(e.to_string()));
            }
        }

        let pending = self.control_plane.queue().len().await;
        if pending > 0 {
            tracing::warn!(pending, "Work left in queue at shutdown");
        }

        match failed {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

async fn open_store(config: &StorageConfig) -> DaemonResult<Arc<dyn Store>> {
    match config {
        StorageConfig::Memory => {
            tracing::warn!("Using in-memory storage; state is lost on restart");
            Ok(Arc::new(InMemoryStore::new()))
        }
        StorageConfig::Postgres {
            url,
            max_connections,
            connect_timeout_secs,
        } => {
            let store = PostgresStore::new(url, *max_connections, *connect_timeout_secs).await?;
            tracing::info!(max_connections, "Connected to PostgreSQL");
            Ok(Arc::new(store))
        }
    }
}

/// Feed newline-delimited JSON control events into the control plane
///
/// Malformed lines are logged and skipped. Returns the number of events
/// ingested once the reader is exhausted or `shutdown` flips.
pub async fn ingest_lines<R>(
    control_plane: &ControlPlane,
    reader: R,
    mut shutdown: watch::Receiver<bool>,
) -> DaemonResult<usize>
where
    R: AsyncBufRead + Unpin,
{
    let mut lines = reader.lines();
    let mut ingested = 0;

    loop {
        if *shutdown.borrow() {
            break;
        }
        let line = tokio::select! {
            changed = shutdown.changed() => {
                if changed.is_err() {
                    break;
                }
                continue;
            }
            line = lines.next_line() => line?,
        };
        let Some(line) = line else {
            break;
        };
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        match serde_json::from_str::<ControlEvent>(line) {
            Ok(event) => {
                tracing::debug!(event = event.name(), "Control event received");
                control_plane.ingest(event).await?;
                ingested += 1;
            }
            Err(e) => {
                tracing::warn!(error = %e, "Skipping malformed control event");
            }
        }
    }

    Ok(ingested)
}

fn spawn_event_logger(
    mut events: broadcast::Receiver<ctrlplane_types::EngineEventEnvelope>,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = shutdown.changed() => break,
                received = events.recv() => match received {
                    Ok(envelope) => {
                        tracing::debug!(
                            source = ?envelope.source,
                            event = ?envelope.event,
                            "Engine event"
                        );
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        tracing::warn!(skipped, "Engine event logger lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                },
            }
        }
    })
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to listen for Ctrl+C");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install terminate handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating graceful shutdown");
        }
        _ = terminate => {
            tracing::info!("Received terminate signal, initiating graceful shutdown");
        }
    }
}

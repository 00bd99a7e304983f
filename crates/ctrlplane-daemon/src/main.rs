//! Ctrlplane daemon - release resolution worker service
//!
//! Loads configuration, connects storage, and runs the control plane's
//! worker pool until ctrl-c or SIGTERM.

use clap::Parser;
use ctrlplane_daemon::{DaemonConfig, DaemonError, DaemonResult, Server, StorageConfig};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Ctrlplane daemon CLI
#[derive(Parser)]
#[command(name = "ctrlplaned")]
#[command(
    about = "Ctrlplane daemon - release target resolution and policy evaluation",
    long_about = None
)]
#[command(version)]
struct Cli {
    /// Configuration file path
    #[arg(short, long, env = "CTRLPLANE_CONFIG")]
    config: Option<String>,

    /// PostgreSQL URL; in-memory storage when absent
    #[arg(long, env = "CTRLPLANE_DATABASE_URL")]
    database_url: Option<String>,

    /// Worker tasks
    #[arg(short, long, env = "CTRLPLANE_WORKERS")]
    workers: Option<usize>,

    /// Read newline-delimited JSON control events from stdin
    #[arg(long, env = "CTRLPLANE_STDIN")]
    stdin: bool,

    /// Log level
    #[arg(long, env = "CTRLPLANE_LOG_LEVEL")]
    log_level: Option<String>,

    /// Enable JSON logging
    #[arg(long, env = "CTRLPLANE_LOG_JSON")]
    json: bool,
}

#[tokio::main]
async fn main() -> DaemonResult<()> {
    let cli = Cli::parse();

    let mut config = DaemonConfig::load(cli.config.as_deref())
        .map_err(|e| DaemonError::Config(e.to_string()))?;

    if let Some(level) = cli.log_level {
        config.logging.level = level;
    }
    if cli.json {
        config.logging.json = true;
    }
    if let Some(workers) = cli.workers {
        config.engine.workers = workers;
    }
    if cli.stdin {
        config.ingest.stdin = true;
    }
    if let Some(url) = cli.database_url {
        config.storage = match config.storage {
            StorageConfig::Postgres {
                max_connections,
                connect_timeout_secs,
                ..
            } => StorageConfig::Postgres {
                url,
                max_connections,
                connect_timeout_secs,
            },
            StorageConfig::Memory => StorageConfig::Postgres {
                url,
                max_connections: 10,
                connect_timeout_secs: 5,
            },
        };
    }

    // Initialize tracing
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| config.logging.level.clone().into());

    if config.logging.json {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    tracing::info!("Starting Ctrlplane daemon v{}", env!("CARGO_PKG_VERSION"));
    tracing::info!("Storage: {}", config.storage_kind());
    tracing::info!("Workers: {}", config.engine.workers);

    let server = Server::new(config).await?;
    server.run().await
}

//! Ctrlplane daemon library
//!
//! Components behind the `ctrlplaned` binary:
//! - Layered configuration (defaults, file, environment)
//! - Storage selection (in-memory or PostgreSQL)
//! - Worker pool lifecycle with graceful shutdown
//! - Newline-delimited JSON ingestion of control events

#![deny(unsafe_code)]
#![cfg_attr(feature = "strict-docs", warn(missing_docs))]
#![cfg_attr(not(feature = "strict-docs"), allow(missing_docs))]

pub mod config;
pub mod error;
pub mod server;

pub use config::{DaemonConfig, IngestConfig, LoggingConfig, StorageConfig};
pub use error::{DaemonError, DaemonResult};
pub use server::{ingest_lines, Server};

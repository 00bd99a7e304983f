//! Daemon configuration

use ctrlplane_control::EngineConfig;
use serde::{Deserialize, Serialize};

/// Top-level configuration for `ctrlplaned`
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct DaemonConfig {
    pub storage: StorageConfig,
    pub engine: EngineConfig,
    pub logging: LoggingConfig,
    pub ingest: IngestConfig,
}

/// Storage backend selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum StorageConfig {
    /// Volatile, process-local state
    #[default]
    Memory,

    Postgres {
        url: String,
        #[serde(default = "default_max_connections")]
        max_connections: u32,
        #[serde(default = "default_connect_timeout")]
        connect_timeout_secs: u64,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,

    /// Log every engine event at debug level
    pub engine_events: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            engine_events: true,
        }
    }
}

/// Where control events come from
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IngestConfig {
    /// Read newline-delimited JSON control events from stdin
    pub stdin: bool,
}

fn default_max_connections() -> u32 {
    10
}

fn default_connect_timeout() -> u64 {
    5
}

fn default_log_level() -> String {
    "info".to_string()
}

impl DaemonConfig {
    /// Load configuration: defaults, then the optional file, then `CTRLPLANE__*` variables
    ///
    /// Nested keys use a double underscore, e.g. `CTRLPLANE__ENGINE__WORKERS=8`.
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        builder = builder.add_source(config::Config::try_from(&DaemonConfig::default())?);

        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }

        builder = builder.add_source(
            config::Environment::with_prefix("CTRLPLANE")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }

    /// Storage label for the startup banner; never includes credentials
    pub fn storage_kind(&self) -> &'static str {
        match self.storage {
            StorageConfig::Memory => "memory",
            StorageConfig::Postgres { .. } => "postgres",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_default_config() {
        let config = DaemonConfig::default();
        assert!(matches!(config.storage, StorageConfig::Memory));
        assert_eq!(config.engine, EngineConfig::default());
        assert_eq!(config.logging.level, "info");
        assert!(!config.ingest.stdin);
    }

    #[test]
    fn test_load_without_file_uses_defaults() {
        let config = DaemonConfig::load(None).unwrap();
        assert_eq!(config.engine.workers, EngineConfig::default().workers);
        assert_eq!(config.storage_kind(), "memory");
    }

    #[test]
    fn test_load_from_file() {
        let path = std::env::temp_dir().join(format!("ctrlplaned-{}.toml", std::process::id()));
        let mut file = std::fs::File::create(&path).unwrap();
        writeln!(
            file,
            r#"
[storage]
type = "postgres"
url = "postgres://localhost/ctrlplane"

[engine]
workers = 8
requeue_base_ms = 100

[logging]
json = true
"#
        )
        .unwrap();

        let config = DaemonConfig::load(path.to_str()).unwrap();
        std::fs::remove_file(&path).ok();

        match config.storage {
            StorageConfig::Postgres {
                url,
                max_connections,
                connect_timeout_secs,
            } => {
                assert_eq!(url, "postgres://localhost/ctrlplane");
                assert_eq!(max_connections, 10);
                assert_eq!(connect_timeout_secs, 5);
            }
            StorageConfig::Memory => panic!("expected postgres storage"),
        }
        assert_eq!(config.engine.workers, 8);
        assert_eq!(config.engine.requeue_base_ms, 100);
        assert_eq!(config.engine.lock_ttl_secs, 30);
        assert!(config.logging.json);
    }

    #[test]
    fn test_storage_config_tagging() {
        let storage: StorageConfig = serde_json::from_str(r#"{"type":"memory"}"#).unwrap();
        assert!(matches!(storage, StorageConfig::Memory));
    }
}

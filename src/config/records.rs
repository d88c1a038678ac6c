use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Live record store configuration.
///
/// The record store holds the per-conversation message collections written
/// by the chat relay.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum RecordStoreConfig {
    /// In-process store. Nothing survives a restart (local dev only).
    #[default]
    Memory,

    /// SQLite database. Requires the `database-sqlite` feature.
    Sqlite(SqliteRecordsConfig),
}

impl RecordStoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            RecordStoreConfig::Memory => Ok(()),
            RecordStoreConfig::Sqlite(c) => c.validate(),
        }
    }
}

/// SQLite configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct SqliteRecordsConfig {
    /// Path to the SQLite database file.
    pub path: String,

    /// Create the database file if it doesn't exist.
    #[serde(default = "default_true")]
    pub create_if_missing: bool,

    /// Enable WAL mode for better concurrency.
    #[serde(default = "default_true")]
    pub wal_mode: bool,

    /// Busy timeout in milliseconds.
    #[serde(default = "default_busy_timeout")]
    pub busy_timeout_ms: u64,

    /// Maximum number of connections in the pool.
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,
}

impl SqliteRecordsConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::Validation(
                "SQLite path cannot be empty".into(),
            ));
        }
        if self.max_connections == 0 {
            return Err(ConfigError::Validation(
                "records.max_connections must be at least 1".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_busy_timeout() -> u64 {
    5000
}

fn default_max_connections() -> u32 {
    5
}

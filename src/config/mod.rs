//! Configuration for the retention pipeline.
//!
//! Configured via a TOML file, with support for environment variable
//! interpolation using `${VAR_NAME}` syntax.
//!
//! # Example
//!
//! ```toml
//! [records]
//! type = "sqlite"
//! path = "/var/lib/chatvault/messages.db"
//!
//! [archive]
//! backend = "s3"
//!
//! [archive.s3]
//! bucket = "family-chat-archive"
//! region = "us-east-1"
//! secret_access_key = "${S3_SECRET}"
//!
//! [leases]
//! type = "redis"
//! url = "redis://localhost:6379"
//! ```

mod jobs;
mod leases;
mod observability;
mod records;
mod schedule;
mod storage;

use std::path::Path;

pub use jobs::*;
pub use leases::*;
pub use observability::*;
pub use records::*;
pub use schedule::*;
use serde::{Deserialize, Serialize};
pub use storage::*;

/// Root configuration.
///
/// Every section is optional; an empty file yields an in-memory setup
/// suitable for local experiments.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ChatvaultConfig {
    /// Live record store holding conversation messages.
    #[serde(default)]
    pub records: RecordStoreConfig,

    /// Cold archive storage.
    #[serde(default)]
    pub archive: ColdStoreConfig,

    /// Lease store for run exclusion.
    #[serde(default)]
    pub leases: LeaseStoreConfig,

    /// Archiver and pruner job settings.
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Logging and metrics.
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl ChatvaultConfig {
    /// Load configuration from a TOML file.
    ///
    /// Environment variables in the format `${VAR_NAME}` are expanded.
    /// Missing required variables will cause an error.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::Io(e, path.as_ref().to_path_buf()))?;

        Self::from_str(&contents)
    }

    /// Parse configuration from a TOML string.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(contents: &str) -> Result<Self, ConfigError> {
        let expanded = expand_env_vars(contents)?;

        // Catch feature-gated backends before typed deserialization so the
        // error names the missing feature.
        let raw: toml::Value = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        check_disabled_features(&raw)?;

        let config: ChatvaultConfig = toml::from_str(&expanded).map_err(ConfigError::Parse)?;
        config.validate()?;

        Ok(config)
    }

    /// Validate the configuration for consistency and completeness.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.records.validate()?;
        self.archive.validate()?;
        self.leases.validate()?;
        self.jobs.validate()?;
        self.observability.validate()?;

        if matches!(self.records, RecordStoreConfig::Memory) {
            tracing::warn!(
                "Record store is in-memory; messages do not survive a restart. \
                 Configure [records] type = \"sqlite\" for persistent storage."
            );
        }
        Ok(())
    }

    /// Generate the JSON schema for the configuration file.
    #[cfg(feature = "json-schema")]
    pub fn json_schema() -> schemars::schema::RootSchema {
        schemars::schema_for!(ChatvaultConfig)
    }

    /// Generate the JSON schema as a pretty-printed JSON string.
    #[cfg(feature = "json-schema")]
    pub fn json_schema_string() -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(&Self::json_schema())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {1}: {0}")]
    Io(std::io::Error, std::path::PathBuf),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Environment variable not found: {0}")]
    EnvVarNotFound(String),

    #[error("Configuration validation error: {0}")]
    Validation(String),
}

/// Report backends configured in `raw` whose cargo feature is not compiled in.
fn check_disabled_features(raw: &toml::Value) -> Result<(), ConfigError> {
    let mut issues: Vec<(String, &str)> = Vec::new();

    if let Some(type_val) = raw
        .get("records")
        .and_then(|v| v.get("type"))
        .and_then(|v| v.as_str())
    {
        check_records_feature(type_val, &mut issues);
    }

    if let Some(backend) = raw
        .get("archive")
        .and_then(|v| v.get("backend"))
        .and_then(|v| v.as_str())
    {
        check_archive_feature(backend, &mut issues);
    }

    if let Some(type_val) = raw
        .get("leases")
        .and_then(|v| v.get("type"))
        .and_then(|v| v.as_str())
    {
        check_leases_feature(type_val, &mut issues);
    }

    if raw
        .get("observability")
        .and_then(|v| v.get("metrics"))
        .and_then(|v| v.get("prometheus"))
        .is_some()
    {
        check_metrics_feature(&mut issues);
    }

    if issues.is_empty() {
        return Ok(());
    }

    let details = issues
        .iter()
        .map(|(msg, _)| msg.as_str())
        .collect::<Vec<_>>()
        .join("\n  - ");
    let features = issues
        .iter()
        .map(|(_, feat)| *feat)
        .collect::<Vec<_>>()
        .join(",");

    Err(ConfigError::Validation(format!(
        "Configuration requires features not compiled in this build:\n  \
         - {details}\n\n\
         Rebuild with: cargo build --features {features}\n\
         Run 'chatvault features' to see all available features."
    )))
}

fn check_records_feature(type_val: &str, _issues: &mut Vec<(String, &str)>) {
    match type_val {
        #[cfg(not(feature = "database-sqlite"))]
        "sqlite" => _issues.push((
            "records type 'sqlite' requires the 'database-sqlite' feature".into(),
            "database-sqlite",
        )),
        _ => {}
    }
}

fn check_archive_feature(backend: &str, _issues: &mut Vec<(String, &str)>) {
    match backend {
        #[cfg(not(feature = "s3-storage"))]
        "s3" => _issues.push((
            "archive backend 's3' requires the 's3-storage' feature".into(),
            "s3-storage",
        )),
        _ => {}
    }
}

fn check_leases_feature(type_val: &str, _issues: &mut Vec<(String, &str)>) {
    match type_val {
        #[cfg(not(feature = "redis"))]
        "redis" => _issues.push((
            "leases type 'redis' requires the 'redis' feature".into(),
            "redis",
        )),
        _ => {}
    }
}

fn check_metrics_feature(_issues: &mut Vec<(String, &str)>) {
    #[cfg(not(feature = "prometheus"))]
    _issues.push((
        "observability.metrics.prometheus requires the 'prometheus' feature".into(),
        "prometheus",
    ));
}

/// Expand environment variables in the format `${VAR_NAME}`.
/// Variables after a `#` on the same line are left alone.
fn expand_env_vars(input: &str) -> Result<String, ConfigError> {
    let re = regex::Regex::new(r"\$\{([^}]+)\}")
        .map_err(|e| ConfigError::Validation(e.to_string()))?;
    let mut result = String::with_capacity(input.len());

    for line in input.lines() {
        let comment_pos = line.find('#');

        let mut line_result = String::with_capacity(line.len());
        let mut last_end = 0;

        for cap in re.captures_iter(line) {
            let Some(whole) = cap.get(0) else {
                continue;
            };

            if let Some(pos) = comment_pos
                && whole.start() >= pos
            {
                continue;
            }

            line_result.push_str(&line[last_end..whole.start()]);

            let var_name = &cap[1];
            let value = std::env::var(var_name)
                .map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;
            line_result.push_str(&value);

            last_end = whole.end();
        }

        line_result.push_str(&line[last_end..]);
        result.push_str(&line_result);
        result.push('\n');
    }

    // Remove trailing newline if input didn't have one
    if !input.ends_with('\n') && result.ends_with('\n') {
        result.pop();
    }

    Ok(result)
}

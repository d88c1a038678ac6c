use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Observability configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ObservabilityConfig {
    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Metrics configuration.
    #[serde(default)]
    pub metrics: MetricsConfig,
}

impl ObservabilityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(prometheus) = &self.metrics.prometheus
            && prometheus.listen_addr.parse::<std::net::SocketAddr>().is_err()
        {
            return Err(ConfigError::Validation(format!(
                "observability.metrics.prometheus.listen_addr is not a socket address: {}",
                prometheus.listen_addr
            )));
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Logging
// ─────────────────────────────────────────────────────────────────────────────

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct LoggingConfig {
    /// Log level.
    #[serde(default)]
    pub level: LogLevel,

    /// Log format.
    #[serde(default)]
    pub format: LogFormat,

    /// Include timestamps.
    #[serde(default = "default_true")]
    pub timestamps: bool,

    /// Include file/line information.
    #[serde(default)]
    pub file_line: bool,

    /// Include span information in JSON output.
    #[serde(default = "default_true")]
    pub include_spans: bool,

    /// Filter directives (e.g., "chatvault=debug,sqlx=warn").
    #[serde(default)]
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            timestamps: true,
            file_line: false,
            include_spans: true,
            filter: None,
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

impl LogLevel {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable multi-line format.
    Pretty,
    /// Compact single-line format.
    #[default]
    Compact,
    /// JSON format (for log aggregation).
    Json,
}

// ─────────────────────────────────────────────────────────────────────────────
// Metrics
// ─────────────────────────────────────────────────────────────────────────────

/// Metrics configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct MetricsConfig {
    /// Enable metrics gathering.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Prometheus scrape endpoint. Without it metrics are recorded but
    /// not exposed.
    #[serde(default)]
    pub prometheus: Option<PrometheusConfig>,

    /// Histogram buckets for job durations (in seconds).
    #[serde(default = "default_duration_buckets")]
    pub duration_buckets_secs: Vec<f64>,
}

impl Default for MetricsConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            prometheus: None,
            duration_buckets_secs: default_duration_buckets(),
        }
    }
}

fn default_duration_buckets() -> Vec<f64> {
    vec![1.0, 5.0, 15.0, 60.0, 300.0, 900.0, 3600.0]
}

/// Prometheus exporter configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct PrometheusConfig {
    /// Address the scrape endpoint listens on.
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
}

fn default_listen_addr() -> String {
    "0.0.0.0:9464".to_string()
}

fn default_true() -> bool {
    true
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_log_format_parsing() {
        assert_eq!(
            serde_json::from_str::<LogFormat>("\"pretty\"").unwrap(),
            LogFormat::Pretty
        );
        assert_eq!(
            serde_json::from_str::<LogFormat>("\"compact\"").unwrap(),
            LogFormat::Compact
        );
        assert_eq!(
            serde_json::from_str::<LogFormat>("\"json\"").unwrap(),
            LogFormat::Json
        );
        assert!(serde_json::from_str::<LogFormat>("\"cef\"").is_err());
    }

    #[test]
    fn test_defaults() {
        let config: ObservabilityConfig = toml::from_str("").unwrap();
        assert_eq!(config.logging.level, LogLevel::Info);
        assert!(config.logging.timestamps);
        assert!(config.metrics.enabled);
        assert!(config.metrics.prometheus.is_none());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_prometheus_listen_addr_validated() {
        let config: ObservabilityConfig = toml::from_str(
            r#"
            [metrics.prometheus]
            listen_addr = "not-an-address"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_err());

        let config: ObservabilityConfig = toml::from_str(
            r#"
            [metrics.prometheus]
            "#,
        )
        .unwrap();
        assert_eq!(
            config.metrics.prometheus.as_ref().unwrap().listen_addr,
            "0.0.0.0:9464"
        );
        assert!(config.validate().is_ok());
    }
}

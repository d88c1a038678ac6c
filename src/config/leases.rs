use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Lease store configuration.
///
/// Leases keep two overlapping runs from processing the same conversation,
/// and keep pruning runs from overlapping each other.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum LeaseStoreConfig {
    /// Process-local leases. Sufficient for a single instance.
    #[default]
    Memory,

    /// Redis leases, shared by all instances. Requires the `redis` feature.
    Redis(RedisLeaseConfig),
}

impl LeaseStoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            LeaseStoreConfig::Memory => Ok(()),
            LeaseStoreConfig::Redis(c) => {
                if c.url.is_empty() {
                    return Err(ConfigError::Validation(
                        "Redis lease store url cannot be empty".into(),
                    ));
                }
                Ok(())
            }
        }
    }
}

#[derive(Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct RedisLeaseConfig {
    /// Redis connection URL (e.g., "redis://localhost:6379").
    pub url: String,

    /// Prefix for all lease keys.
    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

impl std::fmt::Debug for RedisLeaseConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // URLs may embed a password.
        f.debug_struct("RedisLeaseConfig")
            .field("url", &"****")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

fn default_key_prefix() -> String {
    "chatvault:lease:".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_redis_lease_config() {
        let config: LeaseStoreConfig = toml::from_str(
            r#"
            type = "redis"
            url = "redis://localhost:6379"
            "#,
        )
        .unwrap();
        let LeaseStoreConfig::Redis(redis) = &config else {
            panic!("expected redis");
        };
        assert_eq!(redis.key_prefix, "chatvault:lease:");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_unknown_field_rejected() {
        let result: Result<LeaseStoreConfig, _> = toml::from_str(
            r#"
            type = "redis"
            url = "redis://localhost:6379"
            pool = 4
            "#,
        );
        assert!(result.is_err());
    }
}

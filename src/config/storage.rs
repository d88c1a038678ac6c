use serde::{Deserialize, Serialize};

use super::ConfigError;

/// Cold archive storage configuration.
///
/// ```toml
/// [archive]
/// backend = "s3"
/// prefix = "chat-archives"
///
/// [archive.s3]
/// bucket = "family-chat-archive"
/// region = "us-east-1"
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct ColdStoreConfig {
    /// Storage backend type.
    #[serde(default)]
    pub backend: ColdStoreBackend,

    /// Key prefix for every archive blob.
    /// Blobs are stored as `{prefix}/{conversationId}/{YYYY}-{MM}.json`.
    /// Default: "chat-archives"
    #[serde(default = "default_prefix")]
    pub prefix: String,

    /// S3 configuration (required when backend = "s3").
    #[serde(default)]
    pub s3: Option<S3ArchiveConfig>,

    /// Filesystem configuration (required when backend = "filesystem").
    #[serde(default)]
    pub filesystem: Option<FilesystemArchiveConfig>,
}

impl Default for ColdStoreConfig {
    fn default() -> Self {
        Self {
            backend: ColdStoreBackend::Memory,
            prefix: default_prefix(),
            s3: None,
            filesystem: None,
        }
    }
}

impl ColdStoreConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.prefix.trim_matches('/').is_empty() {
            return Err(ConfigError::Validation(
                "archive.prefix cannot be empty".into(),
            ));
        }
        match self.backend {
            ColdStoreBackend::Memory => Ok(()),
            ColdStoreBackend::S3 => match &self.s3 {
                Some(s3) => s3.validate(),
                None => Err(ConfigError::Validation(
                    "S3 archive backend requires [archive.s3] configuration".into(),
                )),
            },
            ColdStoreBackend::Filesystem => match &self.filesystem {
                Some(fs) => fs.validate(),
                None => Err(ConfigError::Validation(
                    "Filesystem archive backend requires [archive.filesystem] configuration"
                        .into(),
                )),
            },
        }
    }
}

fn default_prefix() -> String {
    "chat-archives".to_string()
}

/// Cold store backend type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(rename_all = "snake_case")]
pub enum ColdStoreBackend {
    /// Keep blobs in process memory (local dev and tests).
    #[default]
    Memory,
    /// Store blobs on the local filesystem.
    Filesystem,
    /// Store blobs in S3-compatible object storage.
    S3,
}

/// S3-compatible object storage configuration.
#[derive(Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct S3ArchiveConfig {
    /// S3 bucket name.
    pub bucket: String,

    /// AWS region (e.g., "us-east-1").
    #[serde(default)]
    pub region: Option<String>,

    /// Custom endpoint URL for S3-compatible services
    /// (e.g., MinIO: "http://localhost:9000").
    #[serde(default)]
    pub endpoint: Option<String>,

    /// AWS access key ID.
    /// If not specified, uses environment variables or IAM role.
    #[serde(default)]
    pub access_key_id: Option<String>,

    /// AWS secret access key.
    /// If not specified, uses environment variables or IAM role.
    #[serde(default)]
    pub secret_access_key: Option<String>,

    /// Use path-style URLs instead of virtual-hosted style.
    /// Required for MinIO and some S3-compatible services.
    #[serde(default)]
    pub force_path_style: bool,

    /// Storage class for new objects (e.g., STANDARD_IA, GLACIER_IR).
    #[serde(default)]
    pub storage_class: Option<String>,

    /// Server-side encryption settings.
    #[serde(default)]
    pub server_side_encryption: Option<S3ServerSideEncryption>,
}

impl std::fmt::Debug for S3ArchiveConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ArchiveConfig")
            .field("bucket", &self.bucket)
            .field("region", &self.region)
            .field("endpoint", &self.endpoint)
            .field(
                "access_key_id",
                &self.access_key_id.as_ref().map(|_| "****"),
            )
            .field(
                "secret_access_key",
                &self.secret_access_key.as_ref().map(|_| "****"),
            )
            .field("force_path_style", &self.force_path_style)
            .field("storage_class", &self.storage_class)
            .field("server_side_encryption", &self.server_side_encryption)
            .finish()
    }
}

impl S3ArchiveConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.bucket.is_empty() {
            return Err(ConfigError::Validation(
                "S3 bucket name cannot be empty".into(),
            ));
        }
        // Region is required unless using a custom endpoint
        if self.region.is_none() && self.endpoint.is_none() {
            return Err(ConfigError::Validation(
                "S3 requires either 'region' or 'endpoint' to be specified".into(),
            ));
        }
        Ok(())
    }
}

/// S3 server-side encryption configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(tag = "type", rename_all = "snake_case")]
#[serde(deny_unknown_fields)]
pub enum S3ServerSideEncryption {
    /// SSE-S3 with Amazon S3-managed keys.
    Aes256,

    /// SSE-KMS.
    Kms {
        /// KMS key ID or ARN.
        key_id: String,
    },
}

/// Filesystem storage configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[cfg_attr(feature = "json-schema", derive(schemars::JsonSchema))]
#[serde(deny_unknown_fields)]
pub struct FilesystemArchiveConfig {
    /// Base directory; blobs are stored as `{path}/{key}`.
    pub path: String,

    /// Create the directory if it doesn't exist.
    #[serde(default = "default_true")]
    pub create_dir: bool,

    /// Unix mode for new files. Default: 0o600
    #[serde(default = "default_file_mode")]
    pub file_mode: u32,

    /// Unix mode for new directories. Default: 0o700
    #[serde(default = "default_dir_mode")]
    pub dir_mode: u32,
}

impl FilesystemArchiveConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.path.is_empty() {
            return Err(ConfigError::Validation(
                "Filesystem archive path cannot be empty".into(),
            ));
        }
        Ok(())
    }
}

fn default_true() -> bool {
    true
}

fn default_file_mode() -> u32 {
    0o600
}

fn default_dir_mode() -> u32 {
    0o700
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_archive_config() {
        let config: ColdStoreConfig = toml::from_str("").unwrap();
        assert_eq!(config.backend, ColdStoreBackend::Memory);
        assert_eq!(config.prefix, "chat-archives");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_filesystem_backend() {
        let config: ColdStoreConfig = toml::from_str(
            r#"
            backend = "filesystem"

            [filesystem]
            path = "/var/lib/chatvault/archive"
            "#,
        )
        .unwrap();
        assert_eq!(config.backend, ColdStoreBackend::Filesystem);
        let fs = config.filesystem.as_ref().unwrap();
        assert!(fs.create_dir);
        assert_eq!(fs.file_mode, 0o600);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_s3_backend_with_kms() {
        let config: ColdStoreConfig = toml::from_str(
            r#"
            backend = "s3"
            prefix = "family/chat-archives"

            [s3]
            bucket = "archive"
            endpoint = "http://localhost:9000"
            force_path_style = true

            [s3.server_side_encryption]
            type = "kms"
            key_id = "alias/chat"
            "#,
        )
        .unwrap();
        assert!(config.validate().is_ok());
        let s3 = config.s3.unwrap();
        assert!(matches!(
            s3.server_side_encryption,
            Some(S3ServerSideEncryption::Kms { .. })
        ));
    }

    #[test]
    fn test_missing_backend_section_rejected() {
        let config: ColdStoreConfig = toml::from_str(r#"backend = "s3""#).unwrap();
        assert!(config.validate().is_err());

        let config: ColdStoreConfig = toml::from_str(r#"backend = "filesystem""#).unwrap();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_s3_requires_region_or_endpoint() {
        let config = S3ArchiveConfig {
            bucket: "archive".into(),
            region: None,
            endpoint: None,
            access_key_id: None,
            secret_access_key: None,
            force_path_style: false,
            storage_class: None,
            server_side_encryption: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_s3_debug_redacts_secrets() {
        let config = S3ArchiveConfig {
            bucket: "archive".into(),
            region: Some("us-east-1".into()),
            endpoint: None,
            access_key_id: Some("AKIAEXAMPLE".into()),
            secret_access_key: Some("very-secret".into()),
            force_path_style: false,
            storage_class: None,
            server_side_encryption: None,
        };
        let debug = format!("{:?}", config);
        assert!(!debug.contains("very-secret"));
        assert!(!debug.contains("AKIAEXAMPLE"));
    }
}

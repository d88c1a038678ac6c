use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, instrument};

use super::{
    error::{ColdStoreError, ColdStoreResult},
    traits::{BLOB_CONTENT_TYPE, Blob, BlobMetadata, ColdStore, ObjectInfo},
};
use crate::{
    config::{S3ArchiveConfig, S3ServerSideEncryption},
    models::{Page, PageRequest},
};

/// S3-compatible cold store (AWS S3, MinIO, R2, ...).
///
/// `created_at` is the object's `LastModified`, so a merge rewrite restarts
/// the blob's cold-retention clock. List cursors are S3 continuation tokens.
pub struct S3ColdStore {
    config: S3ArchiveConfig,
    client: aws_sdk_s3::Client,
}

impl S3ColdStore {
    pub async fn new(config: S3ArchiveConfig) -> ColdStoreResult<Self> {
        info!(bucket = %config.bucket, "Initializing S3 cold store");

        let mut sdk_config_builder = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = &config.region {
            sdk_config_builder = sdk_config_builder.region(aws_config::Region::new(region.clone()));
        }

        if let (Some(access_key), Some(secret_key)) =
            (&config.access_key_id, &config.secret_access_key)
        {
            let credentials = aws_credential_types::Credentials::new(
                access_key.clone(),
                secret_key.clone(),
                None,
                None,
                "chatvault-config",
            );
            sdk_config_builder = sdk_config_builder.credentials_provider(credentials);
        }

        let sdk_config = sdk_config_builder.load().await;

        let mut s3_config_builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &config.endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint);
        }
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = aws_sdk_s3::Client::from_conf(s3_config_builder.build());

        Ok(Self { config, client })
    }
}

fn to_chrono(dt: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(dt.secs(), dt.subsec_nanos())
}

#[async_trait]
impl ColdStore for S3ColdStore {
    #[instrument(skip(self, payload, metadata), fields(size = payload.len(), bucket = %self.config.bucket))]
    async fn write_blob(
        &self,
        key: &str,
        payload: Vec<u8>,
        metadata: &BlobMetadata,
    ) -> ColdStoreResult<()> {
        debug!(key, "Writing archive blob to S3");

        let mut request = self
            .client
            .put_object()
            .bucket(&self.config.bucket)
            .key(key)
            .content_type(BLOB_CONTENT_TYPE)
            .body(aws_sdk_s3::primitives::ByteStream::from(payload));

        for (name, value) in metadata.to_pairs() {
            request = request.metadata(name, value);
        }

        if let Some(storage_class) = &self.config.storage_class {
            request = request.storage_class(storage_class.as_str().into());
        }

        if let Some(sse) = &self.config.server_side_encryption {
            match sse {
                S3ServerSideEncryption::Aes256 => {
                    request = request
                        .server_side_encryption(aws_sdk_s3::types::ServerSideEncryption::Aes256);
                }
                S3ServerSideEncryption::Kms { key_id } => {
                    request = request
                        .server_side_encryption(aws_sdk_s3::types::ServerSideEncryption::AwsKms)
                        .ssekms_key_id(key_id);
                }
            }
        }

        request.send().await.map_err(|e| {
            error!(error = %e, key, "Failed to upload archive blob to S3");
            ColdStoreError::S3(e.to_string())
        })?;

        debug!(key, "Archive blob stored in S3");
        Ok(())
    }

    #[instrument(skip(self), fields(bucket = %self.config.bucket))]
    async fn read_blob(&self, key: &str) -> ColdStoreResult<Option<Blob>> {
        let result = match self
            .client
            .get_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(result) => result,
            Err(e) if e.as_service_error().is_some_and(|se| se.is_no_such_key()) => {
                return Ok(None);
            }
            Err(e) => {
                error!(error = %e, key, "Failed to download archive blob from S3");
                return Err(ColdStoreError::S3(e.to_string()));
            }
        };

        let metadata = result.metadata().and_then(|m| {
            BlobMetadata::from_pairs(m.iter().map(|(k, v)| (k.as_str(), v.as_str())))
        });
        let created_at = result
            .last_modified()
            .and_then(to_chrono)
            .unwrap_or_else(Utc::now);

        let payload = result
            .body
            .collect()
            .await
            .map_err(|e| ColdStoreError::S3(format!("Failed to read S3 response body: {}", e)))?
            .to_vec();

        Ok(Some(Blob {
            key: key.to_string(),
            payload,
            metadata,
            created_at,
        }))
    }

    #[instrument(skip(self), fields(bucket = %self.config.bucket))]
    async fn list_objects(
        &self,
        prefix: &str,
        page: PageRequest,
    ) -> ColdStoreResult<Page<ObjectInfo>> {
        let max_keys = i32::try_from(page.limit.max(1)).unwrap_or(i32::MAX);
        let result = self
            .client
            .list_objects_v2()
            .bucket(&self.config.bucket)
            .prefix(prefix)
            .max_keys(max_keys)
            .set_continuation_token(page.cursor)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, prefix, "Failed to list archive objects in S3");
                ColdStoreError::S3(e.to_string())
            })?;

        let items = result
            .contents()
            .iter()
            .filter_map(|object| {
                Some(ObjectInfo {
                    key: object.key()?.to_string(),
                    created_at: object.last_modified().and_then(to_chrono)?,
                    size: object.size().unwrap_or_default().max(0) as u64,
                })
            })
            .collect();

        let next_cursor = if result.is_truncated().unwrap_or(false) {
            result.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(Page { items, next_cursor })
    }

    #[instrument(skip(self), fields(bucket = %self.config.bucket))]
    async fn delete_object(&self, key: &str) -> ColdStoreResult<()> {
        debug!(key, "Deleting archive blob from S3");

        self.client
            .delete_object()
            .bucket(&self.config.bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, key, "Failed to delete archive blob from S3");
                ColdStoreError::S3(e.to_string())
            })?;

        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

//! S3-compatible object store on the AWS SDK.

use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Builder;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client;
use aws_types::region::Region;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info};

use crate::error::{StorageError, StorageResult};
use crate::store::ObjectStore;

/// Configuration for the S3 client.
#[derive(Debug, Clone)]
pub struct StorageConfig {
    /// S3 API endpoint URL (AWS, R2, MinIO)
    pub endpoint_url: String,
    pub access_key_id: String,
    pub secret_access_key: String,
    /// Bucket that receives rendered artifacts
    pub bucket: String,
    /// Region ("auto" for R2)
    pub region: String,
}

impl StorageConfig {
    /// Create config from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self {
            endpoint_url: std::env::var("S3_ENDPOINT_URL")
                .map_err(|_| StorageError::config_error("S3_ENDPOINT_URL not set"))?,
            access_key_id: std::env::var("S3_ACCESS_KEY_ID")
                .map_err(|_| StorageError::config_error("S3_ACCESS_KEY_ID not set"))?,
            secret_access_key: std::env::var("S3_SECRET_ACCESS_KEY")
                .map_err(|_| StorageError::config_error("S3_SECRET_ACCESS_KEY not set"))?,
            bucket: std::env::var("S3_BUCKET")
                .map_err(|_| StorageError::config_error("S3_BUCKET not set"))?,
            region: std::env::var("S3_REGION").unwrap_or_else(|_| "auto".to_string()),
        })
    }
}

/// Object store backed by an S3-compatible API.
#[derive(Clone)]
pub struct S3Store {
    client: Client,
    bucket: String,
}

impl S3Store {
    /// Create a new client from configuration.
    pub fn new(config: StorageConfig) -> Self {
        let credentials = Credentials::new(
            &config.access_key_id,
            &config.secret_access_key,
            None,
            None,
            "reel-storage",
        );

        let sdk_config = Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .endpoint_url(&config.endpoint_url)
            .region(Region::new(config.region))
            .credentials_provider(credentials)
            .force_path_style(true)
            .build();

        Self {
            client: Client::from_conf(sdk_config),
            bucket: config.bucket,
        }
    }

    /// Create from environment variables.
    pub fn from_env() -> StorageResult<Self> {
        Ok(Self::new(StorageConfig::from_env()?))
    }

    /// Bucket that receives rendered artifacts.
    pub fn bucket(&self) -> &str {
        &self.bucket
    }

    /// Check connectivity by performing a head bucket operation.
    pub async fn check_connectivity(&self) -> StorageResult<()> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| StorageError::config_error(format!("storage connectivity check failed: {}", e)))?;
        Ok(())
    }

    async fn get_body(&self, bucket: &str, key: &str) -> StorageResult<ByteStream> {
        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| {
                let no_such_key = e
                    .as_service_error()
                    .map(|se| se.is_no_such_key())
                    .unwrap_or(false);
                if no_such_key {
                    StorageError::not_found(format!("{}/{}", bucket, key))
                } else {
                    classify_sdk_error(&e, format!("{}/{}", bucket, key), StorageError::download_failed)
                }
            })?;

        Ok(response.body)
    }
}

/// Map an SDK failure by HTTP status: 404 not found, other 4xx (except 408
/// and 429) permanent, everything else retryable via `retryable`.
fn classify_sdk_error<E>(
    err: &SdkError<E, HttpResponse>,
    target: String,
    retryable: fn(String) -> StorageError,
) -> StorageError
where
    E: std::error::Error + 'static,
{
    match err.raw_response().map(|r| r.status().as_u16()) {
        Some(404) => StorageError::not_found(target),
        Some(status) if (400..500).contains(&status) && status != 408 && status != 429 => {
            StorageError::AccessDenied(format!("{} (HTTP {})", target, status))
        }
        _ => retryable(format!("{}: {}", target, DisplayErrorContext(err))),
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn get_object(&self, bucket: &str, key: &str) -> StorageResult<Vec<u8>> {
        debug!("Downloading {}/{}", bucket, key);

        let bytes = self
            .get_body(bucket, key)
            .await?
            .collect()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
            .into_bytes()
            .to_vec();

        Ok(bytes)
    }

    async fn download_to(&self, bucket: &str, key: &str, path: &Path) -> StorageResult<u64> {
        debug!("Downloading {}/{} to {}", bucket, key, path.display());

        let mut body = self.get_body(bucket, key).await?;
        let mut file = tokio::fs::File::create(path).await?;
        let mut written: u64 = 0;

        while let Some(chunk) = body
            .try_next()
            .await
            .map_err(|e| StorageError::download_failed(e.to_string()))?
        {
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        info!("Downloaded {}/{} ({} bytes)", bucket, key, written);
        Ok(written)
    }

    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> StorageResult<()> {
        debug!("Uploading {} bytes to {}/{}", body.len(), bucket, key);

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e, format!("{}/{}", bucket, key), StorageError::upload_failed))?;

        Ok(())
    }

    async fn put_file(
        &self,
        bucket: &str,
        key: &str,
        path: &Path,
        content_type: &str,
    ) -> StorageResult<()> {
        debug!("Uploading {} to {}/{}", path.display(), bucket, key);

        let body = ByteStream::from_path(path)
            .await
            .map_err(|e| StorageError::upload_failed(e.to_string()))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(body)
            .content_type(content_type)
            .send()
            .await
            .map_err(|e| classify_sdk_error(&e, format!("{}/{}", bucket, key), StorageError::upload_failed))?;

        info!("Uploaded {} to {}/{}", path.display(), bucket, key);
        Ok(())
    }
}

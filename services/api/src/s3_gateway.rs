use crate::config::S3Config;
use anyhow::{Context, Result};
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::{Builder as S3ConfigBuilder, Credentials};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use aws_types::region::Region;
use bytes::Bytes;
use std::time::Duration;
use tracing::{debug, info, instrument};

/// Content type used when the uploader did not declare one
pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

/// Object storage consumed by the handlers
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    /// Store `body` under `key`
    async fn put(&self, key: &str, body: Bytes, content_type: Option<String>) -> Result<()>;

    /// Presigned GET URL for `key`, valid for `ttl`
    async fn sign_read_url(&self, key: &str, ttl: Duration) -> Result<String>;
}

/// S3 client bound to a single bucket
pub struct S3Gateway {
    client: S3Client,
    bucket: String,
}

impl S3Gateway {
    /// Create a gateway from explicit credentials and region
    pub async fn new(config: &S3Config) -> Result<Self> {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(static_credentials(config))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        // Force path-style access for MinIO compatibility
        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        let client = S3Client::from_conf(s3_config_builder.build());

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 gateway initialized"
        );

        Ok(Self::from_client(client, config.bucket.clone()))
    }

    /// Wrap an already configured client
    pub fn from_client(client: S3Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }
}

fn static_credentials(config: &S3Config) -> Credentials {
    Credentials::new(
        config.access_key_id.clone(),
        config.secret_access_key.clone(),
        None,
        None,
        "mask-canvas-config",
    )
}

#[async_trait]
impl ObjectStorage for S3Gateway {
    #[instrument(skip(self, body), fields(bucket = %self.bucket, size_bytes = body.len()))]
    async fn put(&self, key: &str, body: Bytes, content_type: Option<String>) -> Result<()> {
        let content_type = content_type.unwrap_or_else(|| DEFAULT_CONTENT_TYPE.to_string());

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type(content_type)
            .send()
            .await
            .context("Failed to upload object to S3")?;

        debug!(key = %key, "Object uploaded to S3");
        Ok(())
    }

    async fn sign_read_url(&self, key: &str, ttl: Duration) -> Result<String> {
        let presigning_config =
            PresigningConfig::expires_in(ttl).context("Failed to create presigning config")?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning_config)
            .await
            .context("Failed to generate presigned URL")?;

        metrics::counter!("mask_canvas.urls.presigned").increment(1);

        Ok(presigned.uri().to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn offline_gateway(force_path_style: bool) -> S3Gateway {
        let config = S3ConfigBuilder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new("us-east-1"))
            .credentials_provider(Credentials::new("AKIDEXAMPLE", "secret", None, None, "test"))
            .force_path_style(force_path_style)
            .build();

        S3Gateway::from_client(S3Client::from_conf(config), "mask-bucket")
    }

    #[tokio::test]
    async fn test_presigned_url_carries_key_and_ttl() {
        let gateway = offline_gateway(false);

        let url = gateway
            .sign_read_url("originals/cat.png", Duration::from_secs(3600))
            .await
            .unwrap();

        assert!(url.starts_with("https://mask-bucket.s3."));
        assert!(url.contains("/originals/cat.png?"));
        assert!(url.contains("X-Amz-Expires=3600"));
        assert!(url.contains("X-Amz-Signature="));
    }

    #[tokio::test]
    async fn test_presigned_url_path_style() {
        let gateway = offline_gateway(true);

        let url = gateway
            .sign_read_url("masks/abc/blob", Duration::from_secs(120))
            .await
            .unwrap();

        assert!(url.contains("/mask-bucket/masks/abc/blob?"));
        assert!(url.contains("X-Amz-Expires=120"));
    }

    #[tokio::test]
    async fn test_presign_rejects_excessive_ttl() {
        let gateway = offline_gateway(false);

        // SigV4 presigned URLs cannot outlive one week
        let result = gateway
            .sign_read_url("originals/cat.png", Duration::from_secs(8 * 24 * 3600))
            .await;
        assert!(result.is_err());
    }
}

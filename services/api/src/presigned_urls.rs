use crate::config::S3Config;
use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::Builder as S3ConfigBuilder;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::{PresigningConfig, PresigningConfigError};
use aws_sdk_s3::Client as S3Client;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};
use uuid::Uuid;

/// Key segment used when the caller sent no identity
const ANONYMOUS_USER: &str = "anonymous";

/// Longest expiry SigV4 presigning accepts (7 days)
pub const MAX_PRESIGNED_URL_EXPIRY_SECS: u64 = 7 * 24 * 60 * 60;

/// Upload instructions returned to the client
#[derive(Debug, Clone, Serialize)]
pub struct PresignedUpload {
    /// Presigned PUT URL for the object
    #[serde(rename = "uploadURL")]
    pub upload_url: String,
    /// Key the client must upload to
    #[serde(rename = "objectName")]
    pub object_name: String,
}

#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("invalid presigned URL expiry: {0}")]
    Expiry(#[from] PresigningConfigError),
    #[error("failed to presign upload for {key}: {message}")]
    Presign { key: String, message: String },
}

/// Object store capability: sign a PUT for one key and content type
#[async_trait]
pub trait UploadPresigner: Send + Sync + 'static {
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, UploadError>;
}

/// S3 implementation of [`UploadPresigner`]
pub struct S3Presigner {
    client: S3Client,
    bucket: String,
}

impl S3Presigner {
    pub async fn new(config: &S3Config) -> Self {
        let aws_config = aws_config::defaults(BehaviorVersion::latest())
            .region(aws_config::Region::new(config.region.clone()))
            .load()
            .await;

        let mut s3_config_builder = S3ConfigBuilder::from(&aws_config);

        // Configure custom endpoint for MinIO/LocalStack
        if let Some(ref endpoint_url) = config.endpoint_url {
            s3_config_builder = s3_config_builder.endpoint_url(endpoint_url);
        }

        if config.force_path_style {
            s3_config_builder = s3_config_builder.force_path_style(true);
        }

        info!(
            bucket = %config.bucket,
            region = %config.region,
            "S3 presigner initialized"
        );

        Self::with_client(S3Client::from_conf(s3_config_builder.build()), &config.bucket)
    }

    pub fn with_client(client: S3Client, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }
}

#[async_trait]
impl UploadPresigner for S3Presigner {
    async fn presign_put(
        &self,
        key: &str,
        content_type: &str,
        expires_in: Duration,
    ) -> Result<String, UploadError> {
        let presigning_config = PresigningConfig::expires_in(expires_in)?;

        let presigned = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .presigned(presigning_config)
            .await
            .map_err(|e| UploadError::Presign {
                key: key.to_string(),
                message: DisplayErrorContext(e).to_string(),
            })?;

        Ok(presigned.uri().to_string())
    }
}

/// Builds object keys and hands out presigned upload URLs
pub struct UploadIssuer {
    presigner: Arc<dyn UploadPresigner>,
    expiry: Duration,
}

impl UploadIssuer {
    pub fn new(presigner: Arc<dyn UploadPresigner>, expiry: Duration) -> Self {
        Self { presigner, expiry }
    }

    /// Issue an upload URL for `{user}/{post_id}/{uuid}{basename}`
    #[instrument(skip(self))]
    pub async fn issue(
        &self,
        filename: &str,
        content_type: &str,
        post_id: &str,
        user: Option<&str>,
    ) -> Result<PresignedUpload, UploadError> {
        let object_name = object_key(user, post_id, filename);

        let upload_url = self
            .presigner
            .presign_put(&object_name, content_type, self.expiry)
            .await
            .map_err(|e| {
                error!(error = %e, object_name = %object_name, "Failed to generate presigned URL");
                e
            })?;

        info!(object_name = %object_name, "Issued presigned upload URL");
        metrics::counter!("uploads.presigned").increment(1);

        Ok(PresignedUpload {
            upload_url,
            object_name,
        })
    }
}

/// Object key for a new upload. Every call yields a fresh name.
pub fn object_key(user: Option<&str>, post_id: &str, filename: &str) -> String {
    format!(
        "{user}/{post_id}/{id}{name}",
        user = sanitize_path_component(user.unwrap_or(ANONYMOUS_USER)),
        post_id = sanitize_path_component(post_id),
        id = Uuid::new_v4(),
        name = upload_file_name(filename),
    )
}

/// Last path component of a client-supplied filename
fn upload_file_name(filename: &str) -> &str {
    match filename.rsplit(['/', '\\']).next() {
        Some(".") | Some("..") | None => "",
        Some(name) => name,
    }
}

/// Sanitize a key segment so it can't introduce extra `/` levels or traverse
fn sanitize_path_component(component: &str) -> String {
    let sanitized: String = component
        .chars()
        .map(|c| match c {
            'a'..='z' | 'A'..='Z' | '0'..='9' | '-' | '_' | '.' | '@' => c,
            _ => '_',
        })
        .collect();

    match sanitized.as_str() {
        "" | "." | ".." => "_".to_string(),
        _ => sanitized,
    }
}

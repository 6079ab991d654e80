//! S3 multipart transport using the AWS SDK

use super::traits::{MultipartTransport, SessionStart, TransportError};
use crate::config::BackendConfig;
use crate::types::{CompletedPart, ResponseMetadata};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::config::BehaviorVersion;
use aws_sdk_s3::error::SdkError;
use aws_sdk_s3::operation::{RequestId, RequestIdExt};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart as S3CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use tracing::debug;

/// S3 transport relaying each part straight to the backend
pub struct S3Transport {
    client: Client,
}

impl S3Transport {
    /// Build an S3 client from a BackendConfig.
    pub fn build_client(config: &BackendConfig) -> Result<Client, TransportError> {
        let (endpoint, region, force_path_style, access_key_id, secret_access_key) = match config {
            BackendConfig::S3 {
                endpoint,
                region,
                force_path_style,
                access_key_id,
                secret_access_key,
            } => (
                endpoint.clone(),
                region.clone(),
                *force_path_style,
                access_key_id.clone(),
                secret_access_key.clone(),
            ),
            _ => {
                return Err(TransportError::Other(
                    "S3Transport requires S3 configuration".to_string(),
                ))
            }
        };

        // Require explicit credentials, never fall back to the default AWS credential chain
        let credentials = match (access_key_id, secret_access_key) {
            (Some(ref key_id), Some(ref secret)) => {
                Credentials::new(key_id, secret, None, None, "partrelay-config")
            }
            _ => {
                return Err(TransportError::Other(
                    "S3 backend requires explicit credentials: set AWS_ACCESS_KEY_ID and AWS_ACCESS_KEY_SECRET".to_string(),
                ));
            }
        };

        let mut s3_config_builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(aws_sdk_s3::config::Region::new(region))
            .credentials_provider(credentials)
            .force_path_style(force_path_style);

        if let Some(ref ep) = endpoint {
            s3_config_builder = s3_config_builder.endpoint_url(ep);
        }

        Ok(Client::from_conf(s3_config_builder.build()))
    }

    pub fn new(config: &BackendConfig) -> Result<Self, TransportError> {
        let client = Self::build_client(config)?;
        debug!("S3Transport initialized");
        Ok(Self { client })
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Classify an S3 SDK error.
    ///
    /// Many S3 providers return `AccessDenied` (403) instead of `NoSuchBucket`
    /// for non-existent buckets, so both map to `BucketNotFound`.
    fn classify_s3_error(
        bucket: &str,
        e: &SdkError<impl std::fmt::Debug>,
        context: &str,
    ) -> TransportError {
        let debug_str = format!("{:?}", e);
        if debug_str.contains("NoSuchBucket") {
            return TransportError::BucketNotFound(bucket.to_string());
        }
        if let SdkError::ServiceError(ref svc) = e {
            if svc.raw().status().as_u16() == 403 {
                return TransportError::BucketNotFound(bucket.to_string());
            }
        }
        TransportError::S3(format!("{} failed: {}", context, e))
    }
}

#[async_trait]
impl MultipartTransport for S3Transport {
    async fn begin_session(&self, bucket: &str, key: &str) -> Result<SessionStart, TransportError> {
        let output = self
            .client
            .create_multipart_upload()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| Self::classify_s3_error(bucket, &e, "create_multipart_upload"))?;

        let session_id = output
            .upload_id()
            .ok_or_else(|| TransportError::S3("create_multipart_upload returned no UploadId".into()))?
            .to_string();

        debug!("S3 CreateMultipartUpload {}/{} uploadId={}", bucket, key, session_id);
        Ok(SessionStart {
            session_id,
            response_metadata: ResponseMetadata {
                request_id: output.request_id().map(str::to_string),
                extended_request_id: output.extended_request_id().map(str::to_string),
            },
        })
    }

    async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        part_number: u32,
        body: Bytes,
    ) -> Result<String, TransportError> {
        let size = body.len();
        let output = self
            .client
            .upload_part()
            .bucket(bucket)
            .key(key)
            .upload_id(session_id)
            .part_number(part_number as i32)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| Self::classify_s3_error(bucket, &e, "upload_part"))?;

        let etag = output
            .e_tag()
            .ok_or_else(|| {
                TransportError::S3(format!("upload_part {} returned no ETag", part_number))
            })?
            .to_string();

        debug!(
            "S3 UploadPart {}/{} part={} ({} bytes)",
            bucket, key, part_number, size
        );
        Ok(etag)
    }

    async fn complete_session(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
        parts: &[CompletedPart],
    ) -> Result<(), TransportError> {
        let completed = CompletedMultipartUpload::builder()
            .set_parts(Some(
                parts
                    .iter()
                    .map(|p| {
                        S3CompletedPart::builder()
                            .part_number(p.part_number as i32)
                            .e_tag(&p.etag)
                            .build()
                    })
                    .collect(),
            ))
            .build();

        self.client
            .complete_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(session_id)
            .multipart_upload(completed)
            .send()
            .await
            .map_err(|e| Self::classify_s3_error(bucket, &e, "complete_multipart_upload"))?;

        debug!(
            "S3 CompleteMultipartUpload {}/{} ({} parts)",
            bucket,
            key,
            parts.len()
        );
        Ok(())
    }

    async fn abort_session(
        &self,
        bucket: &str,
        key: &str,
        session_id: &str,
    ) -> Result<(), TransportError> {
        self.client
            .abort_multipart_upload()
            .bucket(bucket)
            .key(key)
            .upload_id(session_id)
            .send()
            .await
            .map_err(|e| Self::classify_s3_error(bucket, &e, "abort_multipart_upload"))?;

        debug!("S3 AbortMultipartUpload {}/{} uploadId={}", bucket, key, session_id);
        Ok(())
    }

    async fn put_object(&self, bucket: &str, key: &str, body: Bytes) -> Result<(), TransportError> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .content_type("application/octet-stream")
            .send()
            .await
            .map_err(|e| Self::classify_s3_error(bucket, &e, "put_object"))?;

        debug!("S3 PUT {}/{} ({} bytes)", bucket, key, size);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "s3"
    }
}

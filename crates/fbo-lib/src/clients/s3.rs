//! S3 object storage client.

use std::collections::HashMap;

use aws_config::retry::RetryConfig;
use aws_config::BehaviorVersion;
use aws_credential_types::Credentials;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::ServerSideEncryption;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::Client;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::info;

use crate::config::AwsConfig;
use crate::error::{AppError, Result};
use crate::logger::Logger;

const MAX_ATTEMPTS: u32 = 3;

/// Optional attributes for [`S3Client::upload_file`].
#[derive(Debug, Clone, Default)]
pub struct UploadOptions {
    pub content_type: Option<String>,
    pub metadata: HashMap<String, String>,
    pub cache_control: Option<String>,
}

/// Object metadata returned by a HEAD request.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    pub bucket: String,
    pub key: String,
    pub size: i64,
    pub last_modified: Option<DateTime<Utc>>,
    pub etag: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub content_type: Option<String>,
}

/// Thin wrapper over the AWS SDK client.
#[derive(Clone)]
pub struct S3Client {
    client: Client,
    logger: Logger,
}

impl S3Client {
    /// Build a client from the region and optional static credentials.
    ///
    /// Uses adaptive retry mode with at most three attempts per call.
    pub async fn new(config: &AwsConfig, logger: &Logger) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .retry_config(RetryConfig::adaptive().with_max_attempts(MAX_ATTEMPTS));

        if let (Some(key_id), Some(secret)) = (&config.access_key_id, &config.secret_access_key) {
            loader = loader.credentials_provider(Credentials::new(
                key_id,
                secret,
                None,
                None,
                "fbo-lambda-env",
            ));
        }

        let sdk_config = loader.load().await;
        info!(region = %config.region, "S3 client initialized");

        Self {
            client: Client::new(&sdk_config),
            logger: logger.child("s3"),
        }
    }

    /// Wrap an already-configured SDK client.
    pub fn from_client(client: Client, logger: &Logger) -> Self {
        Self {
            client,
            logger: logger.child("s3"),
        }
    }

    /// Upload `body` with AES256 server-side encryption.
    pub async fn upload_file(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        options: UploadOptions,
    ) -> Result<()> {
        let size = body.len();
        let mut request = self
            .client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(body))
            .server_side_encryption(ServerSideEncryption::Aes256)
            .set_content_type(options.content_type)
            .set_cache_control(options.cache_control);
        for (k, v) in options.metadata {
            request = request.metadata(k, v);
        }

        match request.send().await {
            Ok(_) => {
                self.logger.info(
                    "File uploaded to S3",
                    Some(json!({ "bucket": bucket, "key": key, "size": size })),
                )?;
                Ok(())
            }
            Err(e) => {
                let err = AppError::external_service(format!("Failed to upload file to S3: {key}"))
                    .with_details(json!({ "bucket": bucket, "key": key }))
                    .with_source(e.into_service_error());
                self.fail("S3 upload failed", err)
            }
        }
    }

    /// Download an object into memory.
    pub async fn get_file(&self, bucket: &str, key: &str) -> Result<Vec<u8>> {
        let output = match self.client.get_object().bucket(bucket).key(key).send().await {
            Ok(output) => output,
            Err(e) => {
                let err = AppError::external_service(format!("Failed to get file from S3: {key}"))
                    .with_details(json!({ "bucket": bucket, "key": key }))
                    .with_source(e.into_service_error());
                return self.fail("S3 download failed", err);
            }
        };

        match output.body.collect().await {
            Ok(data) => {
                let bytes = data.into_bytes().to_vec();
                self.logger.debug(
                    "File downloaded from S3",
                    Some(json!({ "bucket": bucket, "key": key, "size": bytes.len() })),
                )?;
                Ok(bytes)
            }
            Err(e) => {
                let err =
                    AppError::external_service(format!("Failed to read S3 object body: {key}"))
                        .with_details(json!({ "bucket": bucket, "key": key }))
                        .with_source(e);
                self.fail("S3 download failed", err)
            }
        }
    }

    pub async fn get_object_metadata(&self, bucket: &str, key: &str) -> Result<FileMetadata> {
        match self.client.head_object().bucket(bucket).key(key).send().await {
            Ok(head) => Ok(FileMetadata {
                bucket: bucket.to_string(),
                key: key.to_string(),
                size: head.content_length().unwrap_or(0),
                last_modified: head
                    .last_modified()
                    .and_then(|t| DateTime::from_timestamp(t.secs(), t.subsec_nanos())),
                etag: head.e_tag().map(ToString::to_string),
                content_type: head.content_type().map(ToString::to_string),
            }),
            Err(e) => {
                let service_err = e.into_service_error();
                let message = if service_err.is_not_found() {
                    format!("S3 object not found: {key}")
                } else {
                    format!("Failed to get object metadata from S3: {key}")
                };
                let err = AppError::external_service(message)
                    .with_details(json!({ "bucket": bucket, "key": key }))
                    .with_source(service_err);
                self.fail("S3 metadata lookup failed", err)
            }
        }
    }

    fn fail<T>(&self, message: &str, err: AppError) -> Result<T> {
        Err(self.logger.report(message, err, None))
    }
}

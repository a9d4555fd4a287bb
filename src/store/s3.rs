//! S3-compatible object store (AWS S3, R2, MinIO)

use std::collections::HashMap;
use std::path::Path;

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::config::http::HttpResponse;
use aws_sdk_s3::config::Region;
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use chrono::{DateTime, Utc};

use super::{ListPage, ListedObject, ObjectStore};
use crate::error::{Result, SyncError};

/// Connection options beyond what the environment provides
#[derive(Debug, Clone, Default)]
pub struct S3Options {
    /// Region override; otherwise resolved from the environment/profile
    pub region: Option<String>,
    /// Custom endpoint for S3-compatible stores
    pub endpoint_url: Option<String>,
}

/// S3 store client. The SDK client is cheap to clone and safe to share.
#[derive(Clone)]
pub struct S3Store {
    client: S3Client,
}

impl S3Store {
    /// Build a client from the AWS environment (credentials chain, profile, region)
    pub async fn connect(options: &S3Options) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &options.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let sdk_config = loader.load().await;

        let mut builder = aws_sdk_s3::config::Builder::from(&sdk_config);
        if let Some(endpoint) = &options.endpoint_url {
            builder = builder.endpoint_url(endpoint).force_path_style(true);
        }

        Self {
            client: S3Client::from_conf(builder.build()),
        }
    }

    pub fn from_client(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl ObjectStore for S3Store {
    async fn list_page(
        &self,
        bucket: &str,
        prefix: &str,
        continuation: Option<String>,
    ) -> Result<ListPage> {
        let response = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| {
                SyncError::RemoteIndex(format!(
                    "listing s3://{}/{} failed: {}",
                    bucket,
                    prefix,
                    DisplayErrorContext(&e)
                ))
            })?;

        let mut objects = Vec::with_capacity(response.contents().len());
        for obj in response.contents() {
            let Some(key) = obj.key() else {
                continue;
            };
            let last_modified = obj
                .last_modified()
                .and_then(|dt| DateTime::<Utc>::from_timestamp(dt.secs(), dt.subsec_nanos()))
                .ok_or_else(|| {
                    SyncError::RemoteIndex(format!("object {} has no valid LastModified", key))
                })?;

            objects.push(ListedObject {
                key: key.to_string(),
                last_modified,
                etag: obj.e_tag().unwrap_or_default().to_string(),
            });
        }

        let next_token = if response.is_truncated().unwrap_or(false) {
            response.next_continuation_token().map(String::from)
        } else {
            None
        };

        Ok(ListPage {
            objects,
            next_token,
        })
    }

    async fn upload_file(
        &self,
        local_path: &Path,
        bucket: &str,
        key: &str,
        metadata: HashMap<String, String>,
    ) -> Result<u64> {
        let size = tokio::fs::metadata(local_path)
            .await
            .map_err(|e| SyncError::from_file_io(local_path, e))?
            .len();

        let body = ByteStream::from_path(local_path)
            .await
            .map_err(|e| SyncError::Io(std::io::Error::other(e)))?;

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_length(size as i64)
            .set_metadata(Some(metadata))
            .body(body)
            .send()
            .await
            .map_err(|e| SyncError::Upload {
                transient: is_transient(&e),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        tracing::debug!("Uploaded {} bytes to s3://{}/{}", size, bucket, key);
        Ok(size)
    }
}

/// Timeouts, connection failures, throttling and 5xx responses are worth retrying
fn is_transient<E>(err: &SdkError<E, HttpResponse>) -> bool {
    match err {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            true
        }
        SdkError::ServiceError(ctx) => {
            let status = ctx.raw().status().as_u16();
            status == 429 || status >= 500
        }
        _ => false,
    }
}

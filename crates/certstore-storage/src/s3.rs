//! S3-compatible object backend
//!
//! Talks to Tencent COS through its S3-compatible API by default
//! (`https://{bucket}.cos.{region}.myqcloud.com`) and to any other
//! S3-compatible service through a custom endpoint.
//!
//! Provides:
//! - Static credentials from the configuration, or the ambient AWS chain
//! - Conditional create (`If-None-Match: *`) and conditional delete
//!   (`If-Match`) for lock markers; the provider must honor both headers for
//!   the lock to stay exclusive
//! - ListObjects (v1) pages with marker continuation

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_s3::{
    config::{http::HttpResponse, Builder as S3ConfigBuilder, Credentials, Region},
    error::{DisplayErrorContext, ProvideErrorMetadata, SdkError},
    primitives::{ByteStream, DateTimeFormat},
    Client,
};
use bytes::Bytes;
use certstore_core::{Error, Result, StorageConfig};
use tracing::debug;

use crate::backend::{ListPage, ListRequest, ObjectBackend, ObjectHead};

/// Region handed to the SDK when only a custom endpoint is configured
const FALLBACK_REGION: &str = "us-east-1";

/// Credential provider name reported by the SDK for configured keys
const STATIC_PROVIDER: &str = "certstore-static";

/// S3-compatible object backend
#[derive(Debug, Clone)]
pub struct S3Backend {
    client: Client,
    bucket: String,
}

impl S3Backend {
    /// Build a client from configuration
    ///
    /// Validates the configuration first, so malformed bucket/region input
    /// fails here rather than on the first request. Uses the configured
    /// credential pair when present and the default AWS provider chain
    /// (environment, profile, instance metadata) otherwise.
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        config.validate()?;

        let endpoint = config.service_endpoint()?;
        let region = if config.region.trim().is_empty() {
            Region::new(FALLBACK_REGION)
        } else {
            Region::new(config.region.clone())
        };

        let mut builder = match (&config.secret_id, &config.secret_key) {
            (Some(secret_id), Some(secret_key)) => S3ConfigBuilder::new()
                .behavior_version(BehaviorVersion::latest())
                .region(region)
                .credentials_provider(Credentials::new(
                    secret_id.clone(),
                    secret_key.clone(),
                    None,
                    None,
                    STATIC_PROVIDER,
                )),
            _ => {
                let sdk_config = aws_config::defaults(BehaviorVersion::latest())
                    .region(region)
                    .load()
                    .await;
                S3ConfigBuilder::from(&sdk_config)
            }
        };

        builder = builder.endpoint_url(endpoint.as_str().trim_end_matches('/'));

        if config.force_path_style {
            builder = builder.force_path_style(true);
        }

        debug!(bucket = %config.bucket, %endpoint, "Built S3 client");
        Ok(Self::from_client(Client::from_conf(builder.build()), &config.bucket))
    }

    /// Wrap an existing SDK client
    pub fn from_client(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
        }
    }

    /// Get a reference to the SDK client
    pub fn client(&self) -> &Client {
        &self.client
    }
}

/// HTTP status of a failed SDK call, if a response was received
fn status_of<E>(err: &SdkError<E, HttpResponse>) -> Option<u16> {
    err.raw_response().map(|response| response.status().as_u16())
}

/// Convert an SDK failure into a transport error, keeping it as the source
fn transport_error<E>(operation: &str, err: SdkError<E, HttpResponse>) -> Error
where
    E: ProvideErrorMetadata + std::error::Error + Send + Sync + 'static,
{
    let status = status_of(&err);
    let message = match status {
        Some(status) => format!("HTTP {}: {}", status, DisplayErrorContext(&err)),
        None => DisplayErrorContext(&err).to_string(),
    };

    Error::Transport {
        operation: operation.to_string(),
        message,
        status,
        source: Some(Box::new(err)),
    }
}

/// Marker for the next page when the provider omits `NextMarker`
///
/// ListObjects only returns `NextMarker` for delimited requests; otherwise
/// the last entry of the page is the continuation point.
fn continuation_marker(page: &ListPage, next_marker: Option<&str>) -> Option<String> {
    next_marker.map(String::from).or_else(|| {
        page.keys
            .last()
            .into_iter()
            .chain(page.common_prefixes.last())
            .max()
            .cloned()
    })
}

#[async_trait]
impl ObjectBackend for S3Backend {
    fn kind(&self) -> &'static str {
        "s3"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        debug!(%path, size = data.len(), "S3 put_object");
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .body(ByteStream::from(data))
            .send()
            .await
            .map_err(|e| transport_error("put", e))?;
        Ok(())
    }

    async fn put_if_absent(&self, path: &str, data: Bytes) -> Result<bool> {
        debug!(%path, size = data.len(), "S3 conditional put_object");
        let result = self
            .client
            .put_object()
            .bucket(&self.bucket)
            .key(path)
            .if_none_match("*")
            .body(ByteStream::from(data))
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                // 412: object exists; 409: a concurrent conditional write is in flight
                let lost = matches!(status_of(&err), Some(412) | Some(409))
                    || err.code() == Some("PreconditionFailed");
                if lost {
                    Ok(false)
                } else {
                    Err(transport_error("put_if_absent", err))
                }
            }
        }
    }

    async fn get(&self, path: &str) -> Result<Bytes> {
        debug!(%path, "S3 get_object");
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| transport_error("get", e))?;

        let body = output.body.collect().await.map_err(|e| Error::Transport {
            operation: "get".to_string(),
            message: format!("Failed to read S3 response body: {}", e),
            status: None,
            source: Some(Box::new(e)),
        })?;

        Ok(body.into_bytes())
    }

    async fn head(&self, path: &str) -> Result<ObjectHead> {
        debug!(%path, "S3 head_object");
        let output = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| transport_error("head", e))?;

        Ok(ObjectHead {
            content_length: output.content_length().unwrap_or_default().max(0) as u64,
            last_modified: output
                .last_modified()
                .and_then(|t| t.fmt(DateTimeFormat::HttpDate).ok()),
            e_tag: output.e_tag().map(String::from),
        })
    }

    async fn delete(&self, path: &str) -> Result<()> {
        debug!(%path, "S3 delete_object");
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .send()
            .await
            .map_err(|e| transport_error("delete", e))?;
        Ok(())
    }

    async fn delete_if_match(&self, path: &str, e_tag: &str) -> Result<bool> {
        debug!(%path, %e_tag, "S3 conditional delete_object");
        let result = self
            .client
            .delete_object()
            .bucket(&self.bucket)
            .key(path)
            .if_match(e_tag)
            .send()
            .await;

        match result {
            Ok(_) => Ok(true),
            Err(err) => {
                if status_of(&err) == Some(412) || err.code() == Some("PreconditionFailed") {
                    Ok(false)
                } else {
                    Err(transport_error("delete_if_match", err))
                }
            }
        }
    }

    async fn list_page(&self, request: &ListRequest) -> Result<ListPage> {
        debug!(prefix = %request.prefix, marker = ?request.marker, "S3 list_objects");
        let output = self
            .client
            .list_objects()
            .bucket(&self.bucket)
            .prefix(&request.prefix)
            .max_keys(i32::try_from(request.max_keys).unwrap_or(i32::MAX))
            .set_delimiter(request.delimiter.clone())
            .set_marker(request.marker.clone())
            .send()
            .await
            .map_err(|e| transport_error("list", e))?;

        let mut page = ListPage {
            keys: output
                .contents()
                .iter()
                .filter_map(|object| object.key().map(String::from))
                .collect(),
            common_prefixes: output
                .common_prefixes()
                .iter()
                .filter_map(|prefix| prefix.prefix().map(String::from))
                .collect(),
            is_truncated: output.is_truncated() == Some(true),
            next_marker: None,
        };

        if page.is_truncated {
            page.next_marker = continuation_marker(&page, output.next_marker());
        }

        Ok(page)
    }
}

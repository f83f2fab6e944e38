//! Object store adapter
//!
//! Implements the [`CertStorage`] contract over any [`ObjectBackend`]:
//! logical keys are mapped to storage paths, listings are paginated and
//! flattened, and provider failures are normalized into the domain errors.

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use certstore_core::{Error, Key, KeyInfo, LockConfig, Result, StorageConfig};
use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, instrument, warn};

use crate::backend::{ListRequest, ObjectBackend, LIST_PAGE_SIZE};
use crate::cancel::cancellable;
use crate::contract::CertStorage;
use crate::keys::KeyMapper;

/// Delimiter used for directory-style listings
const LIST_DELIMITER: &str = "/";

/// Certificate storage over an object-store bucket
///
/// Holds only immutable configuration and a shared client handle, so clones
/// are cheap and every call is independent.
#[derive(Clone)]
pub struct ObjectStorage {
    pub(crate) backend: Arc<dyn ObjectBackend>,
    pub(crate) mapper: KeyMapper,
    pub(crate) lock: LockConfig,
}

impl fmt::Debug for ObjectStorage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStorage")
            .field("backend", &self.backend.kind())
            .field("bucket", &self.backend.bucket())
            .field("prefix", &self.mapper.prefix())
            .field("lock", &self.lock)
            .finish()
    }
}

impl ObjectStorage {
    /// Create storage over an existing backend
    pub fn new(backend: Arc<dyn ObjectBackend>, prefix: &str, lock: LockConfig) -> Result<Self> {
        lock.validate()?;
        Ok(Self {
            backend,
            mapper: KeyMapper::new(prefix),
            lock,
        })
    }

    /// Create storage over a backend using the prefix and lock settings of `config`
    pub fn with_backend<B>(backend: B, config: &StorageConfig) -> Result<Self>
    where
        B: ObjectBackend + 'static,
    {
        Self::new(Arc::new(backend), &config.prefix, config.lock.clone())
    }

    /// Connect to the configured S3-compatible bucket
    #[cfg(feature = "s3")]
    pub async fn connect(config: &StorageConfig) -> Result<Self> {
        let backend = crate::S3Backend::connect(config).await?;
        Self::with_backend(backend, config)
    }

    /// Key mapper applied to every operation
    pub fn mapper(&self) -> &KeyMapper {
        &self.mapper
    }

    /// Underlying backend
    pub fn backend(&self) -> &Arc<dyn ObjectBackend> {
        &self.backend
    }

    /// Lock settings
    pub fn lock_config(&self) -> &LockConfig {
        &self.lock
    }
}

/// Substitute `NotFound` for provider "missing object" failures
///
/// Prefers the HTTP status; falls back to matching the provider's error
/// description, which is best-effort. Everything else passes through.
pub fn normalize_error(err: Error, key: &str) -> Error {
    match err {
        Error::NotFound { .. } => Error::not_found(key),
        Error::Transport { status: Some(404), .. } => Error::not_found(key),
        Error::Transport {
            status: None,
            ref message,
            ..
        } if describes_not_found(message) => Error::not_found(key),
        other => other,
    }
}

fn describes_not_found(message: &str) -> bool {
    message.contains("404") || message.contains("NoSuchKey") || message.contains("NotFound")
}

/// True for probe errors that mean neither "absent" nor "caller gave up"
fn is_probe_failure(err: &Error) -> bool {
    !err.is_not_found() && !err.is_cancelled()
}

/// Parse an HTTP-date header value
pub(crate) fn parse_http_date(raw: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc2822(raw.trim())
        .ok()
        .map(|t| t.with_timezone(&Utc))
}

#[async_trait]
impl CertStorage for ObjectStorage {
    #[instrument(
        skip(self, value, cancel),
        fields(
            backend = self.backend.kind(),
            bucket = %self.backend.bucket(),
            size = value.len()
        )
    )]
    async fn store(&self, key: &str, value: Bytes, cancel: &CancellationToken) -> Result<()> {
        let path = self.mapper.map(key);
        debug!(%path, "Storing object");

        cancellable(cancel, "store", self.backend.put(&path, value)).await
    }

    #[instrument(
        skip(self, cancel),
        fields(backend = self.backend.kind(), bucket = %self.backend.bucket())
    )]
    async fn load(&self, key: &str, cancel: &CancellationToken) -> Result<Bytes> {
        let path = self.mapper.map(key);
        debug!(%path, "Loading object");

        cancellable(cancel, "load", self.backend.get(&path))
            .await
            .map_err(|e| normalize_error(e, key))
    }

    #[instrument(
        skip(self, cancel),
        fields(backend = self.backend.kind(), bucket = %self.backend.bucket())
    )]
    async fn exists(&self, key: &str, cancel: &CancellationToken) -> bool {
        let path = self.mapper.map(key);

        // Absence and probe failure both read as false
        match cancellable(cancel, "exists", self.backend.head(&path)).await {
            Ok(_) => true,
            Err(e) => {
                let e = normalize_error(e, key);
                if is_probe_failure(&e) {
                    warn!(%path, error = %e, "Existence probe failed, reporting absent");
                }
                false
            }
        }
    }

    #[instrument(
        skip(self, cancel),
        fields(backend = self.backend.kind(), bucket = %self.backend.bucket())
    )]
    async fn delete(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        let path = self.mapper.map(key);
        debug!(%path, "Deleting object");

        match cancellable(cancel, "delete", self.backend.delete(&path))
            .await
            .map_err(|e| normalize_error(e, key))
        {
            Ok(()) => Ok(()),
            Err(e) if e.is_not_found() => {
                debug!(%path, "Object already absent");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    #[instrument(
        skip(self, cancel),
        fields(backend = self.backend.kind(), bucket = %self.backend.bucket())
    )]
    async fn list(
        &self,
        prefix: &str,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Key>> {
        let path_prefix = self.mapper.map_prefix(prefix);
        let delimiter = (!recursive).then(|| LIST_DELIMITER.to_string());
        debug!(%path_prefix, recursive, "Listing objects");

        let mut keys = Vec::new();
        let mut marker: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let request = ListRequest {
                prefix: path_prefix.clone(),
                delimiter: delimiter.clone(),
                marker: marker.take(),
                max_keys: LIST_PAGE_SIZE,
            };

            let page = cancellable(cancel, "list", self.backend.list_page(&request))
                .await
                .map_err(|e| normalize_error(e, prefix))?;
            pages += 1;

            keys.extend(page.keys.iter().map(|path| self.mapper.unmap(path)));
            keys.extend(page.common_prefixes.iter().map(|path| self.mapper.unmap(path)));

            if !page.is_truncated {
                break;
            }

            match page.next_marker {
                Some(next) if request.marker.as_deref() != Some(next.as_str()) => {
                    marker = Some(next)
                }
                _ => {
                    return Err(Error::transport(
                        "list",
                        format!("truncated page {} carried no usable continuation marker", pages),
                    ))
                }
            }
        }

        debug!(count = keys.len(), pages, "Listed objects");
        Ok(keys)
    }

    #[instrument(
        skip(self, cancel),
        fields(backend = self.backend.kind(), bucket = %self.backend.bucket())
    )]
    async fn stat(&self, key: &str, cancel: &CancellationToken) -> Result<KeyInfo> {
        let path = self.mapper.map(key);
        debug!(%path, "Reading object metadata");

        let head = cancellable(cancel, "stat", self.backend.head(&path))
            .await
            .map_err(|e| normalize_error(e, key))?;

        Ok(KeyInfo {
            key: self.mapper.unmap(&path),
            modified: head
                .last_modified
                .as_deref()
                .and_then(parse_http_date)
                .unwrap_or_default(),
            size: head.content_length,
            is_terminal: true,
        })
    }

    async fn lock(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        self.acquire(key, cancel).await
    }

    async fn unlock(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        self.release(key, cancel).await
    }
}

//! In-memory object backend
//!
//! Mirrors the object-store semantics the adapter relies on:
//! - 404 transport errors for missing objects
//! - Atomic create-if-absent and entity-tag conditional delete
//! - Prefix/delimiter/marker listing with a bounded page size
//!
//! Used by tests and by embedders that want the storage contract without a
//! remote bucket.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use certstore_core::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use tracing::{debug, instrument};

use crate::backend::{ListPage, ListRequest, ObjectBackend, ObjectHead};

/// Backend operations, for fault injection and request accounting
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operation {
    Put,
    PutIfAbsent,
    Get,
    Head,
    Delete,
    List,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Bytes,
    modified: DateTime<Utc>,
    version: u64,
}

impl StoredObject {
    fn e_tag(&self) -> String {
        format!("\"{:016x}\"", self.version)
    }
}

#[derive(Debug)]
struct Fault {
    operation: Operation,
    skip: u64,
    status: u16,
}

#[derive(Debug, Default)]
struct Inner {
    objects: RwLock<BTreeMap<String, StoredObject>>,
    faults: Mutex<Vec<Fault>>,
    requests: Mutex<HashMap<Operation, u64>>,
    versions: AtomicU64,
}

/// In-memory object backend
///
/// Cloning yields another handle onto the same bucket.
#[derive(Debug, Clone)]
pub struct MemoryBackend {
    bucket: String,
    page_cap: usize,
    inner: Arc<Inner>,
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl MemoryBackend {
    /// Create an empty bucket
    pub fn new(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            page_cap: usize::MAX,
            inner: Arc::new(Inner::default()),
        }
    }

    /// Cap every listing page at `page_cap` entries regardless of the request
    pub fn with_page_cap(mut self, page_cap: usize) -> Self {
        self.page_cap = page_cap.max(1);
        self
    }

    /// Fail the next call of `operation` with a transport error carrying `status`
    pub fn fail_next(&self, operation: Operation, status: u16) {
        self.fail_nth(operation, 0, status);
    }

    /// Let `skip` calls of `operation` through, then fail the following one
    pub fn fail_nth(&self, operation: Operation, skip: u64, status: u16) {
        self.inner.faults.lock().push(Fault {
            operation,
            skip,
            status,
        });
    }

    /// Number of requests issued for `operation`
    pub fn request_count(&self, operation: Operation) -> u64 {
        self.inner
            .requests
            .lock()
            .get(&operation)
            .copied()
            .unwrap_or(0)
    }

    /// Overwrite the modification time of a stored object
    ///
    /// Returns false if no object exists at `path`.
    pub fn set_last_modified(&self, path: &str, modified: DateTime<Utc>) -> bool {
        match self.inner.objects.write().get_mut(path) {
            Some(object) => {
                object.modified = modified;
                true
            }
            None => false,
        }
    }

    /// All stored paths in order
    pub fn paths(&self) -> Vec<String> {
        self.inner.objects.read().keys().cloned().collect()
    }

    /// Number of stored objects
    pub fn len(&self) -> usize {
        self.inner.objects.read().len()
    }

    /// True if the bucket is empty
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Record a request and return an injected failure, if one is queued
    fn begin(&self, operation: Operation) -> Result<()> {
        *self.inner.requests.lock().entry(operation).or_insert(0) += 1;

        let mut faults = self.inner.faults.lock();
        let mut triggered = None;
        for (idx, fault) in faults.iter_mut().enumerate() {
            if fault.operation != operation {
                continue;
            }
            if fault.skip == 0 {
                triggered = Some(idx);
                break;
            }
            fault.skip -= 1;
        }

        match triggered.map(|idx| faults.remove(idx)) {
            Some(fault) => Err(Error::Transport {
                operation: format!("{:?}", operation).to_lowercase(),
                message: format!("HTTP {}: injected failure", fault.status),
                status: Some(fault.status),
                source: None,
            }),
            None => Ok(()),
        }
    }

    /// Fresh object; every write gets a new entity tag
    fn object(&self, data: Bytes) -> StoredObject {
        StoredObject {
            data,
            modified: Utc::now(),
            version: self.inner.versions.fetch_add(1, Ordering::Relaxed) + 1,
        }
    }
}

/// Provider-style error for a missing object
fn no_such_key(operation: &str) -> Error {
    Error::Transport {
        operation: operation.to_string(),
        message: "HTTP 404: NoSuchKey: The specified key does not exist.".to_string(),
        status: Some(404),
        source: None,
    }
}

/// Render a timestamp as an HTTP-date header value
fn http_date(modified: &DateTime<Utc>) -> String {
    modified.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

enum Entry {
    Key(String),
    Prefix(String),
}

#[async_trait]
impl ObjectBackend for MemoryBackend {
    fn kind(&self) -> &'static str {
        "memory"
    }

    fn bucket(&self) -> &str {
        &self.bucket
    }

    #[instrument(skip(self, data), fields(backend = "memory", size = data.len()))]
    async fn put(&self, path: &str, data: Bytes) -> Result<()> {
        self.begin(Operation::Put)?;
        let object = self.object(data);
        self.inner.objects.write().insert(path.to_string(), object);
        debug!(%path, "Stored object");
        Ok(())
    }

    #[instrument(skip(self, data), fields(backend = "memory", size = data.len()))]
    async fn put_if_absent(&self, path: &str, data: Bytes) -> Result<bool> {
        self.begin(Operation::PutIfAbsent)?;
        let mut objects = self.inner.objects.write();
        if objects.contains_key(path) {
            debug!(%path, "Object already exists");
            return Ok(false);
        }
        objects.insert(path.to_string(), self.object(data));
        Ok(true)
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn get(&self, path: &str) -> Result<Bytes> {
        self.begin(Operation::Get)?;
        self.inner
            .objects
            .read()
            .get(path)
            .map(|object| object.data.clone())
            .ok_or_else(|| no_such_key("get"))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn head(&self, path: &str) -> Result<ObjectHead> {
        self.begin(Operation::Head)?;
        self.inner
            .objects
            .read()
            .get(path)
            .map(|object| ObjectHead {
                content_length: object.data.len() as u64,
                last_modified: Some(http_date(&object.modified)),
                e_tag: Some(object.e_tag()),
            })
            .ok_or_else(|| no_such_key("head"))
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn delete(&self, path: &str) -> Result<()> {
        self.begin(Operation::Delete)?;
        match self.inner.objects.write().remove(path) {
            Some(_) => Ok(()),
            None => Err(no_such_key("delete")),
        }
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn delete_if_match(&self, path: &str, e_tag: &str) -> Result<bool> {
        self.begin(Operation::Delete)?;
        let mut objects = self.inner.objects.write();
        match objects.get(path) {
            Some(object) if object.e_tag() == e_tag => {
                objects.remove(path);
                Ok(true)
            }
            Some(_) => {
                debug!(%path, %e_tag, "Entity tag changed, keeping object");
                Ok(false)
            }
            None => Err(no_such_key("delete")),
        }
    }

    #[instrument(skip(self), fields(backend = "memory"))]
    async fn list_page(&self, request: &ListRequest) -> Result<ListPage> {
        self.begin(Operation::List)?;

        let limit = request.max_keys.min(self.page_cap).max(1);
        let objects = self.inner.objects.read();
        let start = match &request.marker {
            Some(marker) => Bound::Excluded(marker.clone()),
            None => Bound::Unbounded,
        };

        let mut page = ListPage::default();
        let mut emitted = 0;
        let mut last: Option<String> = None;

        for path in objects.range((start, Bound::Unbounded)).map(|(p, _)| p) {
            if !path.starts_with(&request.prefix) {
                if path.as_str() > request.prefix.as_str() && !request.prefix.is_empty() {
                    break;
                }
                continue;
            }

            // A marker naming a common prefix covers everything beneath it
            if let (Some(delimiter), Some(marker)) = (&request.delimiter, &request.marker) {
                if marker.ends_with(delimiter.as_str()) && path.starts_with(marker.as_str()) {
                    continue;
                }
            }

            let entry = match &request.delimiter {
                Some(delimiter) => match path[request.prefix.len()..].find(delimiter.as_str()) {
                    Some(idx) => {
                        let end = request.prefix.len() + idx + delimiter.len();
                        Entry::Prefix(path[..end].to_string())
                    }
                    None => Entry::Key(path.clone()),
                },
                None => Entry::Key(path.clone()),
            };

            if let Entry::Prefix(prefix) = &entry {
                if page.common_prefixes.last() == Some(prefix) {
                    continue;
                }
            }

            if emitted == limit {
                page.is_truncated = true;
                break;
            }
            emitted += 1;

            match entry {
                Entry::Key(key) => {
                    last = Some(key.clone());
                    page.keys.push(key);
                }
                Entry::Prefix(prefix) => {
                    last = Some(prefix.clone());
                    page.common_prefixes.push(prefix);
                }
            }
        }

        if page.is_truncated {
            page.next_marker = last;
        }

        debug!(
            keys = page.keys.len(),
            prefixes = page.common_prefixes.len(),
            truncated = page.is_truncated,
            "Listed page"
        );
        Ok(page)
    }
}

//! Object backend trait definition
//!
//! Defines the async interface every object-store client must implement.
//! Backends speak storage paths (prefix already applied) and report
//! provider failures as [`Error::Transport`](certstore_core::Error) with the
//! HTTP status when one was received; translating those into the domain
//! taxonomy is the adapter's job.

use async_trait::async_trait;
use bytes::Bytes;
use certstore_core::Result;

/// Maximum number of entries requested per listing page
pub const LIST_PAGE_SIZE: usize = 1000;

/// Headers returned by a metadata-only probe
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectHead {
    /// Object size in bytes
    pub content_length: u64,

    /// Raw `Last-Modified` header (HTTP-date), if the provider sent one
    pub last_modified: Option<String>,

    /// Entity tag, if the provider sent one; changes on every overwrite
    pub e_tag: Option<String>,
}

/// One bucket listing request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    /// Storage path prefix to match
    pub prefix: String,

    /// Group results by this delimiter (directory-style listing)
    pub delimiter: Option<String>,

    /// Continuation marker; results start strictly after it
    pub marker: Option<String>,

    /// Page size cap
    pub max_keys: usize,
}

/// One bounded batch of listing results
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ListPage {
    /// Object paths in provider order
    pub keys: Vec<String>,

    /// Grouped prefixes (only with a delimiter), each ending in the delimiter
    pub common_prefixes: Vec<String>,

    /// More results are available after `next_marker`
    pub is_truncated: bool,

    /// Marker to feed into the next request
    pub next_marker: Option<String>,
}

/// Async trait for object-store clients
///
/// Implementors provide raw object I/O against one bucket; mapping keys,
/// pagination, and error translation live in [`ObjectStorage`](crate::ObjectStorage).
#[async_trait]
pub trait ObjectBackend: Send + Sync {
    /// Short backend name used in tracing spans
    fn kind(&self) -> &'static str;

    /// Bucket this backend talks to
    fn bucket(&self) -> &str;

    /// Upload `data` as the full content of `path`, overwriting
    async fn put(&self, path: &str, data: Bytes) -> Result<()>;

    /// Upload `data` only if nothing exists at `path`
    ///
    /// # Returns
    /// `true` if the object was created, `false` if one already existed
    async fn put_if_absent(&self, path: &str, data: Bytes) -> Result<bool>;

    /// Download the full object at `path`
    async fn get(&self, path: &str) -> Result<Bytes>;

    /// Fetch object headers without the body
    async fn head(&self, path: &str) -> Result<ObjectHead>;

    /// Remove the object at `path`
    async fn delete(&self, path: &str) -> Result<()>;

    /// Remove the object at `path` only if its entity tag is still `e_tag`
    ///
    /// # Returns
    /// `true` if the object was removed, `false` if it had been replaced
    async fn delete_if_match(&self, path: &str, e_tag: &str) -> Result<bool>;

    /// Fetch one page of a bucket listing
    async fn list_page(&self, request: &ListRequest) -> Result<ListPage>;
}

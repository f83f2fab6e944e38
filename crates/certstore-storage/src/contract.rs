//! Storage contract exposed to certificate managers
//!
//! The host integration (plugin registration, configuration parsing) adapts
//! this trait to its own interface; nothing here depends on the host.

use async_trait::async_trait;
use bytes::Bytes;
use certstore_core::{Key, KeyInfo, Result};
use tokio_util::sync::CancellationToken;

/// Key-value storage with per-key locking
///
/// Every operation accepts a cancellation token; a fired token makes the
/// operation return [`Error::Cancelled`](certstore_core::Error::Cancelled).
#[async_trait]
pub trait CertStorage: Send + Sync {
    /// Store `value` under `key`, overwriting any existing value
    async fn store(&self, key: &str, value: Bytes, cancel: &CancellationToken) -> Result<()>;

    /// Load the value stored under `key`
    ///
    /// # Errors
    /// `NotFound` if nothing is stored under `key`
    async fn load(&self, key: &str, cancel: &CancellationToken) -> Result<Bytes>;

    /// Check whether `key` exists
    ///
    /// Returns `false` both when the key is absent and when the probe
    /// itself failed; use [`stat`](CertStorage::stat) to tell them apart.
    async fn exists(&self, key: &str, cancel: &CancellationToken) -> bool;

    /// Delete `key`; deleting an absent key succeeds
    async fn delete(&self, key: &str, cancel: &CancellationToken) -> Result<()>;

    /// List keys under `prefix`
    ///
    /// Non-recursive listings return immediate children only, with one
    /// entry ending in `/` per sub-directory.
    async fn list(
        &self,
        prefix: &str,
        recursive: bool,
        cancel: &CancellationToken,
    ) -> Result<Vec<Key>>;

    /// Metadata for `key`
    ///
    /// # Errors
    /// `NotFound` if nothing is stored under `key`
    async fn stat(&self, key: &str, cancel: &CancellationToken) -> Result<KeyInfo>;

    /// Block until the lock for `key` is held or `cancel` fires
    async fn lock(&self, key: &str, cancel: &CancellationToken) -> Result<()>;

    /// Release the lock for `key`
    ///
    /// No ownership check: any caller may release any lock.
    async fn unlock(&self, key: &str, cancel: &CancellationToken) -> Result<()>;
}

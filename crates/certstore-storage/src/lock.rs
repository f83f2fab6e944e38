//! Distributed lock over the object store
//!
//! A lock is held while its marker object (`key + ".lock"`) exists.
//! Acquisition polls at a fixed interval until the marker can be created:
//! - Markers are created with the backend's create-if-absent primitive, so
//!   two callers can never both believe they won the same round
//! - With conditional writes disabled the marker is written unconditionally
//! - Either way the marker is read back and its fencing token decides who won
//! - Markers older than the configured lease are treated as abandoned and
//!   removed with a delete conditional on the entity tag the probe saw
//!
//! There is no fairness, backoff, or jitter; waiters race on every cycle.

use std::future::Future;

use bytes::Bytes;
use certstore_core::{lock_key, Error, LockMarker, Result};
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::adapter::{normalize_error, parse_http_date, ObjectStorage};
use crate::backend::ObjectHead;
use crate::cancel::cancellable;
use crate::contract::CertStorage;

/// Outcome of one acquisition round
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Attempt {
    /// The marker is ours
    Acquired,
    /// Someone else holds the lock (or the round failed)
    Held,
    /// A stale marker was removed; retry without waiting
    Reclaimed,
}

impl ObjectStorage {
    /// Poll until the lock marker for `key` is created or `cancel` fires
    #[instrument(
        skip(self, cancel),
        fields(backend = self.backend.kind(), bucket = %self.backend.bucket())
    )]
    pub(crate) async fn acquire(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        let path = self.mapper.map(&lock_key(key));
        let mut attempts: u64 = 0;

        loop {
            if cancel.is_cancelled() {
                debug!(%path, attempts, "Lock wait cancelled");
                return Err(Error::cancelled("lock"));
            }
            attempts += 1;

            match self.try_acquire(&path, cancel).await? {
                Attempt::Acquired => {
                    info!(%key, attempts, "Lock acquired");
                    return Ok(());
                }
                Attempt::Reclaimed => continue,
                Attempt::Held => {}
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    debug!(%path, attempts, "Lock wait cancelled");
                    return Err(Error::cancelled("lock"));
                }
                _ = tokio::time::sleep(self.lock.poll_interval) => {}
            }
        }
    }

    /// Delete the lock marker for `key` unconditionally
    #[instrument(
        skip(self, cancel),
        fields(backend = self.backend.kind(), bucket = %self.backend.bucket())
    )]
    pub(crate) async fn release(&self, key: &str, cancel: &CancellationToken) -> Result<()> {
        self.delete(&lock_key(key), cancel).await?;
        info!(%key, "Lock released");
        Ok(())
    }

    /// Run `f` while holding the lock for `key`
    ///
    /// The lock is released whether `f` succeeds or fails, and even when
    /// `cancel` fires while `f` runs. The body's error wins over a release
    /// error.
    pub async fn with_lock<T, F, Fut>(
        &self,
        key: &str,
        cancel: &CancellationToken,
        f: F,
    ) -> Result<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        self.lock(key, cancel).await?;
        let result = f().await;

        let released = self.unlock(key, &CancellationToken::new()).await;
        match (result, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Err(e), Err(release_err)) => {
                warn!(%key, error = %release_err, "Failed to release lock after error");
                Err(e)
            }
            (Err(e), Ok(())) => Err(e),
            (Ok(_), Err(e)) => Err(e),
        }
    }

    /// One probe-then-create round
    ///
    /// Only cancellation is returned as an error; every other failure counts
    /// as a lost round.
    async fn try_acquire(&self, path: &str, cancel: &CancellationToken) -> Result<Attempt> {
        match cancellable(cancel, "lock", self.backend.head(path)).await {
            Ok(head) if self.is_stale(&head) => self.reclaim(path, &head, cancel).await,
            Ok(_) => Ok(Attempt::Held),
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                let e = normalize_error(e, path);
                if !e.is_not_found() {
                    debug!(%path, error = %e, "Lock probe failed, attempting creation");
                }
                self.create_marker(path, cancel).await
            }
        }
    }

    /// True if the marker outlived the lease
    ///
    /// A missing or unparsable modification time never counts as stale.
    fn is_stale(&self, head: &ObjectHead) -> bool {
        let Some(lease) = self.lock.lease else {
            return false;
        };
        let Some(modified) = head.last_modified.as_deref().and_then(parse_http_date) else {
            return false;
        };
        match chrono::Duration::from_std(lease) {
            Ok(lease) => Utc::now() - modified > lease,
            Err(_) => false,
        }
    }

    /// Remove an abandoned marker
    ///
    /// The delete is conditional on the entity tag seen by the probe, so a
    /// waiter acting on an old probe cannot remove a marker another waiter
    /// has since recreated. Markers without an entity tag are never removed.
    async fn reclaim(
        &self,
        path: &str,
        head: &ObjectHead,
        cancel: &CancellationToken,
    ) -> Result<Attempt> {
        let Some(e_tag) = head.e_tag.as_deref() else {
            warn!(%path, "Stale lock marker has no entity tag, not removing it");
            return Ok(Attempt::Held);
        };
        warn!(%path, last_modified = ?head.last_modified, "Removing stale lock marker");

        match cancellable(cancel, "lock", self.backend.delete_if_match(path, e_tag)).await {
            Ok(true) => Ok(Attempt::Reclaimed),
            Ok(false) => {
                debug!(%path, "Stale lock marker was replaced before removal");
                Ok(Attempt::Held)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                let e = normalize_error(e, path);
                if e.is_not_found() {
                    Ok(Attempt::Reclaimed)
                } else {
                    warn!(%path, error = %e, "Failed to remove stale lock marker");
                    Ok(Attempt::Held)
                }
            }
        }
    }

    async fn create_marker(&self, path: &str, cancel: &CancellationToken) -> Result<Attempt> {
        let marker = LockMarker::new(self.lock.lease);
        let body = Bytes::from(marker.to_bytes()?);

        let written = if self.lock.conditional_writes {
            cancellable(cancel, "lock", self.backend.put_if_absent(path, body)).await
        } else {
            cancellable(cancel, "lock", self.backend.put(path, body))
                .await
                .map(|()| true)
        };

        match written {
            Ok(true) => {}
            Ok(false) => return Ok(Attempt::Held),
            Err(e) if e.is_cancelled() => return Err(e),
            Err(e) => {
                debug!(%path, error = %e, "Lock marker creation failed");
                return Ok(Attempt::Held);
            }
        }

        // Read back even after a conditional create: a provider that ignores
        // If-None-Match degrades to last-writer-wins
        self.verify_marker(path, &marker, cancel).await
    }

    /// The marker is ours only if our fencing token survived
    async fn verify_marker(
        &self,
        path: &str,
        marker: &LockMarker,
        cancel: &CancellationToken,
    ) -> Result<Attempt> {
        match cancellable(cancel, "lock", self.backend.get(path)).await {
            Ok(raw) => match LockMarker::from_bytes(&raw) {
                Ok(current) if current.token == marker.token => Ok(Attempt::Acquired),
                _ => {
                    debug!(%path, "Lock marker superseded by another writer");
                    Ok(Attempt::Held)
                }
            },
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                debug!(%path, error = %e, "Lock marker verification failed");
                Ok(Attempt::Held)
            }
        }
    }
}

//! Certstore Storage - Object-store persistence for certificate managers
//!
//! Provides the [`CertStorage`] contract over a bucket:
//! - Prefix-mapped store, load, exists, delete, and stat
//! - Paginated recursive and directory-style listing
//! - A polling distributed lock built on lock marker objects
//!
//! Backends:
//! - In-memory (always available)
//! - S3-compatible storage, Tencent COS by default (with `s3` feature)
//!
//! # Example
//!
//! ```no_run
//! use bytes::Bytes;
//! use certstore_core::StorageConfig;
//! use certstore_storage::{CertStorage, ObjectStorage};
//! use tokio_util::sync::CancellationToken;
//!
//! # async fn example() -> certstore_core::Result<()> {
//! let config = StorageConfig::new("certs-1250000000", "ap-nanjing")
//!     .with_credentials("AKID...", "secret")
//!     .with_prefix("caddy");
//! let storage = ObjectStorage::connect(&config).await?;
//! let cancel = CancellationToken::new();
//!
//! storage.lock("issue_cert_example.com", &cancel).await?;
//! storage.store("certificates/example.com.crt", Bytes::from("PEM..."), &cancel).await?;
//! storage.unlock("issue_cert_example.com", &cancel).await?;
//! # Ok(())
//! # }
//! ```

mod adapter;
mod backend;
mod cancel;
mod contract;
mod keys;
mod lock;
mod memory;

#[cfg(feature = "s3")]
mod s3;

pub use adapter::{normalize_error, ObjectStorage};
pub use backend::{ListPage, ListRequest, ObjectBackend, ObjectHead, LIST_PAGE_SIZE};
pub use cancel::{cancel_after, Deadline};
pub use contract::CertStorage;
pub use keys::KeyMapper;
pub use memory::{MemoryBackend, Operation};

#[cfg(feature = "s3")]
pub use s3::S3Backend;

pub use tokio_util::sync::CancellationToken;

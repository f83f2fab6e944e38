//! Certstore Core - Foundation for the certificate object store
//!
//! Provides configuration, error handling, and shared types used by the
//! storage adapter, the distributed lock, and the operator CLI.

pub mod config;
pub mod error;
pub mod types;

pub use config::{LockConfig, StorageConfig};
pub use error::{BoxError, Error, Result};
pub use types::*;

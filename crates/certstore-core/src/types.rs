//! Core type definitions for the certificate object store

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Caller-facing identifier of one stored object
pub type Key = String;

/// Prefix-qualified path sent to the remote store
pub type StoragePath = String;

/// Path separator shared by keys and storage paths
pub const SEPARATOR: char = '/';

/// Suffix appended to a key to form its lock marker key
pub const LOCK_SUFFIX: &str = ".lock";

/// Metadata describing one stored object
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KeyInfo {
    /// Logical key (prefix removed)
    pub key: Key,

    /// Last modification time reported by the store (Unix epoch if unknown)
    pub modified: DateTime<Utc>,

    /// Object size in bytes
    pub size: u64,

    /// Always true: the store has no real directories
    pub is_terminal: bool,
}

/// Payload written into a lock marker
///
/// Advisory only; the token is compared when markers are verified by
/// read-back instead of a conditional write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LockMarker {
    /// Random fencing token identifying this acquisition
    pub token: Uuid,

    /// Wall-clock time of acquisition
    pub acquired_at: DateTime<Utc>,

    /// Lease in milliseconds the holder was granted
    pub lease_ms: Option<u64>,
}

impl LockMarker {
    /// Create a marker for a fresh acquisition
    pub fn new(lease: Option<Duration>) -> Self {
        Self {
            token: Uuid::new_v4(),
            acquired_at: Utc::now(),
            lease_ms: lease.map(|l| l.as_millis() as u64),
        }
    }

    /// Encode the marker payload
    pub fn to_bytes(&self) -> crate::Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Decode a marker payload
    pub fn from_bytes(raw: &[u8]) -> crate::Result<Self> {
        Ok(serde_json::from_slice(raw)?)
    }
}

/// Key of the lock marker guarding `key`
pub fn lock_key(key: &str) -> Key {
    format!("{}{}", key, LOCK_SUFFIX)
}

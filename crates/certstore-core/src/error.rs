//! Error types for the certificate object store

use thiserror::Error;

/// Result type alias using the certstore Error
pub type Result<T> = std::result::Result<T, Error>;

/// Boxed provider error kept as the opaque cause of a transport failure
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Core error type for the certificate object store
#[derive(Error, Debug)]
pub enum Error {
    // Lookup errors
    #[error("Object not found: {key}")]
    NotFound { key: String },

    // Transport errors
    #[error("Transport error during {operation}: {message}")]
    Transport {
        operation: String,
        message: String,
        /// HTTP status reported by the provider, when one was received
        status: Option<u16>,
        #[source]
        source: Option<BoxError>,
    },

    // Cancellation
    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    // Configuration errors
    #[error("Invalid configuration: {message}")]
    InvalidConfig { message: String },

    // I/O errors
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl Error {
    /// Build a transport error without a provider status or cause
    pub fn transport(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Error::Transport {
            operation: operation.into(),
            message: message.into(),
            status: None,
            source: None,
        }
    }

    /// Build a not-found error for a key or path
    pub fn not_found(key: impl Into<String>) -> Self {
        Error::NotFound { key: key.into() }
    }

    /// Build a cancellation error for the named operation
    pub fn cancelled(operation: impl Into<String>) -> Self {
        Error::Cancelled {
            operation: operation.into(),
        }
    }

    /// Returns true if the object (or lock marker) does not exist
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound { .. })
    }

    /// Returns true if the caller gave up through its cancellation token
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Error::Cancelled { .. })
    }

    /// Returns true if this error is retryable by the caller
    pub fn is_retryable(&self) -> bool {
        matches!(self, Error::Transport { .. } | Error::Io(_))
    }

    /// Returns true if this error indicates a fatal condition
    pub fn is_fatal(&self) -> bool {
        matches!(self, Error::InvalidConfig { .. })
    }

    /// HTTP status attached to a transport error, if any
    pub fn status(&self) -> Option<u16> {
        match self {
            Error::Transport { status, .. } => *status,
            _ => None,
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}

//! Server error types.

use thiserror::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, ServerError>;

/// Server-specific errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Storage backend error surfaced to the caller; the connection that
    /// triggered it is closed.
    #[error("Storage error: {0}")]
    Storage(#[from] mercurio_storage::StorageError),

    /// Protocol violation (malformed packet, bad reason code, etc). The
    /// connection is closed without a reply.
    #[error("Protocol error: {0}")]
    Protocol(#[from] mercurio_core::error::Error),
}

//! Shared error model for cross-crate APIs.

use thiserror::Error;

/// Unified result type used by all public interfaces in `mayfly-rs`.
pub type MflyResult<T> = Result<T, MflyError>;

/// High-level error categories shared across crates.
///
/// Subsystems with richer failure vocabularies (stream id validation, wire decoding) define their
/// own enums next to the code that produces them and convert into these categories at crate
/// boundaries.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum MflyError {
    /// Configuration is invalid for the requested operation.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// Runtime state does not allow this operation.
    #[error("invalid runtime state: {0}")]
    InvalidState(&'static str),

    /// Wire payload is malformed or semantically invalid.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Snapshot payload is malformed or uses an unsupported encoding.
    #[error("snapshot error: {0}")]
    Snapshot(String),

    /// Replica handshake observed an unexpected reply.
    #[error("handshake error: {0}")]
    Handshake(String),

    /// Filesystem or socket I/O failed.
    #[error("io error: {0}")]
    Io(String),
}

impl MflyError {
    /// Wraps one `std::io::Error` into the shared I/O category.
    #[must_use]
    pub fn from_io(error: &std::io::Error) -> Self {
        Self::Io(error.to_string())
    }
}

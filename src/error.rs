//! The structured error type shared by every subsystem.
//!
//! This follows the same shape as the per-codec error enums elsewhere in
//! this corpus (`#[derive(Error)]`, `#[from]` conversions, one variant per
//! failure kind): a stable tag set the caller can match on, plus a free-form
//! message and an optional causal chain.

use thiserror::Error;

/// Stable error-kind tag set. Every [`NmoError`] variant maps onto exactly
/// one of these so callers in other languages can match on a kind without
/// parsing message text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidArgument,
    NoMemory,
    EndOfBuffer,
    NotFound,
    OutOfBounds,
    InvalidState,
    InvalidFormat,
    UnsupportedVersion,
    ValidationFailed,
    ChunkWriteFailed,
    IoError,
    CompressionError,
}

#[derive(Error, Debug)]
pub enum NmoError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("allocator exhausted: {0}")]
    NoMemory(String),

    #[error("end of buffer")]
    EndOfBuffer,

    #[error("not found: {0}")]
    NotFound(String),

    #[error("out of bounds: {0}")]
    OutOfBounds(String),

    #[error("invalid state: {0}")]
    InvalidState(String),

    #[error("invalid format: {0}")]
    InvalidFormat(String),

    #[error("unsupported version: {0}")]
    UnsupportedVersion(String),

    #[error("validation failed: {0}")]
    ValidationFailed(String),

    #[error("chunk write failed: {0}")]
    ChunkWriteFailed(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("compression error: {0}")]
    Compression(String),

    /// A pipeline-level error, annotated with the phase that produced it.
    #[error("{phase}: {source}")]
    Phase {
        phase: &'static str,
        #[source]
        source: Box<NmoError>,
    },
}

impl NmoError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            NmoError::InvalidArgument(_) => ErrorKind::InvalidArgument,
            NmoError::NoMemory(_) => ErrorKind::NoMemory,
            NmoError::EndOfBuffer => ErrorKind::EndOfBuffer,
            NmoError::NotFound(_) => ErrorKind::NotFound,
            NmoError::OutOfBounds(_) => ErrorKind::OutOfBounds,
            NmoError::InvalidState(_) => ErrorKind::InvalidState,
            NmoError::InvalidFormat(_) => ErrorKind::InvalidFormat,
            NmoError::UnsupportedVersion(_) => ErrorKind::UnsupportedVersion,
            NmoError::ValidationFailed(_) => ErrorKind::ValidationFailed,
            NmoError::ChunkWriteFailed(_) => ErrorKind::ChunkWriteFailed,
            NmoError::Io(_) => ErrorKind::IoError,
            NmoError::Compression(_) => ErrorKind::CompressionError,
            NmoError::Phase { source, .. } => source.kind(),
        }
    }

    /// Wraps `self` with the pipeline phase that observed the failure.
    pub fn in_phase(self, phase: &'static str) -> Self {
        NmoError::Phase {
            phase,
            source: Box::new(self),
        }
    }
}

pub type Result<T> = std::result::Result<T, NmoError>;

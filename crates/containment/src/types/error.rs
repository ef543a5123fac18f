//! Error types for the containment engine

use thiserror::Error;

/// Main containment error type
#[derive(Error, Debug, Clone)]
pub enum ContainmentError {
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Invalid {entity} transition: {from} -> {to}")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Execution context is closed: {0}")]
    ContextClosed(String),

    #[error("Partial result buffer overflow: {0}")]
    PartialOverflow(#[from] PartialBufferOverflow),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Sink error: {0}")]
    Sink(#[from] SinkError),
}

/// Event sink failures. Swallowed by the bus, surfaced to direct callers.
#[derive(Error, Debug, Clone)]
pub enum SinkError {
    #[error("I/O failure writing event: {0}")]
    Io(String),

    #[error("Event serialization failed: {0}")]
    Serialization(String),
}

impl From<std::io::Error> for SinkError {
    fn from(e: std::io::Error) -> Self {
        SinkError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for SinkError {
    fn from(e: serde_json::Error) -> Self {
        SinkError::Serialization(e.to_string())
    }
}

/// Append past the partial-result buffer caps.
///
/// Recoverable: the buffer keeps everything accepted so far and marks
/// itself truncated. The evidence fields let callers report exactly what
/// was lost.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error(
    "partial buffer overflow at {truncation_point}: kept {kept_chunks}/{total_chunks} chunks, {kept_bytes}/{total_bytes} bytes"
)]
pub struct PartialBufferOverflow {
    pub kept_chunks: usize,
    pub total_chunks: usize,
    pub kept_bytes: usize,
    pub total_bytes: usize,
    pub truncation_point: TruncationPoint,
}

/// Which cap the overflowing append hit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TruncationPoint {
    ChunkCount,
    ByteSize,
}

impl std::fmt::Display for TruncationPoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TruncationPoint::ChunkCount => write!(f, "chunk_count"),
            TruncationPoint::ByteSize => write!(f, "byte_size"),
        }
    }
}

/// Result type for containment operations
pub type ContainmentResult<T> = Result<T, ContainmentError>;

//! Error types for track ingestion.
//!
//! Only failures that the immediate caller must act on are errors. Per-point,
//! per-file and per-chunk problems degrade to fewer results and are reported
//! through counters instead (see [`crate::batch::BatchStats`]).

use thiserror::Error;

/// Errors surfaced to the caller of a single parse or batch call.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum IngestError {
    /// The track file extension is not one of the supported formats.
    #[error("Unsupported file format: {0}")]
    UnsupportedFormat(String),

    /// The XML or JSON container could not be parsed.
    #[error("Malformed input: {0}")]
    MalformedInput(String),

    /// A batch call was made with no files.
    #[error("No files supplied")]
    EmptyBatch,

    /// More files in one call than the per-batch ceiling allows.
    #[error("Batch too large: {count} files exceeds maximum {max} per batch")]
    BatchTooLarge { count: usize, max: usize },

    /// Existing plus new files would exceed the total ceiling.
    #[error("Total files exceed limit: {total} exceeds maximum {max}")]
    TotalLimitExceeded { total: usize, max: usize },

    /// A structurally invalid argument or configuration value.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IngestError>;

impl From<quick_xml::Error> for IngestError {
    fn from(e: quick_xml::Error) -> Self {
        IngestError::MalformedInput(format!("Invalid XML: {}", e))
    }
}

impl From<serde_json::Error> for IngestError {
    fn from(e: serde_json::Error) -> Self {
        IngestError::MalformedInput(format!("Invalid JSON: {}", e))
    }
}

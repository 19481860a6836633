//! Error types for the expense ingestion pipeline

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result type alias for ingestion operations
pub type Result<T> = std::result::Result<T, Error>;

/// A single malformed row. Never fatal to the file it came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Error)]
#[error("row {row}: {reason}")]
pub struct RowParseError {
    /// 1-based row number in the source file (header row included)
    pub row: usize,
    /// Human-readable reason
    pub reason: String,
}

impl RowParseError {
    pub fn new(row: usize, reason: impl Into<String>) -> Self {
        Self {
            row,
            reason: reason.into(),
        }
    }
}

/// Ingestion errors
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// The file named by a message does not exist
    #[error("Source not found: {0}")]
    SourceNotFound(String),

    /// Bytes could not be decoded as the expected container format
    #[error("Failed to read '{source_name}': {message}")]
    SourceFormat { source_name: String, message: String },

    /// A single row failed to parse
    #[error("Row parse error: {0}")]
    RowParse(#[from] RowParseError),

    /// File type has no parser
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),

    /// Object store has no such key
    #[error("Object not found: {bucket}/{key}")]
    ObjectNotFound { bucket: String, key: String },

    /// Object store refused access
    #[error("Access denied: {0}")]
    AccessDenied(String),

    /// Expense store write failed
    #[error("Store write failed: {0}")]
    StoreWrite(String),

    /// Queue client error
    #[error("Queue error: {0}")]
    Queue(String),

    /// Message body could not be understood
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// An operation exceeded its time budget
    #[error("Timed out after {secs:.1}s: {operation}")]
    Timeout { operation: String, secs: f64 },

    /// Network blip or throttling, worth retrying
    #[error("Transient error: {0}")]
    Transient(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Create a source format error
    pub fn source_format(source_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::SourceFormat {
            source_name: source_name.into(),
            message: message.into(),
        }
    }

    /// Create a store write error
    pub fn store_write(message: impl Into<String>) -> Self {
        Self::StoreWrite(message.into())
    }

    /// Create a queue error
    pub fn queue(message: impl Into<String>) -> Self {
        Self::Queue(message.into())
    }

    /// Create a transient error
    pub fn transient(message: impl Into<String>) -> Self {
        Self::Transient(message.into())
    }

    /// Create an internal error
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }

    /// Errors that may clear up on their own and are worth another attempt
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Error::Timeout { .. } | Error::Transient(_) | Error::StoreWrite(_) | Error::Io(_)
        )
    }

    /// File-level errors that no amount of redelivery will fix
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            Error::SourceNotFound(_)
                | Error::SourceFormat { .. }
                | Error::UnsupportedFormat(_)
                | Error::ObjectNotFound { .. }
                | Error::AccessDenied(_)
                | Error::InvalidMessage(_)
                | Error::Json(_)
        )
    }

    /// Short machine-readable label, used in logs and the run ledger
    pub fn kind(&self) -> &'static str {
        match self {
            Error::Config(_) => "config",
            Error::SourceNotFound(_) => "source_not_found",
            Error::SourceFormat { .. } => "source_format",
            Error::RowParse(_) => "row_parse",
            Error::UnsupportedFormat(_) => "unsupported_format",
            Error::ObjectNotFound { .. } => "object_not_found",
            Error::AccessDenied(_) => "access_denied",
            Error::StoreWrite(_) => "store_write",
            Error::Queue(_) => "queue",
            Error::InvalidMessage(_) => "invalid_message",
            Error::Timeout { .. } => "timeout",
            Error::Transient(_) => "transient",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Internal(_) => "internal",
        }
    }
}

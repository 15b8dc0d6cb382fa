//! Error types for download-orchestrator
//!
//! - [`Error`] is the crate-wide error returned by engine and store operations
//! - [`DatabaseError`] wraps store failures with the operation that failed
//! - [`DownloadError`] covers task-level problems such as illegal transitions
//! - [`TransferError`] is what a transport worker reports when a transfer stops
//!
//! A network policy denial is not an error: it is a scheduling state
//! (see [`crate::policy::Verdict`]).

use crate::types::{DownloadId, Status};
use thiserror::Error;

/// Result type alias for download-orchestrator operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for download-orchestrator
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "max_concurrent_downloads")
        key: Option<String>,
    },

    /// Database operation failed
    #[error("database error: {0}")]
    Database(#[from] DatabaseError),

    /// SQLx database error
    #[error("database error: {0}")]
    Sqlx(#[from] sqlx::Error),

    /// Task-level error
    #[error("download error: {0}")]
    Download(#[from] DownloadError),

    /// Transfer reported by a transport worker
    #[error("transfer error: {0}")]
    Transfer(#[from] TransferError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Shutdown in progress - not accepting new downloads
    #[error("shutdown in progress: not accepting new downloads")]
    ShuttingDown,

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to a key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// Database-related errors
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Failed to connect to database
    #[error("failed to connect to database: {0}")]
    ConnectionFailed(String),

    /// Failed to run migrations
    #[error("failed to run migrations: {0}")]
    MigrationFailed(String),

    /// Query failed
    #[error("query failed: {0}")]
    QueryFailed(String),
}

/// Download-related errors
#[derive(Debug, Error)]
pub enum DownloadError {
    /// Download not found in the store
    #[error("download {id} not found")]
    NotFound {
        /// The download ID that was not found
        id: DownloadId,
    },

    /// The requested event has no legal transition from the current state
    #[error("download {id}: no transition for {event} from {from}")]
    InvalidTransition {
        /// The download ID
        id: DownloadId,
        /// State the task was in
        from: Status,
        /// Name of the rejected event
        event: &'static str,
    },
}

/// Failure reported by a transport worker
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransferError {
    /// Network blip, 5xx-class server failure; retried up to the configured maximum
    #[error("transient failure: {0}")]
    Transient(String),

    /// Invalid destination, unsupported response, storage full; never retried
    #[error("fatal failure: {0}")]
    Fatal(String),
}

impl TransferError {
    /// Human readable reason without the class prefix
    pub fn reason(&self) -> &str {
        match self {
            TransferError::Transient(reason) | TransferError::Fatal(reason) => reason,
        }
    }
}

//! Error types for statement dispatch.

use std::path::PathBuf;
use std::time::Duration;

use crate::dispatcher::RunSummary;

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Customer directory (database) errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection failed: {0}")]
    Connection(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Query {query} timed out after {timeout:?}")]
    Timeout { query: String, timeout: Duration },
}

/// Outbound mail errors. All of these are per-file failures.
#[derive(Debug, thiserror::Error)]
pub enum MailError {
    #[error("Invalid {field} address {address:?}: {reason}")]
    InvalidAddress {
        field: &'static str,
        address: String,
        reason: String,
    },

    #[error("Failed to build email: {0}")]
    Build(String),

    #[error("Failed to read attachment {}: {source}", .path.display())]
    Attachment {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("SMTP send failed: {0}")]
    Transport(String),
}

/// Errors that abandon the remainder of a statement run.
#[derive(Debug, thiserror::Error)]
pub enum BatchError {
    #[error("Failed to prepare sent directory {}: {source}", .path.display())]
    PrepareSentDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read statements directory {}: {source}", .path.display())]
    ListDirectory {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Database(#[from] DatabaseError),
}

/// Errors returned by a statement run trigger.
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    #[error("A statement run is already in progress")]
    AlreadyRunning,

    #[error("Statement run aborted after {} file(s): {source}", .summary.processed())]
    Aborted {
        summary: Box<RunSummary>,
        #[source]
        source: BatchError,
    },
}


//! Error types for deltasync

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Result type alias for deltasync operations
pub type Result<T> = std::result::Result<T, SyncError>;

/// Main error type for deltasync
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Invalid date {input:?}: expected yyyy-mm-dd ({source})")]
    InvalidDate {
        input: String,
        #[source]
        source: chrono::ParseError,
    },

    #[error("Remote index error: {0}")]
    RemoteIndex(String),

    #[error("File not found: {}", .0.display())]
    NotFound(PathBuf),

    #[error("Path {} is outside the sync root", .0.display())]
    OutsideRoot(PathBuf),

    #[error("Upload error: {message}")]
    Upload { message: String, transient: bool },

    #[error("Upload timed out after {0:?}")]
    Timeout(Duration),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    /// Errors that abort the whole run rather than a single file
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            SyncError::Config(_)
                | SyncError::InvalidDate { .. }
                | SyncError::RemoteIndex(_)
                | SyncError::Internal(_)
        )
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Upload { transient, .. } => *transient,
            SyncError::Timeout(_) => true,
            _ => false,
        }
    }

    /// Process exit code for an error that ended the run
    pub fn exit_code(&self) -> u8 {
        if self.is_fatal() {
            2
        } else {
            1
        }
    }

    /// Map an I/O error on a specific file, keeping vanished files distinct
    pub fn from_file_io(path: impl Into<PathBuf>, err: std::io::Error) -> Self {
        if err.kind() == std::io::ErrorKind::NotFound {
            SyncError::NotFound(path.into())
        } else {
            SyncError::Io(err)
        }
    }
}

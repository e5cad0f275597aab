//! Error types for the sync engine.

use thiserror::Error;

/// Main error type for engine and adapter operations.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error("Branch not found: {0}")]
    NotFound(String),

    #[error("Branch already exists: {0}")]
    AlreadyExists(String),

    #[error("No branch is checked out")]
    DetachedOrMissing,

    #[error("Remote rejected update of {branch}: {reason}")]
    RemoteRejected { branch: String, reason: String },

    #[error("Remote unavailable: {0}")]
    NetworkUnavailable(String),

    #[error("Merge conflict while merging {from} into {into}")]
    MergeConflict { into: String, from: String },

    #[error("Not a feature branch: {0}")]
    NotFeatureBranch(String),

    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Deserialization error: {0}")]
    Deserialization(String),

    #[error("git {command} failed: {stderr}")]
    Backend { command: String, stderr: String },
}

impl SyncError {
    /// Whether the failure came from talking to the remote.
    pub fn is_network(&self) -> bool {
        matches!(self, SyncError::NetworkUnavailable(_))
    }

    /// Whether the remote refused the update.
    pub fn is_rejection(&self) -> bool {
        matches!(self, SyncError::RemoteRejected { .. })
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(e: serde_json::Error) -> Self {
        if e.is_data() || e.is_syntax() || e.is_eof() {
            SyncError::Deserialization(e.to_string())
        } else {
            SyncError::Serialization(e.to_string())
        }
    }
}

/// Result type for engine operations.
pub type Result<T> = std::result::Result<T, SyncError>;

//! Database error types.

use std::path::PathBuf;
use thiserror::Error;

/// Errors raised by the configuration database.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// The configuration directory does not exist or is not initialized.
    #[error("'{0}' is not a mortar configuration directory")]
    NotConfiguration(PathBuf),

    /// The state file is corrupt.
    #[error("state file {path} is corrupt: {reason}")]
    Corrupt {
        /// State file path.
        path: PathBuf,
        /// What is wrong.
        reason: String,
    },

    /// The state file integrity hash does not match its content.
    #[error("state file {path} failed integrity verification")]
    Integrity {
        /// State file path.
        path: PathBuf,
    },

    /// The state file lock could not be acquired.
    #[error("configuration {path} is in use by another process")]
    Locked {
        /// Configuration path.
        path: PathBuf,
    },

    /// Filesystem error.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl DatabaseError {
    /// Create an IO error with path context.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for database operations.
pub type Result<T> = std::result::Result<T, DatabaseError>;

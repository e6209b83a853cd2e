//! VCS error types.

use std::path::PathBuf;
use thiserror::Error;

/// VCS-layer errors.
#[derive(Debug, Error)]
pub enum VcsError {
    /// A git command failed.
    #[error("git error: {message}")]
    Git {
        /// Error message (trimmed stderr).
        message: String,
    },

    /// The path is not a git repository.
    #[error("'{0}' is not a git repository")]
    NotRepository(PathBuf),

    /// The requested commit, branch, or tag does not exist.
    #[error("reference '{reference}' not found in {repository}")]
    RefNotFound {
        /// The missing reference.
        reference: String,
        /// Repository it was looked up in.
        repository: String,
    },

    /// A worktree symlink points outside the repository root.
    #[error("symlink '{link}' escapes the repository root '{root}'")]
    SymlinkEscape {
        /// The offending link path.
        link: PathBuf,
        /// The repository root.
        root: PathBuf,
    },

    /// The checkout cache was left non-empty; the repository state may be
    /// broken.
    #[error(
        "repository state '{0}' is broken, run 'mortar rep-fetch' to repair"
    )]
    BrokenState(PathBuf),

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

impl VcsError {
    /// Create an IO error with path context.
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type for VCS operations.
pub type Result<T> = std::result::Result<T, VcsError>;

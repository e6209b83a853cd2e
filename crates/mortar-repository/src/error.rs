//! Repository error types.

use std::path::PathBuf;
use thiserror::Error;

/// The failure kind reported by the source-acquisition collaborator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The repository could not be reached.
    NetworkError,
    /// Authentication to the repository failed.
    AuthError,
    /// The repository metadata could not be parsed or is inconsistent.
    MetadataInvalid,
    /// A fetched artifact's checksum does not match the advertised one.
    ChecksumMismatch,
}

impl FetchErrorKind {
    /// Human-readable kind name.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::NetworkError => "network error",
            Self::AuthError => "authentication error",
            Self::MetadataInvalid => "invalid metadata",
            Self::ChecksumMismatch => "checksum mismatch",
        }
    }
}

/// Repository-layer errors.
#[derive(Debug, Error)]
pub enum RepositoryError {
    /// A repository location string could not be parsed.
    #[error("invalid repository location '{location}': {reason}")]
    InvalidLocation {
        /// The offending location text.
        location: String,
        /// What is wrong with it.
        reason: String,
    },

    /// A manifest could not be parsed.
    #[error("invalid manifest{}: {reason}", fmt_line(*.line))]
    InvalidManifest {
        /// Line number, when known.
        line: Option<usize>,
        /// What is wrong with it.
        reason: String,
    },

    /// A fetch from the repository failed.
    #[error("{}: {message} (run 'mortar rep-fetch' to repair)", kind.as_str())]
    Fetch {
        /// Failure kind.
        kind: FetchErrorKind,
        /// Detail message.
        message: String,
    },

    /// Filesystem error while reading a local repository.
    #[error("io error at {path}: {source}")]
    Io {
        /// Path involved.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },
}

impl RepositoryError {
    /// Create a fetch error of the given kind.
    #[must_use]
    pub fn fetch(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self::Fetch {
            kind,
            message: message.into(),
        }
    }

    /// Create a manifest error without location info.
    #[must_use]
    pub fn manifest(reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            line: None,
            reason: reason.into(),
        }
    }

    /// Create a manifest error at the given line.
    #[must_use]
    pub fn manifest_at(line: usize, reason: impl Into<String>) -> Self {
        Self::InvalidManifest {
            line: Some(line),
            reason: reason.into(),
        }
    }
}

fn fmt_line(line: Option<usize>) -> String {
    match line {
        Some(l) => format!(" at line {l}"),
        None => String::new(),
    }
}

/// Result type for repository operations.
pub type Result<T> = std::result::Result<T, RepositoryError>;

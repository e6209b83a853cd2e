//! System package manager error types.

use thiserror::Error;

/// System package manager errors.
#[derive(Debug, Error)]
pub enum SystemError {
    /// The package manager command failed.
    #[error("{command} failed: {message}")]
    Command {
        /// Command that failed.
        command: String,
        /// Trimmed stderr.
        message: String,
    },

    /// The distribution version could not be mapped into the mortar
    /// version space.
    #[error("cannot map system version '{system_version}' of '{system_name}': {reason}")]
    UnmappableVersion {
        /// Distribution package name.
        system_name: String,
        /// Distribution version string.
        system_version: String,
        /// Why mapping failed.
        reason: String,
    },

    /// The installed version does not match what `status` promised.
    #[error(
        "system package '{system_name}' changed from {promised} to {installed} during install"
    )]
    VersionChanged {
        /// Distribution package name.
        system_name: String,
        /// Version promised by `status`.
        promised: String,
        /// Version actually installed.
        installed: String,
    },
}

/// Result type for system package operations.
pub type Result<T> = std::result::Result<T, SystemError>;

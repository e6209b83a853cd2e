//! Error codes shared across mortar crates.
//!
//! Each user-facing failure carries:
//! - A stable error code (e.g. E0102) for searching and reference
//! - A clear message explaining what went wrong
//! - Suggestions for how to fix the issue

use std::fmt;

/// Error codes for mortar diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    // Input errors (E00xx)
    /// Malformed version or constraint
    E0001,
    /// Malformed package name
    E0002,
    /// Malformed manifest
    E0003,

    // Resolution errors (E01xx)
    /// Package not found in any repository
    E0101,
    /// Version constraint cannot be satisfied
    E0102,
    /// Dependency cycle among packages being configured
    E0103,
    /// No dependency alternative can be selected
    E0104,
    /// Configuration negotiation failed
    E0105,
    /// Existing dependent constraint violated
    E0106,
    /// Recurring negotiated configuration (bogus variables)
    E0107,

    // Fetch errors (E02xx)
    /// Network request failed
    E0201,
    /// Authentication failed
    E0202,
    /// Repository metadata invalid
    E0203,
    /// Checksum mismatch
    E0204,

    // System package errors (E03xx)
    /// System package version changed under us
    E0301,
    /// System package cannot be mapped to a distribution package
    E0302,

    // State errors (E04xx)
    /// Configuration directory state is broken
    E0401,

    // Internal errors (E09xx)
    /// Internal invariant violation
    E0901,
}

impl ErrorCode {
    /// Get the string representation of the error code.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::E0001 => "E0001",
            Self::E0002 => "E0002",
            Self::E0003 => "E0003",
            Self::E0101 => "E0101",
            Self::E0102 => "E0102",
            Self::E0103 => "E0103",
            Self::E0104 => "E0104",
            Self::E0105 => "E0105",
            Self::E0106 => "E0106",
            Self::E0107 => "E0107",
            Self::E0201 => "E0201",
            Self::E0202 => "E0202",
            Self::E0203 => "E0203",
            Self::E0204 => "E0204",
            Self::E0301 => "E0301",
            Self::E0302 => "E0302",
            Self::E0401 => "E0401",
            Self::E0901 => "E0901",
        }
    }

    /// Get a brief title for this error code.
    #[must_use]
    pub const fn title(&self) -> &'static str {
        match self {
            Self::E0001 => "Invalid version",
            Self::E0002 => "Invalid package name",
            Self::E0003 => "Invalid manifest",
            Self::E0101 => "Package not found",
            Self::E0102 => "Constraint not satisfiable",
            Self::E0103 => "Dependency cycle",
            Self::E0104 => "No selectable alternative",
            Self::E0105 => "Negotiation failed",
            Self::E0106 => "Unsatisfied dependent",
            Self::E0107 => "Recurring configuration",
            Self::E0201 => "Network error",
            Self::E0202 => "Authentication failed",
            Self::E0203 => "Invalid repository metadata",
            Self::E0204 => "Checksum mismatch",
            Self::E0301 => "System version changed",
            Self::E0302 => "Unmappable system package",
            Self::E0401 => "Broken state",
            Self::E0901 => "Internal error",
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The URL to include in invariant-violation reports.
pub const REPORT_URL: &str = "https://github.com/mortar-pm/mortar/issues";

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(ErrorCode::E0101.as_str(), "E0101");
        assert_eq!(ErrorCode::E0101.title(), "Package not found");
    }
}

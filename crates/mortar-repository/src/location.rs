//! Repository locations.
//!
//! A location is a `(url, type)` pair with type `git`, `dir`, or `pkg`.
//! Git locations may carry a `#fragment` naming a branch, tag, or commit.
//! The canonical form of a location (lowercased scheme and host, trailing
//! `.git` stripped) identifies the repository regardless of spelling; its
//! hash names the repository-state directory on disk.

use crate::error::{RepositoryError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use url::Url;

/// Repository type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepositoryType {
    /// A version-control repository fetched with git.
    Git,
    /// A local directory with package manifests.
    Dir,
    /// An archive-based package repository.
    Pkg,
}

impl RepositoryType {
    /// Type name as it appears in location prefixes.
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Git => "git",
            Self::Dir => "dir",
            Self::Pkg => "pkg",
        }
    }

    /// Guess the type from a URL when no explicit prefix is given.
    fn guess(url: &str) -> Self {
        if url.starts_with('/') || url.starts_with("file:") {
            Self::Dir
        } else if url.ends_with(".git") || url.contains("git") {
            Self::Git
        } else {
            Self::Pkg
        }
    }
}

/// A repository location.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RepositoryLocation {
    /// Repository URL (or absolute path for `dir`).
    pub url: String,
    /// Repository type.
    pub r#type: RepositoryType,
    /// Branch, tag, or commit for git locations.
    pub fragment: Option<String>,
}

impl RepositoryLocation {
    /// Parse a location, optionally prefixed with an explicit type:
    /// `git+https://...`, `dir+/path`, `pkg+https://...`. A `#fragment`
    /// suffix on a git location names the branch, tag, or commit.
    pub fn parse(s: &str) -> Result<Self> {
        let s = s.trim();
        if s.is_empty() {
            return Err(RepositoryError::InvalidLocation {
                location: s.to_string(),
                reason: "empty location".to_string(),
            });
        }

        let (r#type, rest) = if let Some(rest) = s.strip_prefix("git+") {
            (RepositoryType::Git, rest)
        } else if let Some(rest) = s.strip_prefix("dir+") {
            (RepositoryType::Dir, rest)
        } else if let Some(rest) = s.strip_prefix("pkg+") {
            (RepositoryType::Pkg, rest)
        } else {
            (RepositoryType::guess(s), s)
        };

        let (url, fragment) = match (r#type, rest.rsplit_once('#')) {
            (RepositoryType::Git, Some((url, frag))) if !frag.is_empty() => {
                (url.to_string(), Some(frag.to_string()))
            }
            _ => (rest.to_string(), None),
        };

        let loc = Self {
            url,
            r#type,
            fragment,
        };
        loc.validate()?;
        Ok(loc)
    }

    fn validate(&self) -> Result<()> {
        match self.r#type {
            RepositoryType::Dir => {
                if !Path::new(&self.url).is_absolute() {
                    return Err(RepositoryError::InvalidLocation {
                        location: self.url.clone(),
                        reason: "dir repository path must be absolute".to_string(),
                    });
                }
            }
            RepositoryType::Git | RepositoryType::Pkg => {
                Url::parse(&self.url).map_err(|e| RepositoryError::InvalidLocation {
                    location: self.url.clone(),
                    reason: e.to_string(),
                })?;
            }
        }
        Ok(())
    }

    /// The canonical form: lowercased scheme and host, trailing `.git`
    /// stripped, fragment excluded.
    #[must_use]
    pub fn canonical_name(&self) -> String {
        let url = match Url::parse(&self.url) {
            Ok(mut u) => {
                let _ = u.set_fragment(None);
                u.to_string()
            }
            Err(_) => self.url.clone(),
        };
        let url = url.strip_suffix('/').unwrap_or(&url);
        let url = url.strip_suffix(".git").unwrap_or(url);
        format!("{}+{}", self.r#type.as_str(), url)
    }

    /// The repository-state identifier: hex blake3 of the canonical name.
    /// Names the per-repository subdirectory under the repositories
    /// directory.
    #[must_use]
    pub fn state_id(&self) -> String {
        blake3::hash(self.canonical_name().as_bytes())
            .to_hex()
            .to_string()
    }

    /// A short human-readable name for diagnostics.
    #[must_use]
    pub fn friendly_name(&self) -> String {
        match &self.fragment {
            Some(f) => format!("{}#{f}", self.url),
            None => self.url.clone(),
        }
    }
}

impl fmt::Display for RepositoryLocation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}+{}", self.r#type.as_str(), self.url)?;
        if let Some(frag) = &self.fragment {
            write!(f, "#{frag}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_parse_explicit_type() {
        let loc = RepositoryLocation::parse("git+https://example.org/foo.git#v1.2").unwrap();
        assert_eq!(loc.r#type, RepositoryType::Git);
        assert_eq!(loc.url, "https://example.org/foo.git");
        assert_eq!(loc.fragment.as_deref(), Some("v1.2"));
    }

    #[test]
    fn test_parse_dir_must_be_absolute() {
        assert!(RepositoryLocation::parse("dir+/srv/repo").is_ok());
        assert!(RepositoryLocation::parse("dir+relative/repo").is_err());
    }

    #[test]
    fn test_canonical_strips_git_suffix() {
        let a = RepositoryLocation::parse("git+https://example.org/foo.git").unwrap();
        let b = RepositoryLocation::parse("git+https://example.org/foo").unwrap();
        assert_eq!(a.canonical_name(), b.canonical_name());
        assert_eq!(a.state_id(), b.state_id());
    }

    #[test]
    fn test_fragment_excluded_from_state_id() {
        let a = RepositoryLocation::parse("git+https://example.org/foo#main").unwrap();
        let b = RepositoryLocation::parse("git+https://example.org/foo#v2").unwrap();
        assert_eq!(a.state_id(), b.state_id());
    }
}

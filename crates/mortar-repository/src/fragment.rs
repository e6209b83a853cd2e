//! Repository fragments.
//!
//! A fragment is a versioned snapshot of a repository (a git commit, an
//! archive generation, or a directory scan) carrying its own package
//! manifests and prerequisite/complement edges. The fetch collaborator
//! returns fragments in chronological order, earliest to latest; the
//! available-package index prefers later fragments when the same package
//! version is advertised by several.

use crate::manifest::{PackageManifest, RepositoryManifest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A versioned snapshot of a repository.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepositoryFragment {
    /// Stable fragment identifier (e.g. the commit id).
    pub id: String,
    /// Human-readable name for diagnostics (e.g. `foo.git#main`).
    pub friendly_name: String,
    /// The location of the repository this fragment came from, in its
    /// textual form. Used to find the repository state on checkout.
    #[serde(default)]
    pub repository: String,
    /// Snapshot time, used for chronological ordering.
    pub timestamp: DateTime<Utc>,
    /// Repositories this fragment references.
    pub repositories: Vec<RepositoryManifest>,
    /// Packages this fragment advertises.
    pub packages: Vec<PackageManifest>,
}

impl RepositoryFragment {
    /// Create an empty fragment.
    #[must_use]
    pub fn new(id: impl Into<String>, friendly_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            friendly_name: friendly_name.into(),
            repository: String::new(),
            timestamp: DateTime::<Utc>::UNIX_EPOCH,
            repositories: Vec::new(),
            packages: Vec::new(),
        }
    }

    /// Set the originating repository location.
    #[must_use]
    pub fn with_repository(mut self, location: impl Into<String>) -> Self {
        self.repository = location.into();
        self
    }
}

impl fmt::Display for RepositoryFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.friendly_name)
    }
}

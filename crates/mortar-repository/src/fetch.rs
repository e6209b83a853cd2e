//! The source-acquisition collaborator interface.
//!
//! The resolver consumes repository metadata through [`RepositoryFetcher`];
//! it never performs acquisition itself. [`fetch_repositories`] drives a
//! fetcher across a repository's complement and prerequisite edges the way
//! `rep-fetch` does: complements are followed always, prerequisites only
//! for the root repository, and a visited set breaks reference cycles.
//!
//! [`DirFetcher`] is the built-in fetcher for `dir` repositories; git
//! acquisition is provided by the VCS layer.

use crate::error::{FetchErrorKind, RepositoryError, Result};
use crate::fragment::RepositoryFragment;
use crate::location::{RepositoryLocation, RepositoryType};
use crate::manifest::{PackageManifest, RepositoryManifest, RepositoryRole};
use ahash::AHashSet;
use chrono::{DateTime, Utc};
use std::path::Path;
use tracing::{debug, info};

/// Fetches repository metadata, returning fragments in chronological
/// order (earliest to latest).
pub trait RepositoryFetcher {
    /// Fetch the repository at `location`. `shallow` requests metadata for
    /// the latest fragment only; `reason` is included in progress output.
    fn fetch(
        &self,
        location: &RepositoryLocation,
        shallow: bool,
        reason: &str,
    ) -> Result<Vec<RepositoryFragment>>;
}

/// Fetch a repository and everything it references.
///
/// Complement edges are followed for every repository; prerequisite edges
/// only for the root. Returns the fragments of all visited repositories,
/// root first.
pub fn fetch_repositories(
    fetcher: &dyn RepositoryFetcher,
    root: &RepositoryLocation,
    shallow: bool,
) -> Result<Vec<RepositoryFragment>> {
    let mut visited: AHashSet<String> = AHashSet::new();
    let mut queue: Vec<(RepositoryLocation, bool, String)> =
        vec![(root.clone(), true, "fetching".to_string())];
    let mut fragments = Vec::new();

    while let Some((location, is_root, reason)) = queue.pop() {
        if !visited.insert(location.state_id()) {
            continue;
        }
        info!(repository = %location, reason = %reason, "fetching repository");
        let fetched = fetcher.fetch(&location, shallow, &reason)?;

        for fragment in &fetched {
            for r in &fragment.repositories {
                let follow = match r.role {
                    RepositoryRole::Base => false,
                    RepositoryRole::Complement => true,
                    RepositoryRole::Prerequisite => is_root,
                };
                if follow {
                    queue.push((
                        r.location.clone(),
                        false,
                        format!("required by {}", location.friendly_name()),
                    ));
                }
            }
        }
        fragments.extend(fetched);
    }

    debug!(fragments = fragments.len(), "fetch complete");
    Ok(fragments)
}

/// Fetcher for `dir` repositories: reads `packages.manifest` and
/// `repositories.manifest` straight from the directory. A directory
/// repository always has exactly one fragment.
#[derive(Debug, Default)]
pub struct DirFetcher;

impl DirFetcher {
    /// Create a fetcher.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl RepositoryFetcher for DirFetcher {
    fn fetch(
        &self,
        location: &RepositoryLocation,
        _shallow: bool,
        _reason: &str,
    ) -> Result<Vec<RepositoryFragment>> {
        if location.r#type != RepositoryType::Dir {
            return Err(RepositoryError::fetch(
                FetchErrorKind::MetadataInvalid,
                format!("'{location}' is not a dir repository"),
            ));
        }
        let dir = Path::new(&location.url);
        if !dir.is_dir() {
            return Err(RepositoryError::fetch(
                FetchErrorKind::NetworkError,
                format!("repository directory '{}' does not exist", dir.display()),
            ));
        }

        let mut fragment = RepositoryFragment::new(location.state_id(), location.friendly_name())
            .with_repository(location.to_string());
        fragment.timestamp = dir_mtime(dir);

        let packages_path = dir.join("packages.manifest");
        if packages_path.is_file() {
            let text = std::fs::read_to_string(&packages_path).map_err(|e| RepositoryError::Io {
                path: packages_path.clone(),
                source: e,
            })?;
            fragment.packages = PackageManifest::parse_all(&text)?;
        } else {
            // No index file: scan one level of subdirectories for package
            // manifests.
            let entries = std::fs::read_dir(dir).map_err(|e| RepositoryError::Io {
                path: dir.to_path_buf(),
                source: e,
            })?;
            for entry in entries.flatten() {
                let manifest_path = entry.path().join("manifest");
                if manifest_path.is_file() {
                    let text = std::fs::read_to_string(&manifest_path).map_err(|e| {
                        RepositoryError::Io {
                            path: manifest_path.clone(),
                            source: e,
                        }
                    })?;
                    fragment.packages.push(PackageManifest::parse(&text)?);
                }
            }
        }

        let repos_path = dir.join("repositories.manifest");
        if repos_path.is_file() {
            let text = std::fs::read_to_string(&repos_path).map_err(|e| RepositoryError::Io {
                path: repos_path.clone(),
                source: e,
            })?;
            fragment.repositories = RepositoryManifest::parse_all(&text)?;
        }

        Ok(vec![fragment])
    }
}

fn dir_mtime(dir: &Path) -> DateTime<Utc> {
    std::fs::metadata(dir)
        .and_then(|m| m.modified())
        .map(DateTime::<Utc>::from)
        .unwrap_or(DateTime::<Utc>::UNIX_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// In-memory fetcher for edge-following tests.
    struct MapFetcher(ahash::AHashMap<String, Vec<RepositoryFragment>>);

    impl RepositoryFetcher for MapFetcher {
        fn fetch(
            &self,
            location: &RepositoryLocation,
            _shallow: bool,
            _reason: &str,
        ) -> Result<Vec<RepositoryFragment>> {
            self.0.get(&location.state_id()).cloned().ok_or_else(|| {
                RepositoryError::fetch(FetchErrorKind::NetworkError, "unknown repository")
            })
        }
    }

    fn loc(url: &str) -> RepositoryLocation {
        RepositoryLocation::parse(&format!("git+{url}")).unwrap()
    }

    fn fragment_with_edges(id: &str, edges: &[(&str, RepositoryRole)]) -> RepositoryFragment {
        let mut f = RepositoryFragment::new(id, id);
        f.repositories = edges
            .iter()
            .map(|(url, role)| RepositoryManifest {
                location: loc(url),
                role: *role,
            })
            .collect();
        f
    }

    #[test]
    fn test_prerequisites_followed_for_root_only() {
        let a = loc("https://example.org/a");
        let b = loc("https://example.org/b");
        let c = loc("https://example.org/c");

        let mut map = ahash::AHashMap::new();
        map.insert(
            a.state_id(),
            vec![fragment_with_edges(
                "a",
                &[("https://example.org/b", RepositoryRole::Prerequisite)],
            )],
        );
        map.insert(
            b.state_id(),
            vec![fragment_with_edges(
                "b",
                &[("https://example.org/c", RepositoryRole::Prerequisite)],
            )],
        );
        map.insert(c.state_id(), vec![fragment_with_edges("c", &[])]);

        let fragments = fetch_repositories(&MapFetcher(map), &a, true).unwrap();
        let ids: Vec<&str> = fragments.iter().map(|f| f.id.as_str()).collect();
        // b's prerequisite c is not followed since b is not the root.
        assert_eq!(ids, ["a", "b"]);
    }

    #[test]
    fn test_complement_cycle_terminates() {
        let a = loc("https://example.org/a");
        let b = loc("https://example.org/b");

        let mut map = ahash::AHashMap::new();
        map.insert(
            a.state_id(),
            vec![fragment_with_edges(
                "a",
                &[("https://example.org/b", RepositoryRole::Complement)],
            )],
        );
        map.insert(
            b.state_id(),
            vec![fragment_with_edges(
                "b",
                &[("https://example.org/a", RepositoryRole::Complement)],
            )],
        );

        let fragments = fetch_repositories(&MapFetcher(map), &a, true).unwrap();
        assert_eq!(fragments.len(), 2);
    }
}

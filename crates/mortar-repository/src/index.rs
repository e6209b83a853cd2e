//! The available-package index.
//!
//! Collects the package manifests advertised by fetched repository
//! fragments and answers the resolver's queries: all versions of a name,
//! the best version satisfying a constraint, and the fragment a chosen
//! version can be checked out from.

use crate::fragment::RepositoryFragment;
use crate::manifest::PackageManifest;
use ahash::AHashMap;
use mortar_core::{PackageName, Version, VersionConstraint};
use std::sync::Arc;
use tracing::debug;

/// A package version known to the planner, with the fragments advertising
/// it.
#[derive(Debug, Clone)]
pub struct AvailablePackage {
    /// The package manifest.
    pub manifest: PackageManifest,
    /// Ids of the fragments advertising this version, latest first.
    pub fragments: Vec<String>,
}

impl AvailablePackage {
    /// Package name.
    #[must_use]
    pub fn name(&self) -> &PackageName {
        &self.manifest.name
    }

    /// Package version.
    #[must_use]
    pub fn version(&self) -> &Version {
        &self.manifest.version
    }

    /// Whether this is a stub (placeholder advertised without sources).
    #[must_use]
    pub fn is_stub(&self) -> bool {
        self.manifest.version.is_stub()
    }
}

/// Index of available packages across repository fragments.
#[derive(Debug, Clone, Default)]
pub struct AvailableIndex {
    by_name: AHashMap<PackageName, Vec<Arc<AvailablePackage>>>,
}

impl AvailableIndex {
    /// Create an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Build an index from fragments (given earliest to latest).
    #[must_use]
    pub fn from_fragments<'a>(fragments: impl IntoIterator<Item = &'a RepositoryFragment>) -> Self {
        let mut index = Self::new();
        for fragment in fragments {
            index.add_fragment(fragment);
        }
        index
    }

    /// Add one fragment's packages. Later fragments take precedence when
    /// they advertise a version an earlier fragment already did.
    pub fn add_fragment(&mut self, fragment: &RepositoryFragment) {
        for manifest in &fragment.packages {
            self.add(manifest.clone(), &fragment.id);
        }
    }

    /// Add one package manifest advertised by the given fragment.
    pub fn add(&mut self, manifest: PackageManifest, fragment_id: &str) {
        let versions = self.by_name.entry(manifest.name.clone()).or_default();
        if let Some(existing) = versions
            .iter_mut()
            .find(|p| p.manifest.version == manifest.version)
        {
            // Same version from a newer fragment: replace the manifest and
            // record the fragment first so checkout prefers it.
            let mut fragments = existing.fragments.clone();
            fragments.retain(|f| f != fragment_id);
            fragments.insert(0, fragment_id.to_string());
            *existing = Arc::new(AvailablePackage {
                manifest,
                fragments,
            });
            return;
        }
        versions.push(Arc::new(AvailablePackage {
            manifest,
            fragments: vec![fragment_id.to_string()],
        }));
        // Keep versions sorted descending; stubs sort last.
        versions.sort_by(|a, b| {
            (a.is_stub(), std::cmp::Reverse(&a.manifest.version))
                .cmp(&(b.is_stub(), std::cmp::Reverse(&b.manifest.version)))
        });
    }

    /// All versions of a package, highest first, stubs last.
    #[must_use]
    pub fn versions(&self, name: &PackageName) -> &[Arc<AvailablePackage>] {
        self.by_name.get(name).map_or(&[], Vec::as_slice)
    }

    /// All non-stub versions satisfying the constraint, highest first.
    #[must_use]
    pub fn query(
        &self,
        name: &PackageName,
        constraint: Option<&VersionConstraint>,
    ) -> Vec<Arc<AvailablePackage>> {
        let r: Vec<_> = self
            .versions(name)
            .iter()
            .filter(|p| !p.is_stub())
            .filter(|p| constraint.is_none_or(|c| c.satisfies(&p.manifest.version)))
            .cloned()
            .collect();
        debug!(name = %name, matches = r.len(), "index query");
        r
    }

    /// The best (highest non-stub) version satisfying the constraint.
    #[must_use]
    pub fn best(
        &self,
        name: &PackageName,
        constraint: Option<&VersionConstraint>,
    ) -> Option<Arc<AvailablePackage>> {
        self.query(name, constraint).into_iter().next()
    }

    /// Find an exact version, stubs included.
    #[must_use]
    pub fn find(&self, name: &PackageName, version: &Version) -> Option<Arc<AvailablePackage>> {
        self.versions(name)
            .iter()
            .find(|p| &p.manifest.version == version)
            .cloned()
    }

    /// Whether any version of the package is known.
    #[must_use]
    pub fn contains(&self, name: &PackageName) -> bool {
        self.by_name.contains_key(name)
    }

    /// Iterate all package names.
    pub fn names(&self) -> impl Iterator<Item = &PackageName> {
        self.by_name.keys()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn manifest(name: &str, version: &str) -> PackageManifest {
        PackageManifest::parse(&format!("name: {name}\nversion: {version}\n")).unwrap()
    }

    fn name(s: &str) -> PackageName {
        PackageName::parse(s).unwrap()
    }

    #[test]
    fn test_versions_sorted_descending() {
        let mut index = AvailableIndex::new();
        index.add(manifest("libfoo", "1.0.0"), "f1");
        index.add(manifest("libfoo", "2.0.0"), "f1");
        index.add(manifest("libfoo", "1.5.0"), "f1");

        let versions: Vec<String> = index
            .versions(&name("libfoo"))
            .iter()
            .map(|p| p.manifest.version.to_string())
            .collect();
        assert_eq!(versions, ["2.0.0", "1.5.0", "1.0.0"]);
    }

    #[test]
    fn test_stubs_sort_last_and_are_not_queried() {
        let mut index = AvailableIndex::new();
        index.add(manifest("libfoo", "+0-0"), "f1");
        index.add(manifest("libfoo", "1.0.0"), "f1");

        assert!(index.versions(&name("libfoo"))[1].is_stub());
        assert_eq!(index.query(&name("libfoo"), None).len(), 1);
    }

    #[test]
    fn test_best_with_constraint() {
        let mut index = AvailableIndex::new();
        index.add(manifest("libfoo", "1.0.0"), "f1");
        index.add(manifest("libfoo", "2.0.0"), "f1");

        let c = VersionConstraint::parse("< 2.0.0").unwrap();
        let best = index.best(&name("libfoo"), Some(&c)).unwrap();
        assert_eq!(best.manifest.version.to_string(), "1.0.0");
    }

    #[test]
    fn test_later_fragment_wins() {
        let mut index = AvailableIndex::new();
        index.add(manifest("libfoo", "1.0.0"), "old");
        index.add(manifest("libfoo", "1.0.0"), "new");

        let p = index.find(&name("libfoo"), &Version::parse("1.0.0").unwrap()).unwrap();
        assert_eq!(p.fragments, ["new", "old"]);
    }
}

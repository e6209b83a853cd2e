//! Postponement bookkeeping: the postponed-dependencies table, the
//! unsatisfied-dependents ledger, and the unacceptable-alternatives set.

use mortar_core::{PackageKey, PackageVersionKey, Version, VersionConstraint};
use std::collections::{BTreeMap, BTreeSet};
use tracing::debug;

/// Why a dependency's recursive collection was deferred.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PostponedDependency {
    /// Seen from a dependent without configuration clauses.
    pub wout_config: bool,
    /// Seen from a dependent with configuration clauses.
    pub with_config: bool,
}

impl PostponedDependency {
    /// A postponement that served no purpose: deferred for a
    /// configuration that never materialized.
    #[must_use]
    pub fn is_bogus(&self) -> bool {
        self.wout_config && !self.with_config
    }
}

/// Dependencies whose recursive collection is deferred.
#[derive(Debug, Clone, Default)]
pub struct PostponedDependencies {
    entries: BTreeMap<PackageKey, PostponedDependency>,
}

impl PostponedDependencies {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an observation of the dependency.
    pub fn record(&mut self, key: PackageKey, with_config: bool) {
        let entry = self.entries.entry(key).or_default();
        if with_config {
            entry.with_config = true;
        } else {
            entry.wout_config = true;
        }
    }

    /// Look up an entry.
    #[must_use]
    pub fn get(&self, key: &PackageKey) -> Option<&PostponedDependency> {
        self.entries.get(key)
    }

    /// Whether the dependency is postponed at all.
    #[must_use]
    pub fn contains(&self, key: &PackageKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Whether any entry is bogus.
    #[must_use]
    pub fn has_bogus(&self) -> bool {
        self.entries.values().any(PostponedDependency::is_bogus)
    }

    /// Clear the per-pass observation flags, keeping the entries. Done at
    /// the start of each scratch pass so bogus detection reflects the
    /// current pass only.
    pub fn reset_observations(&mut self) {
        for entry in self.entries.values_mut() {
            *entry = PostponedDependency::default();
        }
    }

    /// Remove bogus entries, returning how many were removed. The caller
    /// restarts from scratch when any were.
    pub fn cancel_bogus(&mut self) -> usize {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            if entry.is_bogus() {
                debug!(package = %key, "cancelling bogus postponement");
                false
            } else {
                true
            }
        });
        before - self.entries.len()
    }

    /// Iterate entries.
    pub fn iter(&self) -> impl Iterator<Item = (&PackageKey, &PostponedDependency)> {
        self.entries.iter()
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// One recorded constraint violation, kept for deferred diagnosis.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsatisfiedDependent {
    /// The dependent whose constraint is violated.
    pub dependent: PackageVersionKey,
    /// The dependency it constrains.
    pub dependency: PackageKey,
    /// The violated constraint.
    pub constraint: VersionConstraint,
    /// The version the plan would configure.
    pub version: Version,
}

/// Accumulated constraint violations. Diagnosis is deferred to the end of
/// the run: a later up/downgrade of the dependent may restore
/// satisfaction.
#[derive(Debug, Clone, Default)]
pub struct UnsatisfiedDependents {
    entries: Vec<UnsatisfiedDependent>,
}

impl UnsatisfiedDependents {
    /// Create an empty ledger.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a violation.
    pub fn add(&mut self, entry: UnsatisfiedDependent) {
        debug!(
            dependent = %entry.dependent,
            dependency = %entry.dependency,
            constraint = %entry.constraint,
            version = %entry.version,
            "recording unsatisfied dependent"
        );
        if !self.entries.contains(&entry) {
            self.entries.push(entry);
        }
    }

    /// Drop entries involving the dependent (it is being replaced or
    /// re-collected, so its constraints will be re-checked).
    pub fn remove_dependent(&mut self, dependent: &PackageKey) {
        self.entries
            .retain(|e| &e.dependent.package_key() != dependent);
    }

    /// Re-check every entry with the final planned versions, keeping only
    /// the still-violated ones.
    pub fn retain_unsatisfied(&mut self, mut planned_version: impl FnMut(&PackageKey) -> Option<Version>) {
        self.entries.retain(|e| {
            planned_version(&e.dependency)
                .is_some_and(|v| !e.constraint.satisfies(&v))
        });
    }

    /// Iterate entries.
    pub fn iter(&self) -> impl Iterator<Item = &UnsatisfiedDependent> {
        self.entries.iter()
    }

    /// Whether the ledger is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// A dependency alternative rejected during negotiation, identified by the
/// dependent, its version, and the clause/alternative position.
pub type UnacceptableAlternative = (PackageKey, Version, (usize, usize));

/// Alternatives that must be skipped on subsequent collection passes.
pub type UnacceptableAlternatives = BTreeSet<UnacceptableAlternative>;

#[cfg(test)]
mod tests {
    use super::*;
    use mortar_core::{ConfigurationId, PackageName};
    use pretty_assertions::assert_eq;

    fn key(name: &str) -> PackageKey {
        PackageKey::new(ConfigurationId::MAIN, PackageName::parse(name).unwrap())
    }

    #[test]
    fn test_bogus_detection() {
        let mut table = PostponedDependencies::new();
        table.record(key("liba"), false);
        table.record(key("libb"), false);
        table.record(key("libb"), true);

        assert!(table.get(&key("liba")).unwrap().is_bogus());
        assert!(!table.get(&key("libb")).unwrap().is_bogus());
        assert_eq!(table.cancel_bogus(), 1);
        assert!(!table.contains(&key("liba")));
    }

    #[test]
    fn test_unsatisfied_retain() {
        let mut ledger = UnsatisfiedDependents::new();
        ledger.add(UnsatisfiedDependent {
            dependent: PackageVersionKey::new(
                ConfigurationId::MAIN,
                PackageName::parse("bar").unwrap(),
                Version::parse("1.0.0").unwrap(),
            ),
            dependency: key("libfoo"),
            constraint: VersionConstraint::parse("< 2.0.0").unwrap(),
            version: Version::parse("2.0.0").unwrap(),
        });

        // The plan now carries a satisfying version: entry is dropped.
        let mut ledger2 = ledger.clone();
        ledger2.retain_unsatisfied(|_| Some(Version::parse("1.5.0").unwrap()));
        assert!(ledger2.is_empty());

        // The violating version stands: entry is kept.
        ledger.retain_unsatisfied(|_| Some(Version::parse("2.0.0").unwrap()));
        assert_eq!(ledger.iter().count(), 1);
    }
}

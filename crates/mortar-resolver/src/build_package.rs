//! Build-packages: the planner's working records.
//!
//! A [`BuildPackage`] unifies "what is known about this package" (selected
//! state, available version, accumulated constraints) with "what will be
//! done with it" (the [`BuildAction`] and its flags). Records live in a
//! [`BuildPackageMap`]: a keyed map plus the ordered execution list. Every
//! action-bearing record appears in the list exactly once; pre-entered
//! records (no action yet) never do.

use crate::error::{ResolveError, Result};
use crate::postponed::UnsatisfiedDependent;
use crate::skeleton::PackageSkeleton;
use mortar_core::{
    PackageKey, PackageName, PackageVersionKey, VariableSet, Version, VersionConstraint,
};
use mortar_database::SelectedPackage;
use mortar_repository::{AvailablePackage, Dependency};
use std::collections::{BTreeMap, BTreeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::trace;

/// Upgrade policy requested for a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpgradePolicy {
    /// Upgrade to the best available version.
    Upgrade,
    /// Upgrade within the same minor series.
    Patch,
}

/// What the planner intends to do with a package.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BuildAction {
    /// Pre-entered: known to the planner but no action decided.
    #[default]
    None,
    /// Build (or upgrade/downgrade/reconfigure) the package.
    Build {
        /// The selected package is being moved between configurations.
        repoint: bool,
        /// An existing dependent scheduled for configuration
        /// re-evaluation against a cluster.
        reevaluate: bool,
        /// An existing dependent scheduled for full re-collection.
        recollect: bool,
        /// Also reconfigure due to dependency changes.
        reconfigure: bool,
        /// Also clear the hold flags.
        unhold: bool,
    },
    /// Remove the package from the configuration.
    Drop,
    /// No version change; adjust recorded state.
    Adjust {
        /// Reconfigure due to dependency changes.
        reconfigure: bool,
        /// Clear the hold flags.
        unhold: bool,
    },
}

impl BuildAction {
    /// A plain build action.
    #[must_use]
    pub fn build() -> Self {
        Self::Build {
            repoint: false,
            reevaluate: false,
            recollect: false,
            reconfigure: false,
            unhold: false,
        }
    }

    /// Whether an action has been decided.
    #[must_use]
    pub fn is_some(&self) -> bool {
        !matches!(self, Self::None)
    }

    /// Whether this is a build action.
    #[must_use]
    pub fn is_build(&self) -> bool {
        matches!(self, Self::Build { .. })
    }

    /// Whether this is a drop action.
    #[must_use]
    pub fn is_drop(&self) -> bool {
        matches!(self, Self::Drop)
    }

    /// Whether this is an adjustment.
    #[must_use]
    pub fn is_adjust(&self) -> bool {
        matches!(self, Self::Adjust { .. })
    }

    /// Whether the action carries the reconfigure flag.
    #[must_use]
    pub fn reconfigure(&self) -> bool {
        matches!(
            self,
            Self::Build {
                reconfigure: true,
                ..
            } | Self::Adjust {
                reconfigure: true,
                ..
            }
        )
    }

    /// Whether the action carries the recollect flag.
    #[must_use]
    pub fn recollect(&self) -> bool {
        matches!(self, Self::Build { recollect: true, .. })
    }

    /// Set the reconfigure flag, upgrading `None` to an adjustment.
    pub fn set_reconfigure(&mut self) {
        match self {
            Self::Build { reconfigure, .. } | Self::Adjust { reconfigure, .. } => {
                *reconfigure = true;
            }
            Self::None => {
                *self = Self::Adjust {
                    reconfigure: true,
                    unhold: false,
                };
            }
            Self::Drop => {}
        }
    }

    /// Merge another action into this one. A build survives an
    /// adjustment (flags folded in); a later explicit action supersedes a
    /// pre-entered one; drop yields to build.
    pub fn merge(&mut self, other: Self) {
        *self = match (*self, other) {
            (Self::None, b) | (b, Self::None) => b,
            (Self::Drop, b @ Self::Build { .. }) | (b @ Self::Build { .. }, Self::Drop) => b,
            (Self::Drop, Self::Drop) => Self::Drop,
            (Self::Drop, Self::Adjust { .. }) | (Self::Adjust { .. }, Self::Drop) => Self::Drop,
            (
                Self::Build {
                    repoint: r1,
                    reevaluate: e1,
                    recollect: c1,
                    reconfigure: f1,
                    unhold: u1,
                },
                Self::Build {
                    repoint: r2,
                    reevaluate: e2,
                    recollect: c2,
                    reconfigure: f2,
                    unhold: u2,
                },
            ) => Self::Build {
                repoint: r1 || r2,
                reevaluate: e1 || e2,
                recollect: c1 || c2,
                reconfigure: f1 || f2,
                unhold: u1 || u2,
            },
            (
                Self::Build {
                    repoint,
                    reevaluate,
                    recollect,
                    reconfigure: f1,
                    unhold: u1,
                },
                Self::Adjust {
                    reconfigure: f2,
                    unhold: u2,
                },
            )
            | (
                Self::Adjust {
                    reconfigure: f2,
                    unhold: u2,
                },
                Self::Build {
                    repoint,
                    reevaluate,
                    recollect,
                    reconfigure: f1,
                    unhold: u1,
                },
            ) => Self::Build {
                repoint,
                reevaluate,
                recollect,
                reconfigure: f1 || f2,
                unhold: u1 || u2,
            },
            (
                Self::Adjust {
                    reconfigure: f1,
                    unhold: u1,
                },
                Self::Adjust {
                    reconfigure: f2,
                    unhold: u2,
                },
            ) => Self::Adjust {
                reconfigure: f1 || f2,
                unhold: u1 || u2,
            },
        };
    }
}

/// A constraint recorded on a build-package, tagged with its origin.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConstraintSource {
    /// The dependent that imposed the constraint (or the command line).
    pub dependent: PackageVersionKey,
    /// The constraint.
    pub constraint: VersionConstraint,
}

/// The materialized result of collecting one `depends` clause: the chosen
/// alternative's dependencies and where they resolved to.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SelectedAlternative {
    /// The alternative's dependencies as declared.
    pub dependencies: Vec<Dependency>,
    /// The configuration each dependency resolved into.
    pub keys: Vec<PackageKey>,
}

/// The planner's central record for one package.
#[derive(Debug, Clone)]
pub struct BuildPackage {
    /// The decided action.
    pub action: BuildAction,
    /// The `(configuration, name)` key.
    pub key: PackageKey,
    /// The configuration-database record, when selected.
    pub selected: Option<Arc<SelectedPackage>>,
    /// The available package, always set for builds.
    pub available: Option<Arc<AvailablePackage>>,
    /// Fragment the package will be checked out from.
    pub repository_fragment: Option<String>,
    /// Materialized selected alternatives, one per collected clause.
    pub dependencies: Vec<SelectedAlternative>,
    /// Chosen alternative index per collected clause.
    pub alternatives: Vec<usize>,
    /// Configuration state used during resolution.
    pub skeleton: Option<PackageSkeleton>,
    /// Accumulated version constraints with their origins.
    pub constraints: Vec<ConstraintSource>,
    /// Hold the package after this run.
    pub hold_package: bool,
    /// Hold the version after this run.
    pub hold_version: bool,
    /// Satisfy via the system package manager.
    pub system: bool,
    /// Disfigure before configuring.
    pub disfigure: bool,
    /// Stop after configuring.
    pub configure_only: bool,
    /// Keep output directory when replacing.
    pub keep_out: bool,
    /// Checkout into this directory instead of the configuration.
    pub checkout_root: Option<PathBuf>,
    /// Purge the checkout after the run.
    pub checkout_purge: bool,
    /// User-supplied configuration variables.
    pub config_vars: VariableSet,
    /// Requested upgrade policy.
    pub upgrade: Option<UpgradePolicy>,
    /// Replace an orphaned version with one from a fetched repository.
    pub deorphan: bool,
    /// Who required this package (dependents and the command line).
    pub required_by: BTreeSet<PackageVersionKey>,
    /// Whether `required_by` holds dependents (as opposed to
    /// dependencies of a drop/reconfigure propagation).
    pub required_by_dependents: bool,
    /// Whether recursive collection has started.
    pub recursive_collection: bool,
    /// Alternatives whose collection was postponed for later widening.
    pub postponed_alternatives: Option<Vec<usize>>,
}

impl BuildPackage {
    /// Create a pre-entered record (no action decided).
    #[must_use]
    pub fn pre_entered(key: PackageKey, selected: Option<Arc<SelectedPackage>>) -> Self {
        Self {
            action: BuildAction::None,
            key,
            selected,
            available: None,
            repository_fragment: None,
            dependencies: Vec::new(),
            alternatives: Vec::new(),
            skeleton: None,
            constraints: Vec::new(),
            hold_package: false,
            hold_version: false,
            system: false,
            disfigure: false,
            configure_only: false,
            keep_out: false,
            checkout_root: None,
            checkout_purge: false,
            config_vars: VariableSet::new(),
            upgrade: None,
            deorphan: false,
            required_by: BTreeSet::new(),
            required_by_dependents: false,
            recursive_collection: false,
            postponed_alternatives: None,
        }
    }

    /// Package name.
    #[must_use]
    pub fn name(&self) -> &PackageName {
        &self.key.name
    }

    /// The version the plan would configure: the available one for
    /// builds, the selected one otherwise.
    #[must_use]
    pub fn plan_version(&self) -> Option<&Version> {
        match &self.available {
            Some(a) if self.action.is_build() => Some(a.version()),
            _ => self.selected.as_ref().map(|s| &s.version),
        }
    }

    /// The `(configuration, name, version)` key of this record for use as
    /// a constraint origin.
    #[must_use]
    pub fn version_key(&self) -> PackageVersionKey {
        match self.plan_version() {
            Some(v) => PackageVersionKey::new(
                self.key.configuration,
                self.key.name.clone(),
                v.clone(),
            ),
            None => PackageVersionKey {
                configuration: self.key.configuration,
                name: self.key.name.clone(),
                version: None,
            },
        }
    }

    /// Whether every `depends` clause has been collected.
    #[must_use]
    pub fn is_fully_collected(&self) -> bool {
        match &self.available {
            Some(a) => self.dependencies.len() == a.manifest.depends.len(),
            None => true,
        }
    }

    /// Record a constraint, deduplicating identical origins.
    pub fn add_constraint(&mut self, source: ConstraintSource) {
        if !self.constraints.contains(&source) {
            self.constraints.push(source);
        }
    }

    /// The intersection of all recorded constraints, `None` when they
    /// conflict.
    #[must_use]
    pub fn combined_constraint(&self) -> Option<VersionConstraint> {
        let mut combined = VersionConstraint::any();
        for c in &self.constraints {
            combined = combined.intersect(&c.constraint)?;
        }
        Some(combined)
    }

    /// Merge another record for the same key into this one (union-like).
    pub fn merge(&mut self, other: Self) {
        debug_assert_eq!(self.key, other.key);
        self.action.merge(other.action);

        if other.available.is_some() {
            self.available = other.available;
            self.repository_fragment = other.repository_fragment;
        }
        if self.selected.is_none() {
            self.selected = other.selected;
        }
        for c in other.constraints {
            self.add_constraint(c);
        }
        self.hold_package |= other.hold_package;
        self.hold_version |= other.hold_version;
        self.system |= other.system;
        self.disfigure |= other.disfigure;
        self.configure_only |= other.configure_only;
        self.keep_out |= other.keep_out;
        if other.checkout_root.is_some() {
            self.checkout_root = other.checkout_root;
            self.checkout_purge = other.checkout_purge;
        }
        self.config_vars.merge(&other.config_vars);
        if other.upgrade.is_some() {
            self.upgrade = other.upgrade;
        }
        self.deorphan |= other.deorphan;
        self.required_by.extend(other.required_by);
        self.required_by_dependents |= other.required_by_dependents;
    }

    /// The "while satisfying" chain entry for diagnostics.
    #[must_use]
    pub fn chain_entry(&self) -> String {
        match self.plan_version() {
            Some(v) => format!("{}/{v}", self.key),
            None => self.key.to_string(),
        }
    }
}

/// The build-package store: keyed map plus ordered execution list.
#[derive(Debug, Clone, Default)]
pub struct BuildPackageMap {
    entries: BTreeMap<PackageKey, BuildPackage>,
    order: Vec<PackageKey>,
}

impl BuildPackageMap {
    /// Create an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Look up a record.
    #[must_use]
    pub fn get(&self, key: &PackageKey) -> Option<&BuildPackage> {
        self.entries.get(key)
    }

    /// Mutable lookup.
    pub fn get_mut(&mut self, key: &PackageKey) -> Option<&mut BuildPackage> {
        self.entries.get_mut(key)
    }

    /// Whether a record exists.
    #[must_use]
    pub fn contains(&self, key: &PackageKey) -> bool {
        self.entries.contains_key(key)
    }

    /// Insert or merge a record. Returns true when two build decisions
    /// disagree on the version or system flag, i.e. the merge amounts to
    /// a version replacement the caller must restart for.
    pub fn insert(&mut self, package: BuildPackage) -> bool {
        let key = package.key.clone();
        match self.entries.get_mut(&key) {
            Some(existing) => {
                let replaced = existing.action.is_build()
                    && package.action.is_build()
                    && package.available.is_some()
                    && (existing.available.as_ref().map(|a| a.version())
                        != package.available.as_ref().map(|a| a.version())
                        || existing.system != package.system);
                existing.merge(package);
                replaced
            }
            None => {
                trace!(package = %key, "entering build-package");
                self.entries.insert(key, package);
                false
            }
        }
    }

    /// Replace a record wholesale (version replacement path).
    pub fn replace(&mut self, package: BuildPackage) {
        self.order.retain(|k| k != &package.key);
        self.entries.insert(package.key.clone(), package);
    }

    /// Remove a record and its list entry.
    pub fn remove(&mut self, key: &PackageKey) -> Option<BuildPackage> {
        self.order.retain(|k| k != key);
        self.entries.remove(key)
    }

    /// Iterate records in key order.
    pub fn iter(&self) -> impl Iterator<Item = (&PackageKey, &BuildPackage)> {
        self.entries.iter()
    }

    /// Mutable iteration in key order.
    pub fn iter_mut(&mut self) -> impl Iterator<Item = (&PackageKey, &mut BuildPackage)> {
        self.entries.iter_mut()
    }

    /// The ordered execution list.
    #[must_use]
    pub fn ordered(&self) -> &[PackageKey] {
        &self.order
    }

    /// Iterate the ordered records.
    pub fn iter_ordered(&self) -> impl Iterator<Item = &BuildPackage> {
        self.order.iter().filter_map(|k| self.entries.get(k))
    }

    /// Whether the key is already ordered.
    #[must_use]
    pub fn is_ordered(&self, key: &PackageKey) -> bool {
        self.order.contains(key)
    }

    /// Append a key to the ordered list.
    pub(crate) fn push_order(&mut self, key: PackageKey) {
        self.order.push(key);
    }

    /// Drop a key from the ordered list (reordering support).
    pub(crate) fn drop_order(&mut self, key: &PackageKey) {
        self.order.retain(|k| k != key);
    }

    /// Clear the ordered list (rebuilt after snapshot restore).
    pub(crate) fn clear_order(&mut self) {
        self.order.clear();
    }

    /// Check the map/list agreement invariant: every action-bearing entry
    /// is listed exactly once, pre-entered entries are not listed.
    pub fn verify_invariants(&self) -> Result<()> {
        for (key, package) in &self.entries {
            let listed = self.order.iter().filter(|k| *k == key).count();
            if package.action.is_some() {
                if listed != 1 {
                    return Err(ResolveError::invariant(format!(
                        "package {key} with action listed {listed} times"
                    )));
                }
                if package.action.is_build() && package.available.is_none() {
                    return Err(ResolveError::invariant(format!(
                        "build action for {key} without available package"
                    )));
                }
            } else if listed != 0 {
                return Err(ResolveError::invariant(format!(
                    "pre-entered package {key} appears in the ordered list"
                )));
            }
        }
        for key in &self.order {
            if !self.entries.contains_key(key) {
                return Err(ResolveError::invariant(format!(
                    "ordered key {key} missing from the map"
                )));
            }
        }
        Ok(())
    }

    /// Record an unsatisfied-constraint check against another dependent's
    /// recorded constraints.
    #[must_use]
    pub fn check_constraints(
        &self,
        key: &PackageKey,
        version: &Version,
    ) -> Vec<UnsatisfiedDependent> {
        let mut out = Vec::new();
        if let Some(existing) = self.entries.get(key) {
            for c in &existing.constraints {
                if !c.constraint.satisfies(version) {
                    out.push(UnsatisfiedDependent {
                        dependent: c.dependent.clone(),
                        dependency: key.clone(),
                        constraint: c.constraint.clone(),
                        version: version.clone(),
                    });
                }
            }
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mortar_core::ConfigurationId;
    use pretty_assertions::assert_eq;

    fn key(name: &str) -> PackageKey {
        PackageKey::new(ConfigurationId::MAIN, PackageName::parse(name).unwrap())
    }

    #[test]
    fn test_action_merge_build_wins_over_adjust() {
        let mut action = BuildAction::Adjust {
            reconfigure: true,
            unhold: false,
        };
        action.merge(BuildAction::build());
        assert!(action.is_build());
        assert!(action.reconfigure());
    }

    #[test]
    fn test_action_merge_build_wins_over_drop() {
        let mut action = BuildAction::Drop;
        action.merge(BuildAction::build());
        assert!(action.is_build());
    }

    #[test]
    fn test_set_reconfigure_on_pre_entered() {
        let mut action = BuildAction::None;
        action.set_reconfigure();
        assert!(action.is_adjust());
        assert!(action.reconfigure());
    }

    #[test]
    fn test_combined_constraint() {
        let mut p = BuildPackage::pre_entered(key("libfoo"), None);
        p.add_constraint(ConstraintSource {
            dependent: PackageVersionKey::command_line(ConfigurationId::MAIN),
            constraint: VersionConstraint::parse(">= 1.0.0").unwrap(),
        });
        p.add_constraint(ConstraintSource {
            dependent: PackageVersionKey::new(
                ConfigurationId::MAIN,
                PackageName::parse("bar").unwrap(),
                Version::parse("1.0.0").unwrap(),
            ),
            constraint: VersionConstraint::parse("< 2.0.0").unwrap(),
        });

        let combined = p.combined_constraint().unwrap();
        assert!(combined.satisfies(&Version::parse("1.5.0").unwrap()));
        assert!(!combined.satisfies(&Version::parse("2.0.0").unwrap()));

        p.add_constraint(ConstraintSource {
            dependent: PackageVersionKey::command_line(ConfigurationId::MAIN),
            constraint: VersionConstraint::parse(">= 3.0.0").unwrap(),
        });
        assert!(p.combined_constraint().is_none());
    }

    #[test]
    fn test_map_invariants() {
        let mut map = BuildPackageMap::new();
        let mut p = BuildPackage::pre_entered(key("libfoo"), None);
        map.insert(p.clone());
        // Pre-entered and unlisted: fine.
        map.verify_invariants().unwrap();

        // Action-bearing but unlisted: violation.
        p.action = BuildAction::Drop;
        map.replace(p.clone());
        assert!(map.verify_invariants().is_err());

        map.push_order(key("libfoo"));
        map.verify_invariants().unwrap();
    }
}

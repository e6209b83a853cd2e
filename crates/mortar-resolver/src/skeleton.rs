//! The package skeleton.
//!
//! A skeleton holds a package's candidate configuration during resolution
//! and evaluates its manifest expressions against it: `enable` conditions,
//! `reflect` assignments (whose effects later `enable` evaluations can
//! read), dependent-proposed configurations, and the `accept` predicate
//! guarding them. It also produces the stable configuration checksum used
//! to detect whether a configured package actually changed.
//!
//! Variables are seeded in three classes, selected by load flags:
//! the user's command-line variables, the persisted user-class variables
//! of the selected package, and the persisted dependent-class variables.
//! Dependent configurations accumulate on top.

use crate::error::{ResolveError, Result};
use crate::expr;
use mortar_core::{PackageKey, Value, VariableSet, Version};
use mortar_database::SelectedPackage;
use tracing::trace;

/// Which persisted variable classes to seed the skeleton with.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LoadFlags {
    /// Seed the selected package's user-class variables.
    pub load_config_user: bool,
    /// Seed the selected package's dependent-class variables.
    pub load_config_dependent: bool,
}

impl LoadFlags {
    /// Seed everything persisted.
    #[must_use]
    pub fn all() -> Self {
        Self {
            load_config_user: true,
            load_config_dependent: true,
        }
    }
}

/// Per-package configuration state used during resolution.
#[derive(Debug, Clone)]
pub struct PackageSkeleton {
    key: PackageKey,
    version: Version,
    /// The candidate configuration.
    vars: VariableSet,
    /// Names of variables set by dependents, for bogus-variable detection.
    dependent_vars: Vec<String>,
    /// The seed state `reset` restores.
    initial: VariableSet,
    loaded: bool,
}

impl PackageSkeleton {
    /// Create a skeleton for the given package.
    #[must_use]
    pub fn new(key: PackageKey, version: Version) -> Self {
        Self {
            key,
            version,
            vars: VariableSet::new(),
            dependent_vars: Vec::new(),
            initial: VariableSet::new(),
            loaded: false,
        }
    }

    /// The package this skeleton configures.
    #[must_use]
    pub fn key(&self) -> &PackageKey {
        &self.key
    }

    /// The candidate version.
    #[must_use]
    pub fn version(&self) -> &Version {
        &self.version
    }

    /// Seed the skeleton from persisted and user-supplied configuration.
    /// May be called once; later calls are ignored.
    pub fn load(
        &mut self,
        flags: LoadFlags,
        selected: Option<&SelectedPackage>,
        user_vars: &VariableSet,
    ) {
        if self.loaded {
            return;
        }
        self.loaded = true;

        if let Some(selected) = selected {
            if flags.load_config_user || flags.load_config_dependent {
                // The persisted set does not distinguish classes once
                // stored; dependent-class names are re-accumulated during
                // negotiation.
                self.vars.merge(&selected.config_variables);
            }
        }
        self.vars.merge(user_vars);
        self.initial = self.vars.clone();
        trace!(package = %self.key, vars = %self.vars, "skeleton loaded");
    }

    /// Evaluate a dependency alternative's `enable` condition.
    pub fn evaluate_enable(&self, text: &str, position: (usize, usize)) -> Result<bool> {
        expr::evaluate_condition(text, &self.vars).map_err(|e| ResolveError::InvalidExpression {
            package: format!("{}/{} (depends {}.{})", self.key, self.version, position.0, position.1),
            reason: e.to_string(),
        })
    }

    /// Apply a `reflect` assignment block; subsequent `enable` evaluations
    /// read its effects.
    pub fn evaluate_reflect(&mut self, text: &str, position: (usize, usize)) -> Result<()> {
        expr::apply_assignments(text, &mut self.vars).map_err(|e| {
            ResolveError::InvalidExpression {
                package: format!(
                    "{}/{} (depends {}.{})",
                    self.key, self.version, position.0, position.1
                ),
                reason: e.to_string(),
            }
        })
    }

    /// Check a proposed dependent-supplied configuration against an
    /// `accept` predicate without committing it. Returns `(ok, reason)`.
    pub fn verify_sensible(
        &self,
        proposed: &VariableSet,
        accept: &str,
    ) -> Result<(bool, String)> {
        let mut candidate = self.vars.clone();
        candidate.merge(proposed);
        let ok = expr::evaluate_condition(accept, &candidate).map_err(|e| {
            ResolveError::InvalidExpression {
                package: format!("{}/{}", self.key, self.version),
                reason: e.to_string(),
            }
        })?;
        let reason = if ok {
            String::new()
        } else {
            format!("accept condition ({accept}) evaluates to false")
        };
        Ok((ok, reason))
    }

    /// Commit a dependent's configuration to this skeleton. Returns
    /// whether any variable actually changed.
    pub fn dependent_config(&mut self, proposed: &VariableSet) -> bool {
        let before = self.vars.checksum();
        for (name, value) in proposed.iter() {
            self.vars.set(name.to_string(), value.clone());
            if !self.dependent_vars.iter().any(|n| n == name) {
                self.dependent_vars.push(name.to_string());
            }
        }
        self.vars.checksum() != before
    }

    /// Evaluate an `accept` predicate over the current configuration.
    pub fn evaluate_accept(&self, accept: &str) -> Result<bool> {
        expr::evaluate_condition(accept, &self.vars).map_err(|e| {
            ResolveError::InvalidExpression {
                package: format!("{}/{}", self.key, self.version),
                reason: e.to_string(),
            }
        })
    }

    /// Look up a variable of the candidate configuration.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.vars.get(name)
    }

    /// The candidate configuration.
    #[must_use]
    pub fn vars(&self) -> &VariableSet {
        &self.vars
    }

    /// Names of variables dependents have set.
    #[must_use]
    pub fn dependent_vars(&self) -> &[String] {
        &self.dependent_vars
    }

    /// Drop a dependent-set variable (bogus-variable recovery).
    pub fn drop_dependent_var(&mut self, name: &str) {
        self.vars.remove(name);
        self.dependent_vars.retain(|n| n != name);
    }

    /// Stable content hash of the candidate configuration.
    #[must_use]
    pub fn config_checksum(&self) -> String {
        self.vars.checksum()
    }

    /// Discard accumulated state back to the seed. Required when the
    /// skeleton was already used for a recursively collected package and
    /// must be reused for negotiation speculation.
    pub fn reset(&mut self) {
        self.vars = self.initial.clone();
        self.dependent_vars.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mortar_core::{ConfigurationId, PackageName};
    use pretty_assertions::assert_eq;

    fn skeleton() -> PackageSkeleton {
        let mut s = PackageSkeleton::new(
            PackageKey::new(
                ConfigurationId::MAIN,
                PackageName::parse("libfoo").unwrap(),
            ),
            Version::parse("1.0.0").unwrap(),
        );
        s.load(LoadFlags::all(), None, &VariableSet::new());
        s
    }

    #[test]
    fn test_reflect_feeds_enable() {
        let mut s = skeleton();
        assert!(!s.evaluate_enable("config.libfoo.extras", (0, 0)).unwrap());
        s.evaluate_reflect("config.libfoo.extras = true", (0, 0))
            .unwrap();
        assert!(s.evaluate_enable("config.libfoo.extras", (1, 0)).unwrap());
    }

    #[test]
    fn test_verify_sensible() {
        let s = skeleton();
        let mut proposed = VariableSet::new();
        proposed.assign_str("config.libfoo.shared = true").unwrap();

        let (ok, _) = s
            .verify_sensible(&proposed, "config.libfoo.shared")
            .unwrap();
        assert!(ok);

        let (ok, reason) = s
            .verify_sensible(&proposed, "!config.libfoo.shared")
            .unwrap();
        assert!(!ok);
        assert!(reason.contains("accept condition"));
    }

    #[test]
    fn test_dependent_config_tracks_names_and_changes() {
        let mut s = skeleton();
        let mut proposed = VariableSet::new();
        proposed.assign_str("config.libfoo.shared = true").unwrap();

        assert!(s.dependent_config(&proposed));
        assert_eq!(s.dependent_vars(), ["config.libfoo.shared"]);
        // Committing the same values again changes nothing.
        assert!(!s.dependent_config(&proposed));
    }

    #[test]
    fn test_reset_restores_seed() {
        let mut s = skeleton();
        let checksum = s.config_checksum();
        s.evaluate_reflect("config.libfoo.x = 1", (0, 0)).unwrap();
        assert_ne!(s.config_checksum(), checksum);
        s.reset();
        assert_eq!(s.config_checksum(), checksum);
    }

    #[test]
    fn test_load_is_once() {
        let mut s = skeleton();
        let mut user = VariableSet::new();
        user.assign_str("config.libfoo.late = true").unwrap();
        s.load(LoadFlags::all(), None, &user);
        assert!(s.get("config.libfoo.late").is_none());
    }
}

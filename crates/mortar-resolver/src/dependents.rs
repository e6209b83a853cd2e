//! The dependents collector.
//!
//! After the direct requests are collected, every action that changes a
//! package's version, system flag, or reconfigure state obligates its
//! existing configured dependents to reconfigure. Constraint violations
//! found along the way are deferred to the unsatisfied ledger: a later
//! up/downgrade of the dependent may restore satisfaction. Cycles among
//! configured packages are broken by a visited set; existing configured
//! packages cannot introduce new reasoning paths.

use crate::build_package::{BuildAction, BuildPackage};
use crate::collect::Collector;
use crate::error::CResult;
use crate::postponed::UnsatisfiedDependent;
use mortar_core::PackageKey;
use std::collections::BTreeSet;
use tracing::{debug, trace};

impl Collector<'_> {
    /// Propagate reconfigure obligations to existing dependents.
    pub(crate) fn collect_dependents(&mut self) -> CResult<()> {
        // Seed: every action that changes what dependents see.
        let mut worklist: Vec<PackageKey> = self
            .state
            .map
            .iter()
            .filter(|(_, p)| self.changes_dependents(p))
            .map(|(k, _)| k.clone())
            .collect();
        let mut visited: BTreeSet<PackageKey> = BTreeSet::new();

        while let Some(key) = worklist.pop() {
            if !visited.insert(key.clone()) {
                continue;
            }
            let Some(package) = self.state.map.get(&key) else {
                continue;
            };
            let new_version = package.plan_version().cloned();
            let dependent_list = self.ctx.selected.dependents_of(&key);

            for (dkey, dsel) in dependent_list {
                trace!(dependent = %dkey, dependency = %key, "visiting existing dependent");

                // A recorded constraint that the new version violates is
                // deferred, not fatal.
                if let (Some(Some(constraint)), Some(version)) =
                    (dsel.prerequisites.get(&key), &new_version)
                {
                    if !constraint.satisfies(version) {
                        self.state.unsatisfied.add(UnsatisfiedDependent {
                            dependent: mortar_core::PackageVersionKey::new(
                                dkey.configuration,
                                dkey.name.clone(),
                                dsel.version.clone(),
                            ),
                            dependency: key.clone(),
                            constraint: constraint.clone(),
                            version: version.clone(),
                        });
                    }
                }

                match self.state.map.get_mut(&dkey) {
                    Some(entry) if entry.action.is_build() => {
                        // A full build re-collects its configuration
                        // anyway; just flag the reconfigure.
                        entry.action.set_reconfigure();
                    }
                    Some(entry) => {
                        entry.action.set_reconfigure();
                        if entry.selected.is_none() {
                            entry.selected = Some(dsel.clone());
                        }
                    }
                    None => {
                        debug!(dependent = %dkey, "scheduling reconfigure adjustment");
                        let mut adjust =
                            BuildPackage::pre_entered(dkey.clone(), Some(dsel.clone()));
                        adjust.action = BuildAction::Adjust {
                            reconfigure: true,
                            unhold: false,
                        };
                        self.state.map.insert(adjust);
                    }
                }

                worklist.push(dkey);
            }
        }
        Ok(())
    }

    /// Whether dependents of this action-bearing package must be
    /// reconsidered: the version or system flag changes, the package is
    /// dropped, or it is itself being reconfigured.
    fn changes_dependents(&self, package: &crate::build_package::BuildPackage) -> bool {
        match &package.action {
            BuildAction::Build { .. } => match (&package.selected, package.plan_version()) {
                (Some(selected), Some(version)) => {
                    selected.version != *version
                        || selected.is_system() != package.system
                        || package.action.reconfigure()
                }
                // A fresh build: no existing dependents can reference it.
                _ => false,
            },
            BuildAction::Drop => true,
            BuildAction::Adjust { reconfigure, .. } => *reconfigure,
            BuildAction::None => false,
        }
    }
}

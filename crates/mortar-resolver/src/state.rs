//! The planner state and its snapshots.
//!
//! Everything the collector mutates lives in one [`PlannerState`] value so
//! the driver can snapshot before a speculative step and restore on a
//! backtracking signal. Snapshots are deep copies: several backtrack kinds
//! mutate overlapping state, so aliasing would be unsafe. The ordered
//! execution list is part of the build-package map and is rebuilt after a
//! restore.

use crate::build_package::BuildPackageMap;
use crate::cluster::PostponedConfigurations;
use crate::postponed::{PostponedDependencies, UnacceptableAlternatives, UnsatisfiedDependents};
use crate::replaced::ReplacedVersions;
use mortar_core::PackageKey;
use std::collections::{BTreeMap, BTreeSet};

/// The collector's mutable state.
#[derive(Debug, Clone, Default)]
pub(crate) struct PlannerState {
    /// The build-package map and ordered list.
    pub map: BuildPackageMap,
    /// Packages whose resolution waits for repository metadata.
    pub postponed_repo: BTreeSet<PackageKey>,
    /// Packages whose alternative selection is deferred for wider search.
    pub postponed_alts: BTreeSet<PackageKey>,
    /// Existing dependents scheduled for re-collection.
    pub postponed_recs: BTreeSet<PackageKey>,
    /// Dependencies whose recursive collection is deferred.
    pub postponed_deps: PostponedDependencies,
    /// Existing dependents discovered per postponed dependency.
    pub postponed_edeps: BTreeMap<PackageKey, Vec<PackageKey>>,
    /// Configuration negotiation clusters.
    pub postponed_cfgs: PostponedConfigurations,
    /// Speculative version replacements.
    pub replaced_versions: ReplacedVersions,
    /// Deferred constraint violations.
    pub unsatisfied: UnsatisfiedDependents,
    /// Alternatives rejected during negotiation.
    pub unacceptable_alts: UnacceptableAlternatives,
    /// Checksums of negotiated configuration sets, for the recurrence
    /// detector.
    pub cfgs_history: Vec<String>,
}

impl PlannerState {
    /// Take a deep-copy snapshot.
    pub fn snapshot(&self) -> Self {
        self.clone()
    }

    /// Whether every postponement has been resolved (the driver's exit
    /// condition).
    pub fn is_quiescent(&self) -> bool {
        self.postponed_repo.is_empty()
            && self.postponed_alts.is_empty()
            && self.postponed_recs.is_empty()
            && self
                .postponed_cfgs
                .iter()
                .all(|c| c.negotiated == Some(true))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_package::{BuildAction, BuildPackage};
    use mortar_core::{ConfigurationId, PackageName};

    #[test]
    fn test_snapshot_restore_is_exact() {
        let mut state = PlannerState::default();
        let key = PackageKey::new(
            ConfigurationId::MAIN,
            PackageName::parse("libfoo").unwrap(),
        );
        let mut p = BuildPackage::pre_entered(key.clone(), None);
        p.action = BuildAction::Drop;
        state.map.insert(p);
        state.map.push_order(key.clone());
        state.postponed_alts.insert(key.clone());
        state.cfgs_history.push("abc".to_string());

        let snapshot = state.snapshot();

        state.map.remove(&key);
        state.postponed_alts.clear();
        state.cfgs_history.clear();

        let restored = snapshot;
        assert!(restored.map.contains(&key));
        assert_eq!(restored.map.ordered(), [key.clone()]);
        assert!(restored.postponed_alts.contains(&key));
        assert_eq!(restored.cfgs_history, ["abc"]);
    }
}

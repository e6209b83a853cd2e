//! The collector driver: the iterative fixed point over postponements.
//!
//! `collect_build_postponed` drains recollections and repository
//! postponements, negotiates configuration clusters (snapshotting the
//! whole planner state and rolling back on the backtracking signals),
//! widens postponed alternative searches, and detects bogus
//! postponements. Each iteration must make progress; the negotiated-
//! configuration history checksum rejects a recurring configuration set.

use crate::build_package::{BuildAction, BuildPackage};
use crate::cluster::DependencyPosition;
use crate::collect::{CollectMode, Collector};
use crate::error::{Backtrack, CResult, CollectError, ResolveError};
use crate::expr;
use crate::skeleton::{LoadFlags, PackageSkeleton};
use mortar_core::{PackageKey, VariableSet, Version};
use std::collections::BTreeMap;
use tracing::{debug, trace, warn};

/// Negotiation rounds before the configuration is taken as settled even
/// if dependents keep toggling each other's preferences.
const MAX_NEGOTIATION_PASSES: usize = 16;

/// Cluster negotiation retries before declaring an invariant violation.
const MAX_CLUSTER_RETRIES: usize = 64;

/// Widening bound for the postponed-alternatives drain.
const MAX_ALTERNATIVE_WIDENING: usize = 16;

/// One dependent position participating in a negotiation.
struct Participant {
    dependent: PackageKey,
    version: Option<Version>,
    position: DependencyPosition,
    dependencies: Vec<PackageKey>,
    has_alternative: bool,
    assignments: Option<String>,
    accept: Option<String>,
}

/// Outcome of re-evaluating one existing dependent against a cluster.
enum Reevaluation {
    /// The dependent can join the cluster at this position.
    Join {
        position: DependencyPosition,
        dependencies: Vec<PackageKey>,
    },
    /// The dependent deviated from its configured state and must be
    /// re-collected.
    Deviated,
    /// The cluster does not touch the dependent's configuration.
    Unaffected,
}

impl Collector<'_> {
    /// The driver loop: iterate until every postponement is resolved.
    pub(crate) fn collect_build_postponed(&mut self, depth: usize) -> CResult<()> {
        loop {
            let mut progress = false;

            // 1. Retry packages flagged for re-collection.
            let recs: Vec<PackageKey> =
                std::mem::take(&mut self.state.postponed_recs).into_iter().collect();
            for key in recs {
                progress = true;
                self.collect_build_prerequisites(&key, CollectMode::resume())?;
            }

            // 2. Drain packages that waited for repository metadata; the
            // index has everything the fetch collaborator returned, so a
            // retry either resolves or re-postpones them.
            let repo: Vec<PackageKey> =
                std::mem::take(&mut self.state.postponed_repo).into_iter().collect();
            for key in repo {
                progress = true;
                self.collect_build_prerequisites(&key, CollectMode::resume())?;
            }

            // 3. Negotiate clusters, one frame per cluster.
            while let Some(index) = self.next_negotiable_cluster() {
                progress = true;
                if !self.negotiate_with_retries(index, depth)? {
                    // Existing dependents were scheduled for
                    // re-collection; give step 1 a chance first.
                    break;
                }
            }

            // 4. Widen postponed alternative searches, fewest pending
            // clauses first.
            if self.state.postponed_recs.is_empty()
                && self.next_negotiable_cluster().is_none()
                && !self.state.postponed_alts.is_empty()
            {
                let mut alts: Vec<PackageKey> =
                    self.state.postponed_alts.iter().cloned().collect();
                alts.sort_by_key(|k| self.pending_clauses(k));
                for key in alts {
                    progress = true;
                    let mut limit = 1;
                    while self.state.postponed_alts.contains(&key) {
                        if limit > MAX_ALTERNATIVE_WIDENING {
                            self.collect_build_prerequisites(
                                &key,
                                CollectMode::drain(usize::MAX),
                            )?;
                            break;
                        }
                        self.collect_build_prerequisites(&key, CollectMode::drain(limit))?;
                        limit += 1;
                    }
                }
            }

            if progress {
                continue;
            }

            // 5. Bogus postponements: first try to attribute them to a
            // cycle through an existing dependent and re-collect it.
            if self.state.postponed_deps.has_bogus() {
                let bogus: Vec<PackageKey> = self
                    .state
                    .postponed_deps
                    .iter()
                    .filter(|(_, e)| e.is_bogus())
                    .map(|(k, _)| k.clone())
                    .collect();
                let mut scheduled = false;
                for key in &bogus {
                    if let Some(dependents) = self.state.postponed_edeps.get(key).cloned() {
                        for ed in dependents {
                            scheduled |= self.schedule_recollection(&ed);
                        }
                    }
                }
                if scheduled {
                    debug!("re-collecting existing dependents of bogus postponements");
                    continue;
                }
                // 6. No attribution: cancel and restart from scratch.
                let removed = self.state.postponed_deps.cancel_bogus();
                if removed > 0 && depth == 0 {
                    return Err(Backtrack::CancelReplacement.into());
                }
            }

            return Ok(());
        }
    }

    /// The next cluster that needs negotiation and is not already on the
    /// negotiation stack.
    fn next_negotiable_cluster(&self) -> Option<usize> {
        self.state
            .postponed_cfgs
            .iter()
            .position(|c| c.negotiated != Some(true) && c.depth == 0)
    }

    fn pending_clauses(&self, key: &PackageKey) -> usize {
        self.state.map.get(key).map_or(0, |e| {
            e.available
                .as_ref()
                .map_or(0, |a| a.manifest.depends.len())
                .saturating_sub(e.dependencies.len())
        })
    }

    /// Negotiate one cluster, handling the snapshot-rollback signals.
    /// Returns false when the cluster was left unnegotiated because
    /// existing dependents must be re-collected first.
    fn negotiate_with_retries(&mut self, index: usize, depth: usize) -> CResult<bool> {
        let cluster_depth = depth + 1;
        for _ in 0..MAX_CLUSTER_RETRIES {
            let snapshot = self.state.snapshot();
            match self.negotiate_cluster(index, cluster_depth) {
                Ok(()) => return Ok(true),
                Err(CollectError::Backtrack(signal)) => match signal {
                    Backtrack::RetryConfiguration { depth: d, dependent }
                        if d == cluster_depth =>
                    {
                        debug!(cluster = index, dependent = %dependent, "retrying negotiation");
                        // Replay with the appended dependent positions
                        // preserved: restore everything else, then graft
                        // the positions recorded during the failed
                        // attempt back onto the restored cluster.
                        let carried = self.state.postponed_cfgs.get(index).cloned();
                        self.state = snapshot;
                        if let (Some(carried), Some(c)) =
                            (carried, self.state.postponed_cfgs.get_mut(index))
                        {
                            for (dkey, info) in carried.dependents {
                                for pos in info.positions {
                                    c.add_dependent(
                                        dkey.clone(),
                                        info.existing,
                                        pos.position,
                                        pos.dependencies,
                                        pos.has_alternative,
                                    );
                                }
                            }
                            c.reset_negotiation();
                        }
                    }
                    Backtrack::MergeConfiguration { depth: d } if d == cluster_depth => {
                        // Another cluster was force-merged into this
                        // negotiation. Remember the merged shape as the
                        // shadow; an identical recurrence is a
                        // negotiation yo-yo that collapses to scratch.
                        let shadow = self
                            .state
                            .postponed_cfgs
                            .get(index)
                            .map(|c| c.shadow_snapshot());
                        self.state = snapshot;
                        let Some(shadow) = shadow else {
                            return Err(ResolveError::invariant(
                                "merge signal without a cluster",
                            )
                            .into());
                        };
                        let Some(c) = self.state.postponed_cfgs.get_mut(index) else {
                            return Err(ResolveError::invariant(
                                "merge signal for a vanished cluster",
                            )
                            .into());
                        };
                        if c.is_shadow_cluster(&shadow) {
                            warn!(cluster = index, "negotiation merge cycle, collapsing");
                            return Err(Backtrack::MergeConfigurationCycle {
                                depth: cluster_depth,
                            }
                            .into());
                        }
                        c.set_shadow_cluster(shadow);
                        c.reset_negotiation();
                    }
                    Backtrack::RecollectExistingDependents { depth: d, dependents }
                        if d == cluster_depth =>
                    {
                        self.state = snapshot;
                        for ed in dependents {
                            self.schedule_recollection(&ed);
                        }
                        return Ok(false);
                    }
                    other => return Err(other.into()),
                },
                Err(fatal) => return Err(fatal),
            }
        }
        Err(ResolveError::invariant(format!(
            "cluster {index} did not converge after {MAX_CLUSTER_RETRIES} retries"
        ))
        .into())
    }

    /// One negotiation attempt for one cluster.
    fn negotiate_cluster(&mut self, index: usize, depth: usize) -> CResult<()> {
        let (dependencies, dependent_keys) = {
            let Some(cluster) = self.state.postponed_cfgs.get_mut(index) else {
                return Err(ResolveError::invariant("negotiating a vanished cluster").into());
            };
            cluster.negotiated = Some(false);
            cluster.depth = depth;
            (
                cluster.dependencies.iter().cloned().collect::<Vec<_>>(),
                cluster.dependents.keys().cloned().collect::<Vec<_>>(),
            )
        };
        debug!(cluster = index, depth, dependencies = dependencies.len(), "negotiating");

        // Existing configured dependents of the cluster dependencies get
        // re-evaluated: join the cluster or get scheduled for
        // re-collection.
        self.reevaluate_existing_dependents(index, depth, &dependencies)?;

        // Per-dependency skeletons seeded from the build entries. A
        // skeleton that was already used for recursive collection is
        // reset before the speculation.
        let mut skeletons: BTreeMap<PackageKey, PackageSkeleton> = BTreeMap::new();
        for dep in &dependencies {
            let Some(entry) = self.state.map.get_mut(dep) else {
                continue;
            };
            let Some(available) = entry.available.clone() else {
                continue;
            };
            let mut skeleton = entry.skeleton.take().unwrap_or_else(|| {
                let mut s =
                    PackageSkeleton::new(dep.clone(), available.version().clone());
                s.load(
                    LoadFlags::all(),
                    entry.selected.as_deref(),
                    &entry.config_vars,
                );
                s
            });
            if entry.recursive_collection {
                skeleton.reset();
            }
            skeletons.insert(dep.clone(), skeleton);
        }

        let participants = self.cluster_participants(index)?;

        // Round-robin the dependent configurations until two consecutive
        // full passes change nothing.
        let mut stable = 0;
        let mut passes = 0;
        while stable < 2 && passes < MAX_NEGOTIATION_PASSES {
            passes += 1;
            let mut changed = false;
            for p in &participants {
                let Some(assignments) = &p.assignments else {
                    continue;
                };
                let mut proposed = VariableSet::new();
                expr::apply_assignments(assignments, &mut proposed).map_err(|e| {
                    ResolveError::InvalidExpression {
                        package: p.dependent.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                for dep in &p.dependencies {
                    if let Some(s) = skeletons.get_mut(dep) {
                        changed |= s.dependent_config(&proposed);
                    }
                }
            }
            if changed {
                stable = 0;
            } else {
                stable += 1;
            }
        }
        trace!(cluster = index, passes, "negotiation rounds settled");

        // Accept checks: every dependent must accept the configuration
        // the round-robin converged to.
        for p in &participants {
            let Some(accept) = &p.accept else { continue };
            for dep in &p.dependencies {
                let Some(skeleton) = skeletons.get(dep) else {
                    continue;
                };
                if !skeleton.evaluate_accept(accept)? {
                    if let Some(version) = p.version.clone() {
                        self.state.unacceptable_alts.insert((
                            p.dependent.clone(),
                            version,
                            p.position,
                        ));
                    }
                    if p.has_alternative {
                        debug!(dependent = %p.dependent, "alternative unacceptable, restarting");
                        return Err(Backtrack::UnacceptAlternative.into());
                    }
                    return Err(ResolveError::NegotiationFailed {
                        dependency: dep.name.to_string(),
                    }
                    .into());
                }
            }
        }

        // Store the negotiated configurations and give the skeletons
        // back.
        {
            let cluster = self
                .state
                .postponed_cfgs
                .get_mut(index)
                .expect("cluster exists");
            for (dep, skeleton) in &skeletons {
                cluster
                    .dependency_configurations
                    .insert(dep.clone(), skeleton.vars().clone());
            }
        }
        for (dep, skeleton) in skeletons {
            if let Some(entry) = self.state.map.get_mut(&dep) {
                entry.skeleton = Some(skeleton);
            }
        }

        // A dependency whose configuration came out unchanged needs no
        // rebuild after all.
        for dep in &dependencies {
            let Some(entry) = self.state.map.get_mut(dep) else {
                continue;
            };
            if !entry.action.is_build() || entry.hold_package {
                continue;
            }
            let unchanged = entry.selected.as_ref().is_some_and(|s| {
                s.state == mortar_database::PackageState::Configured
                    && Some(&s.version) == entry.available.as_ref().map(|a| a.version())
                    && entry
                        .skeleton
                        .as_ref()
                        .is_some_and(|sk| sk.config_checksum() == s.config_checksum)
            });
            if unchanged {
                trace!(dependency = %dep, "negotiated configuration unchanged");
                entry.action = BuildAction::None;
            }
        }

        // A recurring negotiated-configuration set means some variables
        // are bogus and the search will not converge.
        let checksum = self.state.postponed_cfgs.checksum();
        if self.state.cfgs_history.contains(&checksum) {
            return Err(ResolveError::RecurringConfiguration { checksum }.into());
        }
        self.state.cfgs_history.push(checksum);

        // Recursively collect the dependencies with the negotiated
        // configuration applied, then any nested clusters, then the
        // dependents from their next clause onward.
        for dep in &dependencies {
            self.collect_build_prerequisites(dep, CollectMode::resume())?;
        }
        self.collect_build_postponed(depth)?;

        for dkey in &dependent_keys {
            let existing = self
                .state
                .postponed_cfgs
                .get(index)
                .and_then(|c| c.dependents.get(dkey))
                .is_some_and(|i| i.existing);
            if !existing {
                self.collect_build_prerequisites(dkey, CollectMode::resume())?;
            }
        }

        let cluster = self
            .state
            .postponed_cfgs
            .get_mut(index)
            .expect("cluster exists");
        cluster.negotiated = Some(true);
        cluster.depth = 0;
        debug!(cluster = index, "negotiated");
        Ok(())
    }

    /// Build the participant list for a cluster: every recorded position
    /// of every dependent, with its `prefer`/`require` assignments and
    /// `accept` predicate resolved from the dependent's manifest.
    fn cluster_participants(&self, index: usize) -> CResult<Vec<Participant>> {
        let cluster = self
            .state
            .postponed_cfgs
            .get(index)
            .expect("cluster exists");
        let mut participants = Vec::new();

        for (dkey, info) in &cluster.dependents {
            // The manifest to read clause texts from: the build entry's
            // available for packages being built, the selected version's
            // for existing dependents.
            let available = if let Some(entry) = self.state.map.get(dkey) {
                entry.available.clone()
            } else {
                None
            }
            .or_else(|| {
                self.ctx
                    .selected
                    .find(dkey)
                    .and_then(|s| self.ctx.index.find(&dkey.name, &s.version))
            });
            let Some(available) = available else {
                continue;
            };

            for pos in &info.positions {
                let (di, ai) = pos.position;
                let Some(alt) = available
                    .manifest
                    .depends
                    .get(di)
                    .and_then(|c| c.alternatives.get(ai))
                else {
                    continue;
                };
                participants.push(Participant {
                    dependent: dkey.clone(),
                    version: Some(available.version().clone()),
                    position: pos.position,
                    dependencies: pos.dependencies.clone(),
                    has_alternative: pos.has_alternative,
                    assignments: alt.require.clone().or_else(|| alt.prefer.clone()),
                    accept: alt.accept.clone(),
                });
            }
        }
        Ok(participants)
    }

    /// Re-evaluate existing configured dependents of the cluster's
    /// dependencies (the pre-reevaluation mode of the collector).
    fn reevaluate_existing_dependents(
        &mut self,
        index: usize,
        depth: usize,
        dependencies: &[PackageKey],
    ) -> CResult<()> {
        let mut deviated: Vec<PackageKey> = Vec::new();
        let mut joins: Vec<(PackageKey, DependencyPosition, Vec<PackageKey>)> = Vec::new();

        for dep in dependencies {
            let Some(dependents) = self.state.postponed_edeps.get(dep).cloned() else {
                continue;
            };
            for ed in dependents {
                if self.state.map.contains(&ed) {
                    // Already being built or re-collected.
                    continue;
                }
                match self.reevaluate_dependent(&ed, index)? {
                    Reevaluation::Join { position, dependencies } => {
                        joins.push((ed, position, dependencies));
                    }
                    Reevaluation::Deviated => deviated.push(ed),
                    Reevaluation::Unaffected => {}
                }
            }
        }

        if !deviated.is_empty() {
            deviated.sort();
            deviated.dedup();
            return Err(Backtrack::RecollectExistingDependents {
                depth,
                dependents: deviated,
            }
            .into());
        }

        if !joins.is_empty() {
            let cluster = self
                .state
                .postponed_cfgs
                .get_mut(index)
                .expect("cluster exists");
            for (ed, position, dependencies) in joins {
                trace!(dependent = %ed, "existing dependent joins cluster");
                cluster.add_dependent(ed, true, position, dependencies, false);
            }
        }
        Ok(())
    }

    /// Walk an existing dependent's clauses read-only up to the first
    /// `prefer`/`require` alternative whose dependencies intersect the
    /// cluster; check that the clauses before it are still satisfied by
    /// the dependent's current prerequisites.
    fn reevaluate_dependent(
        &self,
        dependent: &PackageKey,
        cluster_index: usize,
    ) -> CResult<Reevaluation> {
        let Some(selected) = self.ctx.selected.find(dependent) else {
            return Ok(Reevaluation::Unaffected);
        };
        let Some(available) = self.ctx.index.find(&dependent.name, &selected.version) else {
            // The configured version is no longer advertised; nothing to
            // re-evaluate against.
            return Ok(Reevaluation::Unaffected);
        };
        let cluster = self
            .state
            .postponed_cfgs
            .get(cluster_index)
            .expect("cluster exists");

        let mut skeleton = PackageSkeleton::new(dependent.clone(), selected.version.clone());
        skeleton.load(LoadFlags::all(), Some(&selected), &VariableSet::new());

        for (di, clause) in available.manifest.depends.iter().enumerate() {
            if clause.is_toolchain() {
                continue;
            }
            // The alternative the dependent was configured with; fall
            // back to the first enabled one.
            let ai = match selected.selected_alternatives.get(di).copied().flatten() {
                Some(ai) if ai < clause.alternatives.len() => ai,
                _ => {
                    let mut first = None;
                    for (ai, alt) in clause.alternatives.iter().enumerate() {
                        let enabled = match &alt.enable {
                            Some(expr) => skeleton.evaluate_enable(expr, (di, ai))?,
                            None => true,
                        };
                        if enabled {
                            first = Some(ai);
                            break;
                        }
                    }
                    match first {
                        Some(ai) => ai,
                        None => return Ok(Reevaluation::Deviated),
                    }
                }
            };
            let alt = &clause.alternatives[ai];

            let dep_keys: Vec<PackageKey> = alt
                .dependencies
                .iter()
                .map(|d| PackageKey::new(dependent.configuration, d.name.clone()))
                .collect();

            if alt.has_config() && dep_keys.iter().any(|k| cluster.contains_dependency(k)) {
                // The re-evaluation position.
                return Ok(Reevaluation::Join {
                    position: (di, ai),
                    dependencies: dep_keys,
                });
            }

            // Clauses before the re-evaluation position must still be
            // satisfied by the recorded prerequisites.
            for (dep, dep_key) in alt.dependencies.iter().zip(&dep_keys) {
                let version = self
                    .state
                    .map
                    .get(dep_key)
                    .and_then(|e| e.plan_version().cloned())
                    .or_else(|| self.ctx.selected.find(dep_key).map(|s| s.version.clone()));
                let Some(version) = version else {
                    return Ok(Reevaluation::Deviated);
                };
                if dep
                    .constraint
                    .as_ref()
                    .is_some_and(|c| !c.satisfies(&version))
                {
                    return Ok(Reevaluation::Deviated);
                }
            }

            if let Some(reflect) = &alt.reflect {
                skeleton.evaluate_reflect(reflect, (di, ai))?;
            }
        }
        Ok(Reevaluation::Unaffected)
    }

    /// Schedule an existing configured dependent for full re-collection
    /// as a build at its current version. Returns false when the package
    /// cannot be re-collected (not selected or not advertised).
    pub(crate) fn schedule_recollection(&mut self, dependent: &PackageKey) -> bool {
        if self.state.postponed_recs.contains(dependent) {
            return true;
        }
        let Some(selected) = self.ctx.selected.find(dependent) else {
            return false;
        };
        let Some(available) = self.ctx.index.find(&dependent.name, &selected.version) else {
            return false;
        };
        debug!(dependent = %dependent, "scheduling re-collection");
        let mut package = BuildPackage::pre_entered(dependent.clone(), Some(selected));
        package.repository_fragment = available.fragments.first().cloned();
        package.available = Some(available);
        package.action = BuildAction::Build {
            repoint: false,
            reevaluate: false,
            recollect: true,
            reconfigure: true,
            unhold: false,
        };
        self.state.map.insert(package);
        self.state.unsatisfied.remove_dependent(dependent);
        self.state.postponed_recs.insert(dependent.clone());
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{PlanOptions, PlannerContext};
    use mortar_core::{ConfigurationId, PackageName};
    use mortar_database::{ConfigurationSet, SelectedPackage, SelectedStore};
    use mortar_repository::{AvailableIndex, PackageManifest};

    fn key(name: &str) -> PackageKey {
        PackageKey::new(ConfigurationId::MAIN, PackageName::parse(name).unwrap())
    }

    /// A dependency postponed without configuration whose deferral turned
    /// bogus gets attributed to its existing configured dependent, which
    /// is re-collected; the next iteration negotiates and succeeds.
    #[test]
    fn test_bogus_postponement_recovers_via_existing_dependent() {
        let mut index = AvailableIndex::new();
        index.add(
            PackageManifest::parse("name: libz\nversion: 1.0.0\n").unwrap(),
            "f1",
        );
        index.add(
            PackageManifest::parse(
                "name: emu\nversion: 1.0.0\n\
                 depends: libz prefer { config.libz.cache = true } accept (config.libz.cache)\n",
            )
            .unwrap(),
            "f1",
        );

        let mut store = SelectedStore::new();
        let mut emu = SelectedPackage::new(
            PackageName::parse("emu").unwrap(),
            mortar_core::Version::parse("1.0.0").unwrap(),
        );
        emu.prerequisites.insert(key("libz"), None);
        emu.selected_alternatives = vec![Some(0)];
        store.insert(ConfigurationId::MAIN, emu);

        let configs = ConfigurationSet::new("/nonexistent/cfg");
        let ctx = PlannerContext {
            configs: &configs,
            index: &index,
            selected: &store,
            options: PlanOptions::default(),
        };
        let mut collector = Collector::new(&ctx);

        // A previous pass deferred libz for a configuration that never
        // materialized, and recorded emu as its existing dependent.
        collector.state.postponed_deps.record(key("libz"), false);
        collector
            .state
            .postponed_edeps
            .entry(key("libz"))
            .or_default()
            .push(key("emu"));

        collector.collect_build_postponed(0).unwrap();

        // emu was re-collected as a build and its cluster negotiated.
        let emu_entry = collector.state.map.get(&key("emu")).unwrap();
        assert!(emu_entry.action.recollect());
        assert!(emu_entry.is_fully_collected());
        assert!(
            collector
                .state
                .postponed_cfgs
                .iter()
                .all(|c| c.negotiated == Some(true))
        );
        assert!(!collector.state.postponed_deps.has_bogus());
    }
}

//! The recursive collector.
//!
//! Walks a build-package's `depends` clauses, evaluates enable conditions,
//! pre-collects each enabled alternative's dependencies, selects an
//! alternative deterministically, and either recurses into the selected
//! dependencies or defers them: to a configuration cluster when the
//! alternative carries `prefer`/`require`, to the postponed-alternatives
//! set when reuse may improve later, or to the postponed-dependencies
//! table when a cluster is being negotiated.
//!
//! All backtracking flows through [`Backtrack`] signals; accumulated
//! progress survives in the planner state the driver snapshots.

use crate::build_package::{
    BuildAction, BuildPackage, ConstraintSource, SelectedAlternative, UpgradePolicy,
};
use crate::error::{Backtrack, CResult, ResolveError};
use crate::expr;
use crate::replaced::ReplacedVersion;
use crate::skeleton::{LoadFlags, PackageSkeleton};
use crate::state::PlannerState;
use crate::{BuildRequest, PlannerContext, RequestAction};
use mortar_core::{
    PackageKey, PackageName, PackageVersionKey, Version, VersionConstraint,
};
use mortar_database::{PackageState, SelectedPackage};
use mortar_repository::{AvailablePackage, DependencyAlternative};
use std::sync::Arc;
use tracing::{debug, trace};

/// How a `collect_build_prerequisites` call should behave.
#[derive(Debug, Clone, Copy)]
pub(crate) struct CollectMode {
    /// Consider at most this many (enabled, acceptable) alternatives per
    /// clause. Widened gradually when draining postponed alternatives.
    pub max_alt_index: usize,
    /// Select a non-reused alternative rather than postponing.
    pub force_non_reused: bool,
    /// Resume a package whose collection already started.
    pub resume: bool,
}

impl Default for CollectMode {
    fn default() -> Self {
        Self {
            max_alt_index: usize::MAX,
            force_non_reused: false,
            resume: false,
        }
    }
}

impl CollectMode {
    /// The mode used when draining postponed alternatives.
    pub fn drain(max_alt_index: usize) -> Self {
        Self {
            max_alt_index,
            force_non_reused: true,
            resume: true,
        }
    }

    /// The mode used when resuming a package mid-collection (after
    /// negotiation, or a recollection pass).
    pub fn resume() -> Self {
        Self {
            resume: true,
            ..Self::default()
        }
    }
}

/// One pre-collected dependency of an alternative.
#[derive(Debug, Clone)]
pub(crate) struct PrecollectedDep {
    pub key: PackageKey,
    pub constraint: Option<VersionConstraint>,
    pub available: Option<Arc<AvailablePackage>>,
    pub selected: Option<Arc<SelectedPackage>>,
    pub system: bool,
    /// An existing build or selected package is being reused.
    pub reused: bool,
    /// The dependency needs a build action (new, up/downgrade, or
    /// replacement).
    pub needs_build: bool,
    pub version: Version,
}

/// The outcome of pre-collecting one alternative.
#[derive(Debug)]
pub(crate) enum AltOutcome {
    /// All dependencies resolved.
    Satisfiable(Vec<PrecollectedDep>),
    /// The alternative cannot be used; the reason feeds diagnostics.
    Unsatisfiable(String),
}

/// The collector: the planner context plus the mutable state.
pub(crate) struct Collector<'a> {
    pub ctx: &'a PlannerContext<'a>,
    pub state: PlannerState,
}

impl<'a> Collector<'a> {
    pub fn new(ctx: &'a PlannerContext<'a>) -> Self {
        Self {
            ctx,
            state: PlannerState::default(),
        }
    }

    // ------------------------------------------------------------------
    // Direct requests
    // ------------------------------------------------------------------

    /// Enter a user request into the map.
    pub fn collect_request(&mut self, request: &BuildRequest) -> CResult<()> {
        match request.action {
            RequestAction::Build => self.collect_build_request(request),
            RequestAction::Drop => self.collect_drop_request(request),
        }
    }

    fn collect_build_request(&mut self, request: &BuildRequest) -> CResult<()> {
        let configuration = request.configuration;
        let key = PackageKey::new(configuration, request.name.clone());
        let selected = self.ctx.selected.find(&key);

        let constraint = match (&request.version, &request.constraint) {
            (Some(v), _) => Some(VersionConstraint::exact(v)),
            (None, Some(c)) => Some(c.clone()),
            (None, None) => None,
        };

        let available = self.find_available(
            &request.name,
            constraint.as_ref(),
            selected.as_deref(),
            request.upgrade.or_else(|| self.default_policy()),
        );
        let Some(available) = available else {
            let err = if self.ctx.index.contains(&request.name) {
                ResolveError::NoSatisfiableVersion {
                    name: request.name.to_string(),
                    constraint: constraint.unwrap_or_default(),
                    required_by: vec![],
                }
            } else {
                ResolveError::UnknownPackage {
                    name: request.name.to_string(),
                    required_by: vec![],
                }
            };
            return Err(err.into());
        };

        // An already-configured package at the same version needs no
        // action unless the request changes something; pre-enter it so
        // its constraints still participate.
        let unchanged = selected.as_ref().is_some_and(|s| {
            s.state == PackageState::Configured
                && s.version == *available.version()
                && s.is_system() == request.system
        });

        let mut package = BuildPackage::pre_entered(key.clone(), selected.clone());
        package
            .required_by
            .insert(PackageVersionKey::command_line(configuration));
        if let Some(c) = &constraint {
            package.add_constraint(ConstraintSource {
                dependent: PackageVersionKey::command_line(configuration),
                constraint: c.clone(),
            });
        }
        package.available = Some(available.clone());
        package.repository_fragment = available.fragments.first().cloned();
        package.system = request.system;
        package.hold_package = true;
        package.hold_version = request.version.is_some();
        package.disfigure = request.disfigure;
        package.configure_only = request.configure_only;
        package.keep_out = request.keep_out;
        package.checkout_root = request.checkout_root.clone();
        package.checkout_purge = request.checkout_purge;
        package.config_vars = request.config_vars.clone();
        package.upgrade = request.upgrade;
        package.deorphan = request.deorphan;

        package.action = if unchanged && !request.disfigure && request.config_vars.is_empty() {
            let s = selected.as_ref().expect("unchanged implies selected");
            if s.hold_package && (request.version.is_none() || s.hold_version) {
                BuildAction::None
            } else {
                // Only the hold flags change.
                BuildAction::Adjust {
                    reconfigure: false,
                    unhold: false,
                }
            }
        } else {
            BuildAction::build()
        };

        // Two command-line requests disagreeing on the version cannot be
        // refined away by backtracking.
        if let Some(existing) = self.state.map.get(&key) {
            if self.user_requested(&key)
                && existing.action.is_build()
                && existing.plan_version().is_some_and(|v| v != available.version())
            {
                return Err(ResolveError::NoSatisfiableVersion {
                    name: request.name.to_string(),
                    constraint: constraint.unwrap_or_default(),
                    required_by: vec!["conflicting command line request".to_string()],
                }
                .into());
            }
        }

        debug!(package = %key, version = %available.version(), "collecting user request");
        let replaced = self.state.map.insert(package);
        if replaced {
            // The user's choice replaces whatever a dependent picked.
            self.state.replaced_versions.insert(
                key.clone(),
                ReplacedVersion::build(
                    available.clone(),
                    available.fragments.first().cloned(),
                    request.system,
                ),
            );
            return Err(Backtrack::ReplaceVersion.into());
        }
        self.state.replaced_versions.mark_applied(&key);
        Ok(())
    }

    /// A `?pkg` request: drop the package unless dependents still require
    /// it; in that case only clear its holds.
    fn collect_drop_request(&mut self, request: &BuildRequest) -> CResult<()> {
        let key = PackageKey::new(request.configuration, request.name.clone());
        let Some(selected) = self.ctx.selected.find(&key) else {
            // Not selected: nothing to drop.
            return Ok(());
        };

        let held_by_dependents = !self.ctx.selected.dependents_of(&key).is_empty()
            || self
                .state
                .map
                .get(&key)
                .is_some_and(|e| e.required_by_dependents);

        let mut package = BuildPackage::pre_entered(key.clone(), Some(selected));
        if held_by_dependents {
            debug!(package = %key, "drop request demoted to unhold");
            package.action = BuildAction::Adjust {
                reconfigure: false,
                unhold: true,
            };
        } else {
            debug!(package = %key, "collecting drop request");
            package.action = BuildAction::Drop;
        }
        self.state.map.insert(package);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Recursive collection
    // ------------------------------------------------------------------

    /// Walk the package's `depends` clauses from the first
    /// not-yet-materialized one.
    pub fn collect_build_prerequisites(
        &mut self,
        key: &PackageKey,
        mode: CollectMode,
    ) -> CResult<()> {
        let (available, selected, config_vars, started) = {
            let Some(entry) = self.state.map.get(key) else {
                return Ok(());
            };
            if !entry.action.is_build() {
                return Ok(());
            }
            let Some(available) = entry.available.clone() else {
                return Err(ResolveError::invariant(format!(
                    "build action for {key} without available package"
                ))
                .into());
            };
            (
                available,
                entry.selected.clone(),
                entry.config_vars.clone(),
                entry.recursive_collection,
            )
        };

        if started && !mode.resume {
            // Already collected, or collection is in progress higher up
            // the stack (a dependency cycle among build candidates; the
            // ordering engine reports it if it survives).
            return Ok(());
        }

        let version = available.version().clone();
        let dependent_vkey =
            PackageVersionKey::new(key.configuration, key.name.clone(), version.clone());

        // Initialize (or take over) the skeleton for clause evaluation.
        let mut skeleton = {
            let entry = self.state.map.get_mut(key).expect("entry exists");
            entry.recursive_collection = true;
            match entry.skeleton.take() {
                Some(s) => s,
                None => {
                    let mut s = PackageSkeleton::new(key.clone(), version);
                    s.load(LoadFlags::all(), selected.as_deref(), &config_vars);
                    s
                }
            }
        };

        let result = self.collect_clauses(key, &dependent_vkey, &available, &mut skeleton, mode);

        // The skeleton goes back even on a backtrack: a scratch restart
        // rebuilds the state wholesale and a snapshot restore replaces it.
        if let Some(entry) = self.state.map.get_mut(key) {
            entry.skeleton = Some(skeleton);
        }
        result
    }

    fn collect_clauses(
        &mut self,
        key: &PackageKey,
        dependent_vkey: &PackageVersionKey,
        available: &Arc<AvailablePackage>,
        skeleton: &mut PackageSkeleton,
        mode: CollectMode,
    ) -> CResult<()> {
        let total = available.manifest.depends.len();
        loop {
            let di = match self.state.map.get(key) {
                Some(e) => e.dependencies.len(),
                None => return Ok(()),
            };
            if di >= total {
                trace!(package = %key, clauses = total, "fully collected");
                self.state.postponed_alts.remove(key);
                return Ok(());
            }
            let clause = &available.manifest.depends[di];

            // Toolchain build-time dependencies are satisfied externally:
            // record an empty selected alternative.
            if clause.is_toolchain() {
                let entry = self.state.map.get_mut(key).expect("entry exists");
                entry.dependencies.push(SelectedAlternative::default());
                entry.alternatives.push(0);
                continue;
            }

            // Enabled alternatives, minus the unacceptable ones.
            let version = dependent_vkey.version.clone().expect("build has version");
            let mut candidates: Vec<usize> = Vec::new();
            for (ai, alt) in clause.alternatives.iter().enumerate() {
                if self
                    .state
                    .unacceptable_alts
                    .contains(&(key.clone(), version.clone(), (di, ai)))
                {
                    continue;
                }
                let enabled = match &alt.enable {
                    Some(expr) => skeleton.evaluate_enable(expr, (di, ai))?,
                    None => true,
                };
                if enabled {
                    candidates.push(ai);
                }
            }
            let enabled_total = candidates.len();
            candidates.truncate(mode.max_alt_index);
            let truncated = enabled_total > candidates.len();

            if candidates.is_empty() {
                return Err(ResolveError::NoSelectableAlternative {
                    dependent: dependent_vkey.to_string(),
                    tried: clause.alternatives.iter().map(describe_alternative).collect(),
                    required_by: vec![],
                }
                .into());
            }

            // Pre-collect each candidate.
            let mut outcomes: Vec<(usize, AltOutcome)> = Vec::new();
            for &ai in &candidates {
                let outcome = self.precollect_alternative(
                    key,
                    clause.buildtime,
                    &clause.alternatives[ai],
                )?;
                outcomes.push((ai, outcome));
            }

            let Some(chosen) =
                self.select_alternative(dependent_vkey, &outcomes, mode, truncated)?
            else {
                // Defer for a wider search: a later iteration may make an
                // alternative reusable.
                self.state.postponed_alts.insert(key.clone());
                let entry = self.state.map.get_mut(key).expect("entry exists");
                entry.postponed_alternatives = Some(candidates);
                debug!(package = %key, clause = di, "postponing alternative selection");
                return Ok(());
            };

            let deps = match outcomes.into_iter().find(|(ai, _)| *ai == chosen) {
                Some((_, AltOutcome::Satisfiable(deps))) => deps,
                _ => {
                    return Err(ResolveError::invariant(
                        "selected an unsatisfiable alternative",
                    )
                    .into());
                }
            };
            let alt = clause.alternatives[chosen].clone();
            let has_alternative = candidates.iter().any(|&ai| ai > chosen);

            // Incompatibilities with other dependents' recorded
            // constraints are deferred, not fatal: a later up/downgrade
            // may resolve them.
            for dep in &deps {
                for violation in self.state.map.check_constraints(&dep.key, &dep.version) {
                    if violation.dependent != *dependent_vkey {
                        self.state.unsatisfied.add(violation);
                    }
                }
            }

            let continue_collection = if alt.has_config() {
                self.collect_config_alternative(
                    key,
                    dependent_vkey,
                    &alt,
                    (di, chosen),
                    &deps,
                    has_alternative,
                )?
            } else {
                self.collect_plain_alternative(key, dependent_vkey, &deps)?;
                true
            };

            // Reflect feeds later enable evaluations.
            if let Some(reflect) = &alt.reflect {
                skeleton.evaluate_reflect(reflect, (di, chosen))?;
            }

            // Record the materialized selection.
            let entry = self.state.map.get_mut(key).expect("entry exists");
            entry.dependencies.push(SelectedAlternative {
                dependencies: alt.dependencies.clone(),
                keys: deps.iter().map(|d| d.key.clone()).collect(),
            });
            entry.alternatives.push(chosen);
            entry.postponed_alternatives = None;

            if !continue_collection {
                // The dependent stops at its cluster position; the driver
                // resumes it from the next clause once the negotiation
                // completes.
                return Ok(());
            }
        }
    }

    /// The deterministic alternative-selection heuristic. `Ok(None)`
    /// means "postpone for a wider search".
    fn select_alternative(
        &self,
        dependent_vkey: &PackageVersionKey,
        outcomes: &[(usize, AltOutcome)],
        mode: CollectMode,
        truncated: bool,
    ) -> CResult<Option<usize>> {
        let satisfiable: Vec<(usize, &Vec<PrecollectedDep>)> = outcomes
            .iter()
            .filter_map(|(ai, o)| match o {
                AltOutcome::Satisfiable(deps) => Some((*ai, deps)),
                AltOutcome::Unsatisfiable(_) => None,
            })
            .collect();

        if satisfiable.is_empty() {
            if truncated {
                // Untried alternatives remain beyond the widening limit.
                return Ok(None);
            }
            return Err(ResolveError::NoSelectableAlternative {
                dependent: dependent_vkey.to_string(),
                tried: outcomes
                    .iter()
                    .filter_map(|(_, o)| match o {
                        AltOutcome::Unsatisfiable(reason) => Some(reason.clone()),
                        AltOutcome::Satisfiable(_) => None,
                    })
                    .collect(),
                required_by: vec![],
            }
            .into());
        }

        // A single choice is taken as-is.
        if satisfiable.len() == 1 {
            return Ok(Some(satisfiable[0].0));
        }

        // The user's own selection dominates.
        if let Some(&(ai, _)) = satisfiable
            .iter()
            .find(|(_, deps)| deps.iter().any(|d| self.user_requested(&d.key)))
        {
            return Ok(Some(ai));
        }

        // Prefer the first alternative reusing existing builds.
        if let Some(&(ai, _)) = satisfiable
            .iter()
            .find(|(_, deps)| deps.iter().all(|d| d.reused))
        {
            return Ok(Some(ai));
        }

        // Only non-reused alternatives remain.
        if mode.force_non_reused {
            Ok(Some(satisfiable[0].0))
        } else {
            Ok(None)
        }
    }

    /// Pre-collect one alternative's dependencies without mutating any
    /// state.
    fn precollect_alternative(
        &self,
        dependent_key: &PackageKey,
        buildtime: bool,
        alt: &DependencyAlternative,
    ) -> CResult<AltOutcome> {
        let mut out = Vec::new();
        for dep in &alt.dependencies {
            // Host-vs-target: build-time dependencies resolve into a host
            // configuration.
            let configuration = if buildtime {
                match self.ctx.configs.host_for_buildtime() {
                    Some(c) => c.id,
                    None => {
                        return Err(ResolveError::PrivateConfigRequired {
                            dependency: dep.name.to_string(),
                            proposed: self
                                .ctx
                                .configs
                                .private_host_path()
                                .display()
                                .to_string(),
                        }
                        .into());
                    }
                }
            } else {
                dependent_key.configuration
            };
            let dep_key = PackageKey::new(configuration, dep.name.clone());

            // A recorded replacement overrides the natural choice.
            if let Some(rv) = self.state.replaced_versions.get(&dep_key) {
                match &rv.available {
                    None => {
                        return Ok(AltOutcome::Unsatisfiable(format!(
                            "{dep_key} is being dropped"
                        )));
                    }
                    Some(av) => {
                        if dep
                            .constraint
                            .as_ref()
                            .is_none_or(|c| c.satisfies(av.version()))
                        {
                            out.push(PrecollectedDep {
                                key: dep_key.clone(),
                                constraint: dep.constraint.clone(),
                                available: Some(av.clone()),
                                selected: self.ctx.selected.find(&dep_key),
                                system: rv.system,
                                reused: true,
                                needs_build: true,
                                version: av.version().clone(),
                            });
                            continue;
                        }
                        return Ok(AltOutcome::Unsatisfiable(format!(
                            "replacement {}/{} does not satisfy ({} {})",
                            dep.name,
                            av.version(),
                            dep.name,
                            dep.constraint.clone().unwrap_or_default()
                        )));
                    }
                }
            }

            // The combined constraint: ours plus everything already
            // recorded on the build-package (user's included).
            let mut combined = dep.constraint.clone().unwrap_or_default();
            if let Some(existing) = self.state.map.get(&dep_key) {
                match existing.combined_constraint() {
                    Some(c) => match combined.intersect(&c) {
                        Some(i) => combined = i,
                        None => {
                            return Ok(AltOutcome::Unsatisfiable(format!(
                                "({} {combined}) conflicts with other dependents",
                                dep.name
                            )));
                        }
                    },
                    None => {
                        return Ok(AltOutcome::Unsatisfiable(format!(
                            "constraints on {} are contradictory",
                            dep.name
                        )));
                    }
                }
            }

            let selected = self.ctx.selected.find(&dep_key);
            let policy = self.dependency_policy();

            // Reuse the selected package when it satisfies, no upgrade is
            // requested, and no build decision disagrees.
            if let Some(sel) = &selected {
                let planned_elsewhere = self
                    .state
                    .map
                    .get(&dep_key)
                    .filter(|e| e.action.is_build())
                    .and_then(|e| e.plan_version().cloned());
                if policy.is_none()
                    && sel.state == PackageState::Configured
                    && combined.satisfies(&sel.version)
                    && planned_elsewhere.as_ref().is_none_or(|v| *v == sel.version)
                {
                    out.push(PrecollectedDep {
                        key: dep_key.clone(),
                        constraint: dep.constraint.clone(),
                        available: self.ctx.index.find(&dep.name, &sel.version),
                        selected: selected.clone(),
                        system: sel.is_system(),
                        reused: true,
                        needs_build: false,
                        version: sel.version.clone(),
                    });
                    continue;
                }
            }

            // Find the best available version under the combined
            // constraint.
            let Some(best) =
                self.find_available(&dep.name, Some(&combined), selected.as_deref(), policy)
            else {
                return Ok(AltOutcome::Unsatisfiable(
                    if self.ctx.index.contains(&dep.name) {
                        format!("no version of {} satisfies ({} {combined})", dep.name, dep.name)
                    } else {
                        format!("unknown package {}", dep.name)
                    },
                ));
            };

            // A held package resists up/downgrades forced by dependents.
            if let Some(sel) = &selected {
                if sel.hold_version
                    && *best.version() != sel.version
                    && !self.user_requested(&dep_key)
                {
                    return Ok(AltOutcome::Unsatisfiable(format!(
                        "{} is held at {} but ({} {combined}) requires a version change",
                        dep.name, sel.version, dep.name
                    )));
                }
            }

            let needs_build = !selected
                .as_ref()
                .is_some_and(|s| s.state == PackageState::Configured && s.version == *best.version());
            let reused = !needs_build
                || self.state.map.get(&dep_key).is_some_and(|e| {
                    e.action.is_build() && e.plan_version() == Some(best.version())
                })
                || self
                    .ctx
                    .selected
                    .find_any(&dep.name)
                    .iter()
                    .any(|(_, s)| s.version == *best.version());

            out.push(PrecollectedDep {
                key: dep_key,
                constraint: dep.constraint.clone(),
                available: Some(best.clone()),
                selected,
                system: false,
                reused,
                needs_build,
                version: best.version().clone(),
            });
        }
        Ok(AltOutcome::Satisfiable(out))
    }

    /// Collect the chosen alternative when it has no configuration
    /// clauses: enter every dependency and recurse unless a cluster or
    /// postponement owns it.
    fn collect_plain_alternative(
        &mut self,
        key: &PackageKey,
        dependent_vkey: &PackageVersionKey,
        deps: &[PrecollectedDep],
    ) -> CResult<()> {
        for dep in deps {
            let negotiating = self
                .state
                .postponed_cfgs
                .find_dependency(&dep.key)
                .is_some_and(|c| c.negotiated != Some(true));
            if negotiating || self.state.postponed_deps.contains(&dep.key) {
                // The dependency's configuration is still being decided:
                // enter it but defer the recursion to the driver.
                self.state.postponed_deps.record(dep.key.clone(), false);
                self.enter_dependency(dep, dependent_vkey)?;
                continue;
            }

            self.enter_dependency(dep, dependent_vkey)?;
            if dep.needs_build && dep.key != *key {
                self.collect_build_prerequisites(&dep.key, CollectMode::default())
                    .map_err(|e| e.with_chain(dependent_vkey.to_string()))?;
            }
        }
        Ok(())
    }

    /// Collect the chosen alternative when it carries `prefer`/`require`:
    /// the dependent joins a configuration cluster and the dependencies'
    /// recursive collection is deferred to the negotiation. Returns
    /// whether the dependent's clause walk may continue (true only when
    /// the cluster was already negotiated compatibly).
    fn collect_config_alternative(
        &mut self,
        key: &PackageKey,
        dependent_vkey: &PackageVersionKey,
        alt: &DependencyAlternative,
        position: (usize, usize),
        deps: &[PrecollectedDep],
        has_alternative: bool,
    ) -> CResult<bool> {
        // A dependency already recursively collected without config must
        // be re-deferred so the negotiation sees it fresh.
        for dep in deps {
            let collected_plain = self
                .state
                .map
                .get(&dep.key)
                .is_some_and(|e| e.recursive_collection)
                && self.state.postponed_cfgs.find_dependency(&dep.key).is_none();
            if collected_plain {
                debug!(dependency = %dep.key, "postponing already-collected dependency");
                self.state.postponed_deps.record(dep.key.clone(), true);
                return Err(Backtrack::PostponeDependency(dep.key.clone()).into());
            }
        }

        for dep in deps {
            if dep.needs_build || dep.available.is_none() {
                self.enter_dependency(dep, dependent_vkey)?;
            } else {
                // An already-configured dependency still enters as a
                // build: the negotiated configuration may change it. The
                // driver demotes it again when the configuration checksum
                // comes out unchanged.
                let mut forced = dep.clone();
                forced.needs_build = true;
                self.enter_dependency(&forced, dependent_vkey)?;
                if let Some(entry) = self.state.map.get_mut(&dep.key) {
                    entry.action.set_reconfigure();
                }
            }
        }

        // Remember existing configured dependents of these dependencies;
        // the negotiation re-evaluates them and the driver uses them to
        // attribute bogus postponements.
        for dep in deps {
            for (edkey, _) in self.ctx.selected.dependents_of(&dep.key) {
                if edkey != *key && !self.state.map.contains(&edkey) {
                    let entry = self.state.postponed_edeps.entry(dep.key.clone()).or_default();
                    if !entry.contains(&edkey) {
                        entry.push(edkey);
                    }
                }
            }
        }

        let dep_keys: Vec<PackageKey> = deps.iter().map(|d| d.key.clone()).collect();
        let r = self.state.postponed_cfgs.add(
            key.clone(),
            false,
            position,
            dep_keys.clone(),
            has_alternative,
        );
        if let Some(depth) = r.merged_non_negotiated {
            return Err(Backtrack::MergeConfiguration { depth }.into());
        }

        let (negotiated, depth) = {
            let cluster = self
                .state
                .postponed_cfgs
                .get(r.index)
                .expect("cluster exists");
            (cluster.negotiated, cluster.depth)
        };
        match negotiated {
            None => {
                for k in &dep_keys {
                    self.state.postponed_deps.record(k.clone(), true);
                }
                Ok(false)
            }
            Some(false) => {
                if r.changed {
                    if depth != 0 {
                        // The active negotiation must replay with this
                        // position included.
                        return Err(Backtrack::RetryConfiguration {
                            depth,
                            dependent: dependent_vkey.clone(),
                        }
                        .into());
                    }
                    for k in &dep_keys {
                        self.state.postponed_deps.record(k.clone(), true);
                    }
                    Ok(false)
                } else {
                    // A replay of a recorded position during this
                    // cluster's own negotiation: the configuration was
                    // already applied, keep collecting.
                    Ok(true)
                }
            }
            Some(true) => {
                self.up_negotiate(
                    r.index,
                    depth,
                    dependent_vkey,
                    alt,
                    position,
                    &dep_keys,
                    has_alternative,
                )?;
                Ok(true)
            }
        }
    }

    /// Apply a late-joining dependent's configuration to an
    /// already-negotiated cluster. An unacceptable proposal rejects the
    /// alternative; a change means the negotiation must be replayed at
    /// the cluster's depth.
    #[allow(clippy::too_many_arguments)]
    fn up_negotiate(
        &mut self,
        cluster_index: usize,
        depth: usize,
        dependent_vkey: &PackageVersionKey,
        alt: &DependencyAlternative,
        position: (usize, usize),
        dep_keys: &[PackageKey],
        has_alternative: bool,
    ) -> CResult<()> {
        let assignments = alt
            .require
            .as_deref()
            .or(alt.prefer.as_deref())
            .expect("configuration alternative");

        // The proposal must be sensible for each dependency's current
        // configuration before it is committed.
        if let Some(accept) = &alt.accept {
            let mut proposed = mortar_core::VariableSet::new();
            expr::apply_assignments(assignments, &mut proposed).map_err(|e| {
                ResolveError::InvalidExpression {
                    package: dependent_vkey.to_string(),
                    reason: e.to_string(),
                }
            })?;
            for k in dep_keys {
                let Some(skeleton) =
                    self.state.map.get(k).and_then(|e| e.skeleton.as_ref())
                else {
                    continue;
                };
                let (ok, reason) = skeleton.verify_sensible(&proposed, accept)?;
                if !ok {
                    if let Some(version) = &dependent_vkey.version {
                        self.state.unacceptable_alts.insert((
                            dependent_vkey.package_key(),
                            version.clone(),
                            position,
                        ));
                    }
                    if has_alternative {
                        return Err(Backtrack::UnacceptAlternative.into());
                    }
                    return Err(ResolveError::UnsensibleConfig {
                        package: k.name.to_string(),
                        dependent: dependent_vkey.to_string(),
                        reason,
                    }
                    .into());
                }
            }
        }

        let mut changed = false;
        {
            let cluster = self
                .state
                .postponed_cfgs
                .get_mut(cluster_index)
                .expect("cluster exists");
            for k in dep_keys {
                let cfg = cluster.dependency_configurations.entry(k.clone()).or_default();
                let before = cfg.checksum();
                expr::apply_assignments(assignments, cfg).map_err(|e| {
                    ResolveError::InvalidExpression {
                        package: dependent_vkey.to_string(),
                        reason: e.to_string(),
                    }
                })?;
                changed |= cfg.checksum() != before;
            }
        }

        if changed {
            debug!(dependent = %dependent_vkey, "up-negotiation changed configuration");
            for k in dep_keys {
                self.state.postponed_deps.record(k.clone(), true);
            }
            let cluster = self
                .state
                .postponed_cfgs
                .get_mut(cluster_index)
                .expect("cluster exists");
            cluster.negotiated = Some(false);
            return Err(Backtrack::RetryConfiguration {
                depth,
                dependent: dependent_vkey.clone(),
            }
            .into());
        }
        Ok(())
    }

    /// Enter a pre-collected dependency into the map, recording the
    /// constraint and the requiring dependent. A disagreement between
    /// build decisions records a replacement and restarts.
    pub(crate) fn enter_dependency(
        &mut self,
        dep: &PrecollectedDep,
        dependent: &PackageVersionKey,
    ) -> CResult<()> {
        let mut package = BuildPackage::pre_entered(dep.key.clone(), dep.selected.clone());
        if dep.needs_build {
            let available = dep.available.clone().ok_or_else(|| {
                ResolveError::invariant(format!("no available package for build of {}", dep.key))
            })?;
            package.repository_fragment = available.fragments.first().cloned();
            package.available = Some(available);
            package.system = dep.system;
            package.action = BuildAction::build();
        }
        package.required_by.insert(dependent.clone());
        package.required_by_dependents = true;
        if let Some(c) = &dep.constraint {
            package.add_constraint(ConstraintSource {
                dependent: dependent.clone(),
                constraint: c.clone(),
            });
        }

        let replaced = self.state.map.insert(package);
        if replaced {
            let available = dep.available.clone().ok_or_else(|| {
                ResolveError::invariant(format!("version replacement of {} without available", dep.key))
            })?;
            self.state.replaced_versions.insert(
                dep.key.clone(),
                ReplacedVersion::build(
                    available.clone(),
                    available.fragments.first().cloned(),
                    dep.system,
                ),
            );
            return Err(Backtrack::ReplaceVersion.into());
        }
        self.state.replaced_versions.mark_applied(&dep.key);
        Ok(())
    }

    // ------------------------------------------------------------------
    // Shared helpers
    // ------------------------------------------------------------------

    /// Whether the package was named on the command line.
    pub(crate) fn user_requested(&self, key: &PackageKey) -> bool {
        self.state.map.get(key).is_some_and(|e| {
            e.hold_package || e.required_by.iter().any(PackageVersionKey::is_command_line)
        })
    }

    pub(crate) fn default_policy(&self) -> Option<UpgradePolicy> {
        if self.ctx.options.upgrade {
            Some(UpgradePolicy::Upgrade)
        } else if self.ctx.options.patch {
            Some(UpgradePolicy::Patch)
        } else {
            None
        }
    }

    /// The upgrade policy applied to dependencies (only with
    /// `--recursive`).
    fn dependency_policy(&self) -> Option<UpgradePolicy> {
        if self.ctx.options.recursive {
            self.default_policy()
        } else {
            None
        }
    }

    pub(crate) fn find_available(
        &self,
        name: &PackageName,
        constraint: Option<&VersionConstraint>,
        selected: Option<&SelectedPackage>,
        policy: Option<UpgradePolicy>,
    ) -> Option<Arc<AvailablePackage>> {
        let mut constraint = constraint.cloned().unwrap_or_default();
        if let (Some(UpgradePolicy::Patch), Some(sel)) = (policy, selected) {
            constraint = constraint.intersect(&VersionConstraint::tilde(&sel.version)?)?;
        }
        self.ctx.index.best(name, Some(&constraint))
    }
}

fn describe_alternative(alt: &DependencyAlternative) -> String {
    alt.dependencies
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" ")
}

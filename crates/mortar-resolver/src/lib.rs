//! Dependency resolution and staged build-plan construction.
//!
//! Given a set of user requests (build, upgrade, downgrade, drop, hold)
//! and the configuration database of already-selected packages, the
//! planner computes a consistent, totally-ordered execution plan
//! satisfying version constraints, configuration-variable constraints,
//! package-type rules, and acquisition policies.
//!
//! The entry point is [`build_plan`]. Internally the work is done by the
//! recursive collector ([`collect`]) and the postponement driver
//! ([`driver`]), backtracking through typed signals while preserving
//! accumulated progress; see the module docs for the machinery:
//!
//! - [`skeleton`]: per-package configuration state and expression
//!   evaluation
//! - [`cluster`]: dependency-configuration negotiation clusters
//! - [`replaced`], [`postponed`]: the backtracking bookkeeping tables
//! - [`build_package`]: the result store (map plus ordered list)
//! - [`order`]: the topological ordering engine

pub mod build_package;
pub mod cluster;
mod collect;
mod dependents;
mod driver;
pub mod error;
pub mod expr;
pub mod order;
pub mod postponed;
pub mod replaced;
pub mod skeleton;
mod state;

pub use build_package::{BuildAction, BuildPackage, BuildPackageMap, UpgradePolicy};
pub use error::{ResolveError, Result};
pub use skeleton::{LoadFlags, PackageSkeleton};

use crate::collect::{CollectMode, Collector};
use crate::error::{Backtrack, CResult, CollectError};
use crate::postponed::{PostponedDependencies, UnacceptableAlternatives};
use crate::replaced::ReplacedVersions;
use mortar_core::{
    ConfigurationId, PackageKey, PackageName, VariableSet, Version, VersionConstraint,
};
use mortar_database::{
    ConfigurationSet, PackageState, PackageSubstate, SelectedPackage, SelectedStore,
};
use mortar_repository::AvailableIndex;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, info};

/// Scratch restarts before giving up (a runaway-backtracking backstop).
const MAX_SCRATCH_RESTARTS: usize = 100;

/// Planner-wide options (from the command line).
#[derive(Debug, Clone, Default)]
pub struct PlanOptions {
    /// Upgrade named packages to the best available versions.
    pub upgrade: bool,
    /// Upgrade named packages within their minor series.
    pub patch: bool,
    /// Apply the upgrade policy to dependencies as well.
    pub recursive: bool,
    /// Replace orphaned versions with ones from fetched repositories.
    pub deorphan: bool,
}

/// The read-only context a plan is computed against.
pub struct PlannerContext<'a> {
    /// The linked configurations.
    pub configs: &'a ConfigurationSet,
    /// The available-package index over all fetched fragments.
    pub index: &'a AvailableIndex,
    /// The selected-package store.
    pub selected: &'a SelectedStore,
    /// Options.
    pub options: PlanOptions,
}

/// What a request asks for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestAction {
    /// Build (or upgrade/downgrade) the package and hold it.
    Build,
    /// The package is no longer required (`?pkg`).
    Drop,
}

/// One user request.
#[derive(Debug, Clone)]
pub struct BuildRequest {
    /// Build or drop.
    pub action: RequestAction,
    /// Package name.
    pub name: PackageName,
    /// Exact version (`pkg/1.2.3`), holding the version.
    pub version: Option<Version>,
    /// Version constraint, when given instead of an exact version.
    pub constraint: Option<VersionConstraint>,
    /// Satisfy via the system package manager.
    pub system: bool,
    /// Target configuration.
    pub configuration: ConfigurationId,
    /// Stop after configuring.
    pub configure_only: bool,
    /// Keep the output directory when replacing.
    pub keep_out: bool,
    /// Disfigure before configuring.
    pub disfigure: bool,
    /// Check out into this directory.
    pub checkout_root: Option<PathBuf>,
    /// Purge the checkout after the run.
    pub checkout_purge: bool,
    /// Per-request configuration variables.
    pub config_vars: VariableSet,
    /// Per-request upgrade policy override.
    pub upgrade: Option<UpgradePolicy>,
    /// Replace an orphaned version.
    pub deorphan: bool,
}

impl BuildRequest {
    /// A plain build request for a package name.
    #[must_use]
    pub fn build(name: PackageName) -> Self {
        Self {
            action: RequestAction::Build,
            name,
            version: None,
            constraint: None,
            system: false,
            configuration: ConfigurationId::MAIN,
            configure_only: false,
            keep_out: false,
            disfigure: false,
            checkout_root: None,
            checkout_purge: false,
            config_vars: VariableSet::new(),
            upgrade: None,
            deorphan: false,
        }
    }

    /// A build request for an exact version.
    #[must_use]
    pub fn build_version(name: PackageName, version: Version) -> Self {
        let mut r = Self::build(name);
        r.version = Some(version);
        r
    }

    /// A drop request.
    #[must_use]
    pub fn drop_package(name: PackageName) -> Self {
        let mut r = Self::build(name);
        r.action = RequestAction::Drop;
        r
    }
}

/// One entry of the computed plan, in execution order.
#[derive(Debug, Clone)]
pub struct PlannedAction {
    /// The package.
    pub key: PackageKey,
    /// What will be done.
    pub action: BuildAction,
    /// Target version (for builds).
    pub version: Option<Version>,
    /// Currently-configured version, when any.
    pub from_version: Option<Version>,
    /// Satisfied via the system package manager.
    pub system: bool,
    /// Hold flags to record.
    pub hold_package: bool,
    /// Hold the exact version.
    pub hold_version: bool,
    /// Fragment to check the package out from.
    pub repository_fragment: Option<String>,
    /// Prerequisites with the constraints recorded on them.
    pub prerequisites: BTreeMap<PackageKey, Option<VersionConstraint>>,
    /// Chosen dependency alternative per `depends` clause.
    pub selected_alternatives: Vec<Option<usize>>,
    /// The configuration the package will be configured with.
    pub config_variables: VariableSet,
    /// Stable checksum of that configuration.
    pub config_checksum: String,
}

impl PlannedAction {
    /// A short `verb package/version` description.
    #[must_use]
    pub fn describe(&self) -> String {
        let verb = match self.action {
            BuildAction::Build { .. } => {
                if self.from_version.is_some() {
                    match (self.from_version.as_ref(), self.version.as_ref()) {
                        (Some(from), Some(to)) if to > from => "upgrade",
                        (Some(from), Some(to)) if to < from => "downgrade",
                        _ => "rebuild",
                    }
                } else {
                    "build"
                }
            }
            BuildAction::Drop => "drop",
            BuildAction::Adjust { reconfigure: true, .. } => "reconfigure",
            BuildAction::Adjust { .. } => "adjust",
            BuildAction::None => "keep",
        };
        match &self.version {
            Some(v) => format!("{verb} {}/{v}", self.key),
            None => format!("{verb} {}", self.key),
        }
    }
}

/// The computed execution plan.
#[derive(Debug, Clone, Default)]
pub struct Plan {
    /// Actions in execution order (dependencies first).
    pub actions: Vec<PlannedAction>,
}

impl Plan {
    /// Whether the plan changes nothing.
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.actions.is_empty()
    }

    /// Apply the plan to a selected-package store (the configure-only
    /// execution the planner itself is responsible for; building is the
    /// build system's business).
    pub fn apply(&self, store: &mut SelectedStore) {
        for action in &self.actions {
            match &action.action {
                BuildAction::Build { unhold, .. } => {
                    let version = action
                        .version
                        .clone()
                        .expect("build actions carry a version");
                    let mut package = SelectedPackage::new(action.key.name.clone(), version);
                    package.state = PackageState::Configured;
                    package.substate = if action.system {
                        PackageSubstate::System
                    } else {
                        PackageSubstate::None
                    };
                    package.hold_package = action.hold_package && !unhold;
                    package.hold_version = action.hold_version && !unhold;
                    package.prerequisites = action.prerequisites.clone();
                    package.config_variables = action.config_variables.clone();
                    package.config_checksum = action.config_checksum.clone();
                    package.selected_alternatives = action.selected_alternatives.clone();
                    store.insert(action.key.configuration, package);
                }
                BuildAction::Drop => {
                    store.remove(&action.key);
                }
                BuildAction::Adjust { unhold, .. } => {
                    if let Some(existing) = store.find(&action.key) {
                        let mut package = (*existing).clone();
                        if *unhold {
                            package.hold_package = false;
                            package.hold_version = false;
                        } else {
                            package.hold_package |= action.hold_package;
                            package.hold_version |= action.hold_version;
                        }
                        store.insert(action.key.configuration, package);
                    }
                }
                BuildAction::None => {}
            }
        }
    }
}

/// Compute the execution plan for the given requests.
pub fn build_plan(ctx: &PlannerContext<'_>, requests: &[BuildRequest]) -> Result<Plan> {
    let mut carry_replaced = ReplacedVersions::new();
    let mut carry_deps = PostponedDependencies::new();
    let mut carry_unacceptable = UnacceptableAlternatives::new();
    let mut carry_history: Vec<String> = Vec::new();

    for attempt in 0..MAX_SCRATCH_RESTARTS {
        let mut collector = Collector::new(ctx);
        collector.state.replaced_versions = carry_replaced.clone();
        collector.state.replaced_versions.reset_applied();
        collector.state.postponed_deps = carry_deps.clone();
        collector.state.postponed_deps.reset_observations();
        collector.state.unacceptable_alts = carry_unacceptable.clone();
        collector.state.cfgs_history = carry_history.clone();

        let result =
            collect_all(&mut collector, requests).and_then(|()| finalize(&mut collector, ctx));
        match result {
            Ok(plan) => {
                info!(attempt, actions = plan.actions.len(), "plan computed");
                return Ok(plan);
            }
            Err(CollectError::Backtrack(signal)) => {
                debug!(?signal, attempt, "restarting collection from scratch");
                match signal {
                    Backtrack::ReplaceVersion
                    | Backtrack::CancelReplacement
                    | Backtrack::PostponeDependency(_)
                    | Backtrack::UnacceptAlternative
                    | Backtrack::MergeConfigurationCycle { .. }
                    | Backtrack::RetryConfiguration { .. } => {
                        carry_replaced = collector.state.replaced_versions;
                        carry_deps = collector.state.postponed_deps;
                        carry_unacceptable = collector.state.unacceptable_alts;
                        carry_history = collector.state.cfgs_history;
                    }
                    Backtrack::MergeConfiguration { .. }
                    | Backtrack::RecollectExistingDependents { .. } => {
                        return Err(ResolveError::invariant(format!(
                            "backtracking signal {signal:?} escaped to depth zero"
                        )));
                    }
                }
            }
            Err(CollectError::Fatal(e)) => return Err(*e),
        }
    }
    Err(ResolveError::invariant(format!(
        "collection did not converge after {MAX_SCRATCH_RESTARTS} scratch restarts"
    )))
}

fn collect_all(collector: &mut Collector<'_>, requests: &[BuildRequest]) -> CResult<()> {
    for request in requests {
        collector.collect_request(request)?;
    }
    for request in requests {
        if request.action == RequestAction::Build {
            let key = PackageKey::new(request.configuration, request.name.clone());
            collector.collect_build_prerequisites(&key, CollectMode::default())?;
        }
    }
    collector.collect_build_postponed(0)?;
    collector.collect_dependents()?;
    // Dependent propagation may have scheduled re-collections.
    collector.collect_build_postponed(0)?;
    Ok(())
}

fn finalize(collector: &mut Collector<'_>, ctx: &PlannerContext<'_>) -> CResult<Plan> {
    // Unapplied replacements are bogus; cancelling them restarts.
    collector.state.replaced_versions.cancel_bogus(true)?;

    // So are postponements that never saw a configuration.
    if collector.state.postponed_deps.cancel_bogus() > 0 {
        return Err(Backtrack::CancelReplacement.into());
    }

    if !collector.state.is_quiescent() {
        return Err(ResolveError::invariant(
            "collection finished with pending postponements",
        )
        .into());
    }

    // Every build must be fully collected.
    for (key, package) in collector.state.map.iter() {
        if package.action.is_build() && !package.is_fully_collected() {
            return Err(ResolveError::invariant(format!(
                "build of {key} is not fully collected"
            ))
            .into());
        }
    }

    // Resolve the deferred constraint violations against the final plan.
    let planned: BTreeMap<PackageKey, Version> = collector
        .state
        .map
        .iter()
        .filter_map(|(k, p)| p.plan_version().map(|v| (k.clone(), v.clone())))
        .collect();
    let selected = ctx.selected;
    collector.state.unsatisfied.retain_unsatisfied(|key| {
        planned
            .get(key)
            .cloned()
            .or_else(|| selected.find(key).map(|s| s.version.clone()))
    });
    if let Some(entry) = collector.state.unsatisfied.iter().next() {
        return Err(ResolveError::UnsatisfiedDependent {
            dependent: entry.dependent.to_string(),
            dependency: entry.dependency.name.to_string(),
            constraint: entry.constraint.clone(),
            version: entry.version.clone(),
        }
        .into());
    }

    // Order and verify.
    order::order_all(&mut collector.state.map, ctx.selected).map_err(CollectError::from)?;
    collector.state.map.verify_invariants().map_err(CollectError::from)?;

    // Every recorded constraint holds for the planned versions.
    for (key, package) in collector.state.map.iter() {
        if let Some(version) = package.plan_version() {
            for c in &package.constraints {
                if !c.constraint.satisfies(version) {
                    return Err(ResolveError::invariant(format!(
                        "planned {key}/{version} violates ({} {}) from {}",
                        key.name, c.constraint, c.dependent
                    ))
                    .into());
                }
            }
        }
    }

    let mut actions = Vec::new();
    for package in collector.state.map.iter_ordered() {
        let prerequisites: BTreeMap<PackageKey, Option<VersionConstraint>> = package
            .dependencies
            .iter()
            .flat_map(|alt| {
                alt.keys
                    .iter()
                    .cloned()
                    .zip(alt.dependencies.iter().map(|d| d.constraint.clone()))
            })
            .collect();
        actions.push(PlannedAction {
            key: package.key.clone(),
            action: package.action,
            version: package.plan_version().cloned(),
            from_version: package.selected.as_ref().map(|s| s.version.clone()),
            system: package.system,
            hold_package: package.hold_package
                || package.selected.as_ref().is_some_and(|s| s.hold_package),
            hold_version: package.hold_version
                || package.selected.as_ref().is_some_and(|s| s.hold_version),
            repository_fragment: package.repository_fragment.clone(),
            prerequisites,
            selected_alternatives: package.alternatives.iter().map(|&ai| Some(ai)).collect(),
            config_variables: package
                .skeleton
                .as_ref()
                .map(|s| s.vars().clone())
                .unwrap_or_default(),
            config_checksum: package
                .skeleton
                .as_ref()
                .map(PackageSkeleton::config_checksum)
                .unwrap_or_default(),
        });
    }
    Ok(Plan { actions })
}

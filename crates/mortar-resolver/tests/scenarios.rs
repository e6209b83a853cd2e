//! End-to-end planner scenarios.
//!
//! Each test builds an available-package index and a selected-package
//! store in memory, runs the planner, and checks the computed plan (or
//! the failure) against the expected outcome.

use mortar_core::{ConfigurationId, PackageKey, PackageName, Version, VersionConstraint};
use mortar_database::{ConfigurationKind, ConfigurationSet, SelectedPackage, SelectedStore};
use mortar_repository::{AvailableIndex, PackageManifest};
use mortar_resolver::{
    BuildAction, BuildRequest, Plan, PlanOptions, PlannerContext, ResolveError, build_plan,
};
use pretty_assertions::assert_eq;

fn name(s: &str) -> PackageName {
    PackageName::parse(s).unwrap()
}

fn version(s: &str) -> Version {
    Version::parse(s).unwrap()
}

fn key(s: &str) -> PackageKey {
    PackageKey::new(ConfigurationId::MAIN, name(s))
}

/// Build an index from package manifest texts.
fn index(manifests: &[&str]) -> AvailableIndex {
    let mut index = AvailableIndex::new();
    for text in manifests {
        index.add(PackageManifest::parse(text).unwrap(), "f1");
    }
    index
}

fn selected(n: &str, v: &str, prerequisites: &[(&str, Option<&str>)]) -> SelectedPackage {
    let mut p = SelectedPackage::new(name(n), version(v));
    for (dep, constraint) in prerequisites {
        p.prerequisites.insert(
            key(dep),
            constraint.map(|c| VersionConstraint::parse(c).unwrap()),
        );
    }
    p
}

fn plan_for(
    index: &AvailableIndex,
    store: &SelectedStore,
    requests: &[BuildRequest],
) -> Result<Plan, ResolveError> {
    let configs = ConfigurationSet::new("/nonexistent/cfg");
    let ctx = PlannerContext {
        configs: &configs,
        index,
        selected: store,
        options: PlanOptions::default(),
    };
    build_plan(&ctx, requests)
}

fn action_names(plan: &Plan) -> Vec<String> {
    plan.actions.iter().map(|a| a.describe()).collect()
}

// ----------------------------------------------------------------------
// Concrete scenarios
// ----------------------------------------------------------------------

/// A repository offering one package, a request to build it.
#[test]
fn test_trivial_build() {
    let index = index(&["name: libfoo\nversion: 1.0.0\n"]);
    let store = SelectedStore::new();

    let plan = plan_for(&index, &store, &[BuildRequest::build(name("libfoo"))]).unwrap();
    assert_eq!(action_names(&plan), ["build libfoo/1.0.0"]);
    assert!(plan.actions[0].hold_package);
    assert!(!plan.actions[0].hold_version);
}

/// Upgrading a dependency reconfigures its existing dependent as
/// long as the dependent's constraint still holds.
#[test]
fn test_version_replacement_reconfigures_dependent() {
    let index = index(&[
        "name: libfoo\nversion: 1.0.0\n",
        "name: libfoo\nversion: 2.0.0\n",
        "name: bar\nversion: 1.0.0\ndepends: libfoo >= 1.0.0\n",
    ]);
    let mut store = SelectedStore::new();
    store.insert(
        ConfigurationId::MAIN,
        selected("libfoo", "1.0.0", &[]),
    );
    store.insert(
        ConfigurationId::MAIN,
        selected("bar", "1.0.0", &[("libfoo", Some(">= 1.0.0"))]),
    );

    let plan = plan_for(
        &index,
        &store,
        &[BuildRequest::build_version(name("libfoo"), version("2.0.0"))],
    )
    .unwrap();

    assert_eq!(
        action_names(&plan),
        ["upgrade libfoo/2.0.0", "reconfigure bar/1.0.0"]
    );
    assert!(matches!(
        plan.actions[1].action,
        BuildAction::Adjust {
            reconfigure: true,
            ..
        }
    ));
}

/// The violated variant: the dependent's constraint excludes the new
/// version and nothing refines it away.
#[test]
fn test_version_replacement_unsatisfied_dependent() {
    let index = index(&[
        "name: libfoo\nversion: 1.0.0\n",
        "name: libfoo\nversion: 2.0.0\n",
    ]);
    let mut store = SelectedStore::new();
    store.insert(ConfigurationId::MAIN, selected("libfoo", "1.0.0", &[]));
    store.insert(
        ConfigurationId::MAIN,
        selected("bar", "1.0.0", &[("libfoo", Some("< 2.0.0"))]),
    );

    let err = plan_for(
        &index,
        &store,
        &[BuildRequest::build_version(name("libfoo"), version("2.0.0"))],
    )
    .unwrap_err();

    match err {
        ResolveError::UnsatisfiedDependent {
            dependent,
            dependency,
            version,
            ..
        } => {
            assert!(dependent.contains("bar"));
            assert_eq!(dependency, "libfoo");
            assert_eq!(version.to_string(), "2.0.0");
        }
        other => panic!("expected UnsatisfiedDependent, got {other}"),
    }
}

/// A dependency cycle among packages being configured is fatal and
/// names the concrete cycle.
#[test]
fn test_cycle_detection() {
    let index = index(&[
        "name: aa\nversion: 1.0.0\ndepends: bb\n",
        "name: bb\nversion: 1.0.0\ndepends: aa\n",
    ]);
    let store = SelectedStore::new();

    let err = plan_for(&index, &store, &[BuildRequest::build(name("aa"))]).unwrap_err();
    assert_eq!(
        err.to_string(),
        "dependency cycle detected: aa depends on bb, bb depends on aa"
    );
}

/// Dependents whose accept predicates cannot both hold fail the
/// negotiation with the dependency named.
#[test]
fn test_negotiation_failure() {
    let index = index(&[
        "name: libcommon\nversion: 1.0.0\n",
        "name: liba\nversion: 1.0.0\ndepends: libcommon prefer { config.libcommon.shared = true } accept (config.libcommon.shared)\n",
        "name: app\nversion: 1.0.0\ndepends: libcommon prefer { config.libcommon.shared = false } accept (!config.libcommon.shared)\n",
    ]);
    let store = SelectedStore::new();

    let err = plan_for(
        &index,
        &store,
        &[
            BuildRequest::build(name("liba")),
            BuildRequest::build(name("app")),
        ],
    )
    .unwrap_err();

    assert_eq!(
        err.to_string(),
        "unable to negotiate sensible configuration for dependency libcommon"
    );
}

/// The recovering variant: an unacceptable alternative is skipped on the
/// restart and the second alternative wins.
#[test]
fn test_unacceptable_alternative_recovery() {
    let index = index(&[
        "name: libcommon\nversion: 1.0.0\n",
        "name: libother\nversion: 1.0.0\n",
        "name: liba\nversion: 1.0.0\ndepends: libcommon prefer { config.libcommon.shared = true } accept (config.libcommon.shared)\n",
        "name: app\nversion: 1.0.0\ndepends: libcommon prefer { config.libcommon.shared = false } accept (!config.libcommon.shared) | libother\n",
    ]);
    let store = SelectedStore::new();

    let plan = plan_for(
        &index,
        &store,
        &[
            BuildRequest::build(name("liba")),
            BuildRequest::build(name("app")),
        ],
    )
    .unwrap();

    let built: Vec<&str> = plan
        .actions
        .iter()
        .map(|a| a.key.name.as_str())
        .collect();
    assert!(built.contains(&"libother"), "plan: {built:?}");
    assert!(built.contains(&"libcommon"));

    // app ends up on its second alternative.
    let app = plan
        .actions
        .iter()
        .find(|a| a.key.name.as_str() == "app")
        .unwrap();
    assert_eq!(app.selected_alternatives, [Some(1)]);
}

/// Two dependents with compatible preferences over the same
/// dependency negotiate in a single cluster and the dependency is
/// collected once.
#[test]
fn test_postponement_fixpoint() {
    let index = index(&[
        "name: libz\nversion: 1.0.0\n",
        "name: xx\nversion: 1.0.0\ndepends: libz prefer { config.libz.shared = true } accept (config.libz.shared)\n",
        "name: yy\nversion: 1.0.0\ndepends: libz prefer { config.libz.shared = true } accept (config.libz.shared)\n",
    ]);
    let store = SelectedStore::new();

    let plan = plan_for(
        &index,
        &store,
        &[
            BuildRequest::build(name("xx")),
            BuildRequest::build(name("yy")),
        ],
    )
    .unwrap();

    // libz appears exactly once and carries the negotiated value.
    let z: Vec<_> = plan
        .actions
        .iter()
        .filter(|a| a.key.name.as_str() == "libz")
        .collect();
    assert_eq!(z.len(), 1);
    assert_eq!(
        z[0].config_variables.get("config.libz.shared"),
        Some(&mortar_core::Value::Bool(true))
    );

    // Dependencies are ordered before both dependents.
    assert_eq!(plan.actions[0].key.name.as_str(), "libz");
}

/// A dependency first collected plainly and then hit by a dependent with
/// configuration gets postponed and re-collected under the negotiation.
#[test]
fn test_postpone_dependency_restart() {
    let index = index(&[
        "name: libz\nversion: 1.0.0\n",
        "name: duser\nversion: 1.0.0\ndepends: libz\n",
        "name: dconf\nversion: 1.0.0\ndepends: libz prefer { config.libz.cache = true } accept (config.libz.cache)\n",
    ]);
    let store = SelectedStore::new();

    let plan = plan_for(
        &index,
        &store,
        &[
            BuildRequest::build(name("duser")),
            BuildRequest::build(name("dconf")),
        ],
    )
    .unwrap();

    let z = plan
        .actions
        .iter()
        .find(|a| a.key.name.as_str() == "libz")
        .unwrap();
    assert_eq!(
        z.config_variables.get("config.libz.cache"),
        Some(&mortar_core::Value::Bool(true))
    );
    assert_eq!(plan.actions.len(), 3);
}

/// Two dependents disagreeing on the preferred version converge through
/// a version replacement and a scratch restart.
#[test]
fn test_version_replacement_between_dependents() {
    let index = index(&[
        "name: libfoo\nversion: 1.0.0\n",
        "name: libfoo\nversion: 2.0.0\n",
        "name: app1\nversion: 1.0.0\ndepends: libfoo\n",
        "name: app2\nversion: 1.0.0\ndepends: libfoo < 2.0.0\n",
    ]);
    let store = SelectedStore::new();

    let plan = plan_for(
        &index,
        &store,
        &[
            BuildRequest::build(name("app1")),
            BuildRequest::build(name("app2")),
        ],
    )
    .unwrap();

    let libfoo = plan
        .actions
        .iter()
        .find(|a| a.key.name.as_str() == "libfoo")
        .unwrap();
    assert_eq!(libfoo.version.as_ref().unwrap().to_string(), "1.0.0");
}

/// A held package resists an up/downgrade forced by a dependent.
#[test]
fn test_held_package_resists_upgrade() {
    let index = index(&[
        "name: libfoo\nversion: 1.0.0\n",
        "name: libfoo\nversion: 2.0.0\n",
        "name: app\nversion: 1.0.0\ndepends: libfoo >= 2.0.0\n",
    ]);
    let mut store = SelectedStore::new();
    let mut held = selected("libfoo", "1.0.0", &[]);
    held.hold_package = true;
    held.hold_version = true;
    store.insert(ConfigurationId::MAIN, held);

    let err = plan_for(&index, &store, &[BuildRequest::build(name("app"))]).unwrap_err();
    assert!(err.to_string().contains("held"), "got: {err}");
}

/// Build-time dependencies resolve into a linked host configuration.
#[test]
fn test_buildtime_dependency_uses_host_configuration() {
    let index = index(&[
        "name: cmakegen\nversion: 1.0.0\n",
        "name: app\nversion: 1.0.0\ndepends: * cmakegen\n",
    ]);
    let store = SelectedStore::new();

    let mut configs = ConfigurationSet::new("/nonexistent/cfg");
    let host = configs.link("/nonexistent/host", ConfigurationKind::Host, false);
    let ctx = PlannerContext {
        configs: &configs,
        index: &index,
        selected: &store,
        options: PlanOptions::default(),
    };

    let plan = build_plan(&ctx, &[BuildRequest::build(name("app"))]).unwrap();
    let r#gen = plan
        .actions
        .iter()
        .find(|a| a.key.name.as_str() == "cmakegen")
        .unwrap();
    assert_eq!(r#gen.key.configuration, host);
}

/// Without a host configuration the planner reports the private-config
/// requirement rather than silently building into the target.
#[test]
fn test_buildtime_dependency_without_host_configuration() {
    let index = index(&[
        "name: cmakegen\nversion: 1.0.0\n",
        "name: app\nversion: 1.0.0\ndepends: * cmakegen\n",
    ]);
    let store = SelectedStore::new();

    let err = plan_for(&index, &store, &[BuildRequest::build(name("app"))]).unwrap_err();
    assert!(matches!(err, ResolveError::PrivateConfigRequired { .. }));
}

/// A drop request takes effect only when no dependent still requires the
/// package; otherwise the holds are cleared.
#[test]
fn test_drop_request() {
    let index = index(&["name: libfoo\nversion: 1.0.0\n"]);

    // No dependents: dropped.
    let mut store = SelectedStore::new();
    let mut held = selected("libfoo", "1.0.0", &[]);
    held.hold_package = true;
    store.insert(ConfigurationId::MAIN, held.clone());

    let plan = plan_for(&index, &store, &[BuildRequest::drop_package(name("libfoo"))]).unwrap();
    assert_eq!(action_names(&plan), ["drop libfoo/1.0.0"]);

    // A dependent keeps it alive; only the holds go.
    store.insert(
        ConfigurationId::MAIN,
        selected("bar", "1.0.0", &[("libfoo", None)]),
    );
    let plan = plan_for(&index, &store, &[BuildRequest::drop_package(name("libfoo"))]).unwrap();
    assert_eq!(plan.actions.len(), 1);
    assert!(matches!(
        plan.actions[0].action,
        BuildAction::Adjust { unhold: true, .. }
    ));
}

// ----------------------------------------------------------------------
// Boundary behaviors and laws
// ----------------------------------------------------------------------

/// No requests, no plan.
#[test]
fn test_empty_request_is_empty_plan() {
    let index = index(&["name: libfoo\nversion: 1.0.0\n"]);
    let store = SelectedStore::new();
    let plan = plan_for(&index, &store, &[]).unwrap();
    assert!(plan.is_noop());
}

/// Rebuilding an unchanged, already-held package is a no-op.
#[test]
fn test_unchanged_build_is_noop() {
    let index = index(&["name: libfoo\nversion: 1.0.0\n"]);
    let mut store = SelectedStore::new();
    let mut held = selected("libfoo", "1.0.0", &[]);
    held.hold_package = true;
    store.insert(ConfigurationId::MAIN, held);

    let plan = plan_for(&index, &store, &[BuildRequest::build(name("libfoo"))]).unwrap();
    assert!(plan.is_noop(), "plan: {:?}", action_names(&plan));
}

/// Planning is deterministic.
#[test]
fn test_plan_is_deterministic() {
    let index = index(&[
        "name: libfoo\nversion: 1.0.0\n",
        "name: libbar\nversion: 1.0.0\ndepends: libfoo\n",
        "name: app\nversion: 1.0.0\ndepends: libbar\ndepends: libfoo\n",
    ]);
    let store = SelectedStore::new();
    let requests = [BuildRequest::build(name("app"))];

    let first = plan_for(&index, &store, &requests).unwrap();
    let second = plan_for(&index, &store, &requests).unwrap();
    assert_eq!(action_names(&first), action_names(&second));
}

/// A successful plan applied over its own result is a no-op.
#[test]
fn test_plan_is_idempotent() {
    let index = index(&[
        "name: libfoo\nversion: 1.0.0\n",
        "name: app\nversion: 1.0.0\ndepends: libfoo >= 1.0.0\n",
    ]);
    let mut store = SelectedStore::new();
    let requests = [BuildRequest::build(name("app"))];

    let plan = plan_for(&index, &store, &requests).unwrap();
    assert!(!plan.is_noop());
    plan.apply(&mut store);

    let again = plan_for(&index, &store, &requests).unwrap();
    assert!(again.is_noop(), "second plan: {:?}", action_names(&again));
}

/// Structural spot-checks over a non-trivial plan.
#[test]
fn test_plan_invariants() {
    let index = index(&[
        "name: libbase\nversion: 1.0.0\n",
        "name: libfoo\nversion: 1.2.0\ndepends: libbase ^1.0.0\n",
        "name: libbar\nversion: 2.1.0\ndepends: libbase ^1.0.0\n",
        "name: app\nversion: 0.5.0\ndepends: {libfoo libbar}\n",
    ]);
    let store = SelectedStore::new();

    let plan = plan_for(&index, &store, &[BuildRequest::build(name("app"))]).unwrap();

    // Each action appears exactly once.
    let mut names: Vec<&str> = plan.actions.iter().map(|a| a.key.name.as_str()).collect();
    names.sort_unstable();
    names.dedup();
    assert_eq!(names.len(), plan.actions.len());

    // Recorded prerequisites are satisfied by the planned versions.
    for action in &plan.actions {
        for (dep, constraint) in &action.prerequisites {
            let planned = plan
                .actions
                .iter()
                .find(|a| &a.key == dep)
                .and_then(|a| a.version.clone())
                .unwrap();
            if let Some(c) = constraint {
                assert!(c.satisfies(&planned), "{dep} {c} vs {planned}");
            }
        }
    }

    // Every dependency precedes its dependents.
    let position = |n: &str| {
        plan.actions
            .iter()
            .position(|a| a.key.name.as_str() == n)
            .unwrap()
    };
    assert!(position("libbase") < position("libfoo"));
    assert!(position("libbase") < position("libbar"));
    assert!(position("libfoo") < position("app"));
    assert!(position("libbar") < position("app"));
}

/// Enable conditions filter alternatives; reflect assignments feed later
/// clauses.
#[test]
fn test_enable_and_reflect() {
    let index = index(&[
        "name: libssl\nversion: 1.0.0\n",
        "name: libextra\nversion: 1.0.0\n",
        "name: app\nversion: 1.0.0\n\
         depends: libssl reflect { config.app.with_ssl = true }\n\
         depends: libextra ? (config.app.with_ssl)\n",
    ]);
    let store = SelectedStore::new();

    let plan = plan_for(&index, &store, &[BuildRequest::build(name("app"))]).unwrap();
    let built: Vec<&str> = plan.actions.iter().map(|a| a.key.name.as_str()).collect();
    assert!(built.contains(&"libextra"), "plan: {built:?}");
}

/// An existing configured dependency satisfying the constraint is reused
/// without any action.
#[test]
fn test_selected_dependency_is_reused() {
    let index = index(&[
        "name: libfoo\nversion: 1.0.0\n",
        "name: libfoo\nversion: 2.0.0\n",
        "name: app\nversion: 1.0.0\ndepends: libfoo >= 1.0.0\n",
    ]);
    let mut store = SelectedStore::new();
    store.insert(ConfigurationId::MAIN, selected("libfoo", "1.0.0", &[]));

    let plan = plan_for(&index, &store, &[BuildRequest::build(name("app"))]).unwrap();
    assert_eq!(action_names(&plan), ["build app/1.0.0"]);
}

/// With `--upgrade` the same request moves the dependency to the best
/// version instead.
#[test]
fn test_upgrade_policy() {
    let index = index(&[
        "name: libfoo\nversion: 1.0.0\n",
        "name: libfoo\nversion: 2.0.0\n",
    ]);
    let mut store = SelectedStore::new();
    store.insert(ConfigurationId::MAIN, selected("libfoo", "1.0.0", &[]));

    let configs = ConfigurationSet::new("/nonexistent/cfg");
    let ctx = PlannerContext {
        configs: &configs,
        index: &index,
        selected: &store,
        options: PlanOptions {
            upgrade: true,
            ..PlanOptions::default()
        },
    };

    let plan = build_plan(&ctx, &[BuildRequest::build(name("libfoo"))]).unwrap();
    assert_eq!(action_names(&plan), ["upgrade libfoo/2.0.0"]);
}

/// `--patch` stays within the minor series.
#[test]
fn test_patch_policy() {
    let index = index(&[
        "name: libfoo\nversion: 1.0.5\n",
        "name: libfoo\nversion: 1.1.0\n",
    ]);
    let mut store = SelectedStore::new();
    store.insert(ConfigurationId::MAIN, selected("libfoo", "1.0.1", &[]));

    let configs = ConfigurationSet::new("/nonexistent/cfg");
    let ctx = PlannerContext {
        configs: &configs,
        index: &index,
        selected: &store,
        options: PlanOptions {
            patch: true,
            ..PlanOptions::default()
        },
    };

    let plan = build_plan(&ctx, &[BuildRequest::build(name("libfoo"))]).unwrap();
    assert_eq!(action_names(&plan), ["upgrade libfoo/1.0.5"]);
}

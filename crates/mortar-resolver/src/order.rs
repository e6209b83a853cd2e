//! The ordering engine.
//!
//! Topologically sorts action-bearing build-packages so that every entry's
//! runtime dependencies precede it in the execution list. For a package
//! being rebuilt whose dependencies were re-collected, its
//! previously-configured prerequisites that need disfiguring are ordered
//! before it as well. A repeated key in the active chain is a dependency
//! cycle and fails with the concrete cycle spelled out.

use crate::build_package::BuildPackageMap;
use crate::error::{ResolveError, Result};
use mortar_core::PackageKey;
use mortar_database::SelectedStore;
use tracing::trace;

/// Order one package (and, recursively, its dependencies). With `reorder`
/// an already-listed entry is re-sorted.
pub fn order_package(
    map: &mut BuildPackageMap,
    key: &PackageKey,
    reorder: bool,
    selected: &SelectedStore,
) -> Result<()> {
    let mut chain = Vec::new();
    order_recursive(map, key, reorder, selected, &mut chain)
}

/// Order every action-bearing entry, holds first for stability.
pub fn order_all(map: &mut BuildPackageMap, selected: &SelectedStore) -> Result<()> {
    let keys: Vec<PackageKey> = map
        .iter()
        .filter(|(_, p)| p.action.is_some())
        .map(|(k, _)| k.clone())
        .collect();
    for key in keys {
        order_package(map, &key, false, selected)?;
    }
    Ok(())
}

fn order_recursive(
    map: &mut BuildPackageMap,
    key: &PackageKey,
    reorder: bool,
    selected: &SelectedStore,
    chain: &mut Vec<PackageKey>,
) -> Result<()> {
    if let Some(start) = chain.iter().position(|k| k == key) {
        return Err(ResolveError::DependencyCycle {
            chain: format_cycle(&chain[start..], key),
        });
    }

    let Some(package) = map.get(key) else {
        return Ok(());
    };
    if !package.action.is_some() {
        return Ok(());
    }
    if map.is_ordered(key) {
        if !reorder {
            return Ok(());
        }
        map.drop_order(key);
    }
    let Some(package) = map.get(key) else {
        return Ok(());
    };

    // Runtime dependencies first.
    let mut prerequisites: Vec<PackageKey> = Vec::new();
    if package.action.is_build() {
        for alternative in &package.dependencies {
            prerequisites.extend(alternative.keys.iter().cloned());
        }
    }
    // Previously-configured prerequisites that will be disfigured.
    if let Some(sp) = &package.selected {
        for prereq in sp.prerequisites.keys() {
            if map.get(prereq).is_some_and(|p| p.action.is_some())
                && !prerequisites.contains(prereq)
            {
                prerequisites.push(prereq.clone());
            }
        }
    }

    chain.push(key.clone());
    for prereq in prerequisites {
        order_recursive(map, &prereq, false, selected, chain)?;
    }
    chain.pop();

    // A dependency ordered while we recursed (diamond) is fine; a second
    // listing is not.
    if !map.is_ordered(key) {
        trace!(package = %key, "ordered");
        map.push_order(key.clone());
    }
    Ok(())
}

fn format_cycle(cycle: &[PackageKey], back_to: &PackageKey) -> String {
    let mut out = String::new();
    for pair in cycle.windows(2) {
        if !out.is_empty() {
            out.push_str(", ");
        }
        out.push_str(&format!("{} depends on {}", pair[0].name, pair[1].name));
    }
    if let Some(last) = cycle.last() {
        if !out.is_empty() {
            out.push_str(", ");
        }
        out.push_str(&format!("{} depends on {}", last.name, back_to.name));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build_package::{BuildAction, BuildPackage, SelectedAlternative};
    use mortar_core::{ConfigurationId, PackageName};
    use mortar_repository::{AvailablePackage, PackageManifest};
    use pretty_assertions::assert_eq;
    use std::sync::Arc;

    fn key(name: &str) -> PackageKey {
        PackageKey::new(ConfigurationId::MAIN, PackageName::parse(name).unwrap())
    }

    fn available(name: &str, deps: &[&str]) -> Arc<AvailablePackage> {
        let mut text = format!("name: {name}\nversion: 1.0.0\n");
        for d in deps {
            text.push_str(&format!("depends: {d}\n"));
        }
        Arc::new(AvailablePackage {
            manifest: PackageManifest::parse(&text).unwrap(),
            fragments: vec!["f1".to_string()],
        })
    }

    fn build(name: &str, deps: &[&str]) -> BuildPackage {
        let mut p = BuildPackage::pre_entered(key(name), None);
        p.action = BuildAction::build();
        p.available = Some(available(name, deps));
        for d in deps {
            p.dependencies.push(SelectedAlternative {
                dependencies: vec![],
                keys: vec![key(d)],
            });
            p.alternatives.push(0);
        }
        p
    }

    #[test]
    fn test_dependencies_ordered_first() {
        let mut map = BuildPackageMap::new();
        map.insert(build("app", &["libfoo"]));
        map.insert(build("libfoo", &[]));

        order_all(&mut map, &SelectedStore::new()).unwrap();
        let names: Vec<&str> = map.ordered().iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, ["libfoo", "app"]);
    }

    #[test]
    fn test_diamond_is_listed_once() {
        let mut map = BuildPackageMap::new();
        map.insert(build("app", &["libfoo", "libbar"]));
        map.insert(build("libfoo", &["libbase"]));
        map.insert(build("libbar", &["libbase"]));
        map.insert(build("libbase", &[]));

        order_all(&mut map, &SelectedStore::new()).unwrap();
        let names: Vec<&str> = map.ordered().iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, ["libbase", "libfoo", "libbar", "app"]);
        map.verify_invariants().unwrap();
    }

    #[test]
    fn test_cycle_detected_with_concrete_chain() {
        let mut map = BuildPackageMap::new();
        map.insert(build("aa", &["bb"]));
        map.insert(build("bb", &["aa"]));

        let err = order_all(&mut map, &SelectedStore::new()).unwrap_err();
        assert_eq!(
            err.to_string(),
            "dependency cycle detected: aa depends on bb, bb depends on aa"
        );
    }

    #[test]
    fn test_reorder_resorts_entry() {
        let mut map = BuildPackageMap::new();
        map.insert(build("libfoo", &[]));
        map.insert(build("app", &["libfoo"]));

        // Order app without its dependency first.
        order_package(&mut map, &key("app"), false, &SelectedStore::new()).unwrap();
        order_package(&mut map, &key("libfoo"), false, &SelectedStore::new()).unwrap();
        let names: Vec<&str> = map.ordered().iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, ["libfoo", "app"]);

        // Reordering app moves it after its dependency again.
        order_package(&mut map, &key("app"), true, &SelectedStore::new()).unwrap();
        let names: Vec<&str> = map.ordered().iter().map(|k| k.name.as_str()).collect();
        assert_eq!(names, ["libfoo", "app"]);
    }
}

//! The selected-package store.
//!
//! Read-mostly view over the state databases of all linked configurations.
//! The resolver consults it constantly (is this package selected, at what
//! version, who depends on it); mutation happens only when a computed plan
//! is committed.

use crate::atomic::{read_state, write_atomic};
use crate::config::{Configuration, ConfigurationSet};
use crate::error::{DatabaseError, Result};
use crate::selected::SelectedPackage;
use mortar_core::{ConfigurationId, PackageKey, PackageName};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

/// On-disk form of one configuration's state.
#[derive(Debug, Default, Serialize, Deserialize)]
struct StateFile {
    /// Format version.
    version: u32,
    /// Selected packages.
    packages: Vec<SelectedPackage>,
}

const STATE_FORMAT: u32 = 1;

/// Selected packages across all linked configurations.
#[derive(Debug, Clone, Default)]
pub struct SelectedStore {
    databases: BTreeMap<ConfigurationId, BTreeMap<PackageName, Arc<SelectedPackage>>>,
}

impl SelectedStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Load the state of every configuration in the set. A missing state
    /// file is an empty database (a freshly created configuration).
    pub fn load(configs: &ConfigurationSet) -> Result<Self> {
        let mut store = Self::new();
        for config in configs.iter() {
            let path = config.state_file();
            let db = store.databases.entry(config.id).or_default();
            if !path.exists() {
                continue;
            }
            let bytes = read_state(&path)?;
            let state: StateFile =
                serde_json::from_slice(&bytes).map_err(|e| DatabaseError::Corrupt {
                    path: path.clone(),
                    reason: e.to_string(),
                })?;
            debug!(configuration = %config.id, packages = state.packages.len(), "state loaded");
            for package in state.packages {
                db.insert(package.name.clone(), Arc::new(package));
            }
        }
        Ok(store)
    }

    /// Persist one configuration's state.
    pub fn save(&self, config: &Configuration) -> Result<()> {
        let packages: Vec<SelectedPackage> = self
            .iter_config(config.id)
            .map(|p| (**p).clone())
            .collect();
        let state = StateFile {
            version: STATE_FORMAT,
            packages,
        };
        let json = serde_json::to_vec_pretty(&state).map_err(|e| DatabaseError::Corrupt {
            path: config.state_file(),
            reason: e.to_string(),
        })?;
        write_atomic(&config.state_file(), &json)
    }

    /// Look up a selected package.
    #[must_use]
    pub fn find(&self, key: &PackageKey) -> Option<Arc<SelectedPackage>> {
        self.databases
            .get(&key.configuration)?
            .get(&key.name)
            .cloned()
    }

    /// Look up a package by name across all configurations, returning the
    /// keys it is selected under.
    #[must_use]
    pub fn find_any(&self, name: &PackageName) -> Vec<(PackageKey, Arc<SelectedPackage>)> {
        self.databases
            .iter()
            .filter_map(|(cfg, db)| {
                db.get(name)
                    .map(|p| (PackageKey::new(*cfg, name.clone()), p.clone()))
            })
            .collect()
    }

    /// Insert or replace a selected package.
    pub fn insert(&mut self, configuration: ConfigurationId, package: SelectedPackage) {
        self.databases
            .entry(configuration)
            .or_default()
            .insert(package.name.clone(), Arc::new(package));
    }

    /// Remove a selected package.
    pub fn remove(&mut self, key: &PackageKey) -> Option<Arc<SelectedPackage>> {
        self.databases.get_mut(&key.configuration)?.remove(&key.name)
    }

    /// Iterate one configuration's packages in name order.
    pub fn iter_config(
        &self,
        configuration: ConfigurationId,
    ) -> impl Iterator<Item = &Arc<SelectedPackage>> {
        self.databases
            .get(&configuration)
            .into_iter()
            .flat_map(BTreeMap::values)
    }

    /// Iterate all packages with their keys.
    pub fn iter(&self) -> impl Iterator<Item = (PackageKey, &Arc<SelectedPackage>)> {
        self.databases.iter().flat_map(|(cfg, db)| {
            db.iter()
                .map(|(name, p)| (PackageKey::new(*cfg, name.clone()), p))
        })
    }

    /// The configured dependents of a package: every selected package
    /// whose prerequisite map names `key`.
    #[must_use]
    pub fn dependents_of(&self, key: &PackageKey) -> Vec<(PackageKey, Arc<SelectedPackage>)> {
        self.iter()
            .filter(|(_, p)| p.prerequisites.contains_key(key))
            .map(|(k, p)| (k, p.clone()))
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mortar_core::Version;
    use pretty_assertions::assert_eq;

    fn selected(name: &str, version: &str) -> SelectedPackage {
        SelectedPackage::new(
            PackageName::parse(name).unwrap(),
            Version::parse(version).unwrap(),
        )
    }

    fn key(name: &str) -> PackageKey {
        PackageKey::new(ConfigurationId::MAIN, PackageName::parse(name).unwrap())
    }

    #[test]
    fn test_insert_find_remove() {
        let mut store = SelectedStore::new();
        store.insert(ConfigurationId::MAIN, selected("libfoo", "1.0.0"));
        assert!(store.find(&key("libfoo")).is_some());
        assert!(store.remove(&key("libfoo")).is_some());
        assert!(store.find(&key("libfoo")).is_none());
    }

    #[test]
    fn test_dependents_of() {
        let mut store = SelectedStore::new();
        let mut bar = selected("bar", "1.0.0");
        bar.prerequisites.insert(key("libfoo"), None);
        store.insert(ConfigurationId::MAIN, selected("libfoo", "1.0.0"));
        store.insert(ConfigurationId::MAIN, bar);

        let deps = store.dependents_of(&key("libfoo"));
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].0, key("bar"));
    }

    #[test]
    fn test_save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let configs = ConfigurationSet::new(dir.path());
        std::fs::create_dir_all(configs.main().state_dir()).unwrap();

        let mut store = SelectedStore::new();
        store.insert(ConfigurationId::MAIN, selected("libfoo", "1.2.3"));
        store.save(configs.main()).unwrap();

        let loaded = SelectedStore::load(&configs).unwrap();
        let p = loaded.find(&key("libfoo")).unwrap();
        assert_eq!(p.version, Version::parse("1.2.3").unwrap());
    }
}

//! Build configurations and their on-disk layout.
//!
//! A configuration is a directory holding everything built into it. Its
//! mortar state lives under `.mortar/`:
//!
//! ```text
//! <config>/.mortar/state.json   selected packages, holds, variables
//! <config>/.mortar/repos/<id>/  one directory per repository state
//! <config>/.mortar/tmp/         checkout temporaries (same filesystem as
//!                               repos/ so renames stay cheap)
//! ```
//!
//! Configurations link to each other: build-time dependencies resolve into
//! a configuration of `Host` kind, build-system modules into `Build2`
//! kind. A linked configuration created implicitly on demand is *private*.

use crate::error::{DatabaseError, Result};
use mortar_core::ConfigurationId;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// The kind of a build configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ConfigurationKind {
    /// Packages built for the target.
    Target,
    /// Build-time dependencies, run on the build host.
    Host,
    /// Build-system modules.
    Build2,
}

/// One build configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Configuration {
    /// Identifier within the configuration set.
    pub id: ConfigurationId,
    /// Configuration directory.
    pub path: PathBuf,
    /// Kind.
    pub kind: ConfigurationKind,
    /// Whether the configuration was auto-created rather than linked
    /// explicitly.
    pub private: bool,
}

impl Configuration {
    /// The mortar state directory.
    #[must_use]
    pub fn state_dir(&self) -> PathBuf {
        self.path.join(".mortar")
    }

    /// The state database file.
    #[must_use]
    pub fn state_file(&self) -> PathBuf {
        self.state_dir().join("state.json")
    }

    /// The repositories directory.
    #[must_use]
    pub fn repositories_dir(&self) -> PathBuf {
        self.state_dir().join("repos")
    }

    /// The checkout temporaries directory. Kept next to
    /// [`Self::repositories_dir`] so directory moves are renames.
    #[must_use]
    pub fn temp_dir(&self) -> PathBuf {
        self.state_dir().join("tmp")
    }
}

/// The set of linked configurations for one run. Id 0 is always the
/// current (target) configuration.
#[derive(Debug, Clone)]
pub struct ConfigurationSet {
    configs: Vec<Configuration>,
}

impl ConfigurationSet {
    /// Create a set with just the main configuration.
    #[must_use]
    pub fn new(main_path: impl Into<PathBuf>) -> Self {
        Self {
            configs: vec![Configuration {
                id: ConfigurationId::MAIN,
                path: main_path.into(),
                kind: ConfigurationKind::Target,
                private: false,
            }],
        }
    }

    /// The main configuration.
    #[must_use]
    pub fn main(&self) -> &Configuration {
        &self.configs[0]
    }

    /// Look up a configuration by id.
    #[must_use]
    pub fn get(&self, id: ConfigurationId) -> Option<&Configuration> {
        self.configs.get(id.0 as usize)
    }

    /// Iterate all configurations.
    pub fn iter(&self) -> impl Iterator<Item = &Configuration> {
        self.configs.iter()
    }

    /// Number of configurations.
    #[must_use]
    pub fn len(&self) -> usize {
        self.configs.len()
    }

    /// A set always holds at least the main configuration.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.configs.is_empty()
    }

    /// Find a linked configuration of the given kind.
    #[must_use]
    pub fn find_kind(&self, kind: ConfigurationKind) -> Option<&Configuration> {
        self.configs.iter().find(|c| c.kind == kind)
    }

    /// Link (or create) a configuration, returning its id.
    pub fn link(
        &mut self,
        path: impl Into<PathBuf>,
        kind: ConfigurationKind,
        private: bool,
    ) -> ConfigurationId {
        let path = path.into();
        if let Some(existing) = self.configs.iter().find(|c| c.path == path) {
            return existing.id;
        }
        let id = ConfigurationId(u32::try_from(self.configs.len()).expect("config count fits u32"));
        self.configs.push(Configuration {
            id,
            path,
            kind,
            private,
        });
        id
    }

    /// The configuration a build-time dependency of `from` resolves into:
    /// an existing `Host` configuration if one is linked. `None` means a
    /// private host configuration would have to be created; the caller
    /// decides whether that is allowed (`--no-private-config`).
    #[must_use]
    pub fn host_for_buildtime(&self) -> Option<&Configuration> {
        self.find_kind(ConfigurationKind::Host)
    }

    /// The default path for an auto-created private host configuration.
    #[must_use]
    pub fn private_host_path(&self) -> PathBuf {
        self.main().state_dir().join("host")
    }
}

/// Verify that a directory looks like an initialized configuration.
pub fn verify_configuration(path: &Path) -> Result<()> {
    if path.join(".mortar").is_dir() {
        Ok(())
    } else {
        Err(DatabaseError::NotConfiguration(path.to_path_buf()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_main_is_id_zero() {
        let set = ConfigurationSet::new("/tmp/cfg");
        assert_eq!(set.main().id, ConfigurationId::MAIN);
        assert_eq!(set.main().kind, ConfigurationKind::Target);
    }

    #[test]
    fn test_link_deduplicates_by_path() {
        let mut set = ConfigurationSet::new("/tmp/cfg");
        let a = set.link("/tmp/host", ConfigurationKind::Host, true);
        let b = set.link("/tmp/host", ConfigurationKind::Host, true);
        assert_eq!(a, b);
        assert_eq!(set.len(), 2);
    }

    #[test]
    fn test_host_lookup() {
        let mut set = ConfigurationSet::new("/tmp/cfg");
        assert!(set.host_for_buildtime().is_none());
        set.link("/tmp/host", ConfigurationKind::Host, false);
        assert!(set.host_for_buildtime().is_some());
    }
}

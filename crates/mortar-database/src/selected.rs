//! Selected packages — the per-configuration record of what has been
//! configured by earlier invocations.

use mortar_core::{PackageKey, PackageName, VariableSet, Version, VersionConstraint};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

/// Package state within a configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageState {
    /// Sources fetched into the configuration.
    Fetched,
    /// Sources unpacked.
    Unpacked,
    /// Configured and usable by dependents.
    Configured,
    /// A previous operation left the package unusable.
    Broken,
}

/// Package substate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PackageSubstate {
    /// Managed by mortar.
    #[default]
    None,
    /// Satisfied by a system package.
    System,
}

/// A package recorded in the configuration database.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SelectedPackage {
    /// Package name.
    pub name: PackageName,
    /// Configured version.
    pub version: Version,
    /// State.
    pub state: PackageState,
    /// Substate.
    #[serde(default)]
    pub substate: PackageSubstate,
    /// Whether the package is held (explicitly requested by the user).
    #[serde(default)]
    pub hold_package: bool,
    /// Whether the version is held (explicitly requested by the user).
    #[serde(default)]
    pub hold_version: bool,
    /// Source directory, relative to the configuration.
    #[serde(default)]
    pub src_root: Option<PathBuf>,
    /// Output directory, relative to the configuration.
    #[serde(default)]
    pub out_root: Option<PathBuf>,
    /// Prerequisites with the constraints this package imposed on them.
    #[serde(default, with = "prerequisite_map")]
    pub prerequisites: BTreeMap<PackageKey, Option<VersionConstraint>>,
    /// Configured variable values.
    #[serde(default)]
    pub config_variables: VariableSet,
    /// Checksum of the configuration the package was built with.
    #[serde(default)]
    pub config_checksum: String,
    /// Indices of the dependency alternatives selected for each `depends`
    /// clause when the package was configured.
    #[serde(default)]
    pub selected_alternatives: Vec<Option<usize>>,
}

impl SelectedPackage {
    /// Create a configured package record.
    #[must_use]
    pub fn new(name: PackageName, version: Version) -> Self {
        Self {
            name,
            version,
            state: PackageState::Configured,
            substate: PackageSubstate::default(),
            hold_package: false,
            hold_version: false,
            src_root: None,
            out_root: None,
            prerequisites: BTreeMap::new(),
            config_variables: VariableSet::new(),
            config_checksum: String::new(),
            selected_alternatives: Vec::new(),
        }
    }

    /// Whether the package is satisfied by a system package.
    #[must_use]
    pub fn is_system(&self) -> bool {
        self.substate == PackageSubstate::System
    }

    /// Whether the package is held in any way.
    #[must_use]
    pub fn is_held(&self) -> bool {
        self.hold_package || self.hold_version
    }

    /// A user-facing `name/version` string.
    #[must_use]
    pub fn display_string(&self) -> String {
        format!("{}/{}", self.name, self.version)
    }
}

impl fmt::Display for SelectedPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

/// JSON does not allow structured map keys, so the prerequisite map is
/// persisted as a list of `(key, constraint)` entries.
mod prerequisite_map {
    use super::{BTreeMap, PackageKey, VersionConstraint};
    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(
        map: &BTreeMap<PackageKey, Option<VersionConstraint>>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        let entries: Vec<_> = map.iter().collect();
        entries.serialize(serializer)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<BTreeMap<PackageKey, Option<VersionConstraint>>, D::Error> {
        let entries: Vec<(PackageKey, Option<VersionConstraint>)> =
            Vec::deserialize(deserializer)?;
        Ok(entries.into_iter().collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_serde_round_trip() {
        let mut p = SelectedPackage::new(
            PackageName::parse("libfoo").unwrap(),
            Version::parse("1.2.3").unwrap(),
        );
        p.hold_package = true;
        p.prerequisites.insert(
            PackageKey::new(
                mortar_core::ConfigurationId::MAIN,
                PackageName::parse("libbar").unwrap(),
            ),
            Some(VersionConstraint::parse(">= 1.0.0").unwrap()),
        );

        let json = serde_json::to_string(&p).unwrap();
        let back: SelectedPackage = serde_json::from_str(&json).unwrap();
        assert_eq!(p, back);
    }
}

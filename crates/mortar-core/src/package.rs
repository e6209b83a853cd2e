//! Package identity and keys.
//!
//! - [`PackageName`]: a validated package name
//! - [`ConfigurationId`]: identifies a build configuration (database)
//! - [`PackageKey`]: `(configuration, name)` — identifies a package slot
//! - [`PackageVersionKey`]: `(configuration, name, version?)` — tags the
//!   origin of a constraint

use crate::version::Version;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use thiserror::Error;

/// Error produced for a malformed package name.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid package name '{0}'")]
pub struct InvalidPackageName(pub String);

/// A validated package name.
///
/// Names must:
/// - be at least two characters long,
/// - start with an ASCII letter,
/// - contain only lowercase letters, digits, `-`, `_`, `+`, and `.`.
#[derive(Clone)]
pub struct PackageName {
    name: Arc<str>,
}

impl PackageName {
    /// Parse and validate a package name.
    pub fn parse(s: &str) -> Result<Self, InvalidPackageName> {
        let s = s.trim();
        let mut chars = s.chars();
        let first_ok = chars.next().is_some_and(|c| c.is_ascii_lowercase());
        let rest_ok = chars.all(|c| {
            c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '-' | '_' | '+' | '.')
        });
        if s.len() < 2 || !first_ok || !rest_ok {
            return Err(InvalidPackageName(s.to_string()));
        }
        Ok(Self { name: Arc::from(s) })
    }

    /// The name as a string slice.
    #[must_use]
    #[inline]
    pub fn as_str(&self) -> &str {
        &self.name
    }

    /// Whether this names a library package (`lib` prefix).
    #[must_use]
    pub fn is_library(&self) -> bool {
        self.name.starts_with("lib")
    }
}

impl fmt::Debug for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", self.as_str())
    }
}

impl fmt::Display for PackageName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl PartialEq for PackageName {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl Eq for PackageName {}

impl PartialOrd for PackageName {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PackageName {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_str().cmp(other.as_str())
    }
}

impl std::hash::Hash for PackageName {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_str().hash(state);
    }
}

impl FromStr for PackageName {
    type Err = InvalidPackageName;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl Serialize for PackageName {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PackageName {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Self::parse(&s).map_err(serde::de::Error::custom)
    }
}

/// Identifies a build configuration (a configuration database).
///
/// Ids are assigned by the configuration set on open; id 0 is always the
/// current (target) configuration.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
pub struct ConfigurationId(pub u32);

impl ConfigurationId {
    /// The current (target) configuration.
    pub const MAIN: Self = Self(0);
}

impl fmt::Display for ConfigurationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "cfg#{}", self.0)
    }
}

/// Canonical `(configuration, name)` package key.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageKey {
    /// Owning configuration.
    pub configuration: ConfigurationId,
    /// Package name.
    pub name: PackageName,
}

impl PackageKey {
    /// Create a key.
    #[must_use]
    pub fn new(configuration: ConfigurationId, name: PackageName) -> Self {
        Self {
            configuration,
            name,
        }
    }
}

impl fmt::Display for PackageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.configuration == ConfigurationId::MAIN {
            write!(f, "{}", self.name)
        } else {
            write!(f, "{} [{}]", self.name, self.configuration)
        }
    }
}

/// A `(configuration, name, version?)` key, used to tag the source of a
/// dependency constraint. An absent version denotes the user command line.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct PackageVersionKey {
    /// Owning configuration.
    pub configuration: ConfigurationId,
    /// Package name.
    pub name: PackageName,
    /// Version, absent for command-line-originated constraints.
    pub version: Option<Version>,
}

impl PackageVersionKey {
    /// Create a key for a concrete package version.
    #[must_use]
    pub fn new(configuration: ConfigurationId, name: PackageName, version: Version) -> Self {
        Self {
            configuration,
            name,
            version: Some(version),
        }
    }

    /// The command-line pseudo-dependent for the given configuration.
    #[must_use]
    pub fn command_line(configuration: ConfigurationId) -> Self {
        Self {
            configuration,
            name: PackageName::parse("command-line").expect("valid name"),
            version: None,
        }
    }

    /// Whether this key denotes the command line rather than a package.
    #[must_use]
    pub fn is_command_line(&self) -> bool {
        self.version.is_none()
    }

    /// Project onto the `(configuration, name)` key.
    #[must_use]
    pub fn package_key(&self) -> PackageKey {
        PackageKey::new(self.configuration, self.name.clone())
    }
}

impl fmt::Display for PackageVersionKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.version {
            Some(v) => write!(f, "{}/{}", PackageKey::new(self.configuration, self.name.clone()), v),
            None => write!(f, "command line"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    #[test_case("libfoo", true)]
    #[test_case("foo-bar", true)]
    #[test_case("x", false ; "too short")]
    #[test_case("9lives", false ; "leading digit")]
    #[test_case("Foo", false ; "uppercase")]
    #[test_case("foo bar", false ; "space")]
    fn test_name_validation(s: &str, ok: bool) {
        assert_eq!(PackageName::parse(s).is_ok(), ok);
    }

    #[test]
    fn test_library_prefix() {
        assert!(PackageName::parse("libfoo").unwrap().is_library());
        assert!(!PackageName::parse("foo").unwrap().is_library());
    }

    #[test]
    fn test_key_ordering() {
        let a = PackageKey::new(ConfigurationId(0), PackageName::parse("aa").unwrap());
        let b = PackageKey::new(ConfigurationId(0), PackageName::parse("bb").unwrap());
        let c = PackageKey::new(ConfigurationId(1), PackageName::parse("aa").unwrap());
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn test_display() {
        let k = PackageKey::new(ConfigurationId::MAIN, PackageName::parse("libfoo").unwrap());
        assert_eq!(k.to_string(), "libfoo");
        let k = PackageKey::new(ConfigurationId(2), PackageName::parse("libfoo").unwrap());
        assert_eq!(k.to_string(), "libfoo [cfg#2]");
    }
}

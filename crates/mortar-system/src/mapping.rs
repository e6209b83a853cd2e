//! Distribution package name and version mapping.

use crate::error::{Result, SystemError};
use mortar_core::{PackageName, Version};
use mortar_repository::PackageManifest;

/// The distribution identity, from `/etc/os-release`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OsRelease {
    /// `ID` value (e.g. `debian`, `ubuntu`).
    pub name_id: String,
    /// `VERSION_ID` value (e.g. `12`).
    pub version_id: String,
    /// `ID_LIKE` values, most-specific first (e.g. `debian` for ubuntu).
    pub like_ids: Vec<String>,
}

impl OsRelease {
    /// Parse the `/etc/os-release` format.
    #[must_use]
    pub fn parse(text: &str) -> Self {
        let mut name_id = String::new();
        let mut version_id = String::new();
        let mut like_ids = Vec::new();
        for line in text.lines() {
            let Some((key, value)) = line.split_once('=') else {
                continue;
            };
            let value = value.trim().trim_matches('"');
            match key.trim() {
                "ID" => name_id = value.to_string(),
                "VERSION_ID" => version_id = value.to_string(),
                "ID_LIKE" => {
                    like_ids = value.split_whitespace().map(str::to_string).collect();
                }
                _ => {}
            }
        }
        Self {
            name_id,
            version_id,
            like_ids,
        }
    }

    /// Manifest keys to consult, most specific first:
    /// `<id>_<version>-name`, `<id>-name`, then the same for each
    /// `ID_LIKE` entry.
    #[must_use]
    pub fn name_keys(&self) -> Vec<String> {
        let mut keys = Vec::new();
        let mut push_for = |id: &str, keys: &mut Vec<String>| {
            if !self.version_id.is_empty() {
                keys.push(format!("{id}_{}-name", self.version_id));
            }
            keys.push(format!("{id}-name"));
        };
        push_for(&self.name_id, &mut keys);
        for id in &self.like_ids {
            push_for(id, &mut keys);
        }
        keys
    }
}

/// The distribution packages a mortar package maps to.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PackageMapping {
    /// The main (runtime) package, empty when only `-dev` is specified.
    pub main: String,
    /// The development package, empty when none applies.
    pub dev: String,
}

impl PackageMapping {
    /// All non-empty package names, main first.
    #[must_use]
    pub fn names(&self) -> Vec<&str> {
        [self.main.as_str(), self.dev.as_str()]
            .into_iter()
            .filter(|n| !n.is_empty())
            .collect()
    }
}

/// Map a mortar package to its distribution packages.
///
/// Consults the manifest keys of [`OsRelease::name_keys`] in order; the
/// first present entry wins. Its value is a space-separated package list:
/// the first name is the main package, a name ending in `-dev` is the
/// development package. Without a manifest entry, library packages derive
/// `name` + `name-dev` and other packages map to themselves.
#[must_use]
pub fn map_package(
    name: &PackageName,
    manifest: Option<&PackageManifest>,
    os: &OsRelease,
) -> PackageMapping {
    if let Some(manifest) = manifest {
        for key in os.name_keys() {
            if let Some(value) = manifest.system_names.get(&key) {
                return parse_name_value(name, value);
            }
        }
    }

    if name.is_library() {
        PackageMapping {
            main: name.as_str().to_string(),
            dev: format!("{name}-dev"),
        }
    } else {
        PackageMapping {
            main: name.as_str().to_string(),
            dev: String::new(),
        }
    }
}

/// Parse a `debian-name`-style value.
fn parse_name_value(_name: &PackageName, value: &str) -> PackageMapping {
    let mut mapping = PackageMapping::default();
    for n in value.split_whitespace() {
        // A value consisting of just a -dev entry means "dev only", as for
        // header-only libraries; the main slot stays empty.
        if n.ends_with("-dev") && mapping.dev.is_empty() {
            mapping.dev = n.to_string();
        } else if mapping.main.is_empty() {
            mapping.main = n.to_string();
        }
    }
    mapping
}

/// Map a distribution version string into the mortar version space.
///
/// Debian versions are `[epoch:]upstream[-revision]`. At most one trailing
/// `+<metadata>` suffix on the upstream is stripped before parsing.
pub fn map_version(system_name: &str, system_version: &str) -> Result<Version> {
    let err = |reason: &str| SystemError::UnmappableVersion {
        system_name: system_name.to_string(),
        system_version: system_version.to_string(),
        reason: reason.to_string(),
    };

    let s = system_version.trim();
    let (epoch, rest) = match s.split_once(':') {
        Some((e, rest)) => (
            e.parse::<u16>().map_err(|_| err("bad epoch"))? + 1,
            rest,
        ),
        None => (1, s),
    };

    let (upstream, revision) = match rest.rsplit_once('-') {
        Some((u, r)) if r.chars().all(|c| c.is_ascii_digit()) => {
            (u, r.parse::<u16>().map_err(|_| err("bad revision"))?)
        }
        _ => (rest, 0),
    };

    // Build metadata like `1.2.3+dfsg` or `1.2.3+really1.2.2` does not
    // exist in the mortar version space; strip one such suffix.
    let upstream = upstream.split_once('+').map_or(upstream, |(u, _)| u);

    let mut version = Version::parse(upstream).map_err(|e| err(&e.to_string()))?;
    version.epoch = epoch;
    version.revision = revision;
    Ok(version)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use test_case::test_case;

    fn os(name_id: &str, version_id: &str) -> OsRelease {
        OsRelease {
            name_id: name_id.to_string(),
            version_id: version_id.to_string(),
            like_ids: vec![],
        }
    }

    fn name(s: &str) -> PackageName {
        PackageName::parse(s).unwrap()
    }

    fn manifest(extra: &str) -> PackageManifest {
        PackageManifest::parse(&format!("name: libcurl\nversion: 8.0.0\n{extra}")).unwrap()
    }

    #[test]
    fn test_os_release_parse() {
        let os = OsRelease::parse("ID=ubuntu\nVERSION_ID=\"24.04\"\nID_LIKE=debian\n");
        assert_eq!(os.name_id, "ubuntu");
        assert_eq!(os.version_id, "24.04");
        assert_eq!(os.like_ids, ["debian"]);
    }

    #[test]
    fn test_versioned_key_wins() {
        let m = manifest("debian-name: libcurl4 libcurl4-openssl-dev\ndebian_9-name: libcurl4 libcurl4-dev\n");
        let mapping = map_package(&name("libcurl"), Some(&m), &os("debian", "9"));
        assert_eq!(mapping.dev, "libcurl4-dev");

        let mapping = map_package(&name("libcurl"), Some(&m), &os("debian", "12"));
        assert_eq!(mapping.dev, "libcurl4-openssl-dev");
    }

    #[test]
    fn test_id_like_fallback() {
        let m = manifest("debian-name: libcurl4 libcurl4-openssl-dev\n");
        let ubuntu = OsRelease {
            name_id: "ubuntu".to_string(),
            version_id: "24.04".to_string(),
            like_ids: vec!["debian".to_string()],
        };
        let mapping = map_package(&name("libcurl"), Some(&m), &ubuntu);
        assert_eq!(mapping.main, "libcurl4");
    }

    #[test]
    fn test_library_derivation() {
        let mapping = map_package(&name("libsqlite3"), None, &os("debian", "12"));
        assert_eq!(mapping.main, "libsqlite3");
        assert_eq!(mapping.dev, "libsqlite3-dev");
    }

    #[test]
    fn test_non_library_derivation() {
        let mapping = map_package(&name("cmake"), None, &os("debian", "12"));
        assert_eq!(mapping.main, "cmake");
        assert_eq!(mapping.dev, "");
    }

    #[test]
    fn test_dev_only_mapping() {
        let m = manifest("debian-name: rapidjson-dev\n");
        let mapping = map_package(&name("librapidjson"), Some(&m), &os("debian", "12"));
        assert_eq!(mapping.main, "");
        assert_eq!(mapping.dev, "rapidjson-dev");
    }

    #[test_case("8.5.0-2", 1, "8.5.0", 2)]
    #[test_case("1:1.2.11-1", 2, "1.2.11", 1)]
    #[test_case("1.2.3+dfsg-4", 1, "1.2.3", 4 ; "metadata stripped")]
    #[test_case("3.11.2", 1, "3.11.2", 0 ; "no revision")]
    fn test_map_version(input: &str, epoch: u16, upstream: &str, revision: u16) {
        let v = map_version("pkg", input).unwrap();
        assert_eq!(v.epoch, epoch);
        assert_eq!(v.upstream, upstream);
        assert_eq!(v.revision, revision);
    }
}

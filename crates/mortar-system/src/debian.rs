//! Debian (and derivatives) package manager integration.
//!
//! Queries package state with `dpkg-query` / `apt-cache policy` and
//! installs with `apt-get`. The command layer is behind [`AptRunner`] so
//! the policy logic is testable without a Debian system.

use crate::error::{Result, SystemError};
use crate::mapping::{OsRelease, map_package, map_version};
use crate::{InstallStatus, PackageStatus, SystemPackageManager};
use ahash::AHashMap;
use mortar_core::PackageName;
use mortar_repository::PackageManifest;
use std::process::Command;
use tracing::{debug, info};

/// Executes apt/dpkg commands.
pub trait AptRunner {
    /// The installed version of a distribution package, if installed.
    fn installed_version(&self, package: &str) -> Result<Option<String>>;

    /// The candidate version `apt-get install` would pick, if any.
    fn candidate_version(&self, package: &str) -> Result<Option<String>>;

    /// Install the given distribution packages.
    fn install(&self, packages: &[String]) -> Result<()>;
}

/// [`AptRunner`] backed by the real system commands.
#[derive(Debug, Default)]
pub struct SystemAptRunner;

impl SystemAptRunner {
    fn run(command: &str, args: &[&str]) -> Result<Option<String>> {
        let out = Command::new(command)
            .args(args)
            .output()
            .map_err(|e| SystemError::Command {
                command: command.to_string(),
                message: e.to_string(),
            })?;
        if out.status.success() {
            Ok(Some(String::from_utf8_lossy(&out.stdout).into_owned()))
        } else {
            Ok(None)
        }
    }
}

impl AptRunner for SystemAptRunner {
    fn installed_version(&self, package: &str) -> Result<Option<String>> {
        let out = Self::run("dpkg-query", &["-W", "-f=${Version} ${Status}", package])?;
        Ok(out.and_then(|s| {
            let mut parts = s.splitn(2, ' ');
            let version = parts.next()?.to_string();
            let status = parts.next().unwrap_or("");
            (status.trim() == "install ok installed" && !version.is_empty()).then_some(version)
        }))
    }

    fn candidate_version(&self, package: &str) -> Result<Option<String>> {
        let out = Self::run("apt-cache", &["policy", package])?;
        Ok(out.and_then(|s| {
            s.lines()
                .find_map(|l| l.trim().strip_prefix("Candidate:").map(str::trim).map(String::from))
                .filter(|v| v != "(none)")
        }))
    }

    fn install(&self, packages: &[String]) -> Result<()> {
        let mut args = vec!["install", "--yes", "--quiet"];
        args.extend(packages.iter().map(String::as_str));
        let out = Command::new("apt-get")
            .args(&args)
            .output()
            .map_err(|e| SystemError::Command {
                command: "apt-get".to_string(),
                message: e.to_string(),
            })?;
        if out.status.success() {
            Ok(())
        } else {
            Err(SystemError::Command {
                command: "apt-get install".to_string(),
                message: String::from_utf8_lossy(&out.stderr).trim().to_string(),
            })
        }
    }
}

/// The Debian system package manager.
pub struct DebianPackageManager<R: AptRunner = SystemAptRunner> {
    os: OsRelease,
    runner: R,
    install_candidates: bool,
    /// Status cache; `None` records "not present in the distribution".
    cache: AHashMap<PackageName, Option<PackageStatus>>,
    /// What `status` promised, checked after `install`.
    promised: AHashMap<String, String>,
}

impl DebianPackageManager<SystemAptRunner> {
    /// Create a manager for the running system.
    #[must_use]
    pub fn new(os: OsRelease, install_candidates: bool) -> Self {
        Self::with_runner(os, SystemAptRunner, install_candidates)
    }
}

impl<R: AptRunner> DebianPackageManager<R> {
    /// Create a manager with a custom command runner.
    #[must_use]
    pub fn with_runner(os: OsRelease, runner: R, install_candidates: bool) -> Self {
        Self {
            os,
            runner,
            install_candidates,
            cache: AHashMap::new(),
            promised: AHashMap::new(),
        }
    }

    fn query(
        &mut self,
        name: &PackageName,
        available: &[PackageManifest],
    ) -> Result<Option<PackageStatus>> {
        // Consult the mapping of the best available manifest, falling back
        // to name derivation.
        let mapping = map_package(name, available.first(), &self.os);
        let names = mapping.names();
        let Some(&primary) = names.first() else {
            return Ok(None);
        };

        let mut installed = 0usize;
        let mut primary_version: Option<String> = None;
        for n in &names {
            if let Some(v) = self.runner.installed_version(n)? {
                installed += 1;
                if *n == primary || primary_version.is_none() {
                    primary_version = Some(v);
                }
            }
        }

        let (status, system_version) = if installed == names.len() {
            (
                InstallStatus::Installed,
                primary_version.expect("installed packages have versions"),
            )
        } else if installed > 0 {
            (
                InstallStatus::PartiallyInstalled,
                primary_version.expect("installed packages have versions"),
            )
        } else if self.install_candidates {
            match self.runner.candidate_version(primary)? {
                Some(v) => (InstallStatus::NotInstalled, v),
                None => return Ok(None),
            }
        } else {
            return Ok(None);
        };

        let version = map_version(primary, &system_version)?;
        self.promised
            .insert(primary.to_string(), system_version.clone());

        debug!(
            package = %name,
            system = primary,
            system_version = %system_version,
            mapped = %version,
            "system package status"
        );

        Ok(Some(PackageStatus {
            status,
            system_name: primary.to_string(),
            system_version,
            version,
        }))
    }
}

impl<R: AptRunner> SystemPackageManager for DebianPackageManager<R> {
    fn status(
        &mut self,
        name: &PackageName,
        available: &[PackageManifest],
    ) -> Result<Option<PackageStatus>> {
        if let Some(cached) = self.cache.get(name) {
            return Ok(cached.clone());
        }
        let status = self.query(name, available)?;
        self.cache.insert(name.clone(), status.clone());
        Ok(status)
    }

    fn install(&mut self, names: &[PackageName]) -> Result<()> {
        let mut to_install = Vec::new();
        for name in names {
            let Some(Some(status)) = self.cache.get(name) else {
                continue;
            };
            if status.status != InstallStatus::Installed {
                let mapping = map_package(name, None, &self.os);
                to_install.extend(mapping.names().into_iter().map(String::from));
            }
        }
        if to_install.is_empty() {
            return Ok(());
        }

        info!(packages = ?to_install, "installing system packages");
        self.runner.install(&to_install)?;

        // Post-install verification: the installed versions must be what
        // status promised.
        for (system_name, promised) in &self.promised {
            if let Some(installed) = self.runner.installed_version(system_name)? {
                if to_install.contains(system_name) && &installed != promised {
                    return Err(SystemError::VersionChanged {
                        system_name: system_name.clone(),
                        promised: promised.clone(),
                        installed,
                    });
                }
            }
        }

        // Installed state changed; drop the cache.
        self.cache.clear();
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[derive(Default)]
    struct FakeApt {
        installed: AHashMap<String, String>,
        candidates: AHashMap<String, String>,
    }

    impl AptRunner for FakeApt {
        fn installed_version(&self, package: &str) -> Result<Option<String>> {
            Ok(self.installed.get(package).cloned())
        }

        fn candidate_version(&self, package: &str) -> Result<Option<String>> {
            Ok(self.candidates.get(package).cloned())
        }

        fn install(&self, _packages: &[String]) -> Result<()> {
            Ok(())
        }
    }

    fn os() -> OsRelease {
        OsRelease {
            name_id: "debian".to_string(),
            version_id: "12".to_string(),
            like_ids: vec![],
        }
    }

    fn name(s: &str) -> PackageName {
        PackageName::parse(s).unwrap()
    }

    #[test]
    fn test_installed_status() {
        let mut apt = FakeApt::default();
        apt.installed
            .insert("libsqlite3".to_string(), "3.40.1-2".to_string());
        apt.installed
            .insert("libsqlite3-dev".to_string(), "3.40.1-2".to_string());

        let mut mgr = DebianPackageManager::with_runner(os(), apt, false);
        let status = mgr.status(&name("libsqlite3"), &[]).unwrap().unwrap();
        assert_eq!(status.status, InstallStatus::Installed);
        assert_eq!(status.system_name, "libsqlite3");
        assert_eq!(status.version.upstream, "3.40.1");
        assert_eq!(status.version.revision, 2);
    }

    #[test]
    fn test_partially_installed() {
        let mut apt = FakeApt::default();
        apt.installed
            .insert("libsqlite3".to_string(), "3.40.1-2".to_string());

        let mut mgr = DebianPackageManager::with_runner(os(), apt, false);
        let status = mgr.status(&name("libsqlite3"), &[]).unwrap().unwrap();
        assert_eq!(status.status, InstallStatus::PartiallyInstalled);
    }

    #[test]
    fn test_not_installed_without_candidates_is_none() {
        let mut mgr = DebianPackageManager::with_runner(os(), FakeApt::default(), false);
        assert!(mgr.status(&name("libzzz"), &[]).unwrap().is_none());
    }

    #[test]
    fn test_candidate_when_install_allowed() {
        let mut apt = FakeApt::default();
        apt.candidates
            .insert("cmake".to_string(), "3.25.1-1".to_string());

        let mut mgr = DebianPackageManager::with_runner(os(), apt, true);
        let status = mgr.status(&name("cmake"), &[]).unwrap().unwrap();
        assert_eq!(status.status, InstallStatus::NotInstalled);
        assert_eq!(status.version.upstream, "3.25.1");
    }

    #[test]
    fn test_status_is_cached() {
        let mut apt = FakeApt::default();
        apt.installed
            .insert("cmake".to_string(), "3.25.1-1".to_string());
        let mut mgr = DebianPackageManager::with_runner(os(), apt, false);

        let first = mgr.status(&name("cmake"), &[]).unwrap();
        // Mutating the runner state after the first query must not change
        // the cached answer.
        mgr.runner.installed.clear();
        let second = mgr.status(&name("cmake"), &[]).unwrap();
        assert_eq!(first, second);
    }
}

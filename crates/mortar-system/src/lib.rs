//! System package manager integration.
//!
//! Maps mortar packages to distribution packages and queries/installs them
//! through the distribution's own tooling. The resolver consumes only the
//! [`SystemPackageManager`] contract; the Debian implementation lives in
//! [`debian`].
//!
//! Name mapping rules, in priority order:
//!
//! 1. The manifest's `<distro>_<version>-name` entry (e.g. `debian_12-name`)
//! 2. The manifest's `<distro>-name` entry (e.g. `debian-name`)
//! 3. Name derivation: `lib*` packages get a `-dev` counterpart
//!    (`libfoo` maps to `libfoo` + `libfoo-dev`), other packages map to
//!    themselves.

pub mod debian;
pub mod error;
pub mod mapping;

pub use debian::{AptRunner, DebianPackageManager, SystemAptRunner};
pub use error::{Result, SystemError};
pub use mapping::{OsRelease, PackageMapping, map_package};

use mortar_core::Version;

/// Installation state of a system package.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstallStatus {
    /// All mapped packages are installed.
    Installed,
    /// Some mapped packages are installed (e.g. main without `-dev`).
    PartiallyInstalled,
    /// No mapped package is installed.
    NotInstalled,
}

/// The status of a mortar package as seen by the system package manager.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageStatus {
    /// Installation state.
    pub status: InstallStatus,
    /// The distribution package name (the main one).
    pub system_name: String,
    /// The distribution version string.
    pub system_version: String,
    /// The distribution version mapped into the mortar version space.
    pub version: Version,
}

/// The system package manager contract the resolver consumes.
pub trait SystemPackageManager {
    /// Query the status of a package. Returns `None` when the package is
    /// not known to the distribution (distinct from not installed).
    /// Results are cached per name.
    fn status(
        &mut self,
        name: &mortar_core::PackageName,
        available: &[mortar_repository::PackageManifest],
    ) -> Result<Option<PackageStatus>>;

    /// Install the given packages. Idempotent; the installed versions must
    /// match what `status` promised, verified after installation.
    fn install(&mut self, names: &[mortar_core::PackageName]) -> Result<()>;
}

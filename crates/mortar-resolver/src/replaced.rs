//! The replaced-versions table.
//!
//! Records speculative version choices made while backtracking: "when you
//! see this package again, use this version (or drop it) instead of the
//! natural choice". Entries trigger a restart-from-scratch when recorded
//! and are applied on the next pass; entries that were never applied are
//! *bogus* and get cancelled, possibly triggering another restart.

use crate::error::{Backtrack, CResult};
use mortar_core::PackageKey;
use mortar_repository::AvailablePackage;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, trace};

/// One replacement: build this version instead, or drop the package.
#[derive(Debug, Clone)]
pub struct ReplacedVersion {
    /// The replacement; `None` means drop instead of build.
    pub available: Option<Arc<AvailablePackage>>,
    /// Fragment to check the replacement out from.
    pub repository_fragment: Option<String>,
    /// Whether the replacement is a system package.
    pub system: bool,
    /// Whether the replacement has been applied to a build-package.
    pub replaced: bool,
}

impl ReplacedVersion {
    /// A replacement with a concrete version.
    #[must_use]
    pub fn build(
        available: Arc<AvailablePackage>,
        repository_fragment: Option<String>,
        system: bool,
    ) -> Self {
        Self {
            available: Some(available),
            repository_fragment,
            system,
            replaced: false,
        }
    }

    /// A drop-instead-of-build replacement.
    #[must_use]
    pub fn drop_package() -> Self {
        Self {
            available: None,
            repository_fragment: None,
            system: false,
            replaced: false,
        }
    }
}

/// The table of speculative version replacements.
#[derive(Debug, Clone, Default)]
pub struct ReplacedVersions {
    entries: BTreeMap<PackageKey, ReplacedVersion>,
}

impl ReplacedVersions {
    /// Create an empty table.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a replacement.
    pub fn insert(&mut self, key: PackageKey, replacement: ReplacedVersion) {
        debug!(
            package = %key,
            version = replacement
                .available
                .as_deref()
                .map_or_else(|| "drop".to_string(), |a| a.version().to_string()),
            "recording version replacement"
        );
        self.entries.insert(key, replacement);
    }

    /// Look up a replacement.
    #[must_use]
    pub fn get(&self, key: &PackageKey) -> Option<&ReplacedVersion> {
        self.entries.get(key)
    }

    /// Mark a replacement as applied to a build-package.
    pub fn mark_applied(&mut self, key: &PackageKey) {
        if let Some(entry) = self.entries.get_mut(key) {
            trace!(package = %key, "replacement applied");
            entry.replaced = true;
        }
    }

    /// Whether the table is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Reset the applied flags for a new collection pass.
    pub fn reset_applied(&mut self) {
        for entry in self.entries.values_mut() {
            entry.replaced = false;
        }
    }

    /// Drop entries that were never applied. With `scratch`, any removal
    /// triggers a restart so the cancelled choices get re-made naturally.
    pub fn cancel_bogus(&mut self, scratch: bool) -> CResult<usize> {
        let before = self.entries.len();
        self.entries.retain(|key, entry| {
            if !entry.replaced {
                debug!(package = %key, "cancelling bogus replacement");
            }
            entry.replaced
        });
        let removed = before - self.entries.len();
        if removed > 0 && scratch {
            return Err(Backtrack::CancelReplacement.into());
        }
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CollectError;
    use mortar_core::{ConfigurationId, PackageName};

    fn key(name: &str) -> PackageKey {
        PackageKey::new(ConfigurationId::MAIN, PackageName::parse(name).unwrap())
    }

    #[test]
    fn test_cancel_bogus_removes_unapplied() {
        let mut table = ReplacedVersions::new();
        table.insert(key("libfoo"), ReplacedVersion::drop_package());
        table.insert(key("libbar"), ReplacedVersion::drop_package());
        table.mark_applied(&key("libbar"));

        assert_eq!(table.cancel_bogus(false).unwrap(), 1);
        assert!(table.get(&key("libfoo")).is_none());
        assert!(table.get(&key("libbar")).is_some());
    }

    #[test]
    fn test_cancel_bogus_scratch_restarts() {
        let mut table = ReplacedVersions::new();
        table.insert(key("libfoo"), ReplacedVersion::drop_package());
        let err = table.cancel_bogus(true).unwrap_err();
        assert!(matches!(
            err,
            CollectError::Backtrack(Backtrack::CancelReplacement)
        ));
    }
}

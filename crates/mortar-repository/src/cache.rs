//! Persisted repository metadata.
//!
//! `rep-fetch` stores the fetched fragments (and the locations they came
//! from) under the configuration's state directory so later planner runs
//! can build the available-package index without touching the network.

use crate::error::{RepositoryError, Result};
use crate::fragment::RepositoryFragment;
use crate::location::RepositoryLocation;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::debug;

/// The persisted metadata of one `rep-fetch` run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FetchedMetadata {
    /// The root locations that were fetched.
    pub locations: Vec<RepositoryLocation>,
    /// All fetched fragments, in chronological order per repository.
    pub fragments: Vec<RepositoryFragment>,
}

/// On-disk cache of fetched repository metadata.
#[derive(Debug)]
pub struct MetadataCache {
    path: PathBuf,
}

impl MetadataCache {
    /// A cache stored at the given file path.
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// The conventional cache location inside a state directory.
    #[must_use]
    pub fn in_state_dir(state_dir: &Path) -> Self {
        Self::new(state_dir.join("repositories.json"))
    }

    /// Load the cached metadata; a missing file is empty metadata.
    pub fn load(&self) -> Result<FetchedMetadata> {
        if !self.path.exists() {
            return Ok(FetchedMetadata::default());
        }
        let bytes = std::fs::read(&self.path).map_err(|e| RepositoryError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        serde_json::from_slice(&bytes).map_err(|e| RepositoryError::InvalidManifest {
            line: None,
            reason: format!("corrupt metadata cache: {e}"),
        })
    }

    /// Store metadata, replacing the previous generation.
    pub fn store(&self, metadata: &FetchedMetadata) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| RepositoryError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let json = serde_json::to_vec_pretty(metadata).map_err(|e| {
            RepositoryError::InvalidManifest {
                line: None,
                reason: e.to_string(),
            }
        })?;
        std::fs::write(&self.path, json).map_err(|e| RepositoryError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        debug!(path = %self.path.display(), fragments = metadata.fragments.len(), "metadata stored");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_cache_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::in_state_dir(dir.path());
        let meta = cache.load().unwrap();
        assert!(meta.fragments.is_empty());
    }

    #[test]
    fn test_store_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let cache = MetadataCache::in_state_dir(dir.path());

        let mut meta = FetchedMetadata::default();
        meta.locations
            .push(RepositoryLocation::parse("dir+/srv/repo").unwrap());
        meta.fragments
            .push(RepositoryFragment::new("f1", "repo"));
        cache.store(&meta).unwrap();

        let loaded = cache.load().unwrap();
        assert_eq!(loaded.locations.len(), 1);
        assert_eq!(loaded.fragments[0].id, "f1");
    }
}

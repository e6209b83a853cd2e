//! The checkout cache.
//!
//! Checking a package out mutates the repository state directory (the
//! worktree moves to the requested commit, links are fixed up). To keep
//! the state directory consistent even when several packages are checked
//! out from the same repository, the cache *moves the state directory
//! out* to the temp directory, performs all checkouts there, and moves it
//! back when closed.
//!
//! The temp directory lives on the same filesystem as the repositories
//! directory, so both moves are renames. `clear` is idempotent; if a
//! crash leaves entries behind, the next run finds the state directory
//! missing and must warn that the repository state is broken and
//! recommend `rep-fetch`.

use crate::error::{Result, VcsError};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, error};

/// One moved-out repository state.
#[derive(Debug)]
struct CacheEntry {
    /// Where the state directory normally lives.
    home: PathBuf,
    /// Where it currently is.
    work: PathBuf,
}

/// Scoped owner of moved-out repository state directories.
#[derive(Debug, Default)]
pub struct CheckoutCache {
    entries: BTreeMap<String, CacheEntry>,
}

impl CheckoutCache {
    /// Create an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the working directory for a repository state, moving it
    /// out of `repos_dir` into `temp_dir` on first use.
    pub fn acquire(
        &mut self,
        repos_dir: &Path,
        temp_dir: &Path,
        state_id: &str,
    ) -> Result<PathBuf> {
        if let Some(entry) = self.entries.get(state_id) {
            return Ok(entry.work.clone());
        }

        let home = repos_dir.join(state_id);
        if !home.is_dir() {
            return Err(VcsError::BrokenState(home));
        }
        fs::create_dir_all(temp_dir).map_err(|e| VcsError::io(temp_dir, e))?;
        let work = temp_dir.join(state_id);

        debug!(from = %home.display(), to = %work.display(), "moving repository state out");
        fs::rename(&home, &work).map_err(|e| VcsError::io(&home, e))?;

        self.entries.insert(
            state_id.to_string(),
            CacheEntry {
                home,
                work: work.clone(),
            },
        );
        Ok(work)
    }

    /// Restore every moved-out state directory. Idempotent; stops at the
    /// first failure, leaving the remaining entries for a later attempt.
    pub fn clear(&mut self) -> Result<()> {
        while let Some((id, entry)) = self.entries.pop_first() {
            debug!(from = %entry.work.display(), to = %entry.home.display(), "restoring repository state");
            if let Err(e) = fs::rename(&entry.work, &entry.home) {
                let work = entry.work.clone();
                // Put the entry back so a retry (or drop) sees it.
                self.entries.insert(id, entry);
                return Err(VcsError::Io {
                    path: work,
                    source: e,
                });
            }
        }
        Ok(())
    }

    /// Whether any state directories are still moved out.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Drop for CheckoutCache {
    fn drop(&mut self) {
        if self.clear().is_err() || !self.is_empty() {
            for entry in self.entries.values() {
                error!(
                    state = %entry.home.display(),
                    "repository state is broken, run 'mortar rep-fetch' to repair"
                );
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_acquire_moves_and_clear_restores() {
        let dir = tempfile::tempdir().unwrap();
        let repos = dir.path().join("repos");
        let temp = dir.path().join("tmp");
        fs::create_dir_all(repos.join("abc123")).unwrap();
        fs::write(repos.join("abc123/marker"), b"x").unwrap();

        let mut cache = CheckoutCache::new();
        let work = cache.acquire(&repos, &temp, "abc123").unwrap();
        assert!(work.join("marker").is_file());
        assert!(!repos.join("abc123").exists());

        // Second acquire reuses the moved-out directory.
        assert_eq!(cache.acquire(&repos, &temp, "abc123").unwrap(), work);

        cache.clear().unwrap();
        assert!(repos.join("abc123/marker").is_file());

        // clear is idempotent.
        cache.clear().unwrap();
    }

    #[test]
    fn test_acquire_missing_state_is_broken() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = CheckoutCache::new();
        let err = cache
            .acquire(&dir.path().join("repos"), &dir.path().join("tmp"), "none")
            .unwrap_err();
        assert!(matches!(err, VcsError::BrokenState(_)));
    }
}

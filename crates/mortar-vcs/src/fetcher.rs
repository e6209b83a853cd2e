//! Git-backed repository fetcher.
//!
//! Maintains a clone of each git repository under the configuration's
//! repositories directory and reads manifests straight from the object
//! database (`git show`), so fetching never disturbs the worktree.

use crate::error::VcsError;
use crate::git::GitRepository;
use chrono::DateTime;
use mortar_repository::error::{FetchErrorKind, RepositoryError};
use mortar_repository::{
    PackageManifest, RepositoryFetcher, RepositoryFragment, RepositoryLocation, RepositoryManifest,
    RepositoryType,
};
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Fetcher for `git` repositories.
#[derive(Debug)]
pub struct GitFetcher {
    /// The configuration's repositories directory.
    repos_dir: PathBuf,
    /// Network timeout for clone and fetch.
    timeout: Option<Duration>,
}

impl GitFetcher {
    /// Create a fetcher storing clones under `repos_dir`.
    #[must_use]
    pub fn new(repos_dir: impl Into<PathBuf>) -> Self {
        Self {
            repos_dir: repos_dir.into(),
            timeout: None,
        }
    }

    /// Set the network timeout.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    fn repository(&self, location: &RepositoryLocation) -> Result<GitRepository, VcsError> {
        let dir = self.repos_dir.join(location.state_id());
        if dir.join(".git").exists() {
            let repo = GitRepository::open(&dir)?.with_timeout(self.timeout);
            repo.fetch()?;
            Ok(repo)
        } else {
            GitRepository::clone_with_timeout(&location.url, &dir, true, self.timeout)
        }
    }
}

impl RepositoryFetcher for GitFetcher {
    fn fetch(
        &self,
        location: &RepositoryLocation,
        _shallow: bool,
        reason: &str,
    ) -> mortar_repository::Result<Vec<RepositoryFragment>> {
        if location.r#type != RepositoryType::Git {
            return Err(RepositoryError::fetch(
                FetchErrorKind::MetadataInvalid,
                format!("'{location}' is not a git repository"),
            ));
        }
        info!(repository = %location, reason, "fetching git repository");

        let repo = self.repository(location).map_err(to_fetch_error)?;
        let reference = location.fragment.as_deref().unwrap_or("HEAD");
        let commit = repo.rev_parse(reference).map_err(to_fetch_error)?;

        let mut fragment = RepositoryFragment::new(&commit, location.friendly_name())
            .with_repository(location.to_string());
        fragment.timestamp = repo
            .commit_time(&commit)
            .ok()
            .and_then(|t| DateTime::from_timestamp(t, 0))
            .unwrap_or(DateTime::UNIX_EPOCH);

        if let Some(text) = repo
            .show_file(&commit, "packages.manifest")
            .map_err(to_fetch_error)?
        {
            fragment.packages = PackageManifest::parse_all(&text)?;
        } else {
            return Err(RepositoryError::fetch(
                FetchErrorKind::MetadataInvalid,
                format!("'{location}' has no packages.manifest at {reference}"),
            ));
        }

        if let Some(text) = repo
            .show_file(&commit, "repositories.manifest")
            .map_err(to_fetch_error)?
        {
            fragment.repositories = RepositoryManifest::parse_all(&text)?;
        }

        Ok(vec![fragment])
    }
}

fn to_fetch_error(e: VcsError) -> RepositoryError {
    let kind = match &e {
        VcsError::Git { message } if message.contains("Authentication") => {
            FetchErrorKind::AuthError
        }
        VcsError::RefNotFound { .. } => FetchErrorKind::MetadataInvalid,
        _ => FetchErrorKind::NetworkError,
    };
    RepositoryError::fetch(kind, e.to_string())
}

//! Shared source-materialization logic for `pkg-checkout` and
//! `pkg-fetch`.
//!
//! Materializes a package's source from the repository state into the
//! configuration directory. Git repositories go through the checkout
//! cache: the state directory is moved out to the temp directory (same
//! filesystem, so a rename), the requested fragment is checked out there
//! with the worktree fixed up, the package subtree is copied into place,
//! and the state is restored when the cache closes.

use anyhow::{Context as _, Result, anyhow, bail};
use mortar_core::{PackageName, Version};
use mortar_database::{
    Configuration, PackageState, SelectedPackage, SelectedStore,
};
use mortar_repository::{AvailableIndex, FetchedMetadata, RepositoryLocation, RepositoryType};
use mortar_vcs::{CheckoutCache, GitRepository, fixup_worktree};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// What state to leave the materialized package in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MaterializeState {
    /// Sources fetched only.
    Fetched,
    /// Sources unpacked and ready to configure.
    Unpacked,
}

/// Materialize one package version into the configuration, recording it
/// in the store.
pub fn materialize(
    config: &Configuration,
    store: &mut SelectedStore,
    metadata: &FetchedMetadata,
    index: &AvailableIndex,
    name: &PackageName,
    version: Option<&Version>,
    dest_root: Option<&Path>,
    replace: bool,
    state: MaterializeState,
) -> Result<SelectedPackage> {
    let available = match version {
        Some(v) => index
            .find(name, v)
            .ok_or_else(|| anyhow!("unknown package {name}/{v}"))?,
        None => index
            .best(name, None)
            .ok_or_else(|| anyhow!("unknown package {name}"))?,
    };
    let version = available.version().clone();

    let fragment_id = available
        .fragments
        .first()
        .ok_or_else(|| anyhow!("{name}/{version} has no repository fragment"))?;
    let fragment = metadata
        .fragments
        .iter()
        .find(|f| &f.id == fragment_id)
        .ok_or_else(|| anyhow!("fragment {fragment_id} is not in the fetched metadata"))?;
    let location = RepositoryLocation::parse(&fragment.repository)?;

    let dest_root = dest_root.map_or_else(|| config.path.clone(), Path::to_path_buf);
    let dest = dest_root.join(format!("{name}-{version}"));
    if dest.exists() {
        if !replace {
            bail!("'{}' already exists; use --replace", dest.display());
        }
        std::fs::remove_dir_all(&dest)
            .with_context(|| format!("removing {}", dest.display()))?;
    }

    match location.r#type {
        RepositoryType::Dir => {
            let repo_dir = Path::new(&location.url);
            let source = if repo_dir.join(name.as_str()).is_dir() {
                repo_dir.join(name.as_str())
            } else {
                repo_dir.to_path_buf()
            };
            copy_tree(&source, &dest)?;
        }
        RepositoryType::Git | RepositoryType::Pkg => {
            let mut cache = CheckoutCache::new();
            let work = cache.acquire(
                &config.repositories_dir(),
                &config.temp_dir(),
                &location.state_id(),
            )?;
            let repo = GitRepository::open(&work)?;
            repo.checkout(&fragment.id)?;
            fixup_worktree(&work, false)?;

            let source = if work.join(name.as_str()).is_dir() {
                work.join(name.as_str())
            } else {
                work.clone()
            };
            copy_tree(&source, &dest)?;

            fixup_worktree(&work, true)?;
            cache.clear()?;
        }
    }

    debug!(package = %name, version = %version, dest = %dest.display(), "source materialized");

    let mut package = SelectedPackage::new(name.clone(), version.clone());
    package.state = match state {
        MaterializeState::Fetched => PackageState::Fetched,
        MaterializeState::Unpacked => PackageState::Unpacked,
    };
    package.src_root = Some(PathBuf::from(format!("{name}-{version}")));
    store.insert(config.id, package.clone());
    store.save(config)?;

    info!(package = %name, version = %version, "package checked out");
    Ok(package)
}

fn copy_tree(source: &Path, dest: &Path) -> Result<()> {
    std::fs::create_dir_all(dest).with_context(|| format!("creating {}", dest.display()))?;
    for entry in walkdir::WalkDir::new(source)
        .min_depth(1)
        .into_iter()
        // The VCS bookkeeping stays behind.
        .filter_entry(|e| e.file_name() != ".git")
    {
        let entry = entry.with_context(|| format!("walking {}", source.display()))?;
        let rel = entry.path().strip_prefix(source).expect("entry under source");
        let target = dest.join(rel);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)
                .with_context(|| format!("creating {}", target.display()))?;
        } else {
            if let Some(parent) = target.parent() {
                std::fs::create_dir_all(parent)
                    .with_context(|| format!("creating {}", parent.display()))?;
            }
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("copying to {}", target.display()))?;
        }
    }
    Ok(())
}

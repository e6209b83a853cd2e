//! `rep-fetch` - fetch repository metadata.
//!
//! Fetches the given repository locations (or the previously fetched
//! set), following complement edges always and prerequisite edges for the
//! roots, and persists the fragments for later planner runs.

use crate::context::Context;
use anyhow::{Result, bail};
use clap::Args;
use indicatif::{ProgressBar, ProgressStyle};
use mortar_database::{ConfigurationSet, verify_configuration};
use mortar_repository::{
    DirFetcher, FetchedMetadata, MetadataCache, RepositoryFetcher, RepositoryFragment,
    RepositoryLocation, RepositoryType, fetch_repositories,
};
use mortar_vcs::GitFetcher;
use std::process::ExitCode;
use tracing::info;

/// Arguments for `rep-fetch`.
#[derive(Args, Debug, Clone)]
pub struct RepFetchArgs {
    /// Repository locations to fetch (previously fetched ones when
    /// omitted)
    #[arg(value_name = "LOCATION")]
    pub locations: Vec<String>,

    /// Fetch only the latest fragment of each repository
    #[arg(long)]
    pub shallow: bool,
}

/// A fetcher dispatching on the repository type.
struct TypedFetcher {
    dir: DirFetcher,
    git: GitFetcher,
}

impl RepositoryFetcher for TypedFetcher {
    fn fetch(
        &self,
        location: &RepositoryLocation,
        shallow: bool,
        reason: &str,
    ) -> mortar_repository::Result<Vec<RepositoryFragment>> {
        match location.r#type {
            RepositoryType::Dir => self.dir.fetch(location, shallow, reason),
            RepositoryType::Git | RepositoryType::Pkg => self.git.fetch(location, shallow, reason),
        }
    }
}

pub fn run(ctx: &Context, args: &RepFetchArgs) -> Result<ExitCode> {
    verify_configuration(&ctx.directory)?;
    let configs = ConfigurationSet::new(&ctx.directory);
    let main = configs.main();

    let cache = MetadataCache::in_state_dir(&main.state_dir());
    let previous = cache.load()?;

    let locations: Vec<RepositoryLocation> = if args.locations.is_empty() {
        previous.locations.clone()
    } else {
        args.locations
            .iter()
            .map(|l| RepositoryLocation::parse(l))
            .collect::<mortar_repository::Result<_>>()?
    };
    if locations.is_empty() {
        bail!("no repositories to fetch; specify a location");
    }

    let fetcher = TypedFetcher {
        dir: DirFetcher::new(),
        git: GitFetcher::new(main.repositories_dir()).with_timeout(Some(ctx.fetch_timeout)),
    };

    let bar = if ctx.progress {
        let bar = ProgressBar::new(locations.len() as u64);
        bar.set_style(
            ProgressStyle::with_template("{spinner} fetching {pos}/{len} {wide_msg}")
                .expect("valid template"),
        );
        Some(bar)
    } else {
        None
    };

    let mut fragments = Vec::new();
    for location in &locations {
        if let Some(bar) = &bar {
            bar.set_message(location.friendly_name());
        }
        fragments.extend(fetch_repositories(&fetcher, location, args.shallow)?);
        if let Some(bar) = &bar {
            bar.inc(1);
        }
    }
    if let Some(bar) = bar {
        bar.finish_and_clear();
    }

    let packages: usize = fragments.iter().map(|f| f.packages.len()).sum();
    cache.store(&FetchedMetadata {
        locations,
        fragments,
    })?;

    info!(packages, "repository metadata fetched");
    println!("fetched {packages} package(s)");
    Ok(ExitCode::SUCCESS)
}

//! `pkg-fetch` - fetch a package's source without configuring it.

use crate::checkout::{MaterializeState, materialize};
use crate::context::Context;
use anyhow::Result;
use clap::Args;
use mortar_core::{PackageName, Version};
use mortar_database::{ConfigurationSet, SelectedStore, verify_configuration};
use mortar_repository::{AvailableIndex, MetadataCache};
use std::process::ExitCode;

/// Arguments for `pkg-fetch`.
#[derive(Args, Debug, Clone)]
pub struct PkgFetchArgs {
    /// Package to fetch: `name` or `name/version`
    #[arg(value_name = "PKG")]
    pub package: String,

    /// Replace an existing source directory
    #[arg(long)]
    pub replace: bool,
}

pub fn run(ctx: &Context, args: &PkgFetchArgs) -> Result<ExitCode> {
    verify_configuration(&ctx.directory)?;
    let configs = ConfigurationSet::new(&ctx.directory);
    let main = configs.main();

    let mut store = SelectedStore::load(&configs)?;
    let metadata = MetadataCache::in_state_dir(&main.state_dir()).load()?;
    let index = AvailableIndex::from_fragments(&metadata.fragments);

    let (name, version) = match args.package.split_once('/') {
        Some((n, v)) => (PackageName::parse(n)?, Some(Version::parse(v)?)),
        None => (PackageName::parse(&args.package)?, None),
    };

    let package = materialize(
        main,
        &mut store,
        &metadata,
        &index,
        &name,
        version.as_ref(),
        None,
        args.replace,
        MaterializeState::Fetched,
    )?;

    println!("fetched {package}");
    Ok(ExitCode::SUCCESS)
}

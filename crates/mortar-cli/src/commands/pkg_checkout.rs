//! `pkg-checkout` - check a package's source out into the configuration.

use crate::checkout::{MaterializeState, materialize};
use crate::context::Context;
use anyhow::Result;
use clap::Args;
use mortar_core::{PackageName, Version};
use mortar_database::{ConfigurationSet, SelectedStore, verify_configuration};
use mortar_repository::{AvailableIndex, MetadataCache};
use std::path::PathBuf;
use std::process::ExitCode;

/// Arguments for `pkg-checkout`.
#[derive(Args, Debug, Clone)]
pub struct PkgCheckoutArgs {
    /// Package to check out: `name` or `name/version`
    #[arg(value_name = "PKG")]
    pub package: String,

    /// Check out into this directory instead of the configuration
    #[arg(long, value_name = "DIR")]
    pub output_root: Option<PathBuf>,

    /// Replace an existing source directory
    #[arg(long)]
    pub replace: bool,
}

pub fn run(ctx: &Context, args: &PkgCheckoutArgs) -> Result<ExitCode> {
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
        args.output_root.as_deref(),
        args.replace,
        MaterializeState::Unpacked,
    )?;

    println!("checked out {package}");
    Ok(ExitCode::SUCCESS)
}

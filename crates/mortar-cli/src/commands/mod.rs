//! CLI commands for mortar.

pub mod cfg_create;
pub mod pkg_build;
pub mod pkg_checkout;
pub mod pkg_fetch;
pub mod rep_fetch;

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// mortar - a source-based package manager for a C++-centric build
/// ecosystem
#[derive(Parser, Debug)]
#[command(name = "mortar")]
#[command(author = "Mortar Contributors")]
#[command(version)]
#[command(about = "A source-based package manager", long_about = None)]
#[command(propagate_version = true)]
#[command(arg_required_else_help = true)]
pub struct Cli {
    /// Do not output any message
    #[arg(short = 'q', long, global = true)]
    pub quiet: bool,

    /// Assume yes for all interactive questions
    #[arg(short = 'y', long, global = true)]
    pub yes: bool,

    /// Use the specified configuration directory
    #[arg(short = 'd', long = "directory", global = true, value_name = "DIR")]
    pub directory: Option<PathBuf>,

    /// Display progress indicators
    #[arg(long, global = true, conflicts_with = "no_progress")]
    pub progress: bool,

    /// Suppress progress indicators
    #[arg(long, global = true)]
    pub no_progress: bool,

    /// Timeout for network fetches, in seconds
    #[arg(long, global = true, value_name = "SECONDS", default_value_t = 60)]
    pub fetch_timeout: u64,

    /// Increase the verbosity of messages: -v, -vv, -vvv
    #[arg(short = 'v', long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    #[command(subcommand)]
    pub command: Commands,
}

/// The subcommands.
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Create a new build configuration
    #[command(name = "cfg-create")]
    CfgCreate(cfg_create::CfgCreateArgs),

    /// Fetch the metadata of the configured repositories
    #[command(name = "rep-fetch")]
    RepFetch(rep_fetch::RepFetchArgs),

    /// Build, upgrade, or drop packages
    #[command(name = "pkg-build")]
    PkgBuild(pkg_build::PkgBuildArgs),

    /// Check a package's source out into the configuration
    #[command(name = "pkg-checkout")]
    PkgCheckout(pkg_checkout::PkgCheckoutArgs),

    /// Fetch a package's source without configuring it
    #[command(name = "pkg-fetch")]
    PkgFetch(pkg_fetch::PkgFetchArgs),
}

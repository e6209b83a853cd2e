//! `cfg-create` - initialize a build configuration directory.

use crate::context::Context;
use anyhow::{Context as _, Result, bail};
use clap::Args;
use mortar_database::{ConfigurationSet, SelectedStore};
use std::process::ExitCode;
use tracing::info;

/// Arguments for `cfg-create`.
#[derive(Args, Debug, Clone)]
pub struct CfgCreateArgs {
    /// Directory to create the configuration in (defaults to the
    /// working directory)
    #[arg(id = "target_dir", value_name = "DIR")]
    pub directory: Option<std::path::PathBuf>,
}

pub fn run(ctx: &Context, args: &CfgCreateArgs) -> Result<ExitCode> {
    let directory = args.directory.clone().unwrap_or_else(|| ctx.directory.clone());
    let configs = ConfigurationSet::new(&directory);
    let main = configs.main();

    if main.state_file().exists() {
        bail!("'{}' is already a mortar configuration", directory.display());
    }

    std::fs::create_dir_all(main.state_dir())
        .with_context(|| format!("creating {}", main.state_dir().display()))?;
    std::fs::create_dir_all(main.repositories_dir())
        .with_context(|| format!("creating {}", main.repositories_dir().display()))?;
    std::fs::create_dir_all(main.temp_dir())
        .with_context(|| format!("creating {}", main.temp_dir().display()))?;

    SelectedStore::new().save(main)?;

    info!(directory = %directory.display(), "configuration created");
    println!("created new configuration in {}", directory.display());
    Ok(ExitCode::SUCCESS)
}

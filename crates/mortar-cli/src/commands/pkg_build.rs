//! `pkg-build` - build, upgrade, downgrade, or drop packages.
//!
//! The primary entry point of the planner: computes a consistent,
//! totally-ordered execution plan for the requested packages and commits
//! it to the configuration database.

use crate::context::Context;
use anyhow::{Result, bail};
use clap::Args;
use dialoguer::Confirm;
use mortar_core::{PackageName, Version};
use mortar_database::{ConfigurationKind, ConfigurationSet, SelectedStore, verify_configuration};
use mortar_repository::{AvailableIndex, MetadataCache};
use mortar_resolver::{
    BuildRequest, Plan, PlanOptions, PlannerContext, ResolveError, UpgradePolicy, build_plan,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{debug, info};

/// Arguments for `pkg-build`.
#[derive(Args, Debug, Clone)]
pub struct PkgBuildArgs {
    /// Packages to build: `name`, `name/version`, or `?name` to drop
    #[arg(value_name = "PKG", required = true)]
    pub packages: Vec<String>,

    /// Upgrade the named packages to the best available versions
    #[arg(short = 'u', long)]
    pub upgrade: bool,

    /// Upgrade the named packages within their minor series
    #[arg(long, conflicts_with = "upgrade")]
    pub patch: bool,

    /// Apply the upgrade policy to dependencies as well
    #[arg(short = 'r', long)]
    pub recursive: bool,

    /// Replace orphaned package versions
    #[arg(long)]
    pub deorphan: bool,

    /// Configure the packages but do not update them
    #[arg(long)]
    pub configure_only: bool,

    /// Keep the output directories of replaced packages
    #[arg(long)]
    pub keep_out: bool,

    /// Disfigure the packages before configuring
    #[arg(long)]
    pub disfigure: bool,

    /// Check sources out into this directory
    #[arg(long, value_name = "DIR")]
    pub checkout_root: Option<PathBuf>,

    /// Purge checked-out sources after the run
    #[arg(long)]
    pub checkout_purge: bool,

    /// Link an existing host configuration for build-time dependencies
    #[arg(long, value_name = "DIR")]
    pub config_link: Option<PathBuf>,

    /// Instead of auto-creating a private host configuration, print the
    /// proposal and exit with this code
    #[arg(long, value_name = "CODE")]
    pub no_private_config: Option<u8>,

    /// Dependency configuration variables (`name=value`)
    #[arg(long = "config-var", value_name = "VAR")]
    pub config_vars: Vec<String>,
}

pub fn run(ctx: &Context, args: &PkgBuildArgs) -> Result<ExitCode> {
    verify_configuration(&ctx.directory)?;
    let mut configs = ConfigurationSet::new(&ctx.directory);
    if let Some(host) = &args.config_link {
        configs.link(host, ConfigurationKind::Host, false);
    }

    let mut store = SelectedStore::load(&configs)?;
    let metadata = MetadataCache::in_state_dir(&configs.main().state_dir()).load()?;
    let index = AvailableIndex::from_fragments(&metadata.fragments);

    let requests = parse_requests(args)?;
    let planner = PlannerContext {
        configs: &configs,
        index: &index,
        selected: &store,
        options: PlanOptions {
            upgrade: args.upgrade,
            patch: args.patch,
            recursive: args.recursive,
            deorphan: args.deorphan,
        },
    };

    let plan = match build_plan(&planner, &requests) {
        Ok(plan) => plan,
        Err(ResolveError::PrivateConfigRequired {
            dependency,
            proposed,
        }) => {
            if let Some(code) = args.no_private_config {
                println!("{proposed}");
                eprintln!(
                    "build-time dependency {dependency} requires a host configuration; \
                     a private one would be created at {proposed}"
                );
                return Ok(ExitCode::from(code));
            }
            bail!(
                "build-time dependency {dependency} requires a host configuration; \
                 link one with --config-link or allow a private one"
            );
        }
        Err(e) => bail!("{e}"),
    };

    if plan.is_noop() {
        println!("nothing to be done");
        return Ok(ExitCode::SUCCESS);
    }

    print_plan(&plan);
    if !ctx.yes && !confirm()? {
        println!("aborted");
        return Ok(ExitCode::FAILURE);
    }

    execute(&plan, &mut store, &configs)?;
    info!(actions = plan.actions.len(), "plan committed");
    Ok(ExitCode::SUCCESS)
}

fn parse_requests(args: &PkgBuildArgs) -> Result<Vec<BuildRequest>> {
    let mut requests = Vec::new();
    for spec in &args.packages {
        let (drop, spec) = match spec.strip_prefix('?') {
            Some(rest) => (true, rest),
            None => (false, spec.as_str()),
        };
        let (name, version) = match spec.split_once('/') {
            Some((n, v)) => (n, Some(Version::parse(v)?)),
            None => (spec, None),
        };
        let name = PackageName::parse(name)?;

        let mut request = if drop {
            BuildRequest::drop_package(name)
        } else if let Some(version) = version {
            BuildRequest::build_version(name, version)
        } else {
            BuildRequest::build(name)
        };
        request.configure_only = args.configure_only;
        request.keep_out = args.keep_out;
        request.disfigure = args.disfigure;
        request.checkout_root = args.checkout_root.clone();
        request.checkout_purge = args.checkout_purge;
        request.deorphan = args.deorphan;
        if args.upgrade {
            request.upgrade = Some(UpgradePolicy::Upgrade);
        } else if args.patch {
            request.upgrade = Some(UpgradePolicy::Patch);
        }
        for var in &args.config_vars {
            request
                .config_vars
                .assign_str(var)
                .map_err(|e| anyhow::anyhow!("{e}"))?;
        }
        debug!(?request, "parsed request");
        requests.push(request);
    }
    Ok(requests)
}

fn print_plan(plan: &Plan) {
    for action in &plan.actions {
        println!("  {}", action.describe());
    }
}

fn confirm() -> Result<bool> {
    Ok(Confirm::new()
        .with_prompt("continue?")
        .default(true)
        .interact()?)
}

/// Commit the plan: update the configuration database. Source checkout
/// and build-system invocation are performed per package by
/// `pkg-checkout`/`pkg-fetch` and the build system respectively.
fn execute(plan: &Plan, store: &mut SelectedStore, configs: &ConfigurationSet) -> Result<()> {
    plan.apply(store);
    for config in configs.iter() {
        if config.state_dir().is_dir() {
            store.save(config)?;
        }
    }
    println!("committed {} action(s)", plan.actions.len());
    Ok(())
}

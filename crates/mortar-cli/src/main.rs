//! The mortar CLI - a source-based package manager for a C++-centric
//! build ecosystem.

#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

mod checkout;
mod commands;
mod context;

use clap::Parser;
use commands::{Cli, Commands};
use context::Context;
use std::process::ExitCode;
use tracing::Level;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Verbosity drives the log level.
    let log_level = match cli.verbose {
        0 if cli.quiet => Level::ERROR,
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::builder()
        .with_default_directive(log_level.into())
        .from_env_lossy();

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .without_time()
        .init();

    let ctx = match Context::new(&cli) {
        Ok(ctx) => ctx,
        Err(e) => {
            eprintln!("error: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let result = match &cli.command {
        Commands::CfgCreate(args) => commands::cfg_create::run(&ctx, args),
        Commands::RepFetch(args) => commands::rep_fetch::run(&ctx, args),
        Commands::PkgBuild(args) => commands::pkg_build::run(&ctx, args),
        Commands::PkgCheckout(args) => commands::pkg_checkout::run(&ctx, args),
        Commands::PkgFetch(args) => commands::pkg_fetch::run(&ctx, args),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

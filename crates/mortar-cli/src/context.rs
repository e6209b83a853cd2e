//! Shared command context: the configuration directory and global flags.

use crate::commands::Cli;
use anyhow::Result;
use std::path::PathBuf;
use std::time::Duration;

/// Resolved global state every command receives.
pub struct Context {
    /// The configuration directory.
    pub directory: PathBuf,
    /// Skip interactive confirmation.
    pub yes: bool,
    /// Progress reporting enabled.
    pub progress: bool,
    /// Timeout for external fetches.
    pub fetch_timeout: Duration,
}

impl Context {
    /// Resolve the context from global flags.
    pub fn new(cli: &Cli) -> Result<Self> {
        let directory = match &cli.directory {
            Some(d) => d.clone(),
            None => std::env::current_dir()?,
        };
        let progress = if cli.no_progress {
            false
        } else {
            cli.progress || console::user_attended()
        };
        Ok(Self {
            directory,
            yes: cli.yes,
            progress,
            fetch_timeout: Duration::from_secs(cli.fetch_timeout),
        })
    }
}

//! Git operations via the git CLI.
//!
//! The CLI is used rather than a library binding: it is universally
//! available wherever source packages are built, handles every transport,
//! and keeps credential handling in the user's existing configuration.

use crate::error::{Result, VcsError};
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};

/// A local git repository.
#[derive(Debug)]
pub struct GitRepository {
    path: PathBuf,
    /// Network timeout, applied as git's low-speed limit.
    timeout: Option<Duration>,
}

impl GitRepository {
    /// Open an existing repository.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if !path.join(".git").exists() {
            return Err(VcsError::NotRepository(path));
        }
        Ok(Self {
            path,
            timeout: None,
        })
    }

    /// Set the network timeout for subsequent operations.
    #[must_use]
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    /// Clone `url` into `dest`, shallowly unless `deep`.
    pub fn clone(url: &str, dest: &Path, deep: bool) -> Result<Self> {
        Self::clone_with_timeout(url, dest, deep, None)
    }

    /// Clone with a network timeout.
    pub fn clone_with_timeout(
        url: &str,
        dest: &Path,
        deep: bool,
        timeout: Option<Duration>,
    ) -> Result<Self> {
        debug!(url, dest = %dest.display(), deep, "cloning repository");
        if let Some(parent) = dest.parent() {
            std::fs::create_dir_all(parent).map_err(|e| VcsError::io(parent, e))?;
        }

        let mut cmd = Command::new("git");
        timeout_args(&mut cmd, timeout);
        cmd.arg("clone").arg("--quiet");
        if !deep {
            cmd.args(["--depth", "1"]);
        }
        cmd.arg(url).arg(dest);
        run(&mut cmd)?;

        info!(url, "clone complete");
        Ok(Self {
            path: dest.to_path_buf(),
            timeout,
        })
    }

    /// Repository path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Fetch updates for all remotes and tags.
    pub fn fetch(&self) -> Result<()> {
        let mut cmd = Command::new("git");
        timeout_args(&mut cmd, self.timeout);
        cmd.current_dir(&self.path)
            .args(["fetch", "--quiet", "--tags", "origin"]);
        run(&mut cmd)
    }

    /// Resolve a reference (branch, tag, or commit) to a commit id.
    pub fn rev_parse(&self, reference: &str) -> Result<String> {
        let out = output(
            Command::new("git")
                .current_dir(&self.path)
                .args(["rev-parse", "--verify", "--quiet"])
                .arg(format!("{reference}^{{commit}}")),
        )
        .map_err(|_| VcsError::RefNotFound {
            reference: reference.to_string(),
            repository: self.path.display().to_string(),
        })?;
        Ok(out.trim().to_string())
    }

    /// Check out the given commit, materializing submodules.
    pub fn checkout(&self, commit: &str) -> Result<()> {
        run(Command::new("git")
            .current_dir(&self.path)
            .args(["checkout", "--quiet", "--force", commit]))?;
        run(Command::new("git")
            .current_dir(&self.path)
            .args(["submodule", "update", "--quiet", "--init", "--recursive"]))
    }

    /// The commit time of a reference, as a unix timestamp.
    pub fn commit_time(&self, reference: &str) -> Result<i64> {
        let out = output(
            Command::new("git")
                .current_dir(&self.path)
                .args(["log", "-1", "--format=%ct", reference]),
        )?;
        out.trim().parse().map_err(|_| VcsError::Git {
            message: format!("unexpected commit time '{}'", out.trim()),
        })
    }

    /// The content of a file at a reference, without touching the
    /// worktree.
    pub fn show_file(&self, reference: &str, path: &str) -> Result<Option<String>> {
        let out = Command::new("git")
            .current_dir(&self.path)
            .args(["show", &format!("{reference}:{path}")])
            .output()
            .map_err(|e| VcsError::io(&self.path, e))?;
        if out.status.success() {
            Ok(Some(String::from_utf8_lossy(&out.stdout).into_owned()))
        } else {
            Ok(None)
        }
    }

    /// Paths of symlink entries (mode 120000) in the index.
    pub fn symlink_entries(&self) -> Result<Vec<PathBuf>> {
        let out = output(
            Command::new("git")
                .current_dir(&self.path)
                .args(["ls-files", "-s"]),
        )?;
        Ok(out
            .lines()
            .filter_map(|line| {
                let (meta, path) = line.split_once('\t')?;
                meta.starts_with("120000").then(|| PathBuf::from(path))
            })
            .collect())
    }
}

/// Check out `commit` from the repository at `repo_location` into `dest`.
///
/// `dest` must not exist; the repository is cloned (deeply, so any commit
/// is reachable), the commit checked out, and submodules materialized.
pub fn version_control_checkout(repo_location: &str, dest: &Path, commit: &str) -> Result<()> {
    let repo = GitRepository::clone(repo_location, dest, true)?;
    let resolved = repo.rev_parse(commit)?;
    repo.checkout(&resolved)
}

/// A transfer slower than 1 byte/s for the timeout duration aborts.
fn timeout_args(cmd: &mut Command, timeout: Option<Duration>) {
    if let Some(t) = timeout {
        cmd.args(["-c", "http.lowSpeedLimit=1", "-c"])
            .arg(format!("http.lowSpeedTime={}", t.as_secs().max(1)));
    }
}

fn run(cmd: &mut Command) -> Result<()> {
    output(cmd).map(|_| ())
}

fn output(cmd: &mut Command) -> Result<String> {
    debug!(command = ?cmd, "running git");
    let out = cmd.output().map_err(|e| VcsError::Git {
        message: format!("failed to run git: {e}"),
    })?;
    if !out.status.success() {
        return Err(VcsError::Git {
            message: String::from_utf8_lossy(&out.stderr).trim().to_string(),
        });
    }
    Ok(String::from_utf8_lossy(&out.stdout).into_owned())
}

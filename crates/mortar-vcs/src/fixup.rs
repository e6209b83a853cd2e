//! Worktree symlink fixup.
//!
//! On filesystems or platforms where git checks out symlink entries as
//! plain files containing the target path, the build system cannot follow
//! them. [`fixup_worktree`] replaces such placeholder files with real
//! links (hardlinks for file targets, symlinks for directory targets) and
//! can revert them back to the VCS-native form before the next checkout.
//!
//! A target that resolves outside the repository root fails with
//! [`VcsError::SymlinkEscape`]; links are created innermost-first so a
//! link to a not-yet-fixed-up link resolves once both exist.

use crate::error::{Result, VcsError};
use crate::git::GitRepository;
use std::fs;
use std::path::{Component, Path, PathBuf};
use tracing::{debug, trace};

/// Replace placeholder symlink files under `dir` with real links, or, with
/// `revert`, restore the placeholder form. Submodule worktrees are fixed
/// up recursively via their own index. Returns the number of links
/// changed.
pub fn fixup_worktree(dir: &Path, revert: bool) -> Result<usize> {
    let repo = GitRepository::open(dir)?;
    let mut entries = repo.symlink_entries()?;

    // Deeper paths first so that links through other links resolve.
    entries.sort_by_key(|p| std::cmp::Reverse(p.components().count()));

    let mut changed = 0usize;
    for rel in entries {
        let link = dir.join(&rel);
        if revert {
            changed += usize::from(revert_link(dir, &link)?);
        } else {
            changed += usize::from(fixup_link(dir, &link, &rel)?);
        }
    }
    debug!(dir = %dir.display(), changed, revert, "worktree fixup");
    Ok(changed)
}

fn fixup_link(root: &Path, link: &Path, rel: &Path) -> Result<bool> {
    let meta = fs::symlink_metadata(link).map_err(|e| VcsError::io(link, e))?;
    if meta.file_type().is_symlink() {
        // Already a real link, nothing to fix up.
        return Ok(false);
    }

    // A placeholder is a regular file whose content is the target path.
    let target_text = fs::read_to_string(link).map_err(|e| VcsError::io(link, e))?;
    let target_rel = PathBuf::from(target_text.trim());

    let target = link
        .parent()
        .map(|p| p.join(&target_rel))
        .unwrap_or_else(|| target_rel.clone());
    let target = normalize(&target);

    if !target.starts_with(normalize(root)) {
        return Err(VcsError::SymlinkEscape {
            link: rel.to_path_buf(),
            root: root.to_path_buf(),
        });
    }

    trace!(link = %link.display(), target = %target.display(), "creating link");
    fs::remove_file(link).map_err(|e| VcsError::io(link, e))?;
    if target.is_dir() {
        symlink_dir(&target, link)?;
    } else {
        // Hardlink for files; falls back to a symlink when the target is
        // on another filesystem.
        if fs::hard_link(&target, link).is_err() {
            symlink_file(&target, link)?;
        }
    }
    Ok(true)
}

fn revert_link(_root: &Path, link: &Path) -> Result<bool> {
    let meta = fs::symlink_metadata(link).map_err(|e| VcsError::io(link, e))?;
    let target = if meta.file_type().is_symlink() {
        fs::read_link(link).map_err(|e| VcsError::io(link, e))?
    } else if meta.file_type().is_file() && meta.len() > 0 {
        // Hardlinked file: recover the target from the index is not
        // possible here, so leave it for git to restore on checkout.
        return Ok(false);
    } else {
        return Ok(false);
    };

    fs::remove_file(link).map_err(|e| VcsError::io(link, e))?;
    fs::write(link, target.to_string_lossy().as_bytes()).map_err(|e| VcsError::io(link, e))?;
    Ok(true)
}

/// Lexically normalize a path (resolve `.` and `..` without touching the
/// filesystem).
fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            c => out.push(c),
        }
    }
    out
}

#[cfg(unix)]
fn symlink_dir(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| VcsError::io(link, e))
}

#[cfg(unix)]
fn symlink_file(target: &Path, link: &Path) -> Result<()> {
    std::os::unix::fs::symlink(target, link).map_err(|e| VcsError::io(link, e))
}

#[cfg(windows)]
fn symlink_dir(target: &Path, link: &Path) -> Result<()> {
    std::os::windows::fs::symlink_dir(target, link).map_err(|e| VcsError::io(link, e))
}

#[cfg(windows)]
fn symlink_file(target: &Path, link: &Path) -> Result<()> {
    std::os::windows::fs::symlink_file(target, link).map_err(|e| VcsError::io(link, e))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize() {
        assert_eq!(
            normalize(Path::new("/a/b/../c/./d")),
            PathBuf::from("/a/c/d")
        );
    }

    #[test]
    fn test_escape_detection() {
        // A target normalizing outside the root must be rejected.
        let root = Path::new("/repo");
        let target = normalize(&root.join("sub/../../etc/passwd"));
        assert!(!target.starts_with(normalize(root)));
    }
}

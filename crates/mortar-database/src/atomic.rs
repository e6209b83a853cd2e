//! Atomic state-file writes.
//!
//! Writes go through a temp file on the same filesystem:
//!
//! 1. Acquire an exclusive lock on a `.lck` sibling
//! 2. Write the content to a `.tmp` sibling
//! 3. Re-read and verify the blake3 hash
//! 4. Back up the previous generation to `.backup`
//! 5. Atomic rename over the target

use crate::error::{DatabaseError, Result};
use fs2::FileExt;
use std::fs::{self, File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

const TEMP_SUFFIX: &str = "tmp";
const LOCK_SUFFIX: &str = "lck";
const BACKUP_SUFFIX: &str = "backup";

fn sibling(path: &Path, suffix: &str) -> PathBuf {
    let mut name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    name.push('.');
    name.push_str(suffix);
    path.with_file_name(name)
}

/// Write `content` to `target` atomically, verifying integrity.
pub fn write_atomic(target: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = target.parent() {
        fs::create_dir_all(parent).map_err(|e| DatabaseError::io(parent, e))?;
    }

    let lock_path = sibling(target, LOCK_SUFFIX);
    let lock_file = OpenOptions::new()
        .create(true)
        .truncate(false)
        .write(true)
        .open(&lock_path)
        .map_err(|e| DatabaseError::io(&lock_path, e))?;
    lock_file
        .try_lock_exclusive()
        .map_err(|_| DatabaseError::Locked {
            path: target.to_path_buf(),
        })?;

    let expected = blake3::hash(content);

    let temp_path = sibling(target, TEMP_SUFFIX);
    {
        let mut temp =
            File::create(&temp_path).map_err(|e| DatabaseError::io(&temp_path, e))?;
        temp.write_all(content)
            .map_err(|e| DatabaseError::io(&temp_path, e))?;
        temp.sync_all().map_err(|e| DatabaseError::io(&temp_path, e))?;
    }

    // Verify the bytes that actually hit the disk.
    let mut reread = Vec::with_capacity(content.len());
    File::open(&temp_path)
        .and_then(|mut f| f.read_to_end(&mut reread))
        .map_err(|e| DatabaseError::io(&temp_path, e))?;
    if blake3::hash(&reread) != expected {
        let _ = fs::remove_file(&temp_path);
        return Err(DatabaseError::Integrity {
            path: target.to_path_buf(),
        });
    }

    if target.exists() {
        let backup_path = sibling(target, BACKUP_SUFFIX);
        if let Err(e) = fs::copy(target, &backup_path) {
            warn!(path = %backup_path.display(), error = %e, "backup failed");
        }
    }

    fs::rename(&temp_path, target).map_err(|e| DatabaseError::io(target, e))?;
    let _ = FileExt::unlock(&lock_file);
    debug!(path = %target.display(), bytes = content.len(), "state written");
    Ok(())
}

/// Read a state file written by [`write_atomic`].
pub fn read_state(target: &Path) -> Result<Vec<u8>> {
    fs::read(target).map_err(|e| DatabaseError::io(target, e))
}

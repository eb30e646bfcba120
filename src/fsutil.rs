//! File-creation and cleanup discipline shared by the session layer.
//!
//! Checkpoints, seed files, and compiler-input files are created with
//! owner-only permissions, and state files are rejected when writable by
//! group or others. Stale-file removal is best effort: failures are
//! logged, never escalated.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use log::warn;

use crate::error::{Result, RetuneError};

/// Rejects files writable by group or others.
///
/// Checked before reading any checkpoint or seed file so that another
/// user cannot tamper with the run between tuning steps. Not enforceable
/// on non-unix targets.
pub fn check_file_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mode = fs::metadata(path)?.permissions().mode();
        if mode & 0o022 != 0 {
            return Err(RetuneError::InsecurePermissions(path.to_path_buf()));
        }
    }
    #[cfg(not(unix))]
    {
        let _ = path;
    }
    Ok(())
}

/// Writes `bytes` to `path` with owner read/write permissions only,
/// truncating any existing file.
pub fn write_secure(path: &Path, bytes: &[u8]) -> Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    Ok(())
}

/// Writes `bytes` to `path` atomically: the content lands in a temporary
/// file in the same directory first and is renamed over the target, so a
/// crash mid-write leaves the previous file intact.
pub fn write_secure_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp = tmp_path(path);
    write_secure(&tmp, bytes)?;
    fs::rename(&tmp, path)?;
    Ok(())
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

/// Removes the given files, ignoring ones that do not exist. Failures are
/// logged and swallowed: leftover files cannot corrupt correctness.
pub fn remove_files<I>(paths: I)
where
    I: IntoIterator<Item = PathBuf>,
{
    for path in paths {
        if !path.is_file() {
            continue;
        }
        if let Err(err) = fs::remove_file(&path) {
            warn!("failed to remove stale file {}: {err}", path.display());
        }
    }
}

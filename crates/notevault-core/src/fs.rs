//! Filesystem utilities for crash-consistent writes.
//!
//! Every file the vault owns (database image, key slots) is replaced with the
//! same protocol: write a uniquely named temp file next to the target, fsync
//! it, rename it over the target, then fsync the parent directory. A crash at
//! any point leaves either the old or the new file, never a torn one.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use crate::error::{Result, VaultError};

/// Suffix used for in-flight temp files.
const TEMP_SUFFIX: &str = ".tmp";

/// Atomically replace `path` with `data`.
///
/// The new file is created with owner-only permissions on unix.
pub fn write_atomic(path: &Path, data: &[u8]) -> Result<()> {
    let parent = parent_dir(path)?;
    let filename = file_name(path)?;

    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| VaultError::Storage(format!("System time error: {}", e)))?
        .as_nanos();
    let temp_path = parent.join(format!("{}.{}{}", filename, nanos, TEMP_SUFFIX));

    let mut file = OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&temp_path)
        .map_err(|e| VaultError::Storage(format!("Temp file create failed: {}", e)))?;
    set_private_permissions(&temp_path)?;

    let written = file.write_all(data).and_then(|_| file.sync_all());
    drop(file);
    if let Err(e) = written {
        let _ = fs::remove_file(&temp_path);
        return Err(VaultError::Storage(format!("Temp file write failed: {}", e)));
    }

    if let Err(e) = rename_with_fallback(&temp_path, path) {
        // The temp file is only disposable while the destination survives.
        if path.exists() {
            let _ = fs::remove_file(&temp_path);
        }
        return Err(VaultError::Storage(format!("Atomic rename failed: {}", e)));
    }
    sync_dir(&parent);

    Ok(())
}

/// Move `temp_path` over `destination`.
///
/// `fs::rename` replaces an existing file everywhere except Windows, where
/// the destination is removed first and the rename retried. The temp file is
/// never deleted here: after that removal it is the only copy of the data.
pub fn rename_with_fallback(temp_path: &Path, destination: &Path) -> io::Result<()> {
    match fs::rename(temp_path, destination) {
        Ok(()) => Ok(()),
        #[cfg(windows)]
        Err(initial_err) if destination.is_file() => {
            fs::remove_file(destination)?;
            fs::rename(temp_path, destination).map_err(|retry_err| {
                io::Error::new(
                    retry_err.kind(),
                    format!(
                        "rename failed (initial: {}, retry: {}); data kept in {}",
                        initial_err,
                        retry_err,
                        temp_path.display()
                    ),
                )
            })
        }
        Err(err) => Err(err),
    }
}

/// Temp files left next to `path` by writes that never finished, oldest
/// first.
pub fn stale_temp_files(path: &Path) -> Result<Vec<PathBuf>> {
    let parent = parent_dir(path)?;
    let prefix = format!("{}.", file_name(path)?);
    let mut found: Vec<(u128, PathBuf)> = Vec::new();

    let entries = match fs::read_dir(&parent) {
        Ok(entries) => entries,
        Err(err) if err.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(err.into()),
    };

    for entry in entries {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(stamp) = name
            .strip_prefix(&prefix)
            .and_then(|rest| rest.strip_suffix(TEMP_SUFFIX))
            .filter(|middle| middle.bytes().all(|b| b.is_ascii_digit()))
            .and_then(|middle| middle.parse::<u128>().ok())
        else {
            continue;
        };
        found.push((stamp, entry.path()));
    }

    found.sort();
    Ok(found.into_iter().map(|(_, path)| path).collect())
}

/// Delete `paths`, ignoring ones already gone.
pub fn remove_files(paths: &[PathBuf]) -> Result<()> {
    for path in paths {
        match fs::remove_file(path) {
            Ok(()) => {}
            Err(err) if err.kind() == io::ErrorKind::NotFound => {}
            Err(err) => return Err(err.into()),
        }
    }
    Ok(())
}

/// Create the parent directory of `path` if it does not exist.
pub fn ensure_parent_dir(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).map_err(|e| {
                VaultError::Storage(format!(
                    "Failed to create directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }
    }
    Ok(())
}

/// Restrict a file to its owner (no-op off unix).
pub fn set_private_permissions(path: &Path) -> Result<()> {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        let mut perms = fs::metadata(path)?.permissions();
        perms.set_mode(0o600);
        fs::set_permissions(path, perms)?;
    }
    #[cfg(not(unix))]
    let _ = path;
    Ok(())
}

fn parent_dir(path: &Path) -> Result<PathBuf> {
    match path.parent() {
        Some(parent) if parent.as_os_str().is_empty() => Ok(PathBuf::from(".")),
        Some(parent) => Ok(parent.to_path_buf()),
        None => Err(VaultError::Storage("Invalid vault path".to_string())),
    }
}

fn file_name(path: &Path) -> Result<&str> {
    path.file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| VaultError::Storage("Invalid vault filename".to_string()))
}

// Best effort: directory fsync is unsupported on some platforms.
fn sync_dir(dir: &Path) {
    #[cfg(unix)]
    if let Ok(handle) = fs::File::open(dir) {
        let _ = handle.sync_all();
    }
    #[cfg(not(unix))]
    let _ = dir;
}

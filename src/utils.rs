//! Filesystem helpers shared by staging and restore
//!
//! ## Categories of Utilities
//!
//! ### Content
//! - Size-then-bytes file comparison
//! - Copying with timestamp preservation
//!
//! ### Metadata
//! - Mode and ownership application
//! - Raw symlink creation and removal of arbitrary objects
//!
//! ### Paths
//! - Joining archive-relative keys onto a staging root without escaping it
//! - Human-readable byte sizes

use crate::error::{RagnarokError, Result};
use filetime::FileTime;
use std::fs::{self, File};
use std::io::{BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tracing::trace;

/// Compare two regular files by size, then byte by byte
///
/// Both paths are opened through any symlinks. Content is streamed in
/// chunks so large files are never loaded whole.
///
/// # Errors
///
/// - [`RagnarokError::Io`] if either file cannot be read
pub fn files_identical(left: &Path, right: &Path) -> Result<bool> {
    let left_len = fs::metadata(left)?.len();
    let right_len = fs::metadata(right)?.len();
    if left_len != right_len {
        return Ok(false);
    }

    let mut left = BufReader::new(File::open(left)?);
    let mut right = BufReader::new(File::open(right)?);
    let mut left_buf = vec![0u8; 8192];
    let mut right_buf = vec![0u8; 8192];

    loop {
        let read = left.read(&mut left_buf)?;
        if read == 0 {
            // Sizes matched, so the other side is exhausted as well
            return Ok(true);
        }
        right.read_exact(&mut right_buf[..read])?;
        if left_buf[..read] != right_buf[..read] {
            return Ok(false);
        }
    }
}

/// Copy a file and carry over its access and modification times
///
/// Returns the number of bytes copied.
pub fn copy_preserving_times(source: &Path, destination: &Path) -> Result<u64> {
    let bytes = fs::copy(source, destination)?;
    let metadata = fs::metadata(source)?;
    filetime::set_file_times(
        destination,
        FileTime::from_last_access_time(&metadata),
        FileTime::from_last_modification_time(&metadata),
    )?;
    trace!("Copied {:?} -> {:?} ({} bytes)", source, destination, bytes);
    Ok(bytes)
}

/// Create the parent directory of `path` if needed
pub fn ensure_parent(path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    Ok(())
}

/// Set permission bits, including setuid/setgid/sticky
#[cfg(unix)]
pub fn set_permissions(path: &Path, mode: u32) -> Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(mode)).map_err(|source| {
        RagnarokError::PermissionApply {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Set owner and group
#[cfg(unix)]
pub fn set_ownership(path: &Path, uid: u32, gid: u32) -> Result<()> {
    std::os::unix::fs::chown(path, Some(uid), Some(gid)).map_err(|source| {
        RagnarokError::PermissionApply {
            path: path.to_path_buf(),
            source,
        }
    })
}

/// Create a symbolic link holding exactly `target`
///
/// The target text is never resolved. `is_dir` only matters on platforms
/// that distinguish directory links.
#[cfg(unix)]
pub fn create_symlink(target: &Path, link: &Path, _is_dir: bool) -> Result<()> {
    std::os::unix::fs::symlink(target, link)?;
    Ok(())
}

#[cfg(windows)]
pub fn create_symlink(target: &Path, link: &Path, is_dir: bool) -> Result<()> {
    use std::os::windows::fs::{symlink_dir, symlink_file};

    if is_dir {
        symlink_dir(target, link)?;
    } else {
        symlink_file(target, link)?;
    }
    Ok(())
}

/// Remove whatever lives at `path` without following a final symlink
///
/// Real directories are removed recursively; files and links are unlinked.
pub fn remove_path(path: &Path) -> Result<()> {
    let metadata = fs::symlink_metadata(path)?;
    if metadata.is_dir() {
        fs::remove_dir_all(path)?;
    } else {
        fs::remove_file(path)?;
    }
    Ok(())
}

/// Join an archive-relative key onto `base`, refusing to escape it
///
/// Absolute keys and keys containing `..` are rejected.
pub fn safe_join(base: &Path, relative: &str) -> Result<PathBuf> {
    let relative_path = Path::new(relative);
    let mut joined = base.to_path_buf();
    for component in relative_path.components() {
        match component {
            Component::Normal(segment) => joined.push(segment),
            Component::CurDir => {}
            Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                return Err(RagnarokError::invalid_path(
                    relative_path,
                    "archive key escapes the staging root",
                ));
            }
        }
    }
    Ok(joined)
}

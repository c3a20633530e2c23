//! Archive containers and compression
//!
//! A staging tree is packed into exactly one container file and unpacked
//! back into an identical tree. Four formats are supported:
//!
//! | Format         | Extension  | Backend                              |
//! |----------------|------------|--------------------------------------|
//! | [`Compression::None`] | `.tar`     | `tar`                        |
//! | [`Compression::Gz`]   | `.tar.gz`  | `tar` + `flate2` (`.tgz` also read) |
//! | [`Compression::Zstd`] | `.tar.zst` | `tar` + the external `zstd` binary |
//! | [`Compression::Zip`]  | `.zip`     | `zip`                        |
//!
//! Nothing else in the crate looks at compressed bytes.

use crate::error::{RagnarokError, Result};
use chrono::{DateTime, Local};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::path::Path;
use std::process::{Command, Stdio};
use std::str::FromStr;
use tracing::{debug, info};
use walkdir::WalkDir;

/// Container format of a backup archive
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Compression {
    /// Plain tar
    #[default]
    None,
    /// Gzip-compressed tar
    Gz,
    /// Zstandard-compressed tar, produced by the `zstd` binary
    Zstd,
    /// Zip with deflate
    Zip,
}

impl Compression {
    /// File name suffix written for this format
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::None => ".tar",
            Compression::Gz => ".tar.gz",
            Compression::Zstd => ".tar.zst",
            Compression::Zip => ".zip",
        }
    }

    /// External binary this format needs, if any
    pub fn required_tool(&self) -> Option<&'static str> {
        match self {
            Compression::Zstd => Some("zstd"),
            _ => None,
        }
    }

    /// Detect the format from an archive's file name
    ///
    /// # Errors
    ///
    /// - [`RagnarokError::UnsupportedArchiveFormat`] for any other suffix
    pub fn detect(path: &Path) -> Result<Self> {
        let name = path
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| RagnarokError::UnsupportedArchiveFormat(path.to_path_buf()))?;

        if name.ends_with(".tar.gz") || name.ends_with(".tgz") {
            Ok(Compression::Gz)
        } else if name.ends_with(".tar.zst") {
            Ok(Compression::Zstd)
        } else if name.ends_with(".zip") {
            Ok(Compression::Zip)
        } else if name.ends_with(".tar") {
            Ok(Compression::None)
        } else {
            Err(RagnarokError::UnsupportedArchiveFormat(path.to_path_buf()))
        }
    }
}

impl fmt::Display for Compression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Compression::None => "none",
            Compression::Gz => "gz",
            Compression::Zstd => "zstd",
            Compression::Zip => "zip",
        })
    }
}

impl FromStr for Compression {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" | "tar" => Ok(Compression::None),
            "gz" | "gzip" => Ok(Compression::Gz),
            "zstd" | "zst" => Ok(Compression::Zstd),
            "zip" => Ok(Compression::Zip),
            other => Err(format!(
                "unknown compression '{}' (expected none, gz, zstd or zip)",
                other
            )),
        }
    }
}

/// Fail early when the format's external tool is missing from `PATH`
pub fn ensure_tool_available(compression: Compression) -> Result<()> {
    if let Some(tool) = compression.required_tool() {
        which::which(tool).map_err(|_| RagnarokError::CompressionToolUnavailable(tool.to_string()))?;
    }
    Ok(())
}

/// `backup_<YYYYmmdd_HHMMSS><ext>`
pub fn archive_file_name(compression: Compression, timestamp: DateTime<Local>) -> String {
    format!(
        "backup_{}{}",
        timestamp.format("%Y%m%d_%H%M%S"),
        compression.extension()
    )
}

/// Pack the staging tree into `output`, returning the archive size
///
/// The archive is written under a temporary name next to `output` and only
/// renamed into place once complete; a failure leaves nothing behind.
pub fn create_archive(staging: &Path, output: &Path, compression: Compression) -> Result<u64> {
    ensure_tool_available(compression)?;
    debug!("Packing {:?} into {:?} ({})", staging, output, compression);

    let parent = output
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let partial = tempfile::Builder::new()
        .prefix(".ragnarok-")
        .suffix(".partial")
        .tempfile_in(parent)?;

    match compression {
        Compression::None => {
            let writer = BufWriter::new(partial.reopen()?);
            write_tar(staging, writer)?.flush()?;
        }
        Compression::Gz => {
            let encoder = GzEncoder::new(BufWriter::new(partial.reopen()?), flate2::Compression::default());
            write_tar(staging, encoder)?.finish()?.flush()?;
        }
        Compression::Zstd => {
            // zstd works on a finished tar next to the output
            let plain = tempfile::Builder::new()
                .prefix(".ragnarok-")
                .suffix(".tar")
                .tempfile_in(parent)?;
            write_tar(staging, BufWriter::new(plain.reopen()?))?.flush()?;
            run_zstd(
                Command::new("zstd")
                    .arg("-q")
                    .arg("-f")
                    .arg(plain.path())
                    .arg("-o")
                    .arg(partial.path()),
            )?;
        }
        Compression::Zip => write_zip(staging, partial.reopen()?)?,
    }

    partial.persist(output).map_err(|e| e.error)?;
    let size = fs::metadata(output)?.len();
    info!("Created archive {:?} ({} bytes)", output, size);
    Ok(size)
}

/// Unpack `archive` into `destination`, detecting the format from its name
pub fn extract_archive(archive: &Path, destination: &Path) -> Result<Compression> {
    let compression = Compression::detect(archive)?;
    ensure_tool_available(compression)?;
    debug!("Extracting {:?} into {:?} ({})", archive, destination, compression);

    match compression {
        Compression::None => unpack_tar(BufReader::new(File::open(archive)?), destination)?,
        Compression::Gz => unpack_tar(GzDecoder::new(BufReader::new(File::open(archive)?)), destination)?,
        Compression::Zstd => {
            let mut child = Command::new("zstd")
                .arg("-d")
                .arg("-q")
                .arg("-c")
                .arg(archive)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .spawn()
                .map_err(|e| RagnarokError::CompressionFailed(format!("failed to run zstd: {}", e)))?;
            let stdout = child
                .stdout
                .take()
                .ok_or_else(|| RagnarokError::internal("zstd stdout was not captured"))?;
            let unpacked = unpack_tar(stdout, destination);
            if unpacked.is_err() {
                let _ = child.kill();
            }
            let output = child.wait_with_output()?;
            unpacked?;
            if !output.status.success() {
                return Err(RagnarokError::CompressionFailed(format!(
                    "zstd -d exited with {}: {}",
                    output.status,
                    String::from_utf8_lossy(&output.stderr).trim()
                )));
            }
        }
        Compression::Zip => {
            let mut zip = zip::ZipArchive::new(BufReader::new(File::open(archive)?))?;
            zip.extract(destination)?;
        }
    }

    info!("Extracted {:?}", archive);
    Ok(compression)
}

fn write_tar<W: Write>(staging: &Path, writer: W) -> Result<W> {
    let mut builder = tar::Builder::new(writer);
    builder.follow_symlinks(false);
    builder.append_dir_all(".", staging)?;
    Ok(builder.into_inner()?)
}

fn unpack_tar<R: Read>(reader: R, destination: &Path) -> Result<()> {
    let mut archive = tar::Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_preserve_mtime(true);
    archive.set_overwrite(true);
    archive.unpack(destination)?;
    Ok(())
}

fn write_zip(staging: &Path, file: File) -> Result<()> {
    let mut zip = zip::ZipWriter::new(BufWriter::new(file));
    let base = zip::write::FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for entry in WalkDir::new(staging).min_depth(1).sort_by_file_name() {
        let entry = entry?;
        let relative = entry
            .path()
            .strip_prefix(staging)
            .map_err(|e| RagnarokError::internal(e.to_string()))?;
        let name = relative
            .to_str()
            .ok_or_else(|| RagnarokError::invalid_path(relative, "path is not valid UTF-8"))?
            .replace('\\', "/");
        let options = base.unix_permissions(permission_bits(&entry.metadata()?));

        if entry.file_type().is_dir() {
            zip.add_directory(format!("{}/", name), options)?;
        } else if entry.file_type().is_file() {
            zip.start_file(name, options)?;
            io::copy(&mut File::open(entry.path())?, &mut zip)?;
        }
    }

    zip.finish()?.flush()?;
    Ok(())
}

#[cfg(unix)]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o7777
}

#[cfg(not(unix))]
fn permission_bits(metadata: &fs::Metadata) -> u32 {
    if metadata.is_dir() {
        0o755
    } else {
        0o644
    }
}

fn run_zstd(command: &mut Command) -> Result<()> {
    let output = command
        .output()
        .map_err(|e| RagnarokError::CompressionFailed(format!("failed to run zstd: {}", e)))?;
    if output.status.success() {
        Ok(())
    } else {
        Err(RagnarokError::CompressionFailed(format!(
            "zstd exited with {}: {}",
            output.status,
            String::from_utf8_lossy(&output.stderr).trim()
        )))
    }
}

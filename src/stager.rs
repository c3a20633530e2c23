//! Staging of requested paths into an archive tree
//!
//! The stager turns a list of absolute paths into a populated staging
//! directory plus the metadata documents describing it. Every object found
//! is classified once with [`EntryKind::probe`] and dispatched:
//!
//! - **Files** are copied (or touched when simulating) with their timestamps,
//!   and recorded with the mode and ownership of the *original*.
//! - **Directories** are created in staging, recorded with their mode and
//!   ownership, and walked without following symlinks.
//! - **Symlinks** are recorded with their raw target and materialized as a
//!   marker: a regular file holding the link text, or an empty directory
//!   when the link points at a directory. No permission record is kept.
//! - **Anything else** (devices, sockets, fifos) is skipped with a warning.
//!
//! Each object discovered during a walk is mapped through the
//! [`PathMapper`] on its own, so nothing inherits the archive location of
//! the directory it was found in.
//!
//! ## Example
//!
//! ```rust,no_run
//! use ragnarok::stager::ArchiveStager;
//! use ragnarok::ContentMode;
//! use std::path::Path;
//!
//! # fn main() -> ragnarok::Result<()> {
//! let mut stager = ArchiveStager::new(Path::new("/tmp/stage"), Path::new("/root"), ContentMode::Real)?;
//! stager.stage_all(["/etc/nginx/nginx.conf", "/etc/nginx/sites-enabled"]);
//! let report = stager.finish()?;
//! println!("{} entries staged", report.entries_recorded);
//! # Ok(())
//! # }
//! ```

use crate::error::{RagnarokError, Result};
use crate::metadata::MetadataRecorder;
use crate::path_mapper::PathMapper;
use crate::types::{Bucket, ContentMode, EntryKind, LinkRecord, PermissionRecord, ProgressCallback, ProgressInfo};
use crate::utils;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, trace, warn};
use walkdir::WalkDir;

/// Counters and warnings of one staging pass
#[derive(Debug, Clone, Default)]
pub struct StagingReport {
    /// Affiliation records written
    pub entries_recorded: usize,
    /// Regular files staged
    pub files_staged: usize,
    /// Directories staged
    pub directories_staged: usize,
    /// Symlinks recorded
    pub symlinks_staged: usize,
    /// Bytes copied (zero when simulating)
    pub bytes_staged: u64,
    /// Requests or walked entries that were skipped
    pub skipped: usize,
    /// One message per skipped or failed entry, naming its path
    pub warnings: Vec<String>,
}

/// Populates a staging tree and records its metadata
pub struct ArchiveStager {
    root: PathBuf,
    mapper: PathMapper,
    content_mode: ContentMode,
    recorder: MetadataRecorder,
    report: StagingReport,
    progress: Option<ProgressCallback>,
}

impl ArchiveStager {
    /// Prepare a stager writing under `root`
    ///
    /// Creates the `home_dirs/` and `files/` buckets.
    pub fn new(root: &Path, home: &Path, content_mode: ContentMode) -> Result<Self> {
        for bucket in [Bucket::HomeDirs, Bucket::Files] {
            fs::create_dir_all(root.join(bucket.as_str()))?;
        }
        Ok(Self {
            root: root.to_path_buf(),
            mapper: PathMapper::new(home),
            content_mode,
            recorder: MetadataRecorder::new(),
            report: StagingReport::default(),
            progress: None,
        })
    }

    /// Report every staged entry to `callback`
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Stage every requested path in order
    ///
    /// Duplicates and nested requests are not collapsed; each one is walked.
    pub fn stage_all<I, P>(&mut self, paths: I)
    where
        I: IntoIterator<Item = P>,
        P: AsRef<Path>,
    {
        for path in paths {
            self.stage(path.as_ref());
        }
    }

    /// Stage one requested path
    ///
    /// Problems are recorded as warnings; this never fails the whole run.
    pub fn stage(&mut self, requested: &Path) {
        if !requested.is_absolute() {
            self.skip(format!("Skipping non-absolute path: {}", requested.display()));
            return;
        }

        let metadata = match fs::symlink_metadata(requested) {
            Ok(metadata) => metadata,
            Err(_) => {
                self.skip(format!("Path does not exist: {}", requested.display()));
                return;
            }
        };

        if !metadata.is_dir() {
            self.stage_entry(requested);
            return;
        }

        debug!("Walking directory {:?}", requested);
        let root = self.root.clone();
        let walker = WalkDir::new(requested)
            .follow_links(false)
            .into_iter()
            .filter_entry(move |e| !e.path().starts_with(&root));
        for entry in walker {
            match entry {
                Ok(entry) => self.stage_entry(entry.path()),
                Err(e) => {
                    let location = e
                        .path()
                        .map(|p| p.display().to_string())
                        .unwrap_or_else(|| requested.display().to_string());
                    self.skip(format!("Cannot read {}: {}", location, e));
                }
            }
        }
    }

    /// Write the metadata documents and return the final counters
    pub fn finish(mut self) -> Result<StagingReport> {
        self.recorder.write_documents(&self.root)?;
        self.report.entries_recorded = self.recorder.len();
        Ok(self.report)
    }

    /// Recorded metadata so far
    pub fn recorder(&self) -> &MetadataRecorder {
        &self.recorder
    }

    fn stage_entry(&mut self, path: &Path) {
        let kind = match EntryKind::probe(path) {
            Ok(kind) => kind,
            Err(e) => {
                self.skip(format!("Cannot inspect {}: {}", path.display(), e));
                return;
            }
        };

        let archive = match self.mapper.map(path) {
            Ok(archive) => archive,
            Err(e) => {
                self.skip(format!("Skipping {}: {}", path.display(), e));
                return;
            }
        };
        let staged = match utils::safe_join(&self.root, &archive.relative) {
            Ok(staged) => staged,
            Err(e) => {
                self.skip(format!("Skipping {}: {}", path.display(), e));
                return;
            }
        };

        let result = match &kind {
            EntryKind::File => self.stage_file(path, &staged).map(|bytes| {
                self.report.files_staged += 1;
                self.report.bytes_staged += bytes;
            }),
            EntryKind::Directory => fs::create_dir_all(&staged).map_err(RagnarokError::from).map(|_| {
                self.report.directories_staged += 1;
            }),
            EntryKind::Symlink { target, is_dir } => {
                match self.stage_symlink_marker(target, *is_dir, &staged) {
                    Ok(link) => {
                        self.recorder.record_symlink(&archive, path, link);
                        self.report.symlinks_staged += 1;
                    }
                    Err(message) => self.skip(format!("Skipping symlink {}: {}", path.display(), message)),
                }
                self.notify(&archive.relative);
                return;
            }
            EntryKind::Other => {
                self.skip(format!("Skipping special file: {}", path.display()));
                return;
            }
        };

        if let Err(e) = result {
            self.skip(format!("Failed to stage {}: {}", path.display(), e));
            return;
        }

        // Mode and ownership always come from the original, never the staged copy
        match fs::symlink_metadata(path) {
            Ok(metadata) => {
                self.recorder
                    .record_entry(&archive, path, PermissionRecord::from_metadata(&metadata));
                trace!("Staged {} {:?} as {}", kind.label(), path, archive.relative);
            }
            Err(e) => self.skip(format!("Cannot read metadata of {}: {}", path.display(), e)),
        }
        self.notify(&archive.relative);
    }

    fn stage_file(&self, source: &Path, staged: &Path) -> Result<u64> {
        utils::ensure_parent(staged)?;
        match self.content_mode {
            ContentMode::Real => utils::copy_preserving_times(source, staged),
            ContentMode::Simulate => {
                File::create(staged)?;
                Ok(0)
            }
        }
    }

    fn stage_symlink_marker(
        &self,
        target: &Path,
        is_dir: bool,
        staged: &Path,
    ) -> std::result::Result<LinkRecord, String> {
        let target = target
            .to_str()
            .ok_or_else(|| "link target is not valid UTF-8".to_string())?;

        let written = utils::ensure_parent(staged).and_then(|_| {
            if is_dir {
                fs::create_dir_all(staged)?;
            } else {
                let marker = match self.content_mode {
                    ContentMode::Real => target.as_bytes(),
                    ContentMode::Simulate => "".as_bytes(),
                };
                fs::write(staged, marker)?;
            }
            Ok(())
        });
        written.map_err(|e| e.to_string())?;

        Ok(LinkRecord::new(target, is_dir))
    }

    fn skip(&mut self, message: String) {
        warn!("{}", message);
        self.report.skipped += 1;
        self.report.warnings.push(message);
    }

    fn notify(&self, item: &str) {
        if let Some(callback) = &self.progress {
            callback(ProgressInfo {
                operation: "Staging",
                current_item: Some(item.to_string()),
                processed: self.recorder.len(),
                bytes_processed: self.report.bytes_staged,
            });
        }
    }
}

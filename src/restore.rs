//! Replay of an extracted staging tree onto the live filesystem
//!
//! The engine runs three passes, strictly in order:
//!
//! 1. **Files and directories**: every entry without a link record. Files
//!    go through the [`ConflictResolver`]; directories are created when
//!    absent and never compared or replaced.
//! 2. **Symlinks**: every link record, created with its raw target text.
//!    Entries with a link record are never touched by pass 1, so no plain
//!    file or directory is ever left where a link belongs. Entries whose
//!    destination lies *below* a link (`app/current/config.yml` next to
//!    `app/current -> v2`) are held back from pass 1 as well and replayed
//!    through the link once it exists.
//! 3. **Permissions**: mode, then ownership, for every permission record
//!    whose destination exists. Skippable.
//!
//! Problems with single entries are pushed to the report as warnings and
//! the pass moves on. In simulation nothing is written; the report lists
//! what would have happened.

use crate::conflict::{self, Comparison, ConflictResolver, Prompter};
use crate::error::{RagnarokError, Result};
use crate::metadata::{EntryRecord, Manifest};
use crate::types::{
    Decision, EntryOutcome, LinkRecord, OutcomeKind, PermissionRecord, ProgressCallback,
    ProgressInfo, RestoreReport, SkipReason,
};
use crate::utils;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, trace, warn};

/// Applies a manifest to the filesystem
pub struct RestoreEngine<'a> {
    root: &'a Path,
    resolver: ConflictResolver,
    prompter: &'a dyn Prompter,
    apply_permissions: bool,
    progress: Option<ProgressCallback>,
}

impl<'a> RestoreEngine<'a> {
    /// Create an engine reading staged content from `root`
    pub fn new(root: &'a Path, resolver: ConflictResolver, prompter: &'a dyn Prompter) -> Self {
        Self {
            root,
            resolver,
            prompter,
            apply_permissions: true,
            progress: None,
        }
    }

    /// Enable or disable the permission pass
    pub fn with_permissions(mut self, apply: bool) -> Self {
        self.apply_permissions = apply;
        self
    }

    /// Report every evaluated entry to `callback`
    pub fn with_progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    fn simulate(&self) -> bool {
        self.resolver.is_simulation()
    }

    /// Run all three passes
    pub fn run(&self, manifest: &Manifest, report: &mut RestoreReport) {
        report.simulated = self.simulate();
        report.warnings.extend(manifest.warnings.iter().cloned());

        self.restore_files(manifest, report);
        self.restore_symlinks(manifest, report);
        self.restore_below_links(manifest, report);
        if self.apply_permissions {
            self.restore_permissions(manifest, report);
        } else {
            debug!("Permission pass disabled");
        }
    }

    /// Pass 1: regular files and directories
    ///
    /// Entries below a recorded link are left for [`Self::restore_below_links`].
    pub fn restore_files(&self, manifest: &Manifest, report: &mut RestoreReport) {
        let links = link_destinations(manifest);
        for (key, entry) in manifest.plain_entries() {
            if below_link(&entry.destination(), &links) {
                trace!("Deferring {} until the link above it exists", key);
                continue;
            }
            self.restore_plain(key, entry, "Restoring files", report);
        }
    }

    /// Files and directories reached through a restored link
    pub fn restore_below_links(&self, manifest: &Manifest, report: &mut RestoreReport) {
        let links = link_destinations(manifest);
        if links.is_empty() {
            return;
        }
        for (key, entry) in manifest.plain_entries() {
            if below_link(&entry.destination(), &links) {
                self.restore_plain(key, entry, "Restoring files below links", report);
            }
        }
    }

    fn restore_plain(&self, key: &str, entry: &EntryRecord, operation: &'static str, report: &mut RestoreReport) {
        self.notify(operation, key, report);
        let Some((staged, destination)) = self.locate(key, entry, report) else {
            return;
        };

        let metadata = match fs::symlink_metadata(&staged) {
            Ok(metadata) => metadata,
            Err(_) => {
                missing_entry(report, key, &destination);
                return;
            }
        };

        if metadata.is_dir() {
            self.restore_directory(key, &destination, report);
        } else if metadata.is_file() {
            self.restore_file(key, &staged, &destination, report);
        } else {
            push_warning(
                report,
                format!("Staged entry {} is neither file nor directory, skipping", key),
            );
        }
    }

    fn restore_directory(&self, key: &str, destination: &Path, report: &mut RestoreReport) {
        let decision = match fs::symlink_metadata(destination) {
            Err(_) => Decision::Restore,
            Ok(_) if destination.is_dir() => Decision::Skip(SkipReason::Identical),
            Ok(_) => {
                push_warning(
                    report,
                    format!("{} exists and is not a directory, skipping", destination.display()),
                );
                return;
            }
        };

        let mut executed = false;
        if decision.writes() && !self.simulate() {
            match fs::create_dir_all(destination) {
                Ok(()) => executed = true,
                Err(e) => {
                    push_warning(
                        report,
                        format!("Failed to create directory {}: {}", destination.display(), e),
                    );
                    return;
                }
            }
        }

        trace!("Directory {:?}: {:?}", destination, decision);
        report.record(outcome(key, destination, OutcomeKind::Directory, decision, executed));
    }

    fn restore_file(&self, key: &str, staged: &Path, destination: &Path, report: &mut RestoreReport) {
        let comparison = match conflict::compare_file(staged, destination) {
            Ok(comparison) => comparison,
            Err(e) => {
                push_warning(
                    report,
                    format!("Cannot compare {}: {}; treating as different", destination.display(), e),
                );
                Comparison::Differs
            }
        };

        let question = format!(
            "File {} already exists and differs. Overwrite?",
            destination.display()
        );
        let decision = self.decide(comparison, &question, destination, report);

        let mut executed = false;
        if decision.writes() && !self.simulate() {
            match write_file(staged, destination, decision == Decision::Overwrite) {
                Ok(()) => executed = true,
                Err(e) => {
                    push_warning(report, format!("Failed to restore {}: {}", destination.display(), e));
                    return;
                }
            }
        }

        debug!("File {:?}: {:?}", destination, decision);
        report.record(outcome(key, destination, OutcomeKind::File, decision, executed));
    }

    /// Pass 2: symbolic links
    pub fn restore_symlinks(&self, manifest: &Manifest, report: &mut RestoreReport) {
        for (key, entry, link) in manifest.link_entries() {
            self.notify("Restoring symlinks", key, report);
            let Some((staged, destination)) = self.locate(key, entry, report) else {
                continue;
            };
            if fs::symlink_metadata(&staged).is_err() {
                missing_entry(report, key, &destination);
                continue;
            }

            let comparison = match self.compare_symlink(link, &staged, &destination) {
                Ok(comparison) => comparison,
                Err(e) => {
                    push_warning(
                        report,
                        format!("Cannot compare {}: {}; treating as different", destination.display(), e),
                    );
                    Comparison::Differs
                }
            };

            let question = format!(
                "{} already exists and is not a link to {}. Replace it?",
                destination.display(),
                link.target
            );
            let decision = self.decide(comparison, &question, &destination, report);

            let mut executed = false;
            if decision.writes() && !self.simulate() {
                match write_symlink(link, &destination, decision == Decision::Overwrite) {
                    Ok(()) => executed = true,
                    Err(e) => {
                        push_warning(
                            report,
                            format!("Failed to create symlink {}: {}", destination.display(), e),
                        );
                        continue;
                    }
                }
            }

            debug!("Symlink {:?} -> {}: {:?}", destination, link.target, decision);
            report.record(outcome(key, &destination, OutcomeKind::Symlink, decision, executed));
        }
    }

    /// An existing link is judged by its target text; any other existing
    /// object is compared with the staged marker
    fn compare_symlink(&self, link: &LinkRecord, staged: &Path, destination: &Path) -> Result<Comparison> {
        let comparison = conflict::compare_link(&link.target, destination)?;
        if comparison != Comparison::Differs {
            return Ok(comparison);
        }

        let destination_is_link = fs::symlink_metadata(destination)?.file_type().is_symlink();
        if !destination_is_link && staged.is_file() && destination.is_file() {
            return conflict::compare_file(staged, destination);
        }
        Ok(Comparison::Differs)
    }

    /// Pass 3: mode and ownership
    pub fn restore_permissions(&self, manifest: &Manifest, report: &mut RestoreReport) {
        for (key, entry, record) in manifest.permission_entries() {
            let destination = entry.destination();
            match fs::symlink_metadata(&destination) {
                Ok(metadata) if metadata.file_type().is_symlink() => {
                    trace!("Not applying permissions through symlink {:?}", destination);
                    continue;
                }
                Ok(_) => {}
                Err(_) => {
                    trace!("{:?} does not exist, no permissions to apply", destination);
                    continue;
                }
            }

            let mut executed = false;
            if !self.simulate() {
                if let Err(e) = apply_permission_record(&destination, record) {
                    push_warning(report, e.to_string());
                    continue;
                }
                executed = true;
            }

            trace!(
                "Permissions {:?}: mode {:o} uid {} gid {}",
                destination,
                record.mode,
                record.uid,
                record.gid
            );
            report.record(outcome(key, &destination, OutcomeKind::Permissions, Decision::Restore, executed));
        }
    }

    fn decide(
        &self,
        comparison: Comparison,
        question: &str,
        destination: &Path,
        report: &mut RestoreReport,
    ) -> Decision {
        match self.resolver.resolve(comparison, self.prompter, question) {
            Ok(Decision::Ask) => {
                info!("[DRY-RUN] Would ask whether to overwrite {}", destination.display());
                Decision::Ask
            }
            Ok(decision) => decision,
            Err(e) => {
                push_warning(
                    report,
                    format!("{}; leaving {} untouched", e, destination.display()),
                );
                Decision::Skip(SkipReason::Declined)
            }
        }
    }

    /// Staged source and absolute destination of one entry
    fn locate(&self, key: &str, entry: &EntryRecord, report: &mut RestoreReport) -> Option<(PathBuf, PathBuf)> {
        let destination = entry.destination();
        if !destination.is_absolute() {
            push_warning(
                report,
                format!("Affiliation of {} is not absolute ({}), skipping", key, entry.original),
            );
            return None;
        }
        match utils::safe_join(self.root, key) {
            Ok(staged) => Some((staged, destination)),
            Err(e) => {
                push_warning(report, format!("{}, skipping", e));
                None
            }
        }
    }

    fn notify(&self, operation: &'static str, key: &str, report: &RestoreReport) {
        if let Some(callback) = &self.progress {
            callback(ProgressInfo {
                operation,
                current_item: Some(key.to_string()),
                processed: report.outcomes.len(),
                bytes_processed: 0,
            });
        }
    }
}

fn outcome(
    key: &str,
    destination: &Path,
    kind: OutcomeKind,
    decision: Decision,
    executed: bool,
) -> EntryOutcome {
    EntryOutcome {
        archive_path: key.to_string(),
        destination: destination.to_path_buf(),
        kind,
        decision,
        executed,
    }
}

fn push_warning(report: &mut RestoreReport, message: String) {
    warn!("{}", message);
    report.warnings.push(message);
}

fn missing_entry(report: &mut RestoreReport, key: &str, destination: &Path) {
    let err = RagnarokError::MissingArchiveEntry(key.to_string());
    push_warning(report, format!("{}, skipping {}", err, destination.display()));
}

fn link_destinations(manifest: &Manifest) -> HashSet<PathBuf> {
    manifest
        .link_entries()
        .map(|(_, entry, _)| entry.destination())
        .collect()
}

/// Whether a strict ancestor of `destination` is restored as a link
fn below_link(destination: &Path, links: &HashSet<PathBuf>) -> bool {
    destination.ancestors().skip(1).any(|ancestor| links.contains(ancestor))
}

fn write_file(staged: &Path, destination: &Path, overwrite: bool) -> Result<()> {
    utils::ensure_parent(destination)?;
    if overwrite {
        // Never write through a link or onto a directory
        if let Ok(metadata) = fs::symlink_metadata(destination) {
            if metadata.is_dir() || metadata.file_type().is_symlink() {
                utils::remove_path(destination)?;
            }
        }
    }
    utils::copy_preserving_times(staged, destination)?;
    Ok(())
}

fn write_symlink(link: &LinkRecord, destination: &Path, overwrite: bool) -> Result<()> {
    utils::ensure_parent(destination)?;
    if overwrite && fs::symlink_metadata(destination).is_ok() {
        utils::remove_path(destination)?;
    }
    utils::create_symlink(Path::new(&link.target), destination, link.is_dir)
}

fn apply_permission_record(destination: &Path, record: PermissionRecord) -> Result<()> {
    utils::set_permissions(destination, record.mode)?;
    utils::set_ownership(destination, record.uid, record.gid)?;
    // chown clears setuid/setgid on regular files
    if record.mode & 0o6000 != 0 {
        utils::set_permissions(destination, record.mode)?;
    }
    Ok(())
}

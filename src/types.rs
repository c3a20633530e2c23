//! Core data types used throughout the Ragnarok library
//!
//! ## Overview
//!
//! The types in this module represent:
//! - **Archive model**: `Bucket`, `EntryKind`, `PermissionRecord`, `LinkRecord`
//! - **Operation modes**: `ContentMode`, `ConflictPolicy`
//! - **Decisions**: `Decision`, `SkipReason` - the conflict state machine
//! - **Results**: `BackupResult`, `RestoreReport`, `EntryOutcome`
//! - **Progress**: `ProgressInfo`, `ProgressCallback`

use crate::packages::PackageAction;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Top-level staging directory an entry lands in
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Bucket {
    /// `home_dirs/<user>/...` for `/root`, `/home/<user>` and the caller's home
    HomeDirs,
    /// `files/...` for every other absolute path
    Files,
}

impl Bucket {
    /// Directory name of the bucket inside the archive
    pub fn as_str(&self) -> &'static str {
        match self {
            Bucket::HomeDirs => "home_dirs",
            Bucket::Files => "files",
        }
    }
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Whether staging copies bytes or only mirrors structure
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentMode {
    /// Copy file content and timestamps
    #[default]
    Real,
    /// Create zero-byte placeholders (dry runs). On restore: mutate nothing.
    Simulate,
}

/// Configured answer for conflicting restore targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictPolicy {
    /// Replace differing destinations
    Overwrite,
    /// Leave differing destinations untouched
    Skip,
}

/// Kind of a filesystem object, probed once at discovery time
///
/// Every pass matches on this exhaustively instead of re-probing the path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    /// Regular file
    File,
    /// Symbolic link with its raw, unresolved target
    Symlink {
        /// Link text exactly as stored in the link
        target: PathBuf,
        /// Whether the link currently resolves to a directory
        is_dir: bool,
    },
    /// Directory
    Directory,
    /// Device, socket, fifo or anything else we do not stage
    Other,
}

impl EntryKind {
    /// Classify a path without following a final symlink
    pub fn probe(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::symlink_metadata(path)?;
        let file_type = metadata.file_type();

        Ok(if file_type.is_symlink() {
            let target = std::fs::read_link(path)?;
            // Dangling links resolve to nothing and are treated as file links
            let is_dir = std::fs::metadata(path).map(|m| m.is_dir()).unwrap_or(false);
            EntryKind::Symlink { target, is_dir }
        } else if file_type.is_dir() {
            EntryKind::Directory
        } else if file_type.is_file() {
            EntryKind::File
        } else {
            EntryKind::Other
        })
    }

    /// Short human label used in prompts and reports
    pub fn label(&self) -> &'static str {
        match self {
            EntryKind::File => "file",
            EntryKind::Symlink { .. } => "symlink",
            EntryKind::Directory => "directory",
            EntryKind::Other => "special file",
        }
    }
}

/// Progress callback type
pub type ProgressCallback = Arc<dyn Fn(ProgressInfo) + Send + Sync>;

/// Information passed to progress callbacks
#[derive(Debug, Clone)]
pub struct ProgressInfo {
    /// Operation being performed
    pub operation: &'static str,
    /// Current item being processed
    pub current_item: Option<String>,
    /// Items processed so far
    pub processed: usize,
    /// Bytes processed so far
    pub bytes_processed: u64,
}

/// POSIX mode and ownership of one archived file or directory
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PermissionRecord {
    /// Permission bits including setuid/setgid/sticky (`st_mode & 0o7777`)
    pub mode: u32,
    /// Owner user id
    pub uid: u32,
    /// Owner group id
    pub gid: u32,
}

impl PermissionRecord {
    /// Read the record from the metadata of the original object
    #[cfg(unix)]
    pub fn from_metadata(metadata: &std::fs::Metadata) -> Self {
        use std::os::unix::fs::MetadataExt;
        Self {
            mode: metadata.mode() & 0o7777,
            uid: metadata.uid(),
            gid: metadata.gid(),
        }
    }
}

/// Raw symlink description, keyed by archive-relative path
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LinkRecord {
    /// Link text, never resolved or rewritten
    pub target: String,
    /// Whether `target` is an absolute path
    pub is_absolute: bool,
    /// Whether the link pointed at a directory when backed up
    #[serde(default, skip_serializing_if = "std::ops::Not::not")]
    pub is_dir: bool,
}

impl LinkRecord {
    /// Build a record from raw link text
    pub fn new(target: impl Into<String>, is_dir: bool) -> Self {
        let target = target.into();
        let is_absolute = target.starts_with('/');
        Self {
            target,
            is_absolute,
            is_dir,
        }
    }
}

/// Why a target was left alone
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// Destination is byte-identical (or the same link target)
    Identical,
    /// The configured `skip` policy applied
    Policy,
    /// The user answered "no" at the prompt
    Declined,
}

/// Outcome of the conflict state machine for one target
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    /// Initial state before evaluation
    #[default]
    Unevaluated,
    /// Destination absent: write without conflict
    Restore,
    /// Leave the destination as it is
    Skip(SkipReason),
    /// Replace the existing destination
    Overwrite,
    /// Simulation with no policy: a prompt would have been shown
    Ask,
}

impl Decision {
    /// Whether the caller must write the destination
    pub fn writes(&self) -> bool {
        matches!(self, Decision::Restore | Decision::Overwrite)
    }
}

/// Kind of object a restore outcome refers to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// Regular file (pass 1)
    File,
    /// Directory (pass 1)
    Directory,
    /// Symbolic link (pass 2)
    Symlink,
    /// Mode/ownership application (pass 3)
    Permissions,
}

impl OutcomeKind {
    /// Lowercase name for reports
    pub fn label(&self) -> &'static str {
        match self {
            OutcomeKind::File => "file",
            OutcomeKind::Directory => "directory",
            OutcomeKind::Symlink => "symlink",
            OutcomeKind::Permissions => "permissions",
        }
    }
}

/// What happened to one archived entry during restore
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntryOutcome {
    /// Key shared by the metadata documents
    pub archive_path: String,
    /// Original absolute location
    pub destination: PathBuf,
    /// Which pass produced the outcome
    pub kind: OutcomeKind,
    /// Resolved decision
    pub decision: Decision,
    /// False when the decision was only simulated or failed
    pub executed: bool,
}

/// Result of a backup operation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupResult {
    /// Path to the created archive
    pub archive_path: PathBuf,
    /// Number of affiliation records written
    pub entries_recorded: usize,
    /// Regular files staged
    pub files_staged: usize,
    /// Directories staged
    pub directories_staged: usize,
    /// Symbolic links recorded
    pub symlinks_staged: usize,
    /// Bytes copied into the staging tree
    pub bytes_staged: u64,
    /// Size of the final archive
    pub archive_size: u64,
    /// Whether content was simulated
    pub simulated: bool,
    /// Time taken in milliseconds
    pub duration_ms: u64,
    /// Per-entry problems, each naming the affected path
    pub warnings: Vec<String>,
}

/// Result of a restore operation
///
/// Outcomes are listed in pass order: files and directories, then symlinks,
/// then permissions.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RestoreReport {
    /// One record per evaluated entry
    pub outcomes: Vec<EntryOutcome>,
    /// Files written to absent destinations
    pub files_restored: usize,
    /// Files that replaced differing destinations
    pub files_overwritten: usize,
    /// Files and links left alone because they were identical
    pub skipped_identical: usize,
    /// Files and links left alone by policy or a declined prompt
    pub skipped_conflicts: usize,
    /// Directories created
    pub directories_created: usize,
    /// Symlinks created
    pub symlinks_created: usize,
    /// Permission records applied
    pub permissions_applied: usize,
    /// Conflicts that would prompt (simulation without a policy)
    pub pending_prompts: usize,
    /// Decision for the APT repository listing, when present
    pub apt_repos: Option<Decision>,
    /// Package reconciliation plan and its execution
    pub packages: Vec<PackageAction>,
    /// Whether nothing was mutated
    pub simulated: bool,
    /// Time taken for restoration in milliseconds
    pub duration_ms: u64,
    /// Any warnings during restoration
    pub warnings: Vec<String>,
}

impl RestoreReport {
    /// Account for one outcome and keep it
    ///
    /// Write counters only move for outcomes that were executed; a simulated
    /// restore keeps them at zero and lists its plan in `outcomes`.
    pub fn record(&mut self, outcome: EntryOutcome) {
        match (outcome.kind, outcome.decision) {
            (_, Decision::Skip(SkipReason::Identical)) => self.skipped_identical += 1,
            (_, Decision::Skip(_)) => self.skipped_conflicts += 1,
            (_, Decision::Ask) => self.pending_prompts += 1,
            _ if !outcome.executed => {}
            (OutcomeKind::File, Decision::Restore) => self.files_restored += 1,
            (OutcomeKind::File, Decision::Overwrite) => self.files_overwritten += 1,
            (OutcomeKind::Directory, Decision::Restore) => self.directories_created += 1,
            (OutcomeKind::Symlink, Decision::Restore | Decision::Overwrite) => {
                self.symlinks_created += 1
            }
            (OutcomeKind::Permissions, Decision::Restore) => self.permissions_applied += 1,
            _ => {}
        }
        self.outcomes.push(outcome);
    }

    /// Number of outcomes that changed the filesystem
    pub fn mutations(&self) -> usize {
        self.outcomes
            .iter()
            .filter(|o| o.executed && o.kind != OutcomeKind::Permissions && o.decision.writes())
            .count()
    }
}

//! # Ragnarok - backup and restore for Linux servers
//!
//! Snapshot an arbitrary list of filesystem paths into one portable archive
//! and put them back later, with symbolic links, permissions and ownership
//! intact.
//!
//! ## Overview
//!
//! A backup walks every path in the selection list and stages it into a
//! temporary tree split into two buckets:
//!
//! - `home_dirs/<user>/...` for anything under `/root`, `/home/<user>` or
//!   the caller's home directory
//! - `files/...` for everything else, mirroring the absolute path
//!
//! Next to the buckets sit the metadata documents: `affiliation.json`
//! (archive path to original absolute path), `permissions.json` (mode, uid
//! and gid) and, when links were found, `links.json` (raw link targets).
//! A `metadata/` directory carries the package inventory. The tree is then
//! packed as `.tar`, `.tar.gz`, `.tar.zst` or `.zip`.
//!
//! A restore unpacks the archive and replays it in three passes: files and
//! directories, then symlinks, then permissions. Every file or link that
//! would overwrite something goes through the conflict resolver first:
//! identical destinations are skipped, differing ones are decided by policy
//! or by asking.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use ragnarok::{Config, ConflictPolicy, Ragnarok};
//! use std::path::Path;
//!
//! # fn main() -> ragnarok::Result<()> {
//! let config = Config::builder()
//!     .conflict_policy(Some(ConflictPolicy::Overwrite))
//!     .build()?;
//! let ragnarok = Ragnarok::new(config)?;
//!
//! match ragnarok.backup()? {
//!     Some(backup) => println!("Archive: {}", backup.archive_path.display()),
//!     None => println!("Selection list is empty"),
//! }
//!
//! let report = ragnarok.restore(Path::new("/root/ragnarokbackup/backups/backup_20240101_120000.tar"))?;
//! println!("{} restored, {} identical", report.files_restored, report.skipped_identical);
//! # Ok(())
//! # }
//! ```
//!
//! ## Dry runs
//!
//! With [`ConfigBuilder::dry_run`] a backup writes the full structure with
//! empty files, and a restore evaluates every entry without touching the
//! filesystem. Conflicts that would need an answer are reported as
//! [`Decision::Ask`] instead of prompting.
//!
//! ## Error Handling
//!
//! All operations return `Result<T, RagnarokError>`. Problems with single
//! entries never abort a run; they end up in the `warnings` of the
//! [`BackupResult`] or [`RestoreReport`]. See [`RagnarokError::is_fatal`].
//!
//! ## Module Organization
//!
//! - [`path_mapper`]: absolute path to archive location
//! - [`stager`]: staging tree population
//! - [`metadata`]: metadata documents and the restore manifest
//! - [`conflict`]: comparison and conflict decisions
//! - [`restore`]: the three restore passes
//! - [`compression`]: archive formats
//! - [`packages`]: package inventory and reconciliation
//! - [`hooks`]: pre/post operation hooks
//! - [`config`]: configuration and selection list
//! - [`types`]: shared types
//! - [`error`]: error types

// Public API modules
pub mod compression;
pub mod config;
pub mod conflict;
pub mod error;
pub mod hooks;
pub mod metadata;
pub mod packages;
pub mod path_mapper;
pub mod ragnarok;
pub mod restore;
pub mod stager;
pub mod types;

// Internal modules (not part of public API)
mod utils;

// Re-export main types for convenience
pub use compression::Compression;
pub use config::{Config, ConfigBuilder};
pub use conflict::{ConflictResolver, FixedAnswer, Prompter, TerminalPrompter};
pub use error::{RagnarokError, Result};
pub use hooks::{Hook, HookPhase, NoOpHook, ScriptHook};
pub use metadata::{Manifest, MetadataRecorder};
pub use packages::{DpkgPackageManager, PackageManager};
pub use path_mapper::{map_path, ArchivePath, PathMapper};
pub use ragnarok::{Ragnarok, RagnarokBuilder};
pub use restore::RestoreEngine;
pub use stager::ArchiveStager;
pub use types::*;

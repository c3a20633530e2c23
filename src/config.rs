//! Configuration for backup and restore runs
//!
//! A [`Config`] is an explicit value handed to [`crate::Ragnarok`]. Nothing
//! reads the home directory or the environment after [`ConfigBuilder::build`]
//! has run.

use crate::compression::Compression;
use crate::error::{RagnarokError, Result};
use crate::hooks::{self, HookPhase};
use crate::packages::METADATA_DIR;
use crate::types::{ConflictPolicy, ContentMode};
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Directory under the home directory holding the selection list and backups
pub const BACKUP_DIR_NAME: &str = "ragnarokbackup";

/// File name of the selection list inside the backup directory
pub const SELECTION_FILE_NAME: &str = ".ragnarokbackup";

/// Directory under the backup directory receiving finished archives
pub const BACKUPS_DIR_NAME: &str = "backups";

/// Validated settings for one run
#[derive(Debug, Clone)]
pub struct Config {
    /// Home directory of the invoking user
    pub home: PathBuf,
    /// Working directory, `<home>/ragnarokbackup` by default
    pub backup_dir: PathBuf,
    /// Newline-separated list of paths to back up
    pub selection_file: PathBuf,
    /// Where archives are written
    pub output_dir: PathBuf,
    /// Copy real content or only the structure
    pub content_mode: ContentMode,
    /// Archive format for new backups
    pub compression: Compression,
    /// Conflict policy; `None` asks interactively
    pub conflict_policy: Option<ConflictPolicy>,
    /// Run the permission pass on restore
    pub apply_permissions: bool,
    /// Record the package inventory on backup
    pub collect_packages: bool,
    /// Reconcile packages and repositories on restore
    pub restore_packages: bool,
    /// Script hooks by phase, in registration order
    pub hook_scripts: Vec<(HookPhase, PathBuf)>,
}

impl Config {
    /// Start building a configuration
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Whether this run only simulates its effects
    pub fn simulate(&self) -> bool {
        self.content_mode == ContentMode::Simulate
    }

    /// Local copy of restored package metadata
    pub fn local_metadata_dir(&self) -> PathBuf {
        self.backup_dir.join(METADATA_DIR)
    }
}

/// Builder for [`Config`]
#[derive(Debug, Clone, Default)]
pub struct ConfigBuilder {
    home: Option<PathBuf>,
    backup_dir: Option<PathBuf>,
    selection_file: Option<PathBuf>,
    output_dir: Option<PathBuf>,
    content_mode: ContentMode,
    compression: Compression,
    conflict_policy: Option<ConflictPolicy>,
    apply_permissions: Option<bool>,
    collect_packages: Option<bool>,
    restore_packages: Option<bool>,
    hooks: Vec<(HookPhase, String)>,
}

impl ConfigBuilder {
    /// Create a builder with default settings
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the home directory
    ///
    /// Defaults to the invoking user's home. Must be absolute.
    pub fn home(mut self, home: impl Into<PathBuf>) -> Self {
        self.home = Some(home.into());
        self
    }

    /// Set the working directory
    pub fn backup_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.backup_dir = Some(dir.into());
        self
    }

    /// Use a different selection list
    pub fn selection_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.selection_file = Some(path.into());
        self
    }

    /// Write archives to `dir` instead of `<backup_dir>/backups`
    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.output_dir = Some(dir.into());
        self
    }

    /// Simulate instead of copying content and mutating the filesystem
    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.content_mode = if dry_run {
            ContentMode::Simulate
        } else {
            ContentMode::Real
        };
        self
    }

    /// Set the content mode directly
    pub fn content_mode(mut self, mode: ContentMode) -> Self {
        self.content_mode = mode;
        self
    }

    /// Set the archive format
    pub fn compression(mut self, compression: Compression) -> Self {
        self.compression = compression;
        self
    }

    /// Resolve every conflict with `policy` instead of prompting
    pub fn conflict_policy(mut self, policy: Option<ConflictPolicy>) -> Self {
        self.conflict_policy = policy;
        self
    }

    /// Enable or disable the permission pass
    pub fn apply_permissions(mut self, apply: bool) -> Self {
        self.apply_permissions = Some(apply);
        self
    }

    /// Enable or disable package inventory collection
    pub fn collect_packages(mut self, collect: bool) -> Self {
        self.collect_packages = Some(collect);
        self
    }

    /// Enable or disable package reconciliation
    pub fn restore_packages(mut self, restore: bool) -> Self {
        self.restore_packages = Some(restore);
        self
    }

    /// Register a hook script for `phase`
    ///
    /// The location is validated in [`build`](Self::build).
    pub fn hook(mut self, phase: HookPhase, script: impl Into<String>) -> Self {
        self.hooks.push((phase, script.into()));
        self
    }

    /// Validate and resolve defaults
    ///
    /// # Errors
    ///
    /// - [`RagnarokError::InvalidConfiguration`] if no home directory can be
    ///   determined, the home directory is relative, or a hook script is not
    ///   a local path
    pub fn build(self) -> Result<Config> {
        let home = match self.home {
            Some(home) => home,
            None => dirs::home_dir()
                .ok_or_else(|| RagnarokError::config("cannot determine home directory"))?,
        };
        if !home.is_absolute() {
            return Err(RagnarokError::config(format!(
                "home directory must be absolute: {}",
                home.display()
            )));
        }

        let backup_dir = self
            .backup_dir
            .unwrap_or_else(|| home.join(BACKUP_DIR_NAME));
        let selection_file = self
            .selection_file
            .unwrap_or_else(|| backup_dir.join(SELECTION_FILE_NAME));
        let output_dir = self
            .output_dir
            .unwrap_or_else(|| backup_dir.join(BACKUPS_DIR_NAME));

        let hook_scripts = self
            .hooks
            .iter()
            .map(|(phase, script)| Ok((*phase, hooks::validate_script(script)?)))
            .collect::<Result<Vec<_>>>()?;

        let config = Config {
            home,
            backup_dir,
            selection_file,
            output_dir,
            content_mode: self.content_mode,
            compression: self.compression,
            conflict_policy: self.conflict_policy,
            apply_permissions: self.apply_permissions.unwrap_or(true),
            collect_packages: self.collect_packages.unwrap_or(true),
            restore_packages: self.restore_packages.unwrap_or(true),
            hook_scripts,
        };
        debug!("Resolved configuration: {:?}", config);
        Ok(config)
    }
}

/// Parse a selection list
///
/// Lines are trimmed; blank lines and lines starting with `#` are ignored.
pub fn parse_selection_list(text: &str) -> Vec<PathBuf> {
    text.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .map(PathBuf::from)
        .collect()
}

/// Create the selection list if it does not exist yet
///
/// Returns `true` when a new empty file was created.
pub fn ensure_selection_file(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, "")?;
    Ok(true)
}

/// Read and parse the selection list; a missing file is an empty list
pub fn read_selection_file(path: &Path) -> Result<Vec<PathBuf>> {
    match fs::read_to_string(path) {
        Ok(text) => Ok(parse_selection_list(&text)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}

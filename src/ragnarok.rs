//! Top-level backup and restore operations
//!
//! [`Ragnarok`] ties the pieces together. A backup reads the selection
//! list, stages every listed path into a scoped temporary directory,
//! records the package inventory and packs the tree into one archive. A
//! restore unpacks an archive into a scoped temporary directory, loads its
//! manifest, reconciles packages and replays the tree onto the filesystem.
//!
//! ## Examples
//!
//! ```rust,no_run
//! use ragnarok::{Compression, Config, ConflictPolicy, RagnarokBuilder};
//!
//! # fn main() -> ragnarok::Result<()> {
//! let config = Config::builder()
//!     .compression(Compression::Gz)
//!     .conflict_policy(Some(ConflictPolicy::Skip))
//!     .build()?;
//! let ragnarok = RagnarokBuilder::new().config(config).build()?;
//!
//! if let Some(backup) = ragnarok.backup()? {
//!     println!("Wrote {}", backup.archive_path.display());
//!     let report = ragnarok.restore(&backup.archive_path)?;
//!     println!("{} files restored", report.files_restored);
//! }
//! # Ok(())
//! # }
//! ```

use crate::compression::{self, Compression};
use crate::config::{self, Config};
use crate::conflict::{ConflictResolver, Prompter, TerminalPrompter};
use crate::error::{RagnarokError, Result};
use crate::hooks::{Hook, ScriptHook};
use crate::metadata::Manifest;
use crate::packages::{
    DpkgPackageManager, PackageManager, PackageReconciler, APT_REPOS_FILE, INSTALLED_PACKAGES_FILE,
    METADATA_DIR,
};
use crate::restore::RestoreEngine;
use crate::stager::ArchiveStager;
use crate::types::{BackupResult, ProgressCallback, ProgressInfo, RestoreReport};
use chrono::Local;
use std::fs;
use std::path::Path;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

/// Entry point for backups and restores
pub struct Ragnarok {
    config: Config,
    hooks: Vec<Box<dyn Hook>>,
    prompter: Box<dyn Prompter>,
    packages: Box<dyn PackageManager>,
    progress: Option<ProgressCallback>,
}

impl std::fmt::Debug for Ragnarok {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ragnarok")
            .field("config", &self.config)
            .field("hooks", &format!("<{} hooks>", self.hooks.len()))
            .field("progress", &self.progress.is_some())
            .finish()
    }
}

impl Ragnarok {
    /// Create an instance with the terminal prompter and the system package
    /// manager
    pub fn new(config: Config) -> Result<Self> {
        RagnarokBuilder::new().config(config).build()
    }

    /// Active configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Back up every path in the selection list
    ///
    /// Returns `Ok(None)` when the selection list is empty. The list is
    /// created empty when it does not exist yet.
    ///
    /// # Errors
    ///
    /// - [`RagnarokError::CompressionToolUnavailable`] before any work if the
    ///   format needs a missing tool
    /// - [`RagnarokError::HookExecution`] if a hook fails
    /// - [`RagnarokError::Io`] if the working directories, the staging tree
    ///   or the archive cannot be written
    #[instrument(skip(self))]
    pub fn backup(&self) -> Result<Option<BackupResult>> {
        let start = Instant::now();
        let config = &self.config;
        compression::ensure_tool_available(config.compression)?;

        for hook in &self.hooks {
            hook.pre_backup()?;
        }

        fs::create_dir_all(&config.backup_dir)?;
        fs::create_dir_all(&config.output_dir)?;
        if config::ensure_selection_file(&config.selection_file)? {
            info!("Created empty selection list at {:?}", config.selection_file);
        }

        let selection = config::read_selection_file(&config.selection_file)?;
        if selection.is_empty() {
            warn!(
                "No files or folders listed in {}. Nothing to back up.",
                config.selection_file.display()
            );
            return Ok(None);
        }
        info!(
            "Backing up {} listed paths{}",
            selection.len(),
            if config.simulate() { " [DRY-RUN]" } else { "" }
        );

        let staging = tempfile::Builder::new().prefix("ragnarok-stage-").tempdir()?;
        let metadata_dir = staging.path().join(METADATA_DIR);
        fs::create_dir_all(&metadata_dir)?;

        let mut warnings = Vec::new();
        if config.collect_packages {
            self.collect_inventory(&metadata_dir, &mut warnings)?;
        }

        let mut stager = ArchiveStager::new(staging.path(), &config.home, config.content_mode)?;
        if let Some(progress) = &self.progress {
            stager = stager.with_progress(progress.clone());
        }
        stager.stage_all(&selection);
        let staged = stager.finish()?;
        warnings.extend(staged.warnings);

        let output = config
            .output_dir
            .join(compression::archive_file_name(config.compression, Local::now()));
        info!("Creating archive at: {}", output.display());
        self.report_progress("compress", Some(output.display().to_string()), staged.entries_recorded, staged.bytes_staged);
        let archive_size = compression::create_archive(staging.path(), &output, config.compression)?;

        let result = BackupResult {
            archive_path: output,
            entries_recorded: staged.entries_recorded,
            files_staged: staged.files_staged,
            directories_staged: staged.directories_staged,
            symlinks_staged: staged.symlinks_staged,
            bytes_staged: staged.bytes_staged,
            archive_size,
            simulated: config.simulate(),
            duration_ms: start.elapsed().as_millis() as u64,
            warnings,
        };

        for hook in &self.hooks {
            hook.post_backup(&result)?;
        }

        info!(
            "Backup complete: {} entries, {} symlinks, {} warnings in {}ms",
            result.entries_recorded,
            result.symlinks_staged,
            result.warnings.len(),
            result.duration_ms
        );
        Ok(Some(result))
    }

    /// Restore `archive` onto the filesystem
    ///
    /// In simulation nothing outside the temporary extraction directory is
    /// modified; the report lists what would have happened.
    ///
    /// # Errors
    ///
    /// - [`RagnarokError::UnsupportedArchiveFormat`] for an unknown suffix
    /// - [`RagnarokError::CompressionToolUnavailable`] if `zstd` is needed
    ///   and missing
    /// - [`RagnarokError::MissingManifest`] / [`RagnarokError::InvalidManifest`]
    ///   if the archive has no usable `affiliation.json`
    /// - [`RagnarokError::HookExecution`] if a hook fails
    #[instrument(skip(self))]
    pub fn restore(&self, archive: &Path) -> Result<RestoreReport> {
        let start = Instant::now();
        let config = &self.config;

        let format = Compression::detect(archive)?;
        compression::ensure_tool_available(format)?;
        if !archive.is_file() {
            return Err(RagnarokError::invalid_path(archive, "archive does not exist"));
        }

        for hook in &self.hooks {
            hook.pre_restore(archive)?;
        }

        let extracted = tempfile::Builder::new().prefix("ragnarok-restore-").tempdir()?;
        info!("Extracting {} ({})", archive.display(), format);
        self.report_progress("extract", Some(archive.display().to_string()), 0, 0);
        compression::extract_archive(archive, extracted.path())?;

        let manifest = Manifest::load(extracted.path())?;
        debug!("Loaded manifest with {} entries", manifest.entries.len());

        let resolver = ConflictResolver::new(config.conflict_policy, config.simulate());
        let mut report = RestoreReport {
            simulated: config.simulate(),
            ..RestoreReport::default()
        };

        if config.restore_packages {
            self.reconcile_inventory(&extracted.path().join(METADATA_DIR), resolver, &mut report);
        } else {
            debug!("Package reconciliation disabled");
        }

        let mut engine = RestoreEngine::new(extracted.path(), resolver, self.prompter.as_ref())
            .with_permissions(config.apply_permissions);
        if let Some(progress) = &self.progress {
            engine = engine.with_progress(progress.clone());
        }
        engine.run(&manifest, &mut report);
        report.duration_ms = start.elapsed().as_millis() as u64;

        for hook in &self.hooks {
            hook.post_restore(&report)?;
        }

        info!(
            "Restore complete: {} restored, {} overwritten, {} identical, {} skipped, {} symlinks, {} warnings in {}ms",
            report.files_restored,
            report.files_overwritten,
            report.skipped_identical,
            report.skipped_conflicts,
            report.symlinks_created,
            report.warnings.len(),
            report.duration_ms
        );
        Ok(report)
    }

    fn collect_inventory(&self, metadata_dir: &Path, warnings: &mut Vec<String>) -> Result<()> {
        let installed = match self.packages.manual_package_listing() {
            Ok(listing) => listing,
            Err(e) => {
                let message = format!("Could not collect installed packages: {}", e);
                warn!("{}", message);
                warnings.push(message.clone());
                format!("# {}\n", message)
            }
        };
        fs::write(metadata_dir.join(INSTALLED_PACKAGES_FILE), installed)?;

        let repos = match self.packages.repository_listing() {
            Ok(listing) => listing,
            Err(e) => {
                let message = format!("Could not collect apt repositories: {}", e);
                warn!("{}", message);
                warnings.push(message.clone());
                format!("# {}\n", message)
            }
        };
        fs::write(metadata_dir.join(APT_REPOS_FILE), repos)?;
        Ok(())
    }

    fn reconcile_inventory(&self, metadata_dir: &Path, resolver: ConflictResolver, report: &mut RestoreReport) {
        if !metadata_dir.is_dir() {
            debug!("Archive carries no package metadata");
            return;
        }
        let reconciler = PackageReconciler::new(self.packages.as_ref(), resolver, self.prompter.as_ref());

        let repos = metadata_dir.join(APT_REPOS_FILE);
        if repos.is_file() {
            if let Err(e) = reconciler.reconcile_repositories(&repos, &self.config.local_metadata_dir(), report) {
                let message = format!("Could not restore APT repositories: {}", e);
                warn!("{}", message);
                report.warnings.push(message);
            }
        }

        let installed = metadata_dir.join(INSTALLED_PACKAGES_FILE);
        match fs::read_to_string(&installed) {
            Ok(listing) => reconciler.reconcile_packages(&listing, report),
            Err(e) if installed.exists() => {
                let message = format!("Cannot read {}: {}", installed.display(), e);
                warn!("{}", message);
                report.warnings.push(message);
            }
            Err(_) => debug!("No package listing in archive"),
        }
    }

    fn report_progress(&self, operation: &'static str, item: Option<String>, processed: usize, bytes: u64) {
        if let Some(progress) = &self.progress {
            progress(ProgressInfo {
                operation,
                current_item: item,
                processed,
                bytes_processed: bytes,
            });
        }
    }
}

/// Builder for [`Ragnarok`]
#[derive(Default)]
pub struct RagnarokBuilder {
    config: Option<Config>,
    hooks: Vec<Box<dyn Hook>>,
    prompter: Option<Box<dyn Prompter>>,
    packages: Option<Box<dyn PackageManager>>,
    progress: Option<ProgressCallback>,
}

impl RagnarokBuilder {
    /// Create a builder with default collaborators
    pub fn new() -> Self {
        Self::default()
    }

    /// Use `config` instead of the defaults for the current user
    pub fn config(mut self, config: Config) -> Self {
        self.config = Some(config);
        self
    }

    /// Add a hook, run after the script hooks from the configuration
    pub fn hook(mut self, hook: impl Hook + 'static) -> Self {
        self.hooks.push(Box::new(hook));
        self
    }

    /// Answer conflict questions with `prompter` instead of the terminal
    pub fn prompter(mut self, prompter: impl Prompter + 'static) -> Self {
        self.prompter = Some(Box::new(prompter));
        self
    }

    /// Query packages through `manager` instead of `dpkg`
    pub fn package_manager(mut self, manager: impl PackageManager + 'static) -> Self {
        self.packages = Some(Box::new(manager));
        self
    }

    /// Report staging and restore progress to `callback`
    pub fn progress(mut self, callback: ProgressCallback) -> Self {
        self.progress = Some(callback);
        self
    }

    /// Build the instance
    ///
    /// Without an explicit configuration, the defaults for the current user
    /// are resolved here.
    pub fn build(self) -> Result<Ragnarok> {
        let config = match self.config {
            Some(config) => config,
            None => Config::builder().build()?,
        };

        let mut hooks: Vec<Box<dyn Hook>> = config
            .hook_scripts
            .iter()
            .map(|(phase, script)| {
                Box::new(ScriptHook::new(*phase, script.clone()).simulated(config.simulate()))
                    as Box<dyn Hook>
            })
            .collect();
        hooks.extend(self.hooks);

        Ok(Ragnarok {
            hooks,
            prompter: self.prompter.unwrap_or_else(|| Box::new(TerminalPrompter)),
            packages: self
                .packages
                .unwrap_or_else(|| Box::new(DpkgPackageManager::new())),
            progress: self.progress,
            config,
        })
    }
}

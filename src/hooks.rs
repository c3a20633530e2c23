//! Pre/post operation hooks
//!
//! Hooks run around backup and restore. A failing pre-hook cancels the
//! operation before any work starts; a failing post-hook fails the
//! operation after its work is done.

use crate::error::{RagnarokError, Result};
use crate::types::{BackupResult, RestoreReport};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info};

/// Hook interface for custom behavior around backups and restores
///
/// Every method defaults to doing nothing.
pub trait Hook: Send + Sync {
    /// Called before anything is staged
    fn pre_backup(&self) -> Result<()> {
        Ok(())
    }

    /// Called once the archive is written
    fn post_backup(&self, _result: &BackupResult) -> Result<()> {
        Ok(())
    }

    /// Called before the archive is extracted
    fn pre_restore(&self, _archive: &Path) -> Result<()> {
        Ok(())
    }

    /// Called after all restore passes
    fn post_restore(&self, _report: &RestoreReport) -> Result<()> {
        Ok(())
    }
}

/// No-op hook implementation
#[derive(Debug, Default, Clone, Copy)]
pub struct NoOpHook;

impl Hook for NoOpHook {}

/// When a script hook runs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HookPhase {
    /// Before backup
    PreBackup,
    /// After backup
    PostBackup,
    /// Before restore
    PreRestore,
    /// After restore
    PostRestore,
}

impl fmt::Display for HookPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            HookPhase::PreBackup => "pre-backup",
            HookPhase::PostBackup => "post-backup",
            HookPhase::PreRestore => "pre-restore",
            HookPhase::PostRestore => "post-restore",
        })
    }
}

/// Validate a hook script location
///
/// Only local paths are accepted.
pub fn validate_script(script: &str) -> Result<PathBuf> {
    if script.trim().is_empty() {
        return Err(RagnarokError::config("hook script path is empty"));
    }
    if script.contains("://") {
        return Err(RagnarokError::config(format!(
            "remote hook scripts are not supported: {}",
            script
        )));
    }
    Ok(PathBuf::from(script))
}

/// Runs a local shell script with `sh` at one phase
#[derive(Debug, Clone)]
pub struct ScriptHook {
    phase: HookPhase,
    script: PathBuf,
    simulate: bool,
}

impl ScriptHook {
    /// Create a hook for `phase`
    pub fn new(phase: HookPhase, script: impl Into<PathBuf>) -> Self {
        Self {
            phase,
            script: script.into(),
            simulate: false,
        }
    }

    /// Log instead of running
    pub fn simulated(mut self, simulate: bool) -> Self {
        self.simulate = simulate;
        self
    }

    /// Phase this hook is bound to
    pub fn phase(&self) -> HookPhase {
        self.phase
    }

    fn run(&self, phase: HookPhase, archive: Option<&Path>) -> Result<()> {
        if phase != self.phase {
            return Ok(());
        }
        if self.simulate {
            info!("[DRY-RUN] Would run {} hook: {}", phase, self.script.display());
            return Ok(());
        }
        if !self.script.is_file() {
            return Err(RagnarokError::HookExecution(format!(
                "{} hook script not found: {}",
                phase,
                self.script.display()
            )));
        }

        debug!("Running {} hook {:?}", phase, self.script);
        let mut command = Command::new("sh");
        command.arg(&self.script).env("RAGNAROK_PHASE", phase.to_string());
        if let Some(archive) = archive {
            command.env("RAGNAROK_ARCHIVE", archive);
        }

        let status = command.status().map_err(|e| {
            RagnarokError::HookExecution(format!("failed to start {} hook: {}", phase, e))
        })?;
        if !status.success() {
            return Err(RagnarokError::HookExecution(format!(
                "{} hook {} exited with {}",
                phase,
                self.script.display(),
                status
            )));
        }
        Ok(())
    }
}

impl Hook for ScriptHook {
    fn pre_backup(&self) -> Result<()> {
        self.run(HookPhase::PreBackup, None)
    }

    fn post_backup(&self, result: &BackupResult) -> Result<()> {
        self.run(HookPhase::PostBackup, Some(&result.archive_path))
    }

    fn pre_restore(&self, archive: &Path) -> Result<()> {
        self.run(HookPhase::PreRestore, Some(archive))
    }

    fn post_restore(&self, _report: &RestoreReport) -> Result<()> {
        self.run(HookPhase::PostRestore, None)
    }
}

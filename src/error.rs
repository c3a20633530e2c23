//! Error types for the Ragnarok library
//!
//! This module defines every error that can surface from a backup or restore
//! run. Errors fall into two groups:
//!
//! - **Fatal** errors corrupt the addressing of the rest of the operation
//!   (no manifest, unknown archive format, missing compressor binary). They
//!   abort the run immediately.
//! - **Per-entry** errors affect a single filesystem object (one missing
//!   staged file, one failed `chmod`). They are recovered locally, recorded
//!   as a warning naming the path, and the run moves on to the next entry.

use std::path::PathBuf;
use thiserror::Error;

/// Type alias for Results in the Ragnarok library
pub type Result<T> = std::result::Result<T, RagnarokError>;

/// Main error type for all Ragnarok operations
#[derive(Debug, Error)]
pub enum RagnarokError {
    /// I/O errors during file operations
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors during JSON serialization/deserialization
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Walk directory error from walkdir crate
    #[error("Walk directory error: {0}")]
    WalkDir(#[from] walkdir::Error),

    /// Errors reading or writing zip containers
    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    /// A path handed to the path mapper is not absolute or not valid UTF-8
    #[error("Invalid path: {path:?} ({reason})")]
    InvalidPath {
        /// The rejected path
        path: PathBuf,
        /// Why the path was rejected
        reason: &'static str,
    },

    /// A metadata record points at a staged path that is absent after extraction
    #[error("Archive entry missing: {0}")]
    MissingArchiveEntry(String),

    /// The archive file name does not carry a recognized extension
    #[error("Unsupported archive format: {0:?}")]
    UnsupportedArchiveFormat(PathBuf),

    /// The affiliation document was not found after extraction
    #[error("affiliation.json not found in backup at {0:?}")]
    MissingManifest(PathBuf),

    /// A metadata document exists but could not be read or parsed
    #[error("Invalid metadata document {path:?}: {message}")]
    InvalidManifest {
        /// Path to the offending document
        path: PathBuf,
        /// Underlying failure
        message: String,
    },

    /// chmod/chown failed for one entry
    #[error("Failed to apply permissions to {path:?}: {source}")]
    PermissionApply {
        /// Destination whose mode or ownership could not be set
        path: PathBuf,
        /// Underlying I/O failure
        #[source]
        source: std::io::Error,
    },

    /// The external compressor binary required by the format is not on PATH
    #[error("'{0}' compression selected but '{0}' is not installed or not in PATH")]
    CompressionToolUnavailable(String),

    /// The compressor ran but failed
    #[error("Compression error: {0}")]
    CompressionFailed(String),

    /// Invalid configuration
    #[error("Invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// The interactive prompt could not be shown or answered
    #[error("Prompt failed: {0}")]
    Prompt(String),

    /// Hook execution error
    #[error("Hook execution error: {0}")]
    HookExecution(String),

    /// Package manager invocation failed
    #[error("Package manager error: {0}")]
    PackageManager(String),

    /// Generic error for unexpected conditions
    #[error("Internal error: {0}")]
    Internal(String),
}

impl RagnarokError {
    /// Create an internal error with a custom message
    pub fn internal(msg: impl Into<String>) -> Self {
        RagnarokError::Internal(msg.into())
    }

    /// Create a configuration error with a custom message
    pub fn config(msg: impl Into<String>) -> Self {
        RagnarokError::InvalidConfiguration(msg.into())
    }

    /// Create a package manager error with a custom message
    pub fn package_manager(msg: impl Into<String>) -> Self {
        RagnarokError::PackageManager(msg.into())
    }

    /// Create an invalid-path error
    pub fn invalid_path(path: impl Into<PathBuf>, reason: &'static str) -> Self {
        RagnarokError::InvalidPath {
            path: path.into(),
            reason,
        }
    }

    /// Check if this error must abort the whole operation
    ///
    /// Anything that breaks the addressing of the remaining entries is fatal.
    /// Per-entry failures are reported and the run continues.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            RagnarokError::UnsupportedArchiveFormat(_)
                | RagnarokError::MissingManifest(_)
                | RagnarokError::InvalidManifest { .. }
                | RagnarokError::CompressionToolUnavailable(_)
                | RagnarokError::CompressionFailed(_)
                | RagnarokError::InvalidConfiguration(_)
                | RagnarokError::HookExecution(_)
        )
    }

    /// Check if this error only concerns a single entry
    pub fn is_per_entry(&self) -> bool {
        matches!(
            self,
            RagnarokError::InvalidPath { .. }
                | RagnarokError::MissingArchiveEntry(_)
                | RagnarokError::PermissionApply { .. }
        )
    }

    /// Get a user-friendly error message with suggestions
    pub fn user_message(&self) -> String {
        match self {
            RagnarokError::CompressionToolUnavailable(tool) => format!(
                "'{}' is required for this archive format but was not found in PATH. \
                 Install it or choose another compression.",
                tool
            ),
            RagnarokError::UnsupportedArchiveFormat(path) => format!(
                "Unknown archive type: {:?}. Supported: .tar, .tar.gz, .tgz, .zip, .tar.zst",
                path
            ),
            RagnarokError::MissingManifest(_) => {
                "affiliation.json not found in backup! The archive was not produced by ragnarok."
                    .to_string()
            }
            RagnarokError::PermissionApply { path, .. } => format!(
                "Could not set mode/ownership on {:?}. Run as root to restore ownership.",
                path
            ),
            _ => self.to_string(),
        }
    }
}

//! Conflict resolution for restore targets
//!
//! Every file and symlink written by restore first goes through one
//! evaluation:
//!
//! 1. Destination absent: [`Decision::Restore`].
//! 2. Destination identical to the staged source: [`Decision::Skip`] with
//!    [`SkipReason::Identical`], whatever the policy says.
//! 3. Destination differs: the configured [`ConflictPolicy`] decides. With
//!    no policy, a real run asks the [`Prompter`]; a simulated run returns
//!    [`Decision::Ask`] without blocking.
//!
//! The resolver never touches the filesystem beyond reading for the
//! comparison. Executing the decision is the caller's job.

use crate::error::{RagnarokError, Result};
use crate::types::{ConflictPolicy, Decision, SkipReason};
use crate::utils;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::trace;

/// Result of comparing a staged source with its destination
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Comparison {
    /// Nothing exists at the destination
    Missing,
    /// Destination holds the same bytes (or the same link target)
    Identical,
    /// Destination exists and differs
    Differs,
}

/// Compare a staged regular file with whatever lives at `destination`
///
/// Existence is checked without following a final symlink. A directory at
/// the destination always differs from a file.
///
/// # Errors
///
/// - [`RagnarokError::Io`] if either side cannot be read
pub fn compare_file(source: &Path, destination: &Path) -> Result<Comparison> {
    let metadata = match fs::symlink_metadata(destination) {
        Ok(metadata) => metadata,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Comparison::Missing),
        Err(e) => return Err(e.into()),
    };

    if metadata.is_dir() {
        return Ok(Comparison::Differs);
    }
    if metadata.file_type().is_symlink() && fs::metadata(destination).is_err() {
        // Dangling link: nothing to compare against
        return Ok(Comparison::Differs);
    }

    let comparison = if utils::files_identical(source, destination)? {
        Comparison::Identical
    } else {
        Comparison::Differs
    };
    trace!("Compared {:?} with {:?}: {:?}", source, destination, comparison);
    Ok(comparison)
}

/// Compare a recorded link target with whatever lives at `destination`
///
/// Only an existing symlink with exactly the same target text is identical.
pub fn compare_link(target: &str, destination: &Path) -> Result<Comparison> {
    match fs::symlink_metadata(destination) {
        Ok(metadata) if metadata.file_type().is_symlink() => {
            let existing = fs::read_link(destination)?;
            if existing.as_os_str() == target {
                Ok(Comparison::Identical)
            } else {
                Ok(Comparison::Differs)
            }
        }
        Ok(_) => Ok(Comparison::Differs),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(Comparison::Missing),
        Err(e) => Err(e.into()),
    }
}

/// Answers yes/no questions when no conflict policy is configured
pub trait Prompter: Send + Sync {
    /// Ask `question`; `true` means overwrite
    fn confirm(&self, question: &str) -> Result<bool>;
}

/// Prompts on the controlling terminal
#[derive(Debug, Default, Clone, Copy)]
pub struct TerminalPrompter;

impl Prompter for TerminalPrompter {
    fn confirm(&self, question: &str) -> Result<bool> {
        dialoguer::Confirm::new()
            .with_prompt(question)
            .default(false)
            .interact()
            .map_err(|e| RagnarokError::Prompt(e.to_string()))
    }
}

/// Prompter that always gives the same answer
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Prompter for FixedAnswer {
    fn confirm(&self, _question: &str) -> Result<bool> {
        Ok(self.0)
    }
}

/// Turns comparisons into decisions
#[derive(Debug, Clone, Copy, Default)]
pub struct ConflictResolver {
    policy: Option<ConflictPolicy>,
    simulate: bool,
}

impl ConflictResolver {
    /// Create a resolver; `None` means interactive
    pub fn new(policy: Option<ConflictPolicy>, simulate: bool) -> Self {
        Self { policy, simulate }
    }

    /// Configured policy, if any
    pub fn policy(&self) -> Option<ConflictPolicy> {
        self.policy
    }

    /// Whether decisions are only being simulated
    pub fn is_simulation(&self) -> bool {
        self.simulate
    }

    /// Whether resolving `comparison` requires an answer from the user
    pub fn needs_prompt(&self, comparison: Comparison) -> bool {
        comparison == Comparison::Differs && self.policy.is_none() && !self.simulate
    }

    /// Pure decision given the comparison and, if one was asked, the answer
    pub fn decide(&self, comparison: Comparison, answer: Option<bool>) -> Decision {
        match comparison {
            Comparison::Missing => Decision::Restore,
            Comparison::Identical => Decision::Skip(SkipReason::Identical),
            Comparison::Differs => match self.policy {
                Some(ConflictPolicy::Overwrite) => Decision::Overwrite,
                Some(ConflictPolicy::Skip) => Decision::Skip(SkipReason::Policy),
                None if self.simulate => Decision::Ask,
                None => match answer {
                    Some(true) => Decision::Overwrite,
                    Some(false) => Decision::Skip(SkipReason::Declined),
                    None => Decision::Ask,
                },
            },
        }
    }

    /// Decide, asking `prompter` only when a real run has no policy
    pub fn resolve(
        &self,
        comparison: Comparison,
        prompter: &dyn Prompter,
        question: &str,
    ) -> Result<Decision> {
        let answer = if self.needs_prompt(comparison) {
            Some(prompter.confirm(question)?)
        } else {
            None
        };
        Ok(self.decide(comparison, answer))
    }
}

//! Package inventory on Debian-family systems
//!
//! Backup stores two opaque text files under `metadata/`:
//!
//! - `installed_packages.txt`: the `dpkg -l` lines (status `ii`) of every
//!   manually installed package
//! - `apt_repos.txt`: `/etc/apt/sources.list` and every
//!   `/etc/apt/sources.list.d/*.list`, concatenated with headers
//!
//! Restore compares them with the running system. The repository listing is
//! never written into `/etc/apt`; when accepted it is copied next to the
//! local backups for the operator to review. Package installs and upgrades
//! go through the [`PackageManager`].

use crate::conflict::{Comparison, ConflictResolver, Prompter};
use crate::error::{RagnarokError, Result};
use crate::metadata::OrderedMap;
use crate::types::{Decision, RestoreReport, SkipReason};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::{debug, info, warn};

/// Directory inside the archive holding the inventory files
pub const METADATA_DIR: &str = "metadata";
/// Package listing file name
pub const INSTALLED_PACKAGES_FILE: &str = "installed_packages.txt";
/// Repository listing file name
pub const APT_REPOS_FILE: &str = "apt_repos.txt";

/// Access to the system package database
pub trait PackageManager: Send + Sync {
    /// `dpkg -l` lines of the manually installed packages
    fn manual_package_listing(&self) -> Result<String>;

    /// Currently installed packages and versions
    fn installed_packages(&self) -> Result<OrderedMap<String>>;

    /// Current repository configuration in the `apt_repos.txt` rendering
    fn repository_listing(&self) -> Result<String>;

    /// Install `package` at exactly `version`
    fn install(&self, package: &str, version: &str) -> Result<()>;
}

/// `dpkg`/`apt` backed implementation
#[derive(Debug, Clone)]
pub struct DpkgPackageManager {
    apt_root: PathBuf,
}

impl Default for DpkgPackageManager {
    fn default() -> Self {
        Self {
            apt_root: PathBuf::from("/etc/apt"),
        }
    }
}

impl DpkgPackageManager {
    /// Use the system `/etc/apt`
    pub fn new() -> Self {
        Self::default()
    }

    /// Read repository configuration from another directory
    pub fn with_apt_root(mut self, apt_root: impl Into<PathBuf>) -> Self {
        self.apt_root = apt_root.into();
        self
    }
}

impl PackageManager for DpkgPackageManager {
    fn manual_package_listing(&self) -> Result<String> {
        let manual: BTreeSet<String> = command_output("apt-mark", &["showmanual"])?
            .lines()
            .map(str::to_string)
            .collect();
        let auto: BTreeSet<String> = command_output("apt-mark", &["showauto"])?
            .lines()
            .map(str::to_string)
            .collect();
        let wanted: BTreeSet<&str> = manual.difference(&auto).map(String::as_str).collect();
        if wanted.is_empty() {
            return Err(RagnarokError::package_manager(
                "No manual packages found or not a Debian-based system",
            ));
        }

        let listing = command_output("dpkg", &["-l"])?;
        let mut selected = String::new();
        for line in listing.lines().filter(|l| l.starts_with("ii")) {
            let Some(name) = line.split_whitespace().nth(1) else {
                continue;
            };
            let bare = name.split(':').next().unwrap_or(name);
            if wanted.contains(name) || wanted.contains(bare) {
                selected.push_str(line);
                selected.push('\n');
            }
        }
        Ok(selected)
    }

    fn installed_packages(&self) -> Result<OrderedMap<String>> {
        Ok(parse_dpkg_list(&command_output("dpkg", &["-l"])?))
    }

    fn repository_listing(&self) -> Result<String> {
        Ok(render_apt_sources(&self.apt_root)?)
    }

    fn install(&self, package: &str, version: &str) -> Result<()> {
        let spec = format!("{}={}", package, version);
        info!("Running sudo apt-get install {}", spec);
        let status = Command::new("sudo")
            .args(["apt-get", "install", &spec])
            .status()
            .map_err(|e| RagnarokError::package_manager(format!("failed to run apt-get: {}", e)))?;
        if status.success() {
            Ok(())
        } else {
            Err(RagnarokError::package_manager(format!(
                "apt-get install {} exited with {}",
                spec, status
            )))
        }
    }
}

fn command_output(program: &str, args: &[&str]) -> Result<String> {
    let output = Command::new(program)
        .args(args)
        .output()
        .map_err(|e| RagnarokError::package_manager(format!("failed to run {}: {}", program, e)))?;
    if !output.status.success() {
        return Err(RagnarokError::package_manager(format!(
            "{} {} exited with {}",
            program,
            args.join(" "),
            output.status
        )));
    }
    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// Concatenate `sources.list` and `sources.list.d/*.list` under `apt_root`
///
/// ```text
/// ### /etc/apt/sources.list
/// <content>
/// ### /etc/apt/sources.list.d/
/// ## /etc/apt/sources.list.d/docker.list
/// <content>
/// ```
pub fn render_apt_sources(apt_root: &Path) -> std::io::Result<String> {
    let mut rendered = String::new();

    let sources = apt_root.join("sources.list");
    if sources.exists() {
        rendered.push_str(&format!("### {}\n", sources.display()));
        rendered.push_str(&fs::read_to_string(&sources)?);
        rendered.push('\n');
    }

    let list_dir = apt_root.join("sources.list.d");
    rendered.push_str(&format!("### {}/\n", list_dir.display()));
    if list_dir.is_dir() {
        let mut lists: Vec<PathBuf> = fs::read_dir(&list_dir)?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.extension().is_some_and(|ext| ext == "list"))
            .collect();
        lists.sort();
        for list in lists {
            rendered.push_str(&format!("## {}\n", list.display()));
            rendered.push_str(&fs::read_to_string(&list)?);
            rendered.push('\n');
        }
    }

    Ok(rendered)
}

/// Parse `dpkg -l` output into package name and version
///
/// Only lines with status `ii` count; columns two and three hold the name
/// and version.
pub fn parse_dpkg_list(text: &str) -> OrderedMap<String> {
    text.lines()
        .filter(|line| line.starts_with("ii"))
        .filter_map(|line| {
            let mut columns = line.split_whitespace().skip(1);
            match (columns.next(), columns.next()) {
                (Some(name), Some(version)) => Some((name.to_string(), version.to_string())),
                _ => None,
            }
        })
        .collect()
}

/// Compare two Debian version strings
///
/// `[epoch:]upstream[-revision]`; epochs compare numerically, the other two
/// parts with dpkg's mixed alpha/numeric ordering where `~` sorts before
/// everything, even the end of the string.
pub fn compare_versions(left: &str, right: &str) -> Ordering {
    let (left_epoch, left_upstream, left_revision) = split_version(left);
    let (right_epoch, right_upstream, right_revision) = split_version(right);

    left_epoch
        .cmp(&right_epoch)
        .then_with(|| compare_fragment(left_upstream, right_upstream))
        .then_with(|| compare_fragment(left_revision, right_revision))
}

fn split_version(version: &str) -> (u64, &str, &str) {
    let (epoch, rest) = match version.split_once(':') {
        Some((epoch, rest)) => match epoch.parse::<u64>() {
            Ok(epoch) => (epoch, rest),
            Err(_) => (0, version),
        },
        None => (0, version),
    };
    match rest.rsplit_once('-') {
        Some((upstream, revision)) => (epoch, upstream, revision),
        None => (epoch, rest, ""),
    }
}

fn char_order(c: Option<u8>) -> i32 {
    match c {
        None => 0,
        Some(c) if c.is_ascii_digit() => 0,
        Some(c) if c.is_ascii_alphabetic() => c as i32,
        Some(b'~') => -1,
        Some(c) => c as i32 + 256,
    }
}

fn compare_fragment(left: &str, right: &str) -> Ordering {
    let (a, b) = (left.as_bytes(), right.as_bytes());
    let (mut i, mut j) = (0, 0);
    let is_digit = |s: &[u8], k: usize| s.get(k).is_some_and(u8::is_ascii_digit);

    while i < a.len() || j < b.len() {
        while (i < a.len() && !is_digit(a, i)) || (j < b.len() && !is_digit(b, j)) {
            let (ac, bc) = (char_order(a.get(i).copied()), char_order(b.get(j).copied()));
            if ac != bc {
                return ac.cmp(&bc);
            }
            i += 1;
            j += 1;
        }

        while a.get(i) == Some(&b'0') {
            i += 1;
        }
        while b.get(j) == Some(&b'0') {
            j += 1;
        }

        let mut first_diff = Ordering::Equal;
        while is_digit(a, i) && is_digit(b, j) {
            if first_diff == Ordering::Equal {
                first_diff = a[i].cmp(&b[j]);
            }
            i += 1;
            j += 1;
        }
        if is_digit(a, i) {
            return Ordering::Greater;
        }
        if is_digit(b, j) {
            return Ordering::Less;
        }
        if first_diff != Ordering::Equal {
            return first_diff;
        }
    }
    Ordering::Equal
}

/// What restore does about one backed-up package
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PackagePlan {
    /// Installed at the backed-up version
    UpToDate,
    /// Not installed; install the backed-up version
    Install,
    /// Older version installed; upgrade accepted
    Upgrade,
    /// Older version installed; upgrade refused
    UpgradeDeclined,
    /// Newer version installed; downgrades are never done
    DowngradeSkipped,
}

/// Plan and outcome for one package
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageAction {
    /// Package name
    pub name: String,
    /// Version recorded in the backup
    pub backup_version: String,
    /// Version currently installed, if any
    pub installed_version: Option<String>,
    /// What was decided
    pub plan: PackagePlan,
    /// Whether the install/upgrade was run successfully
    pub executed: bool,
}

impl PackageAction {
    /// Whether the plan calls the package manager
    pub fn installs(&self) -> bool {
        matches!(self.plan, PackagePlan::Install | PackagePlan::Upgrade)
    }
}

/// Reconciles the package inventory of an archive with the running system
pub struct PackageReconciler<'a> {
    manager: &'a dyn PackageManager,
    resolver: ConflictResolver,
    prompter: &'a dyn Prompter,
}

impl<'a> PackageReconciler<'a> {
    /// Create a reconciler sharing the restore's policy and prompter
    pub fn new(manager: &'a dyn PackageManager, resolver: ConflictResolver, prompter: &'a dyn Prompter) -> Self {
        Self {
            manager,
            resolver,
            prompter,
        }
    }

    /// Compare the archived repository listing with the system
    ///
    /// On an accepted difference the listing is copied to
    /// `local_metadata_dir/apt_repos.txt`.
    pub fn reconcile_repositories(&self, archived: &Path, local_metadata_dir: &Path, report: &mut RestoreReport) -> Result<()> {
        let backup = fs::read_to_string(archived)?;
        let comparison = match self.manager.repository_listing() {
            Ok(current) if current == backup => Comparison::Identical,
            Ok(_) => Comparison::Differs,
            Err(e) => {
                push_warning(report, format!("Error comparing APT repositories: {}", e));
                Comparison::Differs
            }
        };

        let destination = local_metadata_dir.join(APT_REPOS_FILE);
        let question = format!("Restore APT repositories to {}?", destination.display());
        let decision = match self.resolver.resolve(comparison, self.prompter, &question) {
            Ok(decision) => decision,
            Err(e) => {
                push_warning(report, format!("{}; leaving APT repositories untouched", e));
                Decision::Skip(SkipReason::Declined)
            }
        };

        if decision.writes() && !self.resolver.is_simulation() {
            fs::create_dir_all(local_metadata_dir)?;
            fs::copy(archived, &destination)?;
        }
        debug!("APT repositories: {:?}", decision);
        report.apt_repos = Some(decision);
        Ok(())
    }

    /// Install missing packages and offer upgrades for outdated ones
    pub fn reconcile_packages(&self, listing: &str, report: &mut RestoreReport) {
        let backup = parse_dpkg_list(listing);
        if backup.is_empty() {
            debug!("No packages recorded in backup");
            return;
        }

        let current = match self.manager.installed_packages() {
            Ok(current) => current,
            Err(e) => {
                push_warning(report, format!("Error getting current packages: {}", e));
                OrderedMap::new()
            }
        };

        for (name, backup_version) in backup.iter() {
            let installed = current.get(name).cloned();
            let plan = match &installed {
                None => PackagePlan::Install,
                Some(installed) => match compare_versions(installed, backup_version) {
                    Ordering::Equal => PackagePlan::UpToDate,
                    Ordering::Greater => PackagePlan::DowngradeSkipped,
                    Ordering::Less => self.upgrade_plan(name, installed, backup_version, report),
                },
            };

            let mut action = PackageAction {
                name: name.to_string(),
                backup_version: backup_version.clone(),
                installed_version: installed,
                plan,
                executed: false,
            };

            if action.installs() && !self.resolver.is_simulation() {
                match self.manager.install(name, backup_version) {
                    Ok(()) => action.executed = true,
                    Err(e) => push_warning(report, format!("Failed to install {}={}: {}", name, backup_version, e)),
                }
            }
            report.packages.push(action);
        }
    }

    fn upgrade_plan(&self, name: &str, installed: &str, backup_version: &str, report: &mut RestoreReport) -> PackagePlan {
        let question = format!(
            "Package {} is installed at {}, backup has newer {}. Update?",
            name, installed, backup_version
        );
        // Simulation without a policy assumes the upgrade would be accepted
        match self.resolver.resolve(Comparison::Differs, self.prompter, &question) {
            Ok(Decision::Overwrite | Decision::Ask) => PackagePlan::Upgrade,
            Ok(_) => PackagePlan::UpgradeDeclined,
            Err(e) => {
                push_warning(report, format!("{}; not upgrading {}", e, name));
                PackagePlan::UpgradeDeclined
            }
        }
    }
}

fn push_warning(report: &mut RestoreReport, message: String) {
    warn!("{}", message);
    report.warnings.push(message);
}

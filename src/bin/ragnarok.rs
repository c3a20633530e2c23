//! # Ragnarok CLI - backup and restore for Linux servers
//!
//! ## Usage
//! ```bash
//! # List what to back up, one absolute path per line
//! echo /etc/nginx >> ~/ragnarokbackup/.ragnarokbackup
//!
//! # Create a gzip-compressed backup
//! ragnarok --backup --compress gz
//!
//! # See what a restore would do without touching anything
//! ragnarok --restore ~/ragnarokbackup/backups/backup_20240101_120000.tar.gz --dry-run
//!
//! # Restore, keeping every existing file that differs
//! ragnarok --restore backup_20240101_120000.tar.gz --conflict skip
//! ```

use clap::{ArgGroup, Parser, ValueEnum};
use colored::*;
use humantime::format_duration;
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use ragnarok::{
    BackupResult, Compression, Config, ConflictPolicy, Decision, HookPhase,
    OutcomeKind, ProgressInfo, Prompter, RagnarokBuilder, RestoreReport, Result, SkipReason,
    TerminalPrompter,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Ragnarok - simple, powerful backup tool for Linux servers
#[derive(Parser)]
#[command(name = "ragnarok")]
#[command(version)]
#[command(about = "Back up listed paths into one archive and restore them with links and permissions")]
#[command(long_about = None)]
#[command(group(ArgGroup::new("mode").required(true).args(["backup", "restore"])))]
struct Cli {
    /// Create a backup of every path in the selection list
    #[arg(long)]
    backup: bool,

    /// Restore a backup from the given archive
    #[arg(long, value_name = "ARCHIVE")]
    restore: Option<PathBuf>,

    /// Simulate: empty files on backup, no changes on restore
    #[arg(long)]
    dry_run: bool,

    /// Compression method for new backups
    #[arg(long, value_enum, default_value = "none")]
    compress: CompressArg,

    /// Directory for the archive instead of ~/ragnarokbackup/backups
    #[arg(long, value_name = "DIR")]
    output: Option<PathBuf>,

    /// Enable detailed output
    #[arg(short, long)]
    verbose: bool,

    /// Overwrite or skip existing files that differ; prompts when unset
    #[arg(long, value_enum)]
    conflict: Option<ConflictArg>,

    /// Selection list to read instead of ~/ragnarokbackup/.ragnarokbackup
    #[arg(long, value_name = "FILE")]
    list: Option<PathBuf>,

    /// Do not restore modes and ownership
    #[arg(long)]
    no_permissions: bool,

    /// Neither record nor reconcile installed packages and repositories
    #[arg(long)]
    skip_packages: bool,

    /// Show a spinner while working
    #[arg(long)]
    progress: bool,

    /// Script to run before backup
    #[arg(long, value_name = "SCRIPT")]
    prebak: Option<String>,

    /// Script to run after backup
    #[arg(long, value_name = "SCRIPT")]
    postbak: Option<String>,

    /// Script to run before restore
    #[arg(long, value_name = "SCRIPT")]
    prerest: Option<String>,

    /// Script to run after restore
    #[arg(long, value_name = "SCRIPT")]
    postrest: Option<String>,
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum CompressArg {
    None,
    Gz,
    Zstd,
    Zip,
}

impl From<CompressArg> for Compression {
    fn from(arg: CompressArg) -> Self {
        match arg {
            CompressArg::None => Compression::None,
            CompressArg::Gz => Compression::Gz,
            CompressArg::Zstd => Compression::Zstd,
            CompressArg::Zip => Compression::Zip,
        }
    }
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum ConflictArg {
    Overwrite,
    Skip,
}

impl From<ConflictArg> for ConflictPolicy {
    fn from(arg: ConflictArg) -> Self {
        match arg {
            ConflictArg::Overwrite => ConflictPolicy::Overwrite,
            ConflictArg::Skip => ConflictPolicy::Skip,
        }
    }
}

fn main() {
    let cli = Cli::parse();

    // Set up logging
    if cli.verbose || std::env::var_os("RUST_LOG").is_some() {
        let filter = EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new("ragnarok=debug"));
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    // Disable colors if needed
    if std::env::var("NO_COLOR").is_ok() {
        colored::control::set_override(false);
    }

    if let Err(e) = run(cli) {
        eprintln!("{}: {}", "Error".red().bold(), e.user_message());
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = build_config(&cli)?;
    let spinner = cli.progress.then(spinner);

    let mut builder = RagnarokBuilder::new().config(config.clone());
    if let Some(pb) = &spinner {
        builder = builder.prompter(SpinnerPrompter {
            spinner: pb.clone(),
            inner: TerminalPrompter,
        });
        let pb = pb.clone();
        builder = builder.progress(Arc::new(move |info: ProgressInfo| {
            let item = info.current_item.unwrap_or_default();
            pb.set_message(format!("{} ({}) {}", info.operation, info.processed, item));
        }));
    }
    let list_existed = config.selection_file.exists();
    let ragnarok = builder.build()?;

    let outcome = match &cli.restore {
        Some(archive) => {
            println!("{} {}", "Restoring from".blue().bold(), archive.display().to_string().cyan());
            ragnarok.restore(archive).map(|report| {
                finish_spinner(&spinner);
                print_restore(&report, cli.verbose);
            })
        }
        None => {
            println!("{}", "Creating backup...".blue().bold());
            ragnarok.backup().map(|result| {
                finish_spinner(&spinner);
                match result {
                    Some(result) => print_backup(&result),
                    None => {
                        if !list_existed {
                            println!(
                                "{}Created empty selection list {}",
                                dry_run_prefix(config.simulate()),
                                config.selection_file.display()
                            );
                        }
                        println!(
                            "{} No files or folders listed in {}. Nothing to back up.",
                            "!".yellow().bold(),
                            config.selection_file.display()
                        );
                    }
                }
            })
        }
    };
    finish_spinner(&spinner);
    outcome
}

fn build_config(cli: &Cli) -> Result<Config> {
    let mut builder = Config::builder()
        .dry_run(cli.dry_run)
        .compression(cli.compress.into())
        .conflict_policy(cli.conflict.map(ConflictPolicy::from))
        .apply_permissions(!cli.no_permissions)
        .collect_packages(!cli.skip_packages)
        .restore_packages(!cli.skip_packages);

    if let Some(output) = &cli.output {
        builder = builder.output_dir(output);
    }
    if let Some(list) = &cli.list {
        builder = builder.selection_file(list);
    }

    let scripts = [
        (HookPhase::PreBackup, &cli.prebak),
        (HookPhase::PostBackup, &cli.postbak),
        (HookPhase::PreRestore, &cli.prerest),
        (HookPhase::PostRestore, &cli.postrest),
    ];
    for (phase, script) in scripts {
        if let Some(script) = script {
            builder = builder.hook(phase, script.clone());
        }
    }

    builder.build()
}

fn spinner() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    if let Ok(style) = ProgressStyle::default_spinner().template("{spinner:.green} {msg}") {
        pb.set_style(style);
    }
    pb.enable_steady_tick(Duration::from_millis(100));
    pb.set_message("Working...");
    pb
}

/// Hides the spinner while a question is on screen
struct SpinnerPrompter<P> {
    spinner: ProgressBar,
    inner: P,
}

impl<P: Prompter> Prompter for SpinnerPrompter<P> {
    fn confirm(&self, question: &str) -> Result<bool> {
        self.spinner.suspend(|| self.inner.confirm(question))
    }
}

fn finish_spinner(spinner: &Option<ProgressBar>) {
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
}

fn dry_run_prefix(simulated: bool) -> ColoredString {
    if simulated {
        "[DRY-RUN] ".yellow().bold()
    } else {
        "".normal()
    }
}

fn print_backup(result: &BackupResult) {
    let prefix = dry_run_prefix(result.simulated);
    for warning in &result.warnings {
        println!("{}{} {}", prefix, "!".yellow().bold(), warning);
    }

    println!(
        "{}{} Backup complete: {}",
        prefix,
        "✓".green().bold(),
        result.archive_path.display().to_string().cyan()
    );
    println!("  Entries: {}", result.entries_recorded.to_string().cyan());
    println!(
        "  Files: {}  Directories: {}  Symlinks: {}",
        result.files_staged.to_string().cyan(),
        result.directories_staged.to_string().cyan(),
        result.symlinks_staged.to_string().cyan()
    );
    println!(
        "  Staged: {}  Archive: {}",
        HumanBytes(result.bytes_staged).to_string().cyan(),
        HumanBytes(result.archive_size).to_string().cyan()
    );
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(result.duration_ms)).to_string().cyan()
    );
}

fn print_restore(report: &RestoreReport, verbose: bool) {
    let prefix = dry_run_prefix(report.simulated);

    for outcome in &report.outcomes {
        let line = match (outcome.kind, outcome.decision) {
            (_, Decision::Ask) => Some(format!(
                "Would ask whether to overwrite {}",
                outcome.destination.display()
            )),
            (OutcomeKind::Permissions, _) if !verbose => None,
            (OutcomeKind::Permissions, _) => Some(format!("Permissions {}", outcome.destination.display())),
            (_, Decision::Skip(SkipReason::Identical)) if !verbose => None,
            (_, Decision::Skip(reason)) => Some(format!(
                "Skipped {} ({:?})",
                outcome.destination.display(),
                reason
            )),
            (_, Decision::Restore) => Some(format!(
                "{} {} {}",
                if outcome.executed { "Restored" } else { "Would restore" },
                outcome.kind.label(),
                outcome.destination.display()
            )),
            (_, Decision::Overwrite) => Some(format!(
                "{} {} {}",
                if outcome.executed { "Overwrote" } else { "Would overwrite" },
                outcome.kind.label(),
                outcome.destination.display()
            )),
            (_, Decision::Unevaluated) => None,
        };
        if let Some(line) = line {
            println!("{}{}", prefix, line);
        }
    }

    if let Some(decision) = report.apt_repos {
        println!("{}APT repositories: {:?}", prefix, decision);
    }
    for action in &report.packages {
        println!(
            "{}Package {} {}: {:?}",
            prefix, action.name, action.backup_version, action.plan
        );
    }
    for warning in &report.warnings {
        println!("{}{} {}", prefix, "!".yellow().bold(), warning);
    }

    println!("{}{} Restore complete", prefix, "✓".green().bold());
    println!(
        "  Restored: {}  Overwritten: {}  Identical: {}  Skipped: {}",
        report.files_restored.to_string().cyan(),
        report.files_overwritten.to_string().cyan(),
        report.skipped_identical.to_string().cyan(),
        report.skipped_conflicts.to_string().cyan()
    );
    println!(
        "  Directories: {}  Symlinks: {}  Permissions: {}",
        report.directories_created.to_string().cyan(),
        report.symlinks_created.to_string().cyan(),
        report.permissions_applied.to_string().cyan()
    );
    if report.simulated {
        let planned = report
            .outcomes
            .iter()
            .filter(|o| o.kind != OutcomeKind::Permissions && o.decision.writes())
            .count();
        println!("  Would write: {}", planned.to_string().yellow());
    }
    if report.pending_prompts > 0 {
        println!("  Would ask: {}", report.pending_prompts.to_string().yellow());
    }
    println!(
        "  Time: {}",
        format_duration(Duration::from_millis(report.duration_ms)).to_string().cyan()
    );
}

//! End-to-end backup and restore scenarios
//!
//! Every scenario builds a small server-like tree in temporary directories,
//! backs it up through the public API, damages the tree and restores it.

use ::ragnarok::*;
use filetime::FileTime;
use std::fs;
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// Temporary home and data directories plus helpers to drive backups
pub struct BackupHarness {
    pub home: TempDir,
    pub data: TempDir,
}

impl BackupHarness {
    pub fn new() -> Self {
        Self {
            home: TempDir::new().unwrap(),
            data: TempDir::new().unwrap(),
        }
    }

    /// Absolute path inside the data directory
    pub fn path(&self, relative: &str) -> PathBuf {
        self.data.path().join(relative)
    }

    pub fn write(&self, relative: &str, content: &str) -> PathBuf {
        let path = self.path(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, content).unwrap();
        path
    }

    pub fn link(&self, target: &str, relative: &str) -> PathBuf {
        let path = self.path(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        symlink(target, &path).unwrap();
        path
    }

    /// Configuration without package handling
    pub fn config(&self) -> ConfigBuilder {
        Config::builder()
            .home(self.home.path())
            .collect_packages(false)
            .restore_packages(false)
    }

    pub fn backup_with(&self, paths: &[PathBuf], config: ConfigBuilder) -> BackupResult {
        let config = config.build().unwrap();
        fs::create_dir_all(&config.backup_dir).unwrap();
        let list: String = paths.iter().map(|p| format!("{}\n", p.display())).collect();
        fs::write(&config.selection_file, list).unwrap();

        RagnarokBuilder::new()
            .config(config)
            .prompter(FixedAnswer(false))
            .build()
            .unwrap()
            .backup()
            .unwrap()
            .expect("selection list is not empty")
    }

    pub fn backup(&self, paths: &[PathBuf]) -> BackupResult {
        self.backup_with(paths, self.config())
    }

    pub fn restore_with(&self, archive: &Path, config: ConfigBuilder, answer: bool) -> RestoreReport {
        RagnarokBuilder::new()
            .config(config.build().unwrap())
            .prompter(FixedAnswer(answer))
            .build()
            .unwrap()
            .restore(archive)
            .unwrap()
    }

    pub fn restore(&self, archive: &Path, policy: ConflictPolicy) -> RestoreReport {
        self.restore_with(archive, self.config().conflict_policy(Some(policy)), false)
    }

    /// Unpack an archive for inspection
    pub fn extract(&self, archive: &Path) -> TempDir {
        let dir = TempDir::new().unwrap();
        compression::extract_archive(archive, dir.path()).unwrap();
        dir
    }
}

impl Default for BackupHarness {
    fn default() -> Self {
        Self::new()
    }
}

fn mode_of(path: &Path) -> u32 {
    fs::symlink_metadata(path).unwrap().permissions().mode() & 0o7777
}

/// The nginx layout from a typical web server
fn nginx_tree(harness: &BackupHarness) -> PathBuf {
    harness.write("etc/nginx/nginx.conf", "user www-data;\nworker_processes auto;\n");
    harness.write("etc/nginx/sites-available/default", "server { listen 80; }\n");
    harness.link("../sites-available/default", "etc/nginx/sites-enabled/default");
    harness.path("etc/nginx")
}

#[test]
fn test_nginx_backup_records_relative_link() {
    let harness = BackupHarness::new();
    let nginx = nginx_tree(&harness);

    let backup = harness.backup(&[nginx.clone()]);
    assert_eq!(backup.symlinks_staged, 1);
    assert_eq!(backup.files_staged, 2);

    let extracted = harness.extract(&backup.archive_path);
    let links: serde_json::Value =
        serde_json::from_str(&fs::read_to_string(extracted.path().join("links.json")).unwrap())
            .unwrap();
    let affiliation: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(extracted.path().join("affiliation.json")).unwrap(),
    )
    .unwrap();
    let permissions: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(extracted.path().join("permissions.json")).unwrap(),
    )
    .unwrap();

    let link_path = nginx.join("sites-enabled/default");
    let key = map_path(&link_path, harness.home.path()).unwrap().relative;
    assert_eq!(links[&key]["target"], "../sites-available/default");
    assert_eq!(links[&key]["is_absolute"], false);
    assert_eq!(affiliation[&key], &*link_path.to_string_lossy());
    assert!(permissions.get(&key).is_none());

    let conf_key = map_path(&nginx.join("nginx.conf"), harness.home.path())
        .unwrap()
        .relative;
    assert!(permissions[&conf_key]["mode"].is_number());
    assert!(extracted.path().join("metadata").is_dir());
}

#[test]
fn test_nginx_restore_recreates_link_not_file() {
    let harness = BackupHarness::new();
    let nginx = nginx_tree(&harness);
    let backup = harness.backup(&[nginx.clone()]);

    fs::remove_dir_all(&nginx).unwrap();
    let report = harness.restore(&backup.archive_path, ConflictPolicy::Overwrite);

    let link = nginx.join("sites-enabled/default");
    assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
    assert_eq!(
        fs::read_link(&link).unwrap(),
        PathBuf::from("../sites-available/default")
    );
    assert_eq!(
        fs::read_to_string(&link).unwrap(),
        "server { listen 80; }\n"
    );
    assert_eq!(report.symlinks_created, 1);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
}

#[test]
fn test_round_trip_preserves_modes_links_and_times() {
    let harness = BackupHarness::new();
    let config = harness.write("app/config.yml", "port: 8080\n");
    let script = harness.write("app/bin/run.sh", "#!/bin/sh\nexec app\n");
    fs::set_permissions(&config, fs::Permissions::from_mode(0o640)).unwrap();
    fs::set_permissions(&script, fs::Permissions::from_mode(0o755)).unwrap();
    fs::set_permissions(harness.path("app/bin"), fs::Permissions::from_mode(0o750)).unwrap();
    let old = FileTime::from_unix_time(1_000_000_000, 0);
    filetime::set_file_mtime(&config, old).unwrap();

    harness.link("bin", "app/current");
    harness.link("config.yml", "app/settings");
    harness.link("/nonexistent/ragnarok/log", "app/log");

    let backup = harness.backup(&[harness.path("app")]);
    assert_eq!(backup.symlinks_staged, 3);

    fs::remove_dir_all(harness.path("app")).unwrap();
    let report = harness.restore(&backup.archive_path, ConflictPolicy::Overwrite);

    assert_eq!(fs::read_to_string(&config).unwrap(), "port: 8080\n");
    assert_eq!(mode_of(&config), 0o640);
    assert_eq!(mode_of(&script), 0o755);
    assert_eq!(mode_of(&harness.path("app/bin")), 0o750);
    let mtime = FileTime::from_last_modification_time(&fs::metadata(&config).unwrap());
    assert_eq!(mtime.unix_seconds(), old.unix_seconds());

    assert_eq!(fs::read_link(harness.path("app/current")).unwrap(), PathBuf::from("bin"));
    assert!(harness.path("app/current/run.sh").is_file());
    assert_eq!(
        fs::read_link(harness.path("app/settings")).unwrap(),
        PathBuf::from("config.yml")
    );
    // Dangling links come back dangling
    assert_eq!(
        fs::read_link(harness.path("app/log")).unwrap(),
        PathBuf::from("/nonexistent/ragnarok/log")
    );
    assert_eq!(report.symlinks_created, 3);
}

#[test]
fn test_second_restore_changes_nothing() {
    let harness = BackupHarness::new();
    let nginx = nginx_tree(&harness);
    let backup = harness.backup(&[nginx.clone()]);
    fs::remove_dir_all(&nginx).unwrap();

    let first = harness.restore(&backup.archive_path, ConflictPolicy::Overwrite);
    assert!(first.mutations() > 0);

    let second = harness.restore(&backup.archive_path, ConflictPolicy::Overwrite);
    assert_eq!(second.mutations(), 0);
    assert_eq!(second.files_restored + second.files_overwritten, 0);
    assert_eq!(second.symlinks_created, 0);
}

#[test]
fn test_identical_file_untouched_even_with_overwrite() {
    let harness = BackupHarness::new();
    let file = harness.write("srv/index.html", "<h1>hi</h1>\n");
    let backup = harness.backup(&[file.clone()]);

    let old = FileTime::from_unix_time(1_200_000_000, 0);
    filetime::set_file_mtime(&file, old).unwrap();
    let report = harness.restore(&backup.archive_path, ConflictPolicy::Overwrite);

    assert_eq!(report.skipped_identical, 1);
    assert_eq!(report.files_overwritten, 0);
    let mtime = FileTime::from_last_modification_time(&fs::metadata(&file).unwrap());
    assert_eq!(mtime.unix_seconds(), old.unix_seconds());
}

#[test]
fn test_conflict_policies_on_modified_file() {
    let harness = BackupHarness::new();
    let file = harness.write("srv/app.env", "MODE=prod\n");
    let backup = harness.backup(&[file.clone()]);
    fs::write(&file, "MODE=dev\n").unwrap();

    let skipped = harness.restore(&backup.archive_path, ConflictPolicy::Skip);
    assert_eq!(skipped.skipped_conflicts, 1);
    assert_eq!(fs::read_to_string(&file).unwrap(), "MODE=dev\n");

    let declined = harness.restore_with(&backup.archive_path, harness.config(), false);
    assert!(declined
        .outcomes
        .iter()
        .any(|o| o.decision == Decision::Skip(SkipReason::Declined)));
    assert_eq!(fs::read_to_string(&file).unwrap(), "MODE=dev\n");

    let overwritten = harness.restore(&backup.archive_path, ConflictPolicy::Overwrite);
    assert_eq!(overwritten.files_overwritten, 1);
    assert_eq!(fs::read_to_string(&file).unwrap(), "MODE=prod\n");
}

#[test]
fn test_prompt_answer_yes_overwrites() {
    let harness = BackupHarness::new();
    let file = harness.write("srv/motd", "welcome\n");
    let backup = harness.backup(&[file.clone()]);
    fs::write(&file, "changed\n").unwrap();

    let report = harness.restore_with(&backup.archive_path, harness.config(), true);
    assert_eq!(report.files_overwritten, 1);
    assert_eq!(fs::read_to_string(&file).unwrap(), "welcome\n");
}

#[test]
fn test_link_created_after_its_target_directory() {
    let harness = BackupHarness::new();
    // "a" sorts before "z", so the link is discovered before its target
    harness.link("../z/data.txt", "tree/a/shortcut");
    harness.write("tree/z/data.txt", "payload\n");
    let backup = harness.backup(&[harness.path("tree")]);

    fs::remove_dir_all(harness.path("tree")).unwrap();
    harness.restore(&backup.archive_path, ConflictPolicy::Overwrite);

    let shortcut = harness.path("tree/a/shortcut");
    assert!(fs::symlink_metadata(&shortcut).unwrap().file_type().is_symlink());
    assert_eq!(fs::read_to_string(&shortcut).unwrap(), "payload\n");
}

#[test]
fn test_path_listed_through_dir_link_keeps_the_link() {
    let harness = BackupHarness::new();
    harness.write("app/v2/config.yml", "port: 8080\n");
    let current = harness.link("v2", "app/current");
    let through_link = harness.path("app/current/config.yml");

    let backup = harness.backup(&[harness.path("app"), through_link.clone()]);
    fs::remove_dir_all(harness.path("app")).unwrap();

    let report = harness.restore(&backup.archive_path, ConflictPolicy::Skip);
    assert!(report.warnings.is_empty(), "{:?}", report.warnings);
    assert!(fs::symlink_metadata(&current).unwrap().file_type().is_symlink());
    assert_eq!(fs::read_link(&current).unwrap(), PathBuf::from("v2"));
    assert_eq!(report.symlinks_created, 1);
    assert_eq!(report.skipped_conflicts, 0);
    assert_eq!(fs::read_to_string(&through_link).unwrap(), "port: 8080\n");

    let again = harness.restore(&backup.archive_path, ConflictPolicy::Overwrite);
    assert_eq!(again.mutations(), 0);
    assert!(fs::symlink_metadata(&current).unwrap().file_type().is_symlink());
}

#[test]
fn test_dry_run_restore_would_ask() {
    let harness = BackupHarness::new();
    let file = harness.write("srv/app.conf", "a=1\n");
    let missing = harness.write("srv/extra.conf", "b=2\n");
    let backup = harness.backup(&[harness.path("srv")]);

    fs::write(&file, "a=2\n").unwrap();
    fs::remove_file(&missing).unwrap();

    let report = harness.restore_with(&backup.archive_path, harness.config().dry_run(true), true);
    assert!(report.simulated);
    assert_eq!(report.pending_prompts, 1);
    assert_eq!(report.mutations(), 0);
    assert!(report.outcomes.iter().all(|o| !o.executed));
    assert_eq!(fs::read_to_string(&file).unwrap(), "a=2\n");
    assert!(!missing.exists());

    // The missing file is planned, not counted as restored
    assert!(report
        .outcomes
        .iter()
        .any(|o| o.decision == Decision::Restore && o.destination == missing));
    assert_eq!(report.files_restored, 0);
    assert_eq!(report.files_overwritten, 0);
    assert_eq!(report.directories_created, 0);
    assert_eq!(report.symlinks_created, 0);
    assert_eq!(report.permissions_applied, 0);
}

#[test]
fn test_dry_run_backup_keeps_structure_without_content() {
    let harness = BackupHarness::new();
    harness.write("site/index.html", "<p>content</p>\n");
    harness.link("index.html", "site/home.html");

    let backup = harness.backup_with(&[harness.path("site")], harness.config().dry_run(true));
    assert!(backup.simulated);
    assert_eq!(backup.bytes_staged, 0);

    let extracted = harness.extract(&backup.archive_path);
    let key = map_path(&harness.path("site/index.html"), harness.home.path())
        .unwrap()
        .relative;
    let staged = extracted.path().join(&key);
    assert!(staged.is_file());
    assert_eq!(fs::metadata(&staged).unwrap().len(), 0);
    assert!(extracted.path().join("links.json").is_file());
}

#[test]
fn test_every_format_round_trips() {
    let mut formats = vec![Compression::None, Compression::Gz, Compression::Zip];
    if which::which("zstd").is_ok() {
        formats.push(Compression::Zstd);
    }

    for format in formats {
        let harness = BackupHarness::new();
        let file = harness.write("etc/hosts", "127.0.0.1 localhost\n");
        harness.link("hosts", "etc/hosts.link");
        let backup = harness.backup_with(&[harness.path("etc")], harness.config().compression(format));
        assert!(
            backup
                .archive_path
                .to_string_lossy()
                .ends_with(format.extension()),
            "{} archive named {:?}",
            format,
            backup.archive_path
        );

        fs::remove_dir_all(harness.path("etc")).unwrap();
        let report = harness.restore(&backup.archive_path, ConflictPolicy::Overwrite);
        assert_eq!(fs::read_to_string(&file).unwrap(), "127.0.0.1 localhost\n", "{}", format);
        assert!(fs::symlink_metadata(harness.path("etc/hosts.link"))
            .unwrap()
            .file_type()
            .is_symlink());
        assert_eq!(report.files_restored, 1, "{}", format);
    }
}

#[test]
fn test_output_dir_override() {
    let harness = BackupHarness::new();
    let out = TempDir::new().unwrap();
    let target = out.path().join("nested/backups");
    let file = harness.write("x.txt", "x");

    let backup = harness.backup_with(&[file], harness.config().output_dir(&target));
    assert_eq!(backup.archive_path.parent().unwrap(), target.as_path());
    let name = backup.archive_path.file_name().unwrap().to_string_lossy().into_owned();
    assert!(name.starts_with("backup_") && name.ends_with(".tar"), "{}", name);
}

#[test]
fn test_missing_paths_are_warnings() {
    let harness = BackupHarness::new();
    let file = harness.write("real.txt", "here");
    let gone = harness.path("gone.txt");

    let backup = harness.backup(&[gone.clone(), file]);
    assert_eq!(backup.files_staged, 1);
    assert!(backup
        .warnings
        .iter()
        .any(|w| w.contains(&*gone.to_string_lossy())));
}

#[test]
fn test_archive_without_manifest_is_fatal() {
    let harness = BackupHarness::new();
    let archive = harness.path("foreign.tar");
    {
        let mut builder = tar::Builder::new(fs::File::create(&archive).unwrap());
        let payload = harness.write("payload.txt", "not a backup");
        builder.append_path_with_name(&payload, "payload.txt").unwrap();
        builder.finish().unwrap();
    }

    let err = RagnarokBuilder::new()
        .config(harness.config().conflict_policy(Some(ConflictPolicy::Skip)).build().unwrap())
        .build()
        .unwrap()
        .restore(&archive)
        .unwrap_err();
    assert!(matches!(err, RagnarokError::MissingManifest(_)));
    assert!(err.is_fatal());
}

#[test]
fn test_affiliation_only_archive_restores_content() -> anyhow::Result<()> {
    let harness = BackupHarness::new();
    let destination = harness.path("legacy/notes.txt");
    let key = map_path(&destination, harness.home.path())?.relative;

    let stage = TempDir::new()?;
    let staged = stage.path().join(&key);
    fs::create_dir_all(staged.parent().unwrap())?;
    fs::write(&staged, "from an older release\n")?;
    fs::write(
        stage.path().join("affiliation.json"),
        serde_json::to_string_pretty(&serde_json::json!({ key.clone(): destination }))?,
    )?;

    let archive = harness.path("legacy.tar");
    {
        let mut builder = tar::Builder::new(fs::File::create(&archive)?);
        builder.append_dir_all(".", stage.path())?;
        builder.finish()?;
    }

    let report = harness.restore(&archive, ConflictPolicy::Overwrite);
    assert_eq!(fs::read_to_string(&destination)?, "from an older release\n");
    assert_eq!(report.files_restored, 1);
    assert_eq!(report.permissions_applied, 0);
    Ok(())
}

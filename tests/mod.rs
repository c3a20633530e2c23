//! Main test module for ragnarok
//!
//! This module includes all test suites:
//! - Integration tests for backup and restore scenarios
//! - Property-based tests for invariants
//! - Edge cases around names, permissions and special files

pub mod integration;
pub mod property;

#[cfg(test)]
mod edge_cases {
    use super::integration::BackupHarness;
    use ::ragnarok::*;
    use std::fs;
    use std::os::unix::fs::PermissionsExt;

    #[test]
    fn test_special_filenames() {
        let harness = BackupHarness::new();

        let special_names = vec![
            "file with spaces.txt",
            "file-with-dashes.txt",
            "file.with.dots.txt",
            "file@with#special$chars.txt",
            "file(with)parens.txt",
            "file[with]brackets.txt",
            "file{with}braces.txt",
            ".hidden",
        ];
        for name in &special_names {
            harness.write(&format!("special/{}", name), &format!("Content of {}", name));
        }

        let backup = harness.backup(&[harness.path("special")]);
        assert_eq!(backup.files_staged, special_names.len());

        fs::remove_dir_all(harness.path("special")).unwrap();
        harness.restore(&backup.archive_path, ConflictPolicy::Overwrite);

        for name in &special_names {
            let content = fs::read_to_string(harness.path(&format!("special/{}", name))).unwrap();
            assert_eq!(content, format!("Content of {}", name));
        }
    }

    #[test]
    fn test_unicode_filenames() {
        let harness = BackupHarness::new();

        let unicode_names = vec![
            "файл.txt",
            "文件.txt",
            "ファイル.txt",
            "αρχείο.txt",
            "🚀🌟💾.txt",
        ];
        for name in &unicode_names {
            harness.write(&format!("unicode/{}", name), &format!("Unicode content: {}", name));
        }

        let backup = harness.backup(&[harness.path("unicode")]);
        fs::remove_dir_all(harness.path("unicode")).unwrap();
        let report = harness.restore(&backup.archive_path, ConflictPolicy::Overwrite);
        assert_eq!(report.files_restored, unicode_names.len());

        for name in &unicode_names {
            let content = fs::read_to_string(harness.path(&format!("unicode/{}", name))).unwrap();
            assert_eq!(content, format!("Unicode content: {}", name));
        }
    }

    #[test]
    fn test_permission_preservation() {
        let harness = BackupHarness::new();

        let files = vec![
            ("readable.txt", 0o644),
            ("executable.sh", 0o755),
            ("readonly.txt", 0o444),
            ("useronly.txt", 0o600),
        ];
        for (name, mode) in &files {
            let path = harness.write(&format!("perms/{}", name), name);
            fs::set_permissions(&path, fs::Permissions::from_mode(*mode)).unwrap();
        }

        let backup = harness.backup(&[harness.path("perms")]);

        for (name, _) in &files {
            let path = harness.path(&format!("perms/{}", name));
            fs::set_permissions(&path, fs::Permissions::from_mode(0o666)).unwrap();
        }

        let report = harness.restore(&backup.archive_path, ConflictPolicy::Skip);
        assert_eq!(report.skipped_identical, files.len() + 1);

        for (name, expected_mode) in &files {
            let path = harness.path(&format!("perms/{}", name));
            let actual_mode = fs::metadata(&path).unwrap().permissions().mode() & 0o7777;
            assert_eq!(
                actual_mode, *expected_mode,
                "Permission mismatch for file {}: expected {:o}, got {:o}",
                name, expected_mode, actual_mode
            );
        }
    }

    #[test]
    fn test_permission_pass_disabled() {
        let harness = BackupHarness::new();
        let path = harness.write("noperm/file.txt", "x");
        fs::set_permissions(&path, fs::Permissions::from_mode(0o600)).unwrap();
        let backup = harness.backup(&[path.clone()]);

        fs::set_permissions(&path, fs::Permissions::from_mode(0o644)).unwrap();
        let report = harness.restore_with(
            &backup.archive_path,
            harness
                .config()
                .conflict_policy(Some(ConflictPolicy::Overwrite))
                .apply_permissions(false),
            false,
        );

        assert_eq!(report.permissions_applied, 0);
        assert_eq!(fs::metadata(&path).unwrap().permissions().mode() & 0o777, 0o644);
    }

    #[test]
    fn test_empty_directory_preserved() {
        let harness = BackupHarness::new();
        fs::create_dir_all(harness.path("spool/empty")).unwrap();

        let backup = harness.backup(&[harness.path("spool")]);
        assert_eq!(backup.directories_staged, 2);

        fs::remove_dir_all(harness.path("spool")).unwrap();
        let report = harness.restore(&backup.archive_path, ConflictPolicy::Overwrite);
        assert!(harness.path("spool/empty").is_dir());
        assert_eq!(report.directories_created, 2);
    }

    #[test]
    fn test_symlink_over_plain_file_respects_policy() {
        let harness = BackupHarness::new();
        harness.write("links/target.txt", "target");
        let link = harness.link("target.txt", "links/alias");
        let backup = harness.backup(&[harness.path("links")]);

        // Somebody replaced the link with a regular file
        fs::remove_file(&link).unwrap();
        fs::write(&link, "not a link").unwrap();

        harness.restore(&backup.archive_path, ConflictPolicy::Skip);
        assert!(!fs::symlink_metadata(&link).unwrap().file_type().is_symlink());

        harness.restore(&backup.archive_path, ConflictPolicy::Overwrite);
        assert!(fs::symlink_metadata(&link).unwrap().file_type().is_symlink());
        assert_eq!(fs::read_to_string(&link).unwrap(), "target");
    }
}

// Re-export test utilities for use in other suites
pub use integration::BackupHarness;
